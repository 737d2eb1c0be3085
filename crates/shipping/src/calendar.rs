//! Dispatch cut-off rule.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};

use stockflow_core::DomainError;

/// Daily cut-off (UTC) and how far ahead a late same-day request may roll.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ShippingCalendar {
    pub cutoff: NaiveTime,
    pub horizon_days: u32,
}

impl Default for ShippingCalendar {
    fn default() -> Self {
        Self {
            cutoff: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default(),
            horizon_days: 14,
        }
    }
}

impl ShippingCalendar {
    pub fn new(cutoff: NaiveTime, horizon_days: u32) -> Self {
        Self {
            cutoff,
            horizon_days,
        }
    }

    /// Dates to try, in order, for a shipment requested on `requested` at `now`.
    ///
    /// - A past date is a validation error.
    /// - A same-day request at or after the cut-off yields the following days up to
    ///   the horizon; the caller books the first with a free slot.
    /// - Anything else is the requested date only.
    pub fn candidate_dates(
        &self,
        requested: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<NaiveDate>, DomainError> {
        let today = now.date_naive();
        if requested < today {
            return Err(DomainError::validation(format!(
                "plannedDate {requested} is in the past"
            )));
        }
        if requested > today || now.time() < self.cutoff {
            return Ok(vec![requested]);
        }

        Ok((1..=u64::from(self.horizon_days))
            .filter_map(|n| today.checked_add_days(Days::new(n)))
            .collect())
    }
}
