//! Carrier-day slot bookings.
//!
//! Each (carrier, date) pair is its own stream, so concurrent bookings for the
//! same day serialize on the stream version and can never exceed capacity.

use std::collections::BTreeSet;
use std::ops::Add;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{Aggregate, AggregateId, AggregateRoot, CarrierId, DomainError};
use stockflow_events::Event;

/// Derived capacity view of one carrier day (or a sum over carriers).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotCapacity {
    pub capacity: u32,
    pub used: u32,
    pub available: u32,
}

impl SlotCapacity {
    pub fn new(capacity: u32, used: u32) -> Self {
        Self {
            capacity,
            used,
            available: capacity.saturating_sub(used),
        }
    }
}

impl Add for SlotCapacity {
    type Output = SlotCapacity;

    fn add(self, rhs: Self) -> Self::Output {
        SlotCapacity {
            capacity: self.capacity + rhs.capacity,
            used: self.used + rhs.used,
            available: self.available + rhs.available,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CarrierDayKey {
    pub carrier_id: CarrierId,
    pub date: NaiveDate,
}

impl CarrierDayKey {
    pub fn new(carrier_id: CarrierId, date: NaiveDate) -> Self {
        Self { carrier_id, date }
    }
}

/// Stream id of a carrier day, derived from its key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CarrierDayId(pub AggregateId);

impl CarrierDayId {
    pub fn for_key(key: CarrierDayKey) -> Self {
        Self(AggregateId::derived_with(
            "carrier-day",
            &[key.carrier_id.as_uuid()],
            &key.date.format("%Y-%m-%d").to_string(),
        ))
    }
}

/// Aggregate root: the set of shipments holding a slot on one carrier day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarrierDay {
    id: CarrierDayId,
    key: CarrierDayKey,
    booked: BTreeSet<AggregateId>,
    version: u64,
}

impl CarrierDay {
    pub fn empty(key: CarrierDayKey) -> Self {
        Self {
            id: CarrierDayId::for_key(key),
            key,
            booked: BTreeSet::new(),
            version: 0,
        }
    }

    pub fn key(&self) -> CarrierDayKey {
        self.key
    }

    pub fn used(&self) -> u32 {
        u32::try_from(self.booked.len()).unwrap_or(u32::MAX)
    }

    pub fn is_booked(&self, shipment_id: AggregateId) -> bool {
        self.booked.contains(&shipment_id)
    }

    pub fn capacity(&self, daily_capacity: u32) -> SlotCapacity {
        SlotCapacity::new(daily_capacity, self.used())
    }
}

impl AggregateRoot for CarrierDay {
    type Id = CarrierDayId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: BookSlot. `capacity` is the carrier's current daily capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSlot {
    pub key: CarrierDayKey,
    pub shipment_id: AggregateId,
    pub capacity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseSlot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSlot {
    pub key: CarrierDayKey,
    pub shipment_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotCommand {
    BookSlot(BookSlot),
    ReleaseSlot(ReleaseSlot),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMovement {
    pub key: CarrierDayKey,
    pub shipment_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotEvent {
    SlotBooked(SlotMovement),
    SlotReleased(SlotMovement),
}

impl Event for SlotEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SlotEvent::SlotBooked(_) => "shipping.slot.booked",
            SlotEvent::SlotReleased(_) => "shipping.slot.released",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SlotEvent::SlotBooked(e) | SlotEvent::SlotReleased(e) => e.occurred_at,
        }
    }
}

impl Aggregate for CarrierDay {
    type Command = SlotCommand;
    type Event = SlotEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SlotEvent::SlotBooked(e) => {
                self.booked.insert(e.shipment_id);
            }
            SlotEvent::SlotReleased(e) => {
                self.booked.remove(&e.shipment_id);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SlotCommand::BookSlot(cmd) => {
                if cmd.key != self.key {
                    return Err(DomainError::invariant("carrier day key mismatch"));
                }
                // Rebooking the same shipment is a no-op.
                if self.is_booked(cmd.shipment_id) {
                    return Ok(Vec::new());
                }
                if self.capacity(cmd.capacity).available == 0 {
                    return Err(DomainError::capacity_exceeded(format!(
                        "carrier {} has no free slot on {}",
                        self.key.carrier_id, self.key.date
                    )));
                }
                Ok(vec![SlotEvent::SlotBooked(SlotMovement {
                    key: cmd.key,
                    shipment_id: cmd.shipment_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            SlotCommand::ReleaseSlot(cmd) => {
                if cmd.key != self.key {
                    return Err(DomainError::invariant("carrier day key mismatch"));
                }
                if !self.is_booked(cmd.shipment_id) {
                    return Ok(Vec::new());
                }
                Ok(vec![SlotEvent::SlotReleased(SlotMovement {
                    key: cmd.key,
                    shipment_id: cmd.shipment_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CarrierDayKey {
        CarrierDayKey::new(CarrierId::new(), NaiveDate::from_ymd_opt(2026, 5, 4).unwrap())
    }

    fn book(day: &mut CarrierDay, shipment_id: AggregateId, capacity: u32) -> Result<(), DomainError> {
        let events = day.handle(&SlotCommand::BookSlot(BookSlot {
            key: day.key(),
            shipment_id,
            capacity,
            occurred_at: Utc::now(),
        }))?;
        for e in &events {
            day.apply(e);
        }
        Ok(())
    }

    #[test]
    fn booking_stops_at_capacity() {
        let mut day = CarrierDay::empty(key());
        book(&mut day, AggregateId::new(), 2).unwrap();
        book(&mut day, AggregateId::new(), 2).unwrap();

        let err = book(&mut day, AggregateId::new(), 2).unwrap_err();
        assert!(matches!(err, DomainError::CapacityExceeded(_)));
        assert_eq!(day.capacity(2), SlotCapacity::new(2, 2));
        assert_eq!(day.capacity(2).available, 0);
    }

    #[test]
    fn rebooking_and_unknown_release_are_noops() {
        let mut day = CarrierDay::empty(key());
        let s = AggregateId::new();
        book(&mut day, s, 1).unwrap();
        book(&mut day, s, 1).unwrap();
        assert_eq!(day.version(), 1);

        let events = day
            .handle(&SlotCommand::ReleaseSlot(ReleaseSlot {
                key: day.key(),
                shipment_id: AggregateId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn release_frees_a_slot() {
        let mut day = CarrierDay::empty(key());
        let s = AggregateId::new();
        book(&mut day, s, 1).unwrap();
        let events = day
            .handle(&SlotCommand::ReleaseSlot(ReleaseSlot {
                key: day.key(),
                shipment_id: s,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        for e in &events {
            day.apply(e);
        }
        assert_eq!(day.capacity(1).available, 1);
        book(&mut day, AggregateId::new(), 1).unwrap();
    }

    #[test]
    fn shrunk_capacity_reports_zero_available() {
        let mut day = CarrierDay::empty(key());
        book(&mut day, AggregateId::new(), 3).unwrap();
        book(&mut day, AggregateId::new(), 3).unwrap();
        assert_eq!(day.capacity(1), SlotCapacity { capacity: 1, used: 2, available: 0 });
    }

    #[test]
    fn day_ids_differ_by_date() {
        let k = key();
        let next = CarrierDayKey::new(k.carrier_id, k.date.succ_opt().unwrap());
        assert_ne!(CarrierDayId::for_key(k), CarrierDayId::for_key(next));
    }

    #[test]
    fn capacities_sum() {
        let total = SlotCapacity::new(3, 1) + SlotCapacity::new(2, 2);
        assert_eq!(total, SlotCapacity { capacity: 5, used: 3, available: 2 });
    }
}
