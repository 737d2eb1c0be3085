use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use stockflow_core::{Aggregate, AggregateId};
use stockflow_events::EventEnvelope;
use stockflow_sales::{SalesOrder, SalesOrderEvent, SalesOrderId, SalesOrderStatus};

use crate::fulfillment::SalesOrderView;
use crate::fulfillment::orders::SALES_ORDER_AGGREGATE_TYPE;
use crate::read_model::ReadStore;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SalesOrderProjectionError {
    #[error("failed to deserialize sales order event: {0}")]
    Deserialize(String),
    #[error("event order_id does not match envelope aggregate_id")]
    StreamMismatch,
    #[error("sequence gap on {aggregate_id} (last={last}, found={found})")]
    SequenceGap {
        aggregate_id: AggregateId,
        last: u64,
        found: u64,
    },
}

/// Query side of sales orders: lists, status filters and the hold sweeper's
/// view of expired reservations.
///
/// Folds the same events as the aggregate, so a replica is exactly the
/// aggregate state as of the last applied sequence number. Envelopes at or
/// below the cursor are skipped (at-least-once delivery).
#[derive(Debug)]
pub struct SalesOrdersProjection<S>
where
    S: ReadStore<SalesOrderId, SalesOrder>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> SalesOrdersProjection<S>
where
    S: ReadStore<SalesOrderId, SalesOrder>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    fn cursor(&self, aggregate_id: AggregateId) -> u64 {
        self.cursors
            .read()
            .ok()
            .and_then(|c| c.get(&aggregate_id).copied())
            .unwrap_or(0)
    }

    fn set_cursor(&self, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(aggregate_id, seq);
        }
    }

    pub fn get(&self, order_id: SalesOrderId) -> Option<SalesOrderView> {
        self.store.get(&order_id).map(|o| SalesOrderView::from(&o))
    }

    /// Orders, oldest first, optionally filtered by status.
    pub fn list(&self, status: Option<SalesOrderStatus>) -> Vec<SalesOrderView> {
        let mut orders: Vec<_> = self
            .store
            .list()
            .into_iter()
            .filter(|o| status.map_or(true, |s| o.status() == s))
            .collect();
        orders.sort_by_key(|o| (o.created_at(), o.id_typed().0));
        orders.iter().map(SalesOrderView::from).collect()
    }

    /// Orders whose reservation hold has lapsed at `now`.
    pub fn expired_holds(&self, now: DateTime<Utc>) -> Vec<SalesOrderId> {
        let mut ids: Vec<_> = self
            .store
            .list()
            .into_iter()
            .filter(|o| o.hold_expired(now))
            .map(|o| o.id_typed())
            .collect();
        ids.sort_by_key(|id| id.0);
        ids
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), SalesOrderProjectionError> {
        if envelope.aggregate_type() != SALES_ORDER_AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        let last = self.cursor(aggregate_id);
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 {
            return Err(SalesOrderProjectionError::SequenceGap {
                aggregate_id,
                last,
                found: seq,
            });
        }

        let ev: SalesOrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| SalesOrderProjectionError::Deserialize(e.to_string()))?;

        let order_id = SalesOrderId::new(aggregate_id);
        if let SalesOrderEvent::SalesOrderCreated(created) = &ev {
            if created.order_id != order_id {
                return Err(SalesOrderProjectionError::StreamMismatch);
            }
        }

        let mut order = self
            .store
            .get(&order_id)
            .unwrap_or_else(|| SalesOrder::empty(order_id));
        order.apply(&ev);
        self.store.upsert(order_id, order);

        self.set_cursor(aggregate_id, seq);
        Ok(())
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), SalesOrderProjectionError> {
        self.store.clear();
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (e.aggregate_id(), e.sequence_number()));
        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    use stockflow_core::{ProductId, WarehouseId};
    use stockflow_inventory::AllocationInfo;
    use stockflow_sales::{NewOrderLine, OrderMarker, ReservationRecorded, SalesOrderCreated};

    use crate::read_model::InMemoryReadStore;

    fn envelope(order_id: SalesOrderId, seq: u64, ev: &SalesOrderEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            order_id.0,
            SALES_ORDER_AGGREGATE_TYPE.to_string(),
            seq,
            serde_json::to_value(ev).unwrap(),
        )
    }

    fn history(order_id: SalesOrderId, product: ProductId, hold_until: DateTime<Utc>) -> Vec<SalesOrderEvent> {
        let now = Utc::now();
        vec![
            SalesOrderEvent::SalesOrderCreated(SalesOrderCreated {
                order_id,
                client_ref: "ACME-7".into(),
                lines: vec![NewOrderLine {
                    product_id: product,
                    quantity: 3,
                    unit_price: 100,
                }],
                preferred_warehouse_id: None,
                created_by: None,
                occurred_at: now,
            }),
            SalesOrderEvent::OrderConfirmed(OrderMarker {
                order_id,
                occurred_at: now,
            }),
            SalesOrderEvent::ReservationRecorded(ReservationRecorded {
                order_id,
                allocations: vec![AllocationInfo {
                    warehouse_id: WarehouseId::new(),
                    product_id: product,
                    allocated_qty: 3,
                }],
                fully_reserved: true,
                hold_until: Some(hold_until),
                occurred_at: now,
            }),
        ]
    }

    #[test]
    fn folds_events_and_skips_duplicates() {
        let projection = SalesOrdersProjection::new(InMemoryReadStore::new());
        let order_id = SalesOrderId::new(AggregateId::new());
        let events = history(order_id, ProductId::new(), Utc::now() + Duration::hours(1));

        for (i, ev) in events.iter().enumerate() {
            let env = envelope(order_id, i as u64 + 1, ev);
            projection.apply_envelope(&env).unwrap();
            projection.apply_envelope(&env).unwrap();
        }

        let view = projection.get(order_id).unwrap();
        assert_eq!(view.status, SalesOrderStatus::Reserved);
        assert_eq!(view.lines[0].reserved_qty, 3);
        assert_eq!(projection.list(Some(SalesOrderStatus::Reserved)).len(), 1);
        assert!(projection.list(Some(SalesOrderStatus::Canceled)).is_empty());
    }

    #[test]
    fn gaps_are_rejected() {
        let projection = SalesOrdersProjection::new(InMemoryReadStore::new());
        let order_id = SalesOrderId::new(AggregateId::new());
        let events = history(order_id, ProductId::new(), Utc::now());

        let err = projection
            .apply_envelope(&envelope(order_id, 2, &events[1]))
            .unwrap_err();
        assert!(matches!(err, SalesOrderProjectionError::SequenceGap { last: 0, found: 2, .. }));
    }

    #[test]
    fn expired_holds_are_listed() {
        let projection = SalesOrdersProjection::new(InMemoryReadStore::new());
        let past = Utc::now() - Duration::minutes(5);
        let (stale, fresh) = (
            SalesOrderId::new(AggregateId::new()),
            SalesOrderId::new(AggregateId::new()),
        );

        let mut envs = Vec::new();
        for (id, hold) in [(stale, past), (fresh, Utc::now() + Duration::hours(2))] {
            for (i, ev) in history(id, ProductId::new(), hold).iter().enumerate() {
                envs.push(envelope(id, i as u64 + 1, ev));
            }
        }
        projection.rebuild_from_scratch(envs.into_iter().rev()).unwrap();

        assert_eq!(projection.expired_holds(Utc::now()), vec![stale]);
        assert_eq!(projection.list(None).len(), 2);
    }
}
