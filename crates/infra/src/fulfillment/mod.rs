//! Fulfillment engine: the application services behind the HTTP contract.
//!
//! Every operation is synchronous and thread-safe. Multi-stream flows take the
//! owning order's lock, run state-machine checks before any ledger call, and
//! undo ledger steps through a [`CompensationLog`](crate::compensation::CompensationLog)
//! when a later step fails.

pub mod inventory;
pub mod orders;
pub mod purchasing;
pub mod shipments;
pub mod views;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use stockflow_core::{Aggregate, AggregateId, DomainError};
use stockflow_events::EventEnvelope;
use stockflow_sales::{SalesOrder, SalesOrderId};
use stockflow_shipping::ShippingCalendar;

use crate::command_dispatcher::{DispatchError, Dispatched, RetryPolicy};
use crate::event_store::{EventStore, StoredEvent};
use crate::ledger::InventoryLedger;
use crate::locks::KeyedLocks;
use crate::projections::SalesOrdersProjection;
use crate::read_model::{InMemoryReadStore, ReferenceData};
use crate::workers::{ProjectionWorker, WorkerHandle};
use crate::{Dispatcher, EnvelopeBus};

pub use inventory::{AvailabilityView, ReceiptRequest};
pub use orders::{CreateOrderRequest, OrderLineRequest};
pub use purchasing::{CreatePurchaseOrderRequest, PurchaseLineRequest};
pub use shipments::CreateShipmentRequest;
pub use views::{PurchaseOrderView, SalesOrderLineView, SalesOrderView, ShipmentView};

pub type OrderProjection = SalesOrdersProjection<InMemoryReadStore<SalesOrderId, SalesOrder>>;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// How long a reservation holds stock before the sweeper may release it.
    /// `None` disables holds.
    pub reservation_hold: Option<Duration>,
    pub calendar: ShippingCalendar,
    pub ledger_retry: RetryPolicy,
    pub lock_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            reservation_hold: Some(Duration::from_secs(1800)),
            calendar: ShippingCalendar::default(),
            ledger_retry: RetryPolicy::default(),
            lock_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
pub struct FulfillmentEngine {
    dispatcher: Arc<Dispatcher>,
    ledger: InventoryLedger,
    reference: Arc<ReferenceData>,
    projection: Arc<OrderProjection>,
    order_locks: KeyedLocks<AggregateId>,
    purchase_locks: KeyedLocks<AggregateId>,
    settings: EngineSettings,
}

impl FulfillmentEngine {
    pub fn new(
        store: Arc<dyn EventStore>,
        bus: Arc<EnvelopeBus>,
        reference: Arc<ReferenceData>,
        settings: EngineSettings,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(store, bus));
        Self {
            ledger: InventoryLedger::new(dispatcher.clone(), settings.ledger_retry),
            dispatcher,
            reference,
            projection: Arc::new(SalesOrdersProjection::new(InMemoryReadStore::new())),
            order_locks: KeyedLocks::new(settings.lock_timeout),
            purchase_locks: KeyedLocks::new(settings.lock_timeout),
            settings,
        }
    }

    pub fn ledger(&self) -> &InventoryLedger {
        &self.ledger
    }

    pub fn reference(&self) -> &ReferenceData {
        &self.reference
    }

    pub fn projection(&self) -> &Arc<OrderProjection> {
        &self.projection
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Replay every stored sales order into the projection, replacing its
    /// contents. Run before [`start_projection_worker`](Self::start_projection_worker)
    /// so orders written by an earlier process are listed and swept.
    /// Returns the number of events replayed.
    #[instrument(skip(self), err)]
    pub fn rebuild_projection(&self) -> Result<usize, DispatchError> {
        let envelopes: Vec<_> = self
            .dispatcher
            .store()
            .load_by_aggregate_type(orders::SALES_ORDER_AGGREGATE_TYPE)?
            .iter()
            .map(StoredEvent::to_envelope)
            .collect();
        let replayed = envelopes.len();
        self.projection
            .rebuild_from_scratch(envelopes)
            .map_err(|e| DispatchError::InvariantViolation(format!("projection rebuild: {e}")))?;
        info!(
            events = replayed,
            orders = self.projection.list(None).len(),
            "sales order projection rebuilt"
        );
        Ok(replayed)
    }

    /// Feed the sales-order projection from the bus on a background thread.
    pub fn start_projection_worker(&self) -> std::io::Result<WorkerHandle> {
        let projection = self.projection.clone();
        ProjectionWorker::spawn(
            "sales-orders-projection",
            self.dispatcher.bus().clone(),
            move |env: EventEnvelope<JsonValue>| projection.apply_envelope(&env),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn load<A>(&self, aggregate_id: AggregateId, make: impl FnOnce() -> A) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        self.dispatcher.load(aggregate_id, make)
    }

    fn execute<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make: impl FnOnce() -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockflow_events::Event + Serialize + DeserializeOwned,
    {
        self.dispatcher
            .dispatch(aggregate_id, aggregate_type, &command, make)
            .map(|Dispatched { aggregate, .. }| aggregate)
    }
}
