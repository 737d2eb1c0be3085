//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! Command
//!   -> load stream
//!   -> rehydrate (apply history)
//!   -> handle (pure decision, produces events)
//!   -> append with ExpectedVersion::Exact(stream version)
//!   -> publish committed envelopes
//! ```
//!
//! Events are persisted before publication, so a publish failure after a
//! successful append leaves the events durable (at-least-once delivery): it is
//! logged and the dispatch still succeeds.
//! Contended streams (stock keys, carrier days) go through
//! [`CommandDispatcher::dispatch_with_retry`], which replays the whole pipeline
//! on a concurrency conflict and gives up with `LockTimeout`.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use stockflow_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use stockflow_events::{EventBus, EventEnvelope};
use stockflow_inventory::BackorderInfo;

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure (stale stream version).
    #[error("concurrent modification: {0}")]
    Concurrency(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// Always a bug or corrupted state; surfaced as a server error.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient stock: {0}")]
    InsufficientStock(String),

    /// All-or-nothing reservation could not cover every line; nothing was kept.
    #[error("insufficient stock for {} line(s)", .0.len())]
    ReservationShortfall(Vec<BackorderInfo>),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("invalid reception quantity: {0}")]
    InvalidReceptionQuantity(String),

    /// A contended key could not be acquired within its budget. Transient.
    #[error("lock timeout: {0}")]
    LockTimeout(String),

    /// Historical payloads could not be decoded into the aggregate's event type.
    #[error("event deserialization failed: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),
}

impl DispatchError {
    /// Transient failures a caller may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Concurrency(_) | DispatchError::LockTimeout(_))
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                DispatchError::Validation(msg)
            }
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::NotFound(msg) => DispatchError::NotFound(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::InsufficientStock(msg) => DispatchError::InsufficientStock(msg),
            DomainError::CapacityExceeded(msg) => DispatchError::CapacityExceeded(msg),
            DomainError::InvalidStateTransition(msg) => DispatchError::InvalidStateTransition(msg),
            DomainError::InvalidReceptionQuantity(msg) => {
                DispatchError::InvalidReceptionQuantity(msg)
            }
        }
    }
}

/// Bounded optimistic retry: `max_attempts` tries, sleeping `base_backoff * 2^n`
/// (capped) between them.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_backoff: Duration::from_millis(2),
        }
    }
}

impl RetryPolicy {
    const MAX_BACKOFF: Duration = Duration::from_millis(250);

    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(Self::MAX_BACKOFF)
            .min(Self::MAX_BACKOFF)
    }
}

/// An aggregate after a dispatch, with the events that command appended.
#[derive(Debug)]
pub struct Dispatched<A: Aggregate> {
    pub aggregate: A,
    pub events: Vec<A::Event>,
    pub committed: Vec<StoredEvent>,
}

#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate an aggregate from its stream without running a command.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce() -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let mut aggregate = make_aggregate();
        apply_history(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Run one command through the pipeline, once.
    ///
    /// Returns the aggregate with the new events applied. A command that decides
    /// no events appends nothing and publishes nothing.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: impl FnOnce() -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockflow_events::Event + Serialize + DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        let mut aggregate = make_aggregate();
        apply_history(&mut aggregate, &history)?;

        let decided = aggregate.handle(command)?;
        if decided.is_empty() {
            return Ok(Dispatched {
                aggregate,
                events: decided,
                committed: Vec::new(),
            });
        }

        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;
        for ev in &decided {
            aggregate.apply(ev);
        }

        // The append is durable; subscribers catch up from the store.
        for stored in &committed {
            if let Err(err) = self.bus.publish(stored.to_envelope()) {
                tracing::error!(
                    aggregate_type,
                    aggregate_id = %aggregate_id,
                    sequence_number = stored.sequence_number,
                    error = ?err,
                    "event publication failed after append"
                );
            }
        }

        Ok(Dispatched {
            aggregate,
            events: decided,
            committed,
        })
    }

    /// [`dispatch`](Self::dispatch) with bounded retry on concurrency conflicts.
    ///
    /// Every attempt reloads the stream and re-decides, so a retried reserve sees
    /// the stock another writer just took. Exhausting the budget yields `LockTimeout`.
    pub fn dispatch_with_retry<A>(
        &self,
        policy: RetryPolicy,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: impl Fn() -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockflow_events::Event + Serialize + DeserializeOwned,
    {
        let attempts = policy.max_attempts.max(1);
        for attempt in 0..attempts {
            match self.dispatch(aggregate_id, aggregate_type, command, &make_aggregate) {
                Err(DispatchError::Concurrency(msg)) => {
                    tracing::debug!(
                        aggregate_type,
                        aggregate_id = %aggregate_id,
                        attempt,
                        error = %msg,
                        "optimistic conflict, retrying"
                    );
                    if attempt + 1 < attempts {
                        std::thread::sleep(policy.backoff(attempt));
                    }
                }
                other => return other,
            }
        }

        tracing::warn!(
            aggregate_type,
            aggregate_id = %aggregate_id,
            attempts,
            "retry budget exhausted"
        );
        Err(DispatchError::LockTimeout(format!(
            "{aggregate_type} {aggregate_id} still contended after {attempts} attempts"
        )))
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use stockflow_core::{AggregateRoot, ProductId, WarehouseId};
    use stockflow_events::InMemoryEventBus;
    use stockflow_inventory::{StockCommand, StockKey, StockMovement, StockRecord};

    use crate::event_store::InMemoryEventStore;

    type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn dispatcher() -> Dispatcher {
        CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryEventBus::new()))
    }

    fn key() -> StockKey {
        StockKey::new(ProductId::new(), WarehouseId::new())
    }

    fn run(d: &Dispatcher, k: StockKey, cmd: StockCommand) -> Result<Dispatched<StockRecord>, DispatchError> {
        d.dispatch(k.record_id().0, "inventory.stock", &cmd, || StockRecord::empty(k))
    }

    #[test]
    fn dispatch_persists_publishes_and_returns_state() {
        let d = dispatcher();
        let sub = d.bus().subscribe();
        let k = key();

        let out = run(&d, k, StockCommand::Receive(StockMovement::new(k, 5, Utc::now()))).unwrap();
        assert_eq!(out.aggregate.on_hand(), 5);
        assert_eq!(out.committed.len(), 1);

        let env = sub.try_recv().unwrap();
        assert_eq!(env.sequence_number(), 1);
        assert_eq!(env.aggregate_id(), k.record_id().0);
    }

    #[derive(Debug)]
    struct ClosedBus;

    impl EventBus<EventEnvelope<JsonValue>> for ClosedBus {
        type Error = &'static str;

        fn publish(&self, _message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
            Err("bus closed")
        }

        fn subscribe(&self) -> stockflow_events::Subscription<EventEnvelope<JsonValue>> {
            let (_tx, rx) = std::sync::mpsc::channel();
            stockflow_events::Subscription::new(rx)
        }
    }

    #[test]
    fn publish_failure_after_append_still_succeeds() {
        let d = CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), ClosedBus);
        let k = key();

        let cmd = StockCommand::Receive(StockMovement::new(k, 5, Utc::now()));
        let out = d
            .dispatch(k.record_id().0, "inventory.stock", &cmd, || StockRecord::empty(k))
            .unwrap();
        assert_eq!(out.aggregate.on_hand(), 5);
        assert_eq!(d.store().load_stream(k.record_id().0).unwrap().len(), 1);
    }

    #[test]
    fn domain_errors_map_and_append_nothing() {
        let d = dispatcher();
        let k = key();

        let err = run(&d, k, StockCommand::Reserve(StockMovement::new(k, 1, Utc::now()))).unwrap_err();
        assert!(matches!(err, DispatchError::InsufficientStock(_)));
        assert!(d.store().load_stream(k.record_id().0).unwrap().is_empty());
    }

    #[test]
    fn load_rehydrates_from_history() {
        let d = dispatcher();
        let k = key();
        run(&d, k, StockCommand::Receive(StockMovement::new(k, 7, Utc::now()))).unwrap();
        run(&d, k, StockCommand::Reserve(StockMovement::new(k, 3, Utc::now()))).unwrap();

        let record = d.load(k.record_id().0, || StockRecord::empty(k)).unwrap();
        assert_eq!(record.available(), 4);
        assert_eq!(record.version(), 2);
    }

    #[test]
    fn retry_survives_contention() {
        let d = Arc::new(dispatcher());
        let k = key();
        run(&d, k, StockCommand::Receive(StockMovement::new(k, 1_000, Utc::now()))).unwrap();

        let policy = RetryPolicy {
            max_attempts: 200,
            base_backoff: Duration::from_micros(50),
        };
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let d = d.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        let cmd = StockCommand::Reserve(StockMovement::new(k, 1, Utc::now()));
                        d.dispatch_with_retry(policy, k.record_id().0, "inventory.stock", &cmd, || {
                            StockRecord::empty(k)
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let record = d.load(k.record_id().0, || StockRecord::empty(k)).unwrap();
        assert_eq!(record.reserved(), 200);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let p = RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(2),
        };
        assert_eq!(p.backoff(0), Duration::from_millis(2));
        assert_eq!(p.backoff(3), Duration::from_millis(16));
        assert_eq!(p.backoff(30), RetryPolicy::MAX_BACKOFF);
    }

    #[test]
    fn domain_conflict_is_not_retried_as_concurrency() {
        let err: DispatchError = DomainError::conflict("hold still active").into();
        assert!(matches!(err, DispatchError::Conflict(_)));
        assert!(!err.is_retryable());
    }
}
