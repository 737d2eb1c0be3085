//! Infrastructure layer: event store, dispatcher, stock ledger, allocator and
//! the fulfillment engine that orchestrates them.

use serde_json::Value as JsonValue;
use stockflow_events::{EventEnvelope, InMemoryEventBus};

pub mod allocator;
pub mod command_dispatcher;
pub mod compensation;
pub mod event_store;
pub mod fulfillment;
pub mod ledger;
pub mod locks;
pub mod projections;
pub mod read_model;
pub mod workers;


pub type EnvelopeBus = InMemoryEventBus<EventEnvelope<JsonValue>>;

/// The dispatcher every engine component shares.
pub type Dispatcher = command_dispatcher::CommandDispatcher<
    std::sync::Arc<dyn event_store::EventStore>,
    std::sync::Arc<EnvelopeBus>,
>;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use stockflow_core::{AggregateId, ExpectedVersion};

    use crate::event_store::{
        EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent,
    };
    use crate::{Dispatcher, EnvelopeBus};

    pub fn dispatcher() -> Arc<Dispatcher> {
        dispatcher_over(Arc::new(InMemoryEventStore::new()))
    }

    pub fn dispatcher_over(store: Arc<dyn EventStore>) -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(store, Arc::new(EnvelopeBus::new())))
    }

    /// What an armed [`FailingStore`] returns from `append`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Fault {
        /// Stale version; the dispatcher retries these.
        Conflict,
        /// Backend failure; surfaced immediately.
        Outage,
    }

    #[derive(Debug)]
    struct Plan {
        aggregate_type: String,
        fault: Fault,
        pass: u64,
        fail: u64,
    }

    /// In-memory store that can be told to reject appends per aggregate type.
    #[derive(Debug, Default)]
    pub struct FailingStore {
        inner: InMemoryEventStore,
        plans: Mutex<Vec<Plan>>,
    }

    impl FailingStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Let the next `pass` appends of `aggregate_type` through, then fail `fail`
        /// of them. Replaces any earlier plan for that type.
        pub fn arm(&self, aggregate_type: &str, fault: Fault, pass: u64, fail: u64) {
            let mut plans = self.plans.lock().unwrap();
            plans.retain(|p| p.aggregate_type != aggregate_type);
            plans.push(Plan {
                aggregate_type: aggregate_type.to_string(),
                fault,
                pass,
                fail,
            });
        }

        pub fn disarm(&self) {
            self.plans.lock().unwrap().clear();
        }

        fn injected(&self, aggregate_type: &str) -> Option<EventStoreError> {
            let mut plans = self.plans.lock().unwrap();
            let plan = plans.iter_mut().find(|p| p.aggregate_type == aggregate_type)?;
            if plan.pass > 0 {
                plan.pass -= 1;
                return None;
            }
            if plan.fail == 0 {
                return None;
            }
            plan.fail -= 1;
            Some(match plan.fault {
                Fault::Conflict => EventStoreError::Concurrency(format!("injected on {aggregate_type}")),
                Fault::Outage => EventStoreError::Backend(format!("injected on {aggregate_type}")),
            })
        }
    }

    impl EventStore for FailingStore {
        fn append(
            &self,
            events: Vec<UncommittedEvent>,
            expected_version: ExpectedVersion,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            if let Some(first) = events.first() {
                if let Some(err) = self.injected(&first.aggregate_type) {
                    return Err(err);
                }
            }
            self.inner.append(events, expected_version)
        }

        fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_stream(aggregate_id)
        }

        fn load_by_aggregate_type(
            &self,
            aggregate_type: &str,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_by_aggregate_type(aggregate_type)
        }
    }
}
