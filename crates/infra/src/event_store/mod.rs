//! Append-only event store boundary.
//!
//! One stream per aggregate instance. Stock records and carrier days use
//! deterministic stream ids, so their stream version doubles as the per-key
//! optimistic lock.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
