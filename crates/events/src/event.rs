use chrono::{DateTime, Utc};

/// A fact recorded on an aggregate stream.
///
/// Events are append-only and carry a schema version so stored payloads can be
/// upcast later.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "inventory.stock.reserved").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// Business time of the event.
    fn occurred_at(&self) -> DateTime<Utc>;
}
