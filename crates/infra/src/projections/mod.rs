//! Read model builders fed from the event bus.
//!
//! Projections are rebuildable from the event streams and idempotent on
//! `(aggregate_id, sequence_number)`.

pub mod sales_orders;

pub use sales_orders::{SalesOrderProjectionError, SalesOrdersProjection};
