//! Inventory domain module (event-sourced).
//!
//! The per-(product, warehouse) stock ledger and the value types the allocator
//! reports. Pure domain logic; storage and retries live in `stockflow-infra`.

pub mod allocation;
pub mod stock;

pub use allocation::{AllocationInfo, BackorderInfo, ReservationResult, rank_warehouses};
pub use stock::{
    StockCommand, StockEvent, StockKey, StockMovement, StockRecord, StockRecordId, StockReleased,
};
