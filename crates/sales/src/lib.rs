//! Sales Orders domain module (event-sourced).
//!
//! Order lifecycle from creation to delivery, including the reservation state
//! the allocator reports back. No IO, no HTTP, no storage.

pub mod order;
pub mod status;

pub use order::{
    AttachShipment, BackorderLine, CancelOrder, ConfirmOrder, CreateSalesOrder, DetachShipment,
    ExpireHold, MarkDelivered, MarkShipped, NewOrderLine, OrderMarker, RecordReservation,
    ReservationRecorded, SalesOrder, SalesOrderCommand, SalesOrderCreated, SalesOrderEvent,
    SalesOrderId, SalesOrderLine, ShipmentLink, StockReleasedFromOrder,
};
pub use status::{SalesOrderAction, SalesOrderStatus};
