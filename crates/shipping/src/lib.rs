//! Shipping domain module (event-sourced).
//!
//! Shipment lifecycle, per-carrier daily slot bookings and the dispatch cut-off
//! calendar. Stock consumption on dispatch is orchestrated by the infra layer.

pub mod calendar;
pub mod shipment;
pub mod slot;

pub use calendar::ShippingCalendar;
pub use shipment::{
    CancelShipment, DeliverShipment, DispatchShipment, PlanShipment, Shipment, ShipmentAction,
    ShipmentCommand, ShipmentDispatched, ShipmentEvent, ShipmentId, ShipmentMarker,
    ShipmentPlanned, ShipmentStatus,
};
pub use slot::{
    BookSlot, CarrierDay, CarrierDayId, CarrierDayKey, ReleaseSlot, SlotCapacity, SlotCommand,
    SlotEvent, SlotMovement,
};
