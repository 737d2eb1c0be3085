//! Purchasing domain module (event-sourced).
//!
//! Purchase orders and goods reception against their lines. Crediting the stock
//! ledger is orchestrated by the infra layer.

pub mod order;
pub mod status;

pub use order::{
    ApprovePurchaseOrder, CancelPurchaseOrder, CreatePurchaseOrder, GoodsReceived,
    NewPurchaseLine, PurchaseMarker, PurchaseOrder, PurchaseOrderCanceled, PurchaseOrderCommand,
    PurchaseOrderCreated, PurchaseOrderEvent, PurchaseOrderId, PurchaseOrderLine, ReceiveGoods,
    ReceivedLine, ReceptionItem,
};
pub use status::{PurchaseOrderAction, PurchaseOrderStatus};
