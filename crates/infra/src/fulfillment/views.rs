//! JSON views returned by the engine (camelCase on the wire).

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use stockflow_core::{AggregateId, CarrierId, ProductId, SupplierId, UserId, WarehouseId};
use stockflow_inventory::{AllocationInfo, ReservationResult};
use stockflow_purchasing::{PurchaseOrder, PurchaseOrderStatus};
use stockflow_sales::{BackorderLine, SalesOrder, SalesOrderStatus};
use stockflow_shipping::{Shipment, ShipmentStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesOrderLineView {
    pub product_id: ProductId,
    pub quantity: u64,
    pub unit_price: u64,
    pub reserved_qty: u64,
    /// Set when the line is satisfied from exactly one warehouse.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warehouse_id: Option<WarehouseId>,
    pub allocations: Vec<AllocationInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesOrderView {
    pub id: AggregateId,
    pub client_ref: String,
    pub status: SalesOrderStatus,
    pub lines: Vec<SalesOrderLineView>,
    pub backorders: Vec<BackorderLine>,
    pub total_amount: u64,
    pub preferred_warehouse_id: Option<WarehouseId>,
    pub active_shipment_id: Option<AggregateId>,
    pub reservation_expires_at: Option<DateTime<Utc>>,
    pub created_by: Option<UserId>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Outcome of the reservation attempt that produced this view, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation: Option<ReservationResult>,
}

impl From<&SalesOrder> for SalesOrderView {
    fn from(order: &SalesOrder) -> Self {
        Self {
            id: order.id_typed().0,
            client_ref: order.client_ref().to_string(),
            status: order.status(),
            lines: order
                .lines()
                .iter()
                .map(|l| SalesOrderLineView {
                    product_id: l.product_id,
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                    reserved_qty: l.reserved_qty,
                    warehouse_id: l.warehouse_id(),
                    allocations: l.allocations.clone(),
                })
                .collect(),
            backorders: order.backorders().to_vec(),
            total_amount: order.total_amount(),
            preferred_warehouse_id: order.preferred_warehouse_id(),
            active_shipment_id: order.active_shipment_id(),
            reservation_expires_at: order.reservation_expires_at(),
            created_by: order.created_by(),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
            reservation: None,
        }
    }
}

impl SalesOrderView {
    pub fn with_reservation(mut self, reservation: ReservationResult) -> Self {
        self.reservation = Some(reservation);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentView {
    pub id: AggregateId,
    pub sales_order_id: Option<AggregateId>,
    pub carrier_id: Option<CarrierId>,
    pub status: ShipmentStatus,
    pub planned_date: Option<NaiveDate>,
    pub tracking_number: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl From<&Shipment> for ShipmentView {
    fn from(s: &Shipment) -> Self {
        Self {
            id: s.id_typed().0,
            sales_order_id: s.sales_order_id().map(|o| o.0),
            carrier_id: s.carrier_id(),
            status: s.status(),
            planned_date: s.planned_date(),
            tracking_number: s.tracking_number().map(str::to_string),
            created_at: s.created_at(),
            shipped_at: s.shipped_at(),
            delivered_at: s.delivered_at(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderLineView {
    pub line_id: u32,
    pub product_id: ProductId,
    pub quantity: u64,
    pub unit_price: u64,
    pub received_qty: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderView {
    pub id: AggregateId,
    pub supplier_id: Option<SupplierId>,
    pub warehouse_id: Option<WarehouseId>,
    pub status: PurchaseOrderStatus,
    pub lines: Vec<PurchaseOrderLineView>,
    pub total_amount: u64,
    pub expected_delivery_date: Option<NaiveDate>,
    pub created_by: Option<UserId>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&PurchaseOrder> for PurchaseOrderView {
    fn from(po: &PurchaseOrder) -> Self {
        Self {
            id: po.id_typed().0,
            supplier_id: po.supplier_id(),
            warehouse_id: po.warehouse_id(),
            status: po.status(),
            lines: po
                .lines()
                .iter()
                .map(|l| PurchaseOrderLineView {
                    line_id: l.line_id,
                    product_id: l.product_id,
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                    received_qty: l.received_qty,
                })
                .collect(),
            total_amount: po.total_amount(),
            expected_delivery_date: po.expected_delivery_date(),
            created_by: po.created_by(),
            created_at: po.created_at(),
            updated_at: po.updated_at(),
        }
    }
}
