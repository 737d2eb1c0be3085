use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, Lifecycle, ProductId, SupplierId, UserId,
    WarehouseId,
};
use stockflow_events::Event;

use crate::status::{PurchaseOrderAction, PurchaseOrderStatus};

/// Purchase order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderId(pub AggregateId);

impl PurchaseOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PurchaseOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Line as requested at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPurchaseLine {
    pub product_id: ProductId,
    pub quantity: u64,
    pub unit_price: u64,
}

/// Purchase order line. `line_id` is the 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderLine {
    pub line_id: u32,
    pub product_id: ProductId,
    pub quantity: u64,
    pub unit_price: u64,
    pub received_qty: u64,
}

impl PurchaseOrderLine {
    pub fn remaining(&self) -> u64 {
        self.quantity - self.received_qty
    }

    pub fn is_complete(&self) -> bool {
        self.received_qty == self.quantity
    }
}

/// One item of a reception batch, as submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceptionItem {
    pub line_id: u32,
    pub received_qty: i64,
}

/// A validated reception item resolved against its line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedLine {
    pub line_id: u32,
    pub product_id: ProductId,
    pub quantity: u64,
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    supplier_id: Option<SupplierId>,
    warehouse_id: Option<WarehouseId>,
    status: PurchaseOrderStatus,
    lines: Vec<PurchaseOrderLine>,
    expected_delivery_date: Option<NaiveDate>,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl PurchaseOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            supplier_id: None,
            warehouse_id: None,
            status: PurchaseOrderStatus::Draft,
            lines: Vec::new(),
            expected_delivery_date: None,
            created_by: None,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        self.supplier_id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[PurchaseOrderLine] {
        &self.lines
    }

    pub fn expected_delivery_date(&self) -> Option<NaiveDate> {
        self.expected_delivery_date
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn total_amount(&self) -> u64 {
        self.lines
            .iter()
            .map(|l| l.quantity.saturating_mul(l.unit_price))
            .fold(0, u64::saturating_add)
    }

    /// A reception batch covering everything still outstanding.
    pub fn remaining_items(&self) -> Vec<ReceptionItem> {
        self.lines
            .iter()
            .filter(|l| l.remaining() > 0)
            .map(|l| ReceptionItem {
                line_id: l.line_id,
                received_qty: i64::try_from(l.remaining()).unwrap_or(i64::MAX),
            })
            .collect()
    }

    /// Validate a whole reception batch against the current lines.
    ///
    /// Items for the same line are summed before checking against the ordered
    /// quantity. Nothing is returned unless every item is acceptable, so callers
    /// can run this before crediting any stock.
    pub fn validate_reception(
        &self,
        items: &[ReceptionItem],
    ) -> Result<Vec<ReceivedLine>, DomainError> {
        if !self.status.accepts_goods() {
            return Err(DomainError::invalid_transition(format!(
                "cannot receive goods on a purchase order in {:?}",
                self.status
            )));
        }
        if items.is_empty() {
            return Err(DomainError::invalid_reception("reception batch is empty"));
        }

        let mut per_line: BTreeMap<u32, u64> = BTreeMap::new();
        let mut resolved = Vec::with_capacity(items.len());
        for item in items {
            let qty = u64::try_from(item.received_qty)
                .ok()
                .filter(|q| *q > 0)
                .ok_or_else(|| {
                    DomainError::invalid_reception(format!(
                        "line {}: receivedQty must be positive, got {}",
                        item.line_id, item.received_qty
                    ))
                })?;
            let line = self
                .lines
                .iter()
                .find(|l| l.line_id == item.line_id)
                .ok_or_else(|| {
                    DomainError::invalid_reception(format!("line {} does not exist", item.line_id))
                })?;

            let batch_total = per_line.entry(item.line_id).or_insert(0);
            *batch_total += qty;
            if *batch_total > line.remaining() {
                return Err(DomainError::invalid_reception(format!(
                    "line {}: receiving {} would exceed ordered {} (already received {})",
                    line.line_id, batch_total, line.quantity, line.received_qty
                )));
            }

            resolved.push(ReceivedLine {
                line_id: line.line_id,
                product_id: line.product_id,
                quantity: qty,
            });
        }
        Ok(resolved)
    }

    fn is_complete_after(&self, received: &[ReceivedLine]) -> bool {
        self.lines.iter().all(|line| {
            let incoming: u64 = received
                .iter()
                .filter(|r| r.line_id == line.line_id)
                .map(|r| r.quantity)
                .sum();
            line.received_qty + incoming == line.quantity
        })
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub order_id: PurchaseOrderId,
    pub supplier_id: SupplierId,
    pub warehouse_id: WarehouseId,
    pub expected_delivery_date: Option<NaiveDate>,
    pub lines: Vec<NewPurchaseLine>,
    pub created_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApprovePurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovePurchaseOrder {
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveGoods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveGoods {
    pub order_id: PurchaseOrderId,
    pub items: Vec<ReceptionItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelPurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPurchaseOrder {
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderCommand {
    CreatePurchaseOrder(CreatePurchaseOrder),
    ApprovePurchaseOrder(ApprovePurchaseOrder),
    ReceiveGoods(ReceiveGoods),
    CancelPurchaseOrder(CancelPurchaseOrder),
}

/// Event: PurchaseOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCreated {
    pub order_id: PurchaseOrderId,
    pub supplier_id: SupplierId,
    pub warehouse_id: WarehouseId,
    pub expected_delivery_date: Option<NaiveDate>,
    pub lines: Vec<NewPurchaseLine>,
    pub created_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: GoodsReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceived {
    pub order_id: PurchaseOrderId,
    pub warehouse_id: WarehouseId,
    pub items: Vec<ReceivedLine>,
    pub fully_received: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderCanceled. `voided` lists what will no longer arrive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCanceled {
    pub order_id: PurchaseOrderId,
    pub voided: Vec<ReceivedLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseMarker {
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    PurchaseOrderCreated(PurchaseOrderCreated),
    PurchaseOrderApproved(PurchaseMarker),
    GoodsReceived(GoodsReceived),
    PurchaseOrderCanceled(PurchaseOrderCanceled),
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(_) => "purchasing.order.created",
            PurchaseOrderEvent::PurchaseOrderApproved(_) => "purchasing.order.approved",
            PurchaseOrderEvent::GoodsReceived(_) => "purchasing.order.goods_received",
            PurchaseOrderEvent::PurchaseOrderCanceled(_) => "purchasing.order.canceled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderApproved(e) => e.occurred_at,
            PurchaseOrderEvent::GoodsReceived(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderCanceled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseOrder {
    type Command = PurchaseOrderCommand;
    type Event = PurchaseOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => {
                self.id = e.order_id;
                self.supplier_id = Some(e.supplier_id);
                self.warehouse_id = Some(e.warehouse_id);
                self.expected_delivery_date = e.expected_delivery_date;
                self.status = PurchaseOrderStatus::Draft;
                self.lines = e
                    .lines
                    .iter()
                    .zip(1u32..)
                    .map(|(l, line_id)| PurchaseOrderLine {
                        line_id,
                        product_id: l.product_id,
                        quantity: l.quantity,
                        unit_price: l.unit_price,
                        received_qty: 0,
                    })
                    .collect();
                self.created_by = e.created_by;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            PurchaseOrderEvent::PurchaseOrderApproved(_) => {
                self.status = PurchaseOrderStatus::Approved;
            }
            PurchaseOrderEvent::GoodsReceived(e) => {
                for item in &e.items {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.line_id == item.line_id) {
                        line.received_qty += item.quantity;
                    }
                }
                self.status = if e.fully_received {
                    PurchaseOrderStatus::Received
                } else {
                    PurchaseOrderStatus::PartiallyReceived
                };
            }
            PurchaseOrderEvent::PurchaseOrderCanceled(_) => {
                self.status = PurchaseOrderStatus::Canceled;
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseOrderCommand::CreatePurchaseOrder(cmd) => self.handle_create(cmd),
            PurchaseOrderCommand::ApprovePurchaseOrder(cmd) => self.handle_approve(cmd),
            PurchaseOrderCommand::ReceiveGoods(cmd) => self.handle_receive(cmd),
            PurchaseOrderCommand::CancelPurchaseOrder(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl PurchaseOrder {
    fn ensure_exists(&self, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("purchase order {order_id}")));
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(
        &self,
        cmd: &CreatePurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase order already exists"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation(
                "purchase order must have at least one line",
            ));
        }
        if cmd.lines.iter().any(|l| l.quantity == 0) {
            return Err(DomainError::validation("quantity must be positive"));
        }
        cmd.lines
            .iter()
            .try_fold(0u64, |total, l| {
                l.quantity
                    .checked_mul(l.unit_price)
                    .and_then(|line_total| total.checked_add(line_total))
            })
            .ok_or_else(|| DomainError::validation("order total overflows"))?;

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCreated(
            PurchaseOrderCreated {
                order_id: cmd.order_id,
                supplier_id: cmd.supplier_id,
                warehouse_id: cmd.warehouse_id,
                expected_delivery_date: cmd.expected_delivery_date,
                lines: cmd.lines.clone(),
                created_by: cmd.created_by,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_approve(
        &self,
        cmd: &ApprovePurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.status.transition(PurchaseOrderAction::Approve)?;

        Ok(vec![PurchaseOrderEvent::PurchaseOrderApproved(
            PurchaseMarker {
                order_id: cmd.order_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_receive(&self, cmd: &ReceiveGoods) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        let items = self.validate_reception(&cmd.items)?;
        let fully_received = self.is_complete_after(&items);
        self.status.transition(PurchaseOrderAction::Receive {
            complete: fully_received,
        })?;
        let warehouse_id = self
            .warehouse_id
            .ok_or_else(|| DomainError::invariant("purchase order has no destination warehouse"))?;

        Ok(vec![PurchaseOrderEvent::GoodsReceived(GoodsReceived {
            order_id: cmd.order_id,
            warehouse_id,
            items,
            fully_received,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(
        &self,
        cmd: &CancelPurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.status.transition(PurchaseOrderAction::Cancel)?;

        let voided = self
            .lines
            .iter()
            .filter(|l| l.remaining() > 0)
            .map(|l| ReceivedLine {
                line_id: l.line_id,
                product_id: l.product_id,
                quantity: l.remaining(),
            })
            .collect();

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCanceled(
            PurchaseOrderCanceled {
                order_id: cmd.order_id,
                voided,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}
