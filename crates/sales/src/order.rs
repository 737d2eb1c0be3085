use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, Lifecycle, ProductId, UserId, WarehouseId,
};
use stockflow_events::Event;
use stockflow_inventory::AllocationInfo;

use crate::status::{SalesOrderAction, SalesOrderStatus};

/// Sales order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SalesOrderId(pub AggregateId);

impl SalesOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SalesOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Order line as requested at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderLine {
    pub product_id: ProductId,
    pub quantity: u64,
    /// Price in minor currency units, snapshotted at creation.
    pub unit_price: u64,
}

/// Order line with its reservation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesOrderLine {
    pub product_id: ProductId,
    pub quantity: u64,
    pub unit_price: u64,
    pub reserved_qty: u64,
    pub allocations: Vec<AllocationInfo>,
}

impl SalesOrderLine {
    pub fn outstanding(&self) -> u64 {
        self.quantity - self.reserved_qty
    }

    pub fn line_total(&self) -> u64 {
        self.quantity.saturating_mul(self.unit_price)
    }

    /// The warehouse serving this line when it is served by exactly one.
    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        let first = self.allocations.first()?.warehouse_id;
        self.allocations
            .iter()
            .all(|a| a.warehouse_id == first)
            .then_some(first)
    }

    fn add_allocation(&mut self, alloc: AllocationInfo) {
        self.reserved_qty += alloc.allocated_qty;
        match self
            .allocations
            .iter_mut()
            .find(|a| a.warehouse_id == alloc.warehouse_id)
        {
            Some(existing) => existing.allocated_qty += alloc.allocated_qty,
            None => self.allocations.push(alloc),
        }
    }
}

/// Unsatisfied remainder of a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackorderLine {
    pub product_id: ProductId,
    pub quantity_needed: u64,
    pub missing_qty: u64,
}

/// Aggregate root: SalesOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesOrder {
    id: SalesOrderId,
    client_ref: String,
    status: SalesOrderStatus,
    lines: Vec<SalesOrderLine>,
    backorders: Vec<BackorderLine>,
    preferred_warehouse_id: Option<WarehouseId>,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    reservation_expires_at: Option<DateTime<Utc>>,
    active_shipment_id: Option<AggregateId>,
    shipped_by: Option<AggregateId>,
    version: u64,
    created: bool,
}

impl SalesOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: SalesOrderId) -> Self {
        Self {
            id,
            client_ref: String::new(),
            status: SalesOrderStatus::Created,
            lines: Vec::new(),
            backorders: Vec::new(),
            preferred_warehouse_id: None,
            created_by: None,
            created_at: None,
            updated_at: None,
            reservation_expires_at: None,
            active_shipment_id: None,
            shipped_by: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SalesOrderId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn client_ref(&self) -> &str {
        &self.client_ref
    }

    pub fn status(&self) -> SalesOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[SalesOrderLine] {
        &self.lines
    }

    pub fn backorders(&self) -> &[BackorderLine] {
        &self.backorders
    }

    pub fn preferred_warehouse_id(&self) -> Option<WarehouseId> {
        self.preferred_warehouse_id
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

    pub fn reservation_expires_at(&self) -> Option<DateTime<Utc>> {
        self.reservation_expires_at
    }

    pub fn active_shipment_id(&self) -> Option<AggregateId> {
        self.active_shipment_id
    }

    pub fn shipped_by(&self) -> Option<AggregateId> {
        self.shipped_by
    }

    pub fn total_amount(&self) -> u64 {
        self.lines
            .iter()
            .map(SalesOrderLine::line_total)
            .fold(0, u64::saturating_add)
    }

    /// Every allocation currently held, across lines.
    pub fn allocations(&self) -> Vec<AllocationInfo> {
        self.lines
            .iter()
            .flat_map(|l| l.allocations.iter().copied())
            .collect()
    }

    /// `(product, quantity still to reserve)` for lines that are not fully reserved.
    pub fn outstanding_lines(&self) -> Vec<(ProductId, u64)> {
        self.lines
            .iter()
            .filter(|l| l.outstanding() > 0)
            .map(|l| (l.product_id, l.outstanding()))
            .collect()
    }

    pub fn is_fully_reserved(&self) -> bool {
        self.lines.iter().all(|l| l.outstanding() == 0)
    }

    pub fn hold_expired(&self, now: DateTime<Utc>) -> bool {
        self.status.allows(SalesOrderAction::ExpireHold)
            && self.reservation_expires_at.is_some_and(|t| t <= now)
    }

    fn recompute_backorders(&mut self) {
        self.backorders = self
            .lines
            .iter()
            .filter(|l| l.outstanding() > 0)
            .map(|l| BackorderLine {
                product_id: l.product_id,
                quantity_needed: l.quantity,
                missing_qty: l.outstanding(),
            })
            .collect();
    }

    fn clear_reservations(&mut self) {
        for line in &mut self.lines {
            line.reserved_qty = 0;
            line.allocations.clear();
        }
        self.backorders.clear();
        self.reservation_expires_at = None;
    }
}

impl AggregateRoot for SalesOrder {
    type Id = SalesOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateSalesOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSalesOrder {
    pub order_id: SalesOrderId,
    pub client_ref: String,
    pub lines: Vec<NewOrderLine>,
    pub preferred_warehouse_id: Option<WarehouseId>,
    pub created_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOrder {
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordReservation.
///
/// Folds the ledger allocations of one reservation attempt into the order. The
/// resulting status is decided from the lines after the allocations are added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReservation {
    pub order_id: SalesOrderId,
    pub allocations: Vec<AllocationInfo>,
    pub hold_until: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AttachShipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachShipment {
    pub order_id: SalesOrderId,
    pub shipment_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DetachShipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachShipment {
    pub order_id: SalesOrderId,
    pub shipment_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkShipped. Stock consumption happens in the ledger first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkShipped {
    pub order_id: SalesOrderId,
    pub shipment_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkDelivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkDelivered {
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder. Held stock is released in the ledger first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ExpireHold. Rejected unless the hold deadline has passed at `occurred_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireHold {
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderCommand {
    CreateSalesOrder(CreateSalesOrder),
    ConfirmOrder(ConfirmOrder),
    RecordReservation(RecordReservation),
    AttachShipment(AttachShipment),
    DetachShipment(DetachShipment),
    MarkShipped(MarkShipped),
    MarkDelivered(MarkDelivered),
    CancelOrder(CancelOrder),
    ExpireHold(ExpireHold),
}

/// Event: SalesOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderCreated {
    pub order_id: SalesOrderId,
    pub client_ref: String,
    pub lines: Vec<NewOrderLine>,
    pub preferred_warehouse_id: Option<WarehouseId>,
    pub created_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReservationRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecorded {
    pub order_id: SalesOrderId,
    pub allocations: Vec<AllocationInfo>,
    pub fully_reserved: bool,
    pub hold_until: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Payload shared by events that give held stock back (cancel, hold expiry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleasedFromOrder {
    pub order_id: SalesOrderId,
    pub released: Vec<AllocationInfo>,
    pub occurred_at: DateTime<Utc>,
}

/// Payload of status-only events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderMarker {
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Payload of shipment linkage events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentLink {
    pub order_id: SalesOrderId,
    pub shipment_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderEvent {
    SalesOrderCreated(SalesOrderCreated),
    OrderConfirmed(OrderMarker),
    ReservationRecorded(ReservationRecorded),
    ShipmentAttached(ShipmentLink),
    ShipmentDetached(ShipmentLink),
    OrderShipped(ShipmentLink),
    OrderDelivered(OrderMarker),
    OrderCanceled(StockReleasedFromOrder),
    HoldExpired(StockReleasedFromOrder),
}

impl Event for SalesOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SalesOrderEvent::SalesOrderCreated(_) => "sales.order.created",
            SalesOrderEvent::OrderConfirmed(_) => "sales.order.confirmed",
            SalesOrderEvent::ReservationRecorded(_) => "sales.order.reservation_recorded",
            SalesOrderEvent::ShipmentAttached(_) => "sales.order.shipment_attached",
            SalesOrderEvent::ShipmentDetached(_) => "sales.order.shipment_detached",
            SalesOrderEvent::OrderShipped(_) => "sales.order.shipped",
            SalesOrderEvent::OrderDelivered(_) => "sales.order.delivered",
            SalesOrderEvent::OrderCanceled(_) => "sales.order.canceled",
            SalesOrderEvent::HoldExpired(_) => "sales.order.hold_expired",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SalesOrderEvent::SalesOrderCreated(e) => e.occurred_at,
            SalesOrderEvent::ReservationRecorded(e) => e.occurred_at,
            SalesOrderEvent::OrderConfirmed(e) | SalesOrderEvent::OrderDelivered(e) => {
                e.occurred_at
            }
            SalesOrderEvent::ShipmentAttached(e)
            | SalesOrderEvent::ShipmentDetached(e)
            | SalesOrderEvent::OrderShipped(e) => e.occurred_at,
            SalesOrderEvent::OrderCanceled(e) | SalesOrderEvent::HoldExpired(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SalesOrder {
    type Command = SalesOrderCommand;
    type Event = SalesOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SalesOrderEvent::SalesOrderCreated(e) => {
                self.id = e.order_id;
                self.client_ref = e.client_ref.clone();
                self.status = SalesOrderStatus::Created;
                self.lines = e
                    .lines
                    .iter()
                    .map(|l| SalesOrderLine {
                        product_id: l.product_id,
                        quantity: l.quantity,
                        unit_price: l.unit_price,
                        reserved_qty: 0,
                        allocations: Vec::new(),
                    })
                    .collect();
                self.preferred_warehouse_id = e.preferred_warehouse_id;
                self.created_by = e.created_by;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            SalesOrderEvent::OrderConfirmed(_) => {
                self.status = SalesOrderStatus::Confirmed;
            }
            SalesOrderEvent::ReservationRecorded(e) => {
                for alloc in &e.allocations {
                    if let Some(line) = self
                        .lines
                        .iter_mut()
                        .find(|l| l.product_id == alloc.product_id)
                    {
                        line.add_allocation(*alloc);
                    }
                }
                self.recompute_backorders();
                self.status = if e.fully_reserved {
                    SalesOrderStatus::Reserved
                } else {
                    SalesOrderStatus::PartiallyReserved
                };
                self.reservation_expires_at = e.hold_until;
            }
            SalesOrderEvent::ShipmentAttached(e) => {
                self.active_shipment_id = Some(e.shipment_id);
                // A planned shipment pins the reservation.
                self.reservation_expires_at = None;
            }
            SalesOrderEvent::ShipmentDetached(_) => {
                self.active_shipment_id = None;
            }
            SalesOrderEvent::OrderShipped(e) => {
                self.status = SalesOrderStatus::Shipped;
                self.shipped_by = Some(e.shipment_id);
            }
            SalesOrderEvent::OrderDelivered(_) => {
                self.status = SalesOrderStatus::Delivered;
            }
            SalesOrderEvent::OrderCanceled(_) => {
                self.clear_reservations();
                self.active_shipment_id = None;
                self.status = SalesOrderStatus::Canceled;
            }
            SalesOrderEvent::HoldExpired(_) => {
                self.clear_reservations();
                self.status = SalesOrderStatus::Confirmed;
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SalesOrderCommand::CreateSalesOrder(cmd) => self.handle_create(cmd),
            SalesOrderCommand::ConfirmOrder(cmd) => self.handle_confirm(cmd),
            SalesOrderCommand::RecordReservation(cmd) => self.handle_record_reservation(cmd),
            SalesOrderCommand::AttachShipment(cmd) => self.handle_attach_shipment(cmd),
            SalesOrderCommand::DetachShipment(cmd) => self.handle_detach_shipment(cmd),
            SalesOrderCommand::MarkShipped(cmd) => self.handle_mark_shipped(cmd),
            SalesOrderCommand::MarkDelivered(cmd) => self.handle_mark_delivered(cmd),
            SalesOrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
            SalesOrderCommand::ExpireHold(cmd) => self.handle_expire_hold(cmd),
        }
    }
}

impl SalesOrder {
    fn ensure_exists(&self, order_id: SalesOrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("sales order {order_id}")));
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateSalesOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("sales order already exists"));
        }
        if cmd.client_ref.trim().is_empty() {
            return Err(DomainError::validation("clientRef cannot be empty"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("order must have at least one line"));
        }
        let mut total = 0u64;
        for (i, line) in cmd.lines.iter().enumerate() {
            if line.quantity == 0 {
                return Err(DomainError::validation("quantity must be positive"));
            }
            if cmd.lines[..i].iter().any(|l| l.product_id == line.product_id) {
                return Err(DomainError::validation(format!(
                    "product {} appears on more than one line",
                    line.product_id
                )));
            }
            total = line
                .quantity
                .checked_mul(line.unit_price)
                .and_then(|line_total| total.checked_add(line_total))
                .ok_or_else(|| DomainError::validation("order total overflows"))?;
        }

        Ok(vec![SalesOrderEvent::SalesOrderCreated(SalesOrderCreated {
            order_id: cmd.order_id,
            client_ref: cmd.client_ref.trim().to_string(),
            lines: cmd.lines.clone(),
            preferred_warehouse_id: cmd.preferred_warehouse_id,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(&self, cmd: &ConfirmOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.status.transition(SalesOrderAction::Confirm)?;

        Ok(vec![SalesOrderEvent::OrderConfirmed(OrderMarker {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_reservation(
        &self,
        cmd: &RecordReservation,
    ) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;

        // Check allocations against outstanding quantities before touching status.
        let mut after = self.lines.clone();
        for alloc in &cmd.allocations {
            if alloc.allocated_qty == 0 {
                return Err(DomainError::invariant("empty allocation"));
            }
            let line = after
                .iter_mut()
                .find(|l| l.product_id == alloc.product_id)
                .ok_or_else(|| {
                    DomainError::invariant(format!(
                        "allocation for product {} not on order",
                        alloc.product_id
                    ))
                })?;
            if alloc.allocated_qty > line.outstanding() {
                return Err(DomainError::invariant(format!(
                    "allocation of {} exceeds outstanding {} for product {}",
                    alloc.allocated_qty,
                    line.outstanding(),
                    alloc.product_id
                )));
            }
            line.add_allocation(*alloc);
        }
        let fully_reserved = after.iter().all(|l| l.outstanding() == 0);

        self.status
            .transition(SalesOrderAction::Reserve { fully_reserved })?;

        Ok(vec![SalesOrderEvent::ReservationRecorded(ReservationRecorded {
            order_id: cmd.order_id,
            allocations: cmd.allocations.clone(),
            fully_reserved,
            hold_until: cmd.hold_until,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_attach_shipment(
        &self,
        cmd: &AttachShipment,
    ) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        if !self.status.holds_stock() {
            return Err(DomainError::invalid_transition(format!(
                "cannot plan a shipment for an order in {:?}",
                self.status
            )));
        }
        if let Some(active) = self.active_shipment_id {
            return Err(DomainError::conflict(format!(
                "order already has active shipment {active}"
            )));
        }

        Ok(vec![SalesOrderEvent::ShipmentAttached(ShipmentLink {
            order_id: cmd.order_id,
            shipment_id: cmd.shipment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_detach_shipment(
        &self,
        cmd: &DetachShipment,
    ) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        if self.active_shipment_id != Some(cmd.shipment_id) {
            return Err(DomainError::conflict(format!(
                "shipment {} is not attached to this order",
                cmd.shipment_id
            )));
        }
        if !self.status.holds_stock() {
            return Err(DomainError::invalid_transition(format!(
                "cannot detach a shipment from an order in {:?}",
                self.status
            )));
        }

        Ok(vec![SalesOrderEvent::ShipmentDetached(ShipmentLink {
            order_id: cmd.order_id,
            shipment_id: cmd.shipment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_shipped(&self, cmd: &MarkShipped) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.status.transition(SalesOrderAction::Ship)?;
        if self.active_shipment_id != Some(cmd.shipment_id) {
            return Err(DomainError::conflict(format!(
                "shipment {} is not attached to this order",
                cmd.shipment_id
            )));
        }

        Ok(vec![SalesOrderEvent::OrderShipped(ShipmentLink {
            order_id: cmd.order_id,
            shipment_id: cmd.shipment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_delivered(
        &self,
        cmd: &MarkDelivered,
    ) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.status.transition(SalesOrderAction::Deliver)?;

        Ok(vec![SalesOrderEvent::OrderDelivered(OrderMarker {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.status.transition(SalesOrderAction::Cancel)?;

        Ok(vec![SalesOrderEvent::OrderCanceled(StockReleasedFromOrder {
            order_id: cmd.order_id,
            released: self.allocations(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_expire_hold(&self, cmd: &ExpireHold) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.status.transition(SalesOrderAction::ExpireHold)?;
        if !self.hold_expired(cmd.occurred_at) {
            return Err(DomainError::conflict("reservation hold has not expired"));
        }

        Ok(vec![SalesOrderEvent::HoldExpired(StockReleasedFromOrder {
            order_id: cmd.order_id,
            released: self.allocations(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_order_id() -> SalesOrderId {
        SalesOrderId::new(AggregateId::new())
    }

    fn execute(order: &mut SalesOrder, cmd: SalesOrderCommand) -> Result<(), DomainError> {
        let events = order.handle(&cmd)?;
        for e in &events {
            order.apply(e);
        }
        Ok(())
    }

    fn created(lines: Vec<NewOrderLine>) -> SalesOrder {
        let id = test_order_id();
        let mut order = SalesOrder::empty(id);
        execute(
            &mut order,
            SalesOrderCommand::CreateSalesOrder(CreateSalesOrder {
                order_id: id,
                client_ref: "ACME-1".into(),
                lines,
                preferred_warehouse_id: None,
                created_by: None,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        order
    }

    fn confirmed(lines: Vec<NewOrderLine>) -> SalesOrder {
        let mut order = created(lines);
        let order_id = order.id_typed();
        execute(
            &mut order,
            SalesOrderCommand::ConfirmOrder(ConfirmOrder {
                order_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        order
    }

    fn line(product_id: ProductId, quantity: u64) -> NewOrderLine {
        NewOrderLine {
            product_id,
            quantity,
            unit_price: 250,
        }
    }

    fn alloc(product_id: ProductId, warehouse_id: WarehouseId, qty: u64) -> AllocationInfo {
        AllocationInfo {
            warehouse_id,
            product_id,
            allocated_qty: qty,
        }
    }

    fn record(
        order: &mut SalesOrder,
        allocations: Vec<AllocationInfo>,
        hold_until: Option<DateTime<Utc>>,
    ) -> Result<(), DomainError> {
        let order_id = order.id_typed();
        execute(
            order,
            SalesOrderCommand::RecordReservation(RecordReservation {
                order_id,
                allocations,
                hold_until,
                occurred_at: Utc::now(),
            }),
        )
    }

    #[test]
    fn create_derives_total_amount() {
        let order = created(vec![line(ProductId::new(), 2), line(ProductId::new(), 3)]);
        assert_eq!(order.status(), SalesOrderStatus::Created);
        assert_eq!(order.total_amount(), 5 * 250);
        assert_eq!(order.version(), 1);
    }

    #[test]
    fn create_rejects_duplicate_products() {
        let p = ProductId::new();
        let id = test_order_id();
        let err = SalesOrder::empty(id)
            .handle(&SalesOrderCommand::CreateSalesOrder(CreateSalesOrder {
                order_id: id,
                client_ref: "ACME-1".into(),
                lines: vec![line(p, 1), line(p, 2)],
                preferred_warehouse_id: None,
                created_by: None,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn create_rejects_zero_quantity() {
        let id = test_order_id();
        let err = SalesOrder::empty(id)
            .handle(&SalesOrderCommand::CreateSalesOrder(CreateSalesOrder {
                order_id: id,
                client_ref: "ACME-1".into(),
                lines: vec![line(ProductId::new(), 0)],
                preferred_warehouse_id: None,
                created_by: None,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn create_rejects_order_total_overflow() {
        // Each line fits in u64 on its own; their sum does not.
        let half = NewOrderLine {
            product_id: ProductId::new(),
            quantity: 1,
            unit_price: u64::MAX / 2 + 1,
        };
        let other = NewOrderLine {
            product_id: ProductId::new(),
            ..half.clone()
        };
        let id = test_order_id();
        let err = SalesOrder::empty(id)
            .handle(&SalesOrderCommand::CreateSalesOrder(CreateSalesOrder {
                order_id: id,
                client_ref: "ACME-1".into(),
                lines: vec![half, other],
                preferred_warehouse_id: None,
                created_by: None,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn reservation_before_confirmation_is_rejected() {
        let p = ProductId::new();
        let mut order = created(vec![line(p, 2)]);
        let err = record(&mut order, vec![alloc(p, WarehouseId::new(), 2)], None).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition(_)));
        assert_eq!(order.status(), SalesOrderStatus::Created);
    }

    #[test]
    fn partial_then_full_reservation_only_adds_outstanding() {
        let p = ProductId::new();
        let (a, b) = (WarehouseId::new(), WarehouseId::new());
        let mut order = confirmed(vec![line(p, 30)]);

        record(&mut order, vec![alloc(p, a, 20), alloc(p, b, 5)], None).unwrap();
        assert_eq!(order.status(), SalesOrderStatus::PartiallyReserved);
        assert_eq!(order.lines()[0].reserved_qty, 25);
        assert_eq!(
            order.backorders(),
            &[BackorderLine {
                product_id: p,
                quantity_needed: 30,
                missing_qty: 5,
            }]
        );
        assert_eq!(order.outstanding_lines(), vec![(p, 5)]);
        assert_eq!(order.lines()[0].warehouse_id(), None);

        let err = record(&mut order, vec![alloc(p, a, 6)], None).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        record(&mut order, vec![alloc(p, a, 5)], None).unwrap();
        assert_eq!(order.status(), SalesOrderStatus::Reserved);
        assert!(order.backorders().is_empty());
        assert_eq!(order.lines()[0].allocations.len(), 2);
        assert_eq!(order.lines()[0].allocations[0].allocated_qty, 25);
    }

    #[test]
    fn single_warehouse_line_reports_its_warehouse() {
        let p = ProductId::new();
        let a = WarehouseId::new();
        let mut order = confirmed(vec![line(p, 4)]);
        record(&mut order, vec![alloc(p, a, 4)], None).unwrap();
        assert_eq!(order.lines()[0].warehouse_id(), Some(a));
    }

    #[test]
    fn cancel_releases_all_allocations() {
        let p = ProductId::new();
        let a = WarehouseId::new();
        let mut order = confirmed(vec![line(p, 4)]);
        record(&mut order, vec![alloc(p, a, 3)], None).unwrap();

        let order_id = order.id_typed();
        let events = order
            .handle(&SalesOrderCommand::CancelOrder(CancelOrder {
                order_id,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        match &events[..] {
            [SalesOrderEvent::OrderCanceled(e)] => {
                assert_eq!(e.released, vec![alloc(p, a, 3)]);
            }
            other => panic!("unexpected events: {other:?}"),
        }
        order.apply(&events[0]);
        assert_eq!(order.status(), SalesOrderStatus::Canceled);
        assert!(order.allocations().is_empty());
    }

    #[test]
    fn shipped_order_cannot_be_canceled() {
        let p = ProductId::new();
        let mut order = confirmed(vec![line(p, 1)]);
        record(&mut order, vec![alloc(p, WarehouseId::new(), 1)], None).unwrap();
        let order_id = order.id_typed();
        let shipment_id = AggregateId::new();
        execute(
            &mut order,
            SalesOrderCommand::AttachShipment(AttachShipment {
                order_id,
                shipment_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        execute(
            &mut order,
            SalesOrderCommand::MarkShipped(MarkShipped {
                order_id,
                shipment_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let err = order
            .handle(&SalesOrderCommand::CancelOrder(CancelOrder {
                order_id,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition(_)));
        assert_eq!(order.shipped_by(), Some(shipment_id));
    }

    #[test]
    fn partially_reserved_order_cannot_ship() {
        let p = ProductId::new();
        let mut order = confirmed(vec![line(p, 5)]);
        record(&mut order, vec![alloc(p, WarehouseId::new(), 1)], None).unwrap();
        let order_id = order.id_typed();
        let shipment_id = AggregateId::new();
        execute(
            &mut order,
            SalesOrderCommand::AttachShipment(AttachShipment {
                order_id,
                shipment_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let err = order
            .handle(&SalesOrderCommand::MarkShipped(MarkShipped {
                order_id,
                shipment_id,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition(_)));
    }

    #[test]
    fn second_active_shipment_is_a_conflict() {
        let p = ProductId::new();
        let mut order = confirmed(vec![line(p, 1)]);
        record(&mut order, vec![alloc(p, WarehouseId::new(), 1)], None).unwrap();
        let order_id = order.id_typed();
        execute(
            &mut order,
            SalesOrderCommand::AttachShipment(AttachShipment {
                order_id,
                shipment_id: AggregateId::new(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let err = order
            .handle(&SalesOrderCommand::AttachShipment(AttachShipment {
                order_id,
                shipment_id: AggregateId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn hold_expiry_reverts_to_confirmed() {
        let p = ProductId::new();
        let mut order = confirmed(vec![line(p, 2)]);
        let deadline = Utc::now() + Duration::minutes(30);
        record(&mut order, vec![alloc(p, WarehouseId::new(), 2)], Some(deadline)).unwrap();
        let order_id = order.id_typed();

        let early = order
            .handle(&SalesOrderCommand::ExpireHold(ExpireHold {
                order_id,
                occurred_at: deadline - Duration::seconds(1),
            }))
            .unwrap_err();
        assert!(matches!(early, DomainError::Conflict(_)));

        execute(
            &mut order,
            SalesOrderCommand::ExpireHold(ExpireHold {
                order_id,
                occurred_at: deadline,
            }),
        )
        .unwrap();
        assert_eq!(order.status(), SalesOrderStatus::Confirmed);
        assert!(order.allocations().is_empty());
        assert_eq!(order.reservation_expires_at(), None);
    }

    #[test]
    fn attached_shipment_pins_the_hold() {
        let p = ProductId::new();
        let mut order = confirmed(vec![line(p, 2)]);
        let deadline = Utc::now() + Duration::minutes(30);
        record(&mut order, vec![alloc(p, WarehouseId::new(), 2)], Some(deadline)).unwrap();
        let order_id = order.id_typed();
        execute(
            &mut order,
            SalesOrderCommand::AttachShipment(AttachShipment {
                order_id,
                shipment_id: AggregateId::new(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        assert!(!order.hold_expired(deadline + Duration::hours(1)));
    }

    #[test]
    fn unknown_order_is_not_found() {
        let id = test_order_id();
        let err = SalesOrder::empty(id)
            .handle(&SalesOrderCommand::ConfirmOrder(ConfirmOrder {
                order_id: id,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }
}
