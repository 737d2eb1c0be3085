//! Sales order operations: create, confirm, reserve, cancel, hold expiry.

use serde::Deserialize;
use tracing::{error, info, instrument, warn};

use stockflow_core::{AggregateId, Lifecycle, ProductId, UserId, WarehouseId};
use stockflow_inventory::StockKey;
use stockflow_sales::{
    CancelOrder, ConfirmOrder, CreateSalesOrder, ExpireHold, NewOrderLine, RecordReservation,
    SalesOrder, SalesOrderAction, SalesOrderCommand, SalesOrderId, SalesOrderStatus,
};
use stockflow_shipping::ShipmentId;

use super::{FulfillmentEngine, SalesOrderView};
use crate::allocator::{AllocationLine, Allocator};
use crate::command_dispatcher::DispatchError;
use crate::compensation::{CompensationLog, LedgerStep};

pub const SALES_ORDER_AGGREGATE_TYPE: &str = "sales.order";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineRequest {
    pub product_id: ProductId,
    pub quantity: u64,
    /// Defaults to the product's reference price.
    #[serde(default)]
    pub unit_price: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub client_ref: String,
    pub lines: Vec<OrderLineRequest>,
    #[serde(default)]
    pub preferred_warehouse_id: Option<WarehouseId>,
}

impl FulfillmentEngine {
    pub(crate) fn load_order(&self, order_id: SalesOrderId) -> Result<SalesOrder, DispatchError> {
        let order = self.load(order_id.0, || SalesOrder::empty(order_id))?;
        if !order.exists() {
            return Err(DispatchError::NotFound(format!("sales order {order_id}")));
        }
        Ok(order)
    }

    pub(crate) fn execute_order(
        &self,
        order_id: SalesOrderId,
        command: SalesOrderCommand,
    ) -> Result<SalesOrder, DispatchError> {
        self.execute(order_id.0, SALES_ORDER_AGGREGATE_TYPE, command, || {
            SalesOrder::empty(order_id)
        })
    }

    #[instrument(skip(self, request), fields(client_ref = %request.client_ref), err)]
    pub fn create_order(
        &self,
        request: CreateOrderRequest,
        created_by: Option<UserId>,
    ) -> Result<SalesOrderView, DispatchError> {
        if let Some(w) = request.preferred_warehouse_id {
            self.reference.active_warehouse(w)?;
        }

        let mut lines = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            let product = self.reference.active_product(line.product_id)?;
            lines.push(NewOrderLine {
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price.unwrap_or(product.unit_price),
            });
        }

        let order_id = SalesOrderId::new(AggregateId::new());
        let order = self.execute_order(
            order_id,
            SalesOrderCommand::CreateSalesOrder(CreateSalesOrder {
                order_id,
                client_ref: request.client_ref,
                lines,
                preferred_warehouse_id: request.preferred_warehouse_id,
                created_by,
                occurred_at: Self::now(),
            }),
        )?;
        info!(order_id = %order_id, "sales order created");
        Ok(SalesOrderView::from(&order))
    }

    pub fn get_order(&self, order_id: SalesOrderId) -> Result<SalesOrderView, DispatchError> {
        Ok(SalesOrderView::from(&self.load_order(order_id)?))
    }

    /// Orders from the projection (eventually consistent with writes).
    pub fn list_orders(&self, status: Option<SalesOrderStatus>) -> Vec<SalesOrderView> {
        self.projection.list(status)
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub fn confirm_order(&self, order_id: SalesOrderId) -> Result<SalesOrderView, DispatchError> {
        let _guard = self.order_locks.acquire(order_id.0)?;
        self.load_order(order_id)?;
        let order = self.execute_order(
            order_id,
            SalesOrderCommand::ConfirmOrder(ConfirmOrder {
                order_id,
                occurred_at: Self::now(),
            }),
        )?;
        Ok(SalesOrderView::from(&order))
    }

    /// Allocate every line's outstanding quantity and record the result.
    ///
    /// Without `allow_partial`, a shortfall on any line releases everything this
    /// attempt reserved and fails with `ReservationShortfall`; the order is unchanged.
    /// Backorders report the full line quantity and everything reserved on it so
    /// far, including earlier partial reservations.
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub fn reserve_order(
        &self,
        order_id: SalesOrderId,
        allow_partial: bool,
        preferred_warehouse_id: Option<WarehouseId>,
    ) -> Result<SalesOrderView, DispatchError> {
        let _guard = self.order_locks.acquire(order_id.0)?;
        let order = self.load_order(order_id)?;
        order
            .status()
            .transition(SalesOrderAction::Reserve { fully_reserved: true })?;

        let lines: Vec<AllocationLine> = order
            .outstanding_lines()
            .into_iter()
            .map(|(product_id, quantity)| AllocationLine::new(product_id, quantity))
            .collect();
        let preferred = preferred_warehouse_id.or(order.preferred_warehouse_id());
        let candidates = self.reference.active_warehouse_ids();

        let allocation = Allocator::new(&self.ledger, &self.reference).allocate(
            &lines,
            preferred,
            allow_partial,
            &candidates,
        )?;
        let mut result = allocation.result;
        // The allocator saw outstanding quantities; report against the whole line.
        for backorder in &mut result.backorders {
            let line = order.lines().iter().find(|l| l.product_id == backorder.product_id);
            if let Some(line) = line {
                backorder.requested_qty = line.quantity;
                backorder.reserved_qty += line.reserved_qty;
            }
        }

        if !allow_partial && !result.fully_reserved {
            allocation.compensation.rollback(&self.ledger)?;
            info!(order_id = %order_id, short_lines = result.backorders.len(), "reservation rejected, stock released");
            return Err(DispatchError::ReservationShortfall(result.backorders));
        }

        let now = Self::now();
        // A planned shipment keeps the reservation pinned.
        let hold_until = match order.active_shipment_id() {
            Some(_) => None,
            None => self
                .settings
                .reservation_hold
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .map(|d| now + d),
        };

        let recorded = self.execute_order(
            order_id,
            SalesOrderCommand::RecordReservation(RecordReservation {
                order_id,
                allocations: result.allocations.clone(),
                hold_until,
                occurred_at: now,
            }),
        );
        let order = match recorded {
            Ok(order) => order,
            Err(err) => {
                error!(order_id = %order_id, error = %err, "recording reservation failed, releasing stock");
                allocation.compensation.rollback(&self.ledger)?;
                return Err(err);
            }
        };
        allocation.compensation.commit();

        info!(
            order_id = %order_id,
            status = order.status().as_str(),
            allocated = result.allocated_total(),
            "reservation recorded"
        );
        Ok(SalesOrderView::from(&order).with_reservation(result))
    }

    /// Release held stock, cancel an active pre-dispatch shipment, then record CANCELED.
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub fn cancel_order(&self, order_id: SalesOrderId) -> Result<SalesOrderView, DispatchError> {
        let _guard = self.order_locks.acquire(order_id.0)?;
        let order = self.load_order(order_id)?;
        order.status().transition(SalesOrderAction::Cancel)?;

        let log = self.release_allocations(&order)?;

        if let Some(shipment_id) = order.active_shipment_id() {
            if let Err(err) = self.cancel_shipment_record(ShipmentId::new(shipment_id)) {
                log.rollback(&self.ledger)?;
                return Err(err);
            }
        }

        match self.execute_order(
            order_id,
            SalesOrderCommand::CancelOrder(CancelOrder {
                order_id,
                occurred_at: Self::now(),
            }),
        ) {
            Ok(order) => {
                info!(order_id = %order_id, "sales order canceled");
                Ok(SalesOrderView::from(&order))
            }
            Err(err) => {
                error!(order_id = %order_id, error = %err, "recording cancel failed, re-reserving stock");
                log.rollback(&self.ledger)?;
                Err(err)
            }
        }
    }

    /// Revert a lapsed reservation to CONFIRMED. Re-checks under the order lock,
    /// so a hold refreshed or pinned by a shipment meanwhile is left alone
    /// (`Ok(None)`).
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub fn expire_hold(
        &self,
        order_id: SalesOrderId,
    ) -> Result<Option<SalesOrderView>, DispatchError> {
        let _guard = self.order_locks.acquire(order_id.0)?;
        let order = self.load_order(order_id)?;
        let now = Self::now();
        if !order.hold_expired(now) {
            return Ok(None);
        }

        let log = self.release_allocations(&order)?;
        match self.execute_order(
            order_id,
            SalesOrderCommand::ExpireHold(ExpireHold {
                order_id,
                occurred_at: now,
            }),
        ) {
            Ok(order) => {
                info!(order_id = %order_id, "reservation hold expired, stock released");
                Ok(Some(SalesOrderView::from(&order)))
            }
            Err(err) => {
                log.rollback(&self.ledger)?;
                Err(err)
            }
        }
    }

    /// Release every allocation the order holds. On failure, re-reserves what was
    /// already released and returns the error (or the rollback's, if that fails).
    fn release_allocations(&self, order: &SalesOrder) -> Result<CompensationLog, DispatchError> {
        let mut log = CompensationLog::new();
        for alloc in order.allocations() {
            let key = StockKey::new(alloc.product_id, alloc.warehouse_id);
            match self.ledger.release(key, alloc.allocated_qty) {
                Ok(released) => {
                    if released < alloc.allocated_qty {
                        warn!(
                            key = %key,
                            expected = alloc.allocated_qty,
                            released,
                            "ledger held less than the order's allocation"
                        );
                    }
                    if released > 0 {
                        log.record(LedgerStep::Released {
                            key,
                            quantity: released,
                        });
                    }
                }
                Err(err) => {
                    log.rollback(&self.ledger)?;
                    return Err(err);
                }
            }
        }
        Ok(log)
    }
}
