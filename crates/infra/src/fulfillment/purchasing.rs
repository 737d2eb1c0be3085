//! Purchase orders: creation, approval and goods reception into the ledger.

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{error, info, instrument};

use stockflow_core::{AggregateId, ProductId, SupplierId, UserId, WarehouseId};
use stockflow_inventory::StockKey;
use stockflow_purchasing::{
    ApprovePurchaseOrder, CancelPurchaseOrder, CreatePurchaseOrder, NewPurchaseLine,
    PurchaseOrder, PurchaseOrderCommand, PurchaseOrderId, ReceiveGoods, ReceptionItem,
};

use super::{FulfillmentEngine, PurchaseOrderView};
use crate::command_dispatcher::DispatchError;
use crate::compensation::{CompensationLog, LedgerStep};

pub const PURCHASE_ORDER_AGGREGATE_TYPE: &str = "purchasing.order";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseLineRequest {
    pub product_id: ProductId,
    pub quantity: u64,
    pub unit_price: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePurchaseOrderRequest {
    pub supplier_id: SupplierId,
    pub warehouse_id: WarehouseId,
    #[serde(default)]
    pub expected_delivery_date: Option<NaiveDate>,
    pub lines: Vec<PurchaseLineRequest>,
}

impl FulfillmentEngine {
    fn load_purchase_order(&self, po_id: PurchaseOrderId) -> Result<PurchaseOrder, DispatchError> {
        let po = self.load(po_id.0, || PurchaseOrder::empty(po_id))?;
        if !po.exists() {
            return Err(DispatchError::NotFound(format!("purchase order {po_id}")));
        }
        Ok(po)
    }

    fn execute_purchase(
        &self,
        po_id: PurchaseOrderId,
        command: PurchaseOrderCommand,
    ) -> Result<PurchaseOrder, DispatchError> {
        self.execute(po_id.0, PURCHASE_ORDER_AGGREGATE_TYPE, command, || {
            PurchaseOrder::empty(po_id)
        })
    }

    #[instrument(skip(self, request), fields(supplier_id = %request.supplier_id), err)]
    pub fn create_purchase_order(
        &self,
        request: CreatePurchaseOrderRequest,
        created_by: Option<UserId>,
    ) -> Result<PurchaseOrderView, DispatchError> {
        if self.reference.supplier(request.supplier_id).is_none() {
            return Err(DispatchError::NotFound(format!(
                "supplier {}",
                request.supplier_id
            )));
        }
        if self.reference.warehouse(request.warehouse_id).is_none() {
            return Err(DispatchError::NotFound(format!(
                "warehouse {}",
                request.warehouse_id
            )));
        }
        for line in &request.lines {
            if self.reference.product(line.product_id).is_none() {
                return Err(DispatchError::NotFound(format!("product {}", line.product_id)));
            }
        }

        let po_id = PurchaseOrderId::new(AggregateId::new());
        let po = self.execute_purchase(
            po_id,
            PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
                order_id: po_id,
                supplier_id: request.supplier_id,
                warehouse_id: request.warehouse_id,
                expected_delivery_date: request.expected_delivery_date,
                lines: request
                    .lines
                    .iter()
                    .map(|l| NewPurchaseLine {
                        product_id: l.product_id,
                        quantity: l.quantity,
                        unit_price: l.unit_price,
                    })
                    .collect(),
                created_by,
                occurred_at: Self::now(),
            }),
        )?;
        info!(po_id = %po_id, "purchase order created");
        Ok(PurchaseOrderView::from(&po))
    }

    pub fn get_purchase_order(
        &self,
        po_id: PurchaseOrderId,
    ) -> Result<PurchaseOrderView, DispatchError> {
        Ok(PurchaseOrderView::from(&self.load_purchase_order(po_id)?))
    }

    #[instrument(skip(self), fields(po_id = %po_id), err)]
    pub fn approve_purchase_order(
        &self,
        po_id: PurchaseOrderId,
    ) -> Result<PurchaseOrderView, DispatchError> {
        let _guard = self.purchase_locks.acquire(po_id.0)?;
        self.load_purchase_order(po_id)?;
        let po = self.execute_purchase(
            po_id,
            PurchaseOrderCommand::ApprovePurchaseOrder(ApprovePurchaseOrder {
                order_id: po_id,
                occurred_at: Self::now(),
            }),
        )?;
        Ok(PurchaseOrderView::from(&po))
    }

    /// Cancel without touching the ledger; un-received quantities are voided.
    #[instrument(skip(self), fields(po_id = %po_id), err)]
    pub fn cancel_purchase_order(
        &self,
        po_id: PurchaseOrderId,
    ) -> Result<PurchaseOrderView, DispatchError> {
        let _guard = self.purchase_locks.acquire(po_id.0)?;
        self.load_purchase_order(po_id)?;
        let po = self.execute_purchase(
            po_id,
            PurchaseOrderCommand::CancelPurchaseOrder(CancelPurchaseOrder {
                order_id: po_id,
                occurred_at: Self::now(),
            }),
        )?;
        info!(po_id = %po_id, "purchase order canceled");
        Ok(PurchaseOrderView::from(&po))
    }

    /// Receive a batch of goods.
    ///
    /// The whole batch is validated before any stock is credited. Ledger credits
    /// are reversed if a later credit or the purchase order update fails.
    #[instrument(skip(self, items), fields(po_id = %po_id, items = items.len()), err)]
    pub fn receive_goods(
        &self,
        po_id: PurchaseOrderId,
        items: Vec<ReceptionItem>,
    ) -> Result<PurchaseOrderView, DispatchError> {
        let _guard = self.purchase_locks.acquire(po_id.0)?;
        let po = self.load_purchase_order(po_id)?;
        self.receive_locked(&po, items)
    }

    /// Receive every line's remaining quantity.
    #[instrument(skip(self), fields(po_id = %po_id), err)]
    pub fn receive_all(&self, po_id: PurchaseOrderId) -> Result<PurchaseOrderView, DispatchError> {
        let _guard = self.purchase_locks.acquire(po_id.0)?;
        let po = self.load_purchase_order(po_id)?;
        let items = po.remaining_items();
        self.receive_locked(&po, items)
    }

    fn receive_locked(
        &self,
        po: &PurchaseOrder,
        items: Vec<ReceptionItem>,
    ) -> Result<PurchaseOrderView, DispatchError> {
        let po_id = po.id_typed();
        let received = po.validate_reception(&items)?;
        let warehouse_id = po.warehouse_id().ok_or_else(|| {
            DispatchError::InvariantViolation(format!("purchase order {po_id} has no warehouse"))
        })?;

        let mut log = CompensationLog::new();
        for line in &received {
            let key = StockKey::new(line.product_id, warehouse_id);
            if let Err(err) = self.ledger.receive(key, line.quantity) {
                log.rollback(&self.ledger)?;
                return Err(err);
            }
            log.record(LedgerStep::Received {
                key,
                quantity: line.quantity,
            });
        }

        match self.execute_purchase(
            po_id,
            PurchaseOrderCommand::ReceiveGoods(ReceiveGoods {
                order_id: po_id,
                items,
                occurred_at: Self::now(),
            }),
        ) {
            Ok(po) => {
                log.commit();
                info!(po_id = %po_id, status = ?po.status(), "goods received");
                Ok(PurchaseOrderView::from(&po))
            }
            Err(err) => {
                error!(po_id = %po_id, error = %err, "recording reception failed, reversing receipts");
                log.rollback(&self.ledger)?;
                Err(err)
            }
        }
    }
}
