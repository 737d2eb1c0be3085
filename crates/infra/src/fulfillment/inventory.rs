//! Direct stock receipts and availability queries.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use stockflow_core::{ProductId, WarehouseId};
use stockflow_inventory::StockKey;

use super::FulfillmentEngine;
use crate::command_dispatcher::DispatchError;
use crate::ledger::StockLevel;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptRequest {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: u64,
}

/// Availability of one product across every registered warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityView {
    pub product_id: ProductId,
    pub available: u64,
    pub warehouses: Vec<StockLevel>,
}

impl FulfillmentEngine {
    /// Credit stock outside any purchase order (opening balances, corrections).
    #[instrument(skip(self, request), fields(product_id = %request.product_id, warehouse_id = %request.warehouse_id), err)]
    pub fn receive_stock(&self, request: ReceiptRequest) -> Result<StockLevel, DispatchError> {
        self.reference.active_product(request.product_id)?;
        if self.reference.warehouse(request.warehouse_id).is_none() {
            return Err(DispatchError::NotFound(format!(
                "warehouse {}",
                request.warehouse_id
            )));
        }
        self.ledger.receive(
            StockKey::new(request.product_id, request.warehouse_id),
            request.quantity,
        )
    }

    pub fn availability(&self, product_id: ProductId) -> Result<AvailabilityView, DispatchError> {
        if self.reference.product(product_id).is_none() {
            return Err(DispatchError::NotFound(format!("product {product_id}")));
        }
        let warehouses = self
            .reference
            .warehouse_ids()
            .into_iter()
            .map(|w| self.ledger.level(StockKey::new(product_id, w)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AvailabilityView {
            product_id,
            available: warehouses.iter().map(|l| l.available).sum(),
            warehouses,
        })
    }

    pub fn availability_at(
        &self,
        warehouse_id: WarehouseId,
        product_id: ProductId,
    ) -> Result<StockLevel, DispatchError> {
        self.ledger.level(StockKey::new(product_id, warehouse_id))
    }
}
