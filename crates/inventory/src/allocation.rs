//! Allocation outcome types and the warehouse ranking rule.

use serde::{Deserialize, Serialize};

use stockflow_core::{ProductId, WarehouseId};

/// One warehouse's contribution to a line.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationInfo {
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub allocated_qty: u64,
}

/// A line that could not be fully reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackorderInfo {
    pub product_id: ProductId,
    pub sku: String,
    pub requested_qty: u64,
    pub reserved_qty: u64,
    pub shortfall_qty: u64,
}

/// Outcome of one allocation attempt over a set of lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationResult {
    pub success: bool,
    pub fully_reserved: bool,
    pub backorders: Vec<BackorderInfo>,
    pub allocations: Vec<AllocationInfo>,
}

impl ReservationResult {
    /// Combine per-line outcomes. `fully_reserved` holds iff no line is short.
    pub fn from_parts(allocations: Vec<AllocationInfo>, backorders: Vec<BackorderInfo>) -> Self {
        Self {
            success: true,
            fully_reserved: backorders.is_empty(),
            backorders,
            allocations,
        }
    }

    pub fn allocated_total(&self) -> u64 {
        self.allocations.iter().map(|a| a.allocated_qty).sum()
    }

    /// Allocations of one product, in allocation order.
    pub fn allocations_for(&self, product_id: ProductId) -> impl Iterator<Item = &AllocationInfo> {
        self.allocations
            .iter()
            .filter(move |a| a.product_id == product_id)
    }
}

/// Greedy visiting order: most available first, ties broken by ascending
/// warehouse id so the order is deterministic. Empty warehouses are dropped.
pub fn rank_warehouses(mut candidates: Vec<(WarehouseId, u64)>) -> Vec<(WarehouseId, u64)> {
    candidates.retain(|(_, available)| *available > 0);
    candidates.sort_by(|(wa, a), (wb, b)| b.cmp(a).then_with(|| wa.cmp(wb)));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn wh(n: u128) -> WarehouseId {
        WarehouseId::from_uuid(Uuid::from_u128(n))
    }

    #[test]
    fn ranks_by_available_then_id() {
        let ranked = rank_warehouses(vec![(wh(3), 5), (wh(2), 20), (wh(1), 5), (wh(4), 0)]);
        assert_eq!(ranked, vec![(wh(2), 20), (wh(1), 5), (wh(3), 5)]);
    }

    #[test]
    fn fully_reserved_tracks_backorders() {
        let p = ProductId::new();
        let ok = ReservationResult::from_parts(
            vec![AllocationInfo {
                warehouse_id: wh(1),
                product_id: p,
                allocated_qty: 3,
            }],
            vec![],
        );
        assert!(ok.success && ok.fully_reserved);
        assert_eq!(ok.allocated_total(), 3);

        let short = ReservationResult::from_parts(
            vec![],
            vec![BackorderInfo {
                product_id: p,
                sku: "SKU-1".into(),
                requested_qty: 3,
                reserved_qty: 0,
                shortfall_qty: 3,
            }],
        );
        assert!(short.success);
        assert!(!short.fully_reserved);
    }

    #[test]
    fn serializes_in_camel_case() {
        let info = AllocationInfo {
            warehouse_id: wh(1),
            product_id: ProductId::from_uuid(Uuid::from_u128(9)),
            allocated_qty: 4,
        };
        let json = serde_json::to_value(info).unwrap();
        assert_eq!(json["allocatedQty"], 4);
        assert!(json.get("warehouseId").is_some());
    }
}
