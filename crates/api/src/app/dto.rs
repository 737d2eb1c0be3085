use std::str::FromStr;

use axum::http::StatusCode;
use axum::response::Response;
use serde::Deserialize;

use stockflow_core::{DomainError, WarehouseId};
use stockflow_purchasing::ReceptionItem;
use stockflow_sales::SalesOrderStatus;
use stockflow_shipping::ShipmentStatus;

use crate::app::errors;

// -------------------------
// Query strings
// -------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveQuery {
    #[serde(default)]
    pub allow_partial: bool,
    pub preferred_warehouse_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOrdersQuery {
    pub status: Option<SalesOrderStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotQuery {
    pub carrier_id: Option<String>,
}

// -------------------------
// Request bodies
// -------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipRequest {
    pub tracking_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateRequest {
    pub status: ShipmentStatus,
    pub tracking_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveRequest {
    pub items: Vec<ReceptionItem>,
}

/// Reference data bodies; the identifier comes from the path.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductUpsert {
    pub sku: String,
    pub name: String,
    #[serde(default = "active_by_default")]
    pub active: bool,
    #[serde(default)]
    pub unit_price: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarehouseUpsert {
    pub name: String,
    #[serde(default = "active_by_default")]
    pub active: bool,
    pub capacity: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarrierUpsert {
    pub name: String,
    #[serde(default = "active_by_default")]
    pub active: bool,
    pub daily_capacity: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplierUpsert {
    pub name: String,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

// -------------------------
// Path and query parsing
// -------------------------

/// Parse an identifier from a path segment or query value; 400 on failure.
pub fn parse_id<T>(raw: &str, path: &str) -> Result<T, Response>
where
    T: FromStr<Err = DomainError>,
{
    raw.trim()
        .parse()
        .map_err(|e: DomainError| errors::json_error(StatusCode::BAD_REQUEST, e.to_string(), path))
}

pub fn parse_optional_id<T>(raw: Option<&str>, path: &str) -> Result<Option<T>, Response>
where
    T: FromStr<Err = DomainError>,
{
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => parse_id(raw, path).map(Some),
        None => Ok(None),
    }
}

impl ReserveQuery {
    pub fn preferred_warehouse(&self, path: &str) -> Result<Option<WarehouseId>, Response> {
        parse_optional_id(self.preferred_warehouse_id.as_deref(), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockflow_core::ProductId;

    #[test]
    fn ids_parse_or_fail_with_400() {
        let id = ProductId::new();
        let parsed: ProductId = parse_id(&id.to_string(), "/p").unwrap();
        assert_eq!(parsed, id);

        let err = parse_id::<ProductId>("not-a-uuid", "/p").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn blank_optional_ids_are_absent() {
        assert_eq!(parse_optional_id::<WarehouseId>(Some("  "), "/p").unwrap(), None);
        assert_eq!(parse_optional_id::<WarehouseId>(None, "/p").unwrap(), None);
    }

    #[test]
    fn upserts_default_to_active() {
        let body: CarrierUpsert =
            serde_json::from_str(r#"{"name":"Fast","dailyCapacity":3}"#).unwrap();
        assert!(body.active);
        assert_eq!(body.daily_capacity, 3);
    }

    #[test]
    fn reception_body_is_camel_case() {
        let body: ReceiveRequest =
            serde_json::from_str(r#"{"items":[{"lineId":1,"receivedQty":5}]}"#).unwrap();
        assert_eq!(body.items[0].line_id, 1);
        assert_eq!(body.items[0].received_qty, 5);
    }
}
