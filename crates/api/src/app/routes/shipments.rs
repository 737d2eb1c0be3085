use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        Extension, OriginalUri, Path, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::Response,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::NaiveDate;

use stockflow_core::{AggregateId, CarrierId};
use stockflow_infra::fulfillment::CreateShipmentRequest;
use stockflow_shipping::ShipmentId;

use crate::app::routes::common;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_shipment))
        .route("/slots/:date", get(slot_capacity))
        .route("/:id", get(get_shipment))
        .route("/:id/ship", post(ship))
        .route("/:id/deliver", post(deliver))
        .route("/:id/cancel", post(cancel_shipment))
        .route("/:id/status", patch(update_status))
}

fn shipment_id(raw: &str, path: &str) -> Result<ShipmentId, Response> {
    dto::parse_id::<AggregateId>(raw, path).map(ShipmentId::new)
}

pub async fn create_shipment(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    body: Result<Json<CreateShipmentRequest>, JsonRejection>,
) -> Response {
    let path = uri.path();
    let request = match common::body(body, path) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    common::created(
        services
            .run_blocking(path, move |engine| engine.create_shipment(request))
            .await,
    )
}

pub async fn get_shipment(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
) -> Response {
    let path = uri.path();
    let shipment_id = match shipment_id(&id, path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    common::ok(
        services
            .run_blocking(path, move |engine| engine.get_shipment(shipment_id))
            .await,
    )
}

pub async fn slot_capacity(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    Path(date): Path<String>,
    query: Result<Query<dto::SlotQuery>, QueryRejection>,
) -> Response {
    let path = uri.path();
    let date = match NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d") {
        Ok(d) => d,
        Err(e) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                format!("date must be YYYY-MM-DD: {e}"),
                path,
            );
        }
    };
    let carrier_id = match common::query(query, path)
        .and_then(|q| dto::parse_optional_id::<CarrierId>(q.carrier_id.as_deref(), path))
    {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    common::ok(
        services
            .run_blocking(path, move |engine| engine.slot_capacity(date, carrier_id))
            .await,
    )
}

pub async fn ship(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let path = uri.path();
    let shipment_id = match shipment_id(&id, path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let request: dto::ShipRequest = match common::optional_body(body, path) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    common::ok(
        services
            .run_blocking(path, move |engine| {
                engine.ship(shipment_id, request.tracking_number)
            })
            .await,
    )
}

pub async fn deliver(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
) -> Response {
    let path = uri.path();
    let shipment_id = match shipment_id(&id, path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    common::ok(
        services
            .run_blocking(path, move |engine| engine.deliver(shipment_id))
            .await,
    )
}

pub async fn cancel_shipment(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
) -> Response {
    let path = uri.path();
    let shipment_id = match shipment_id(&id, path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    common::ok(
        services
            .run_blocking(path, move |engine| engine.cancel_shipment(shipment_id))
            .await,
    )
}

pub async fn update_status(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
    body: Result<Json<dto::StatusUpdateRequest>, JsonRejection>,
) -> Response {
    let path = uri.path();
    let shipment_id = match shipment_id(&id, path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let request = match common::body(body, path) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    common::ok(
        services
            .run_blocking(path, move |engine| {
                engine.update_shipment_status(shipment_id, request.status, request.tracking_number)
            })
            .await,
    )
}
