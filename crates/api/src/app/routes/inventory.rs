use std::sync::Arc;

use axum::{
    extract::{Extension, OriginalUri, Path, rejection::JsonRejection},
    response::Response,
    routing::{get, post},
    Json, Router,
};

use stockflow_core::{ProductId, WarehouseId};
use stockflow_infra::fulfillment::ReceiptRequest;

use crate::app::dto;
use crate::app::routes::common;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/availability/:product_id", get(availability))
        .route(
            "/availability/warehouse/:warehouse_id/product/:product_id",
            get(availability_at),
        )
        .route("/receipts", post(receive_stock))
}

pub async fn availability(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    Path(product_id): Path<String>,
) -> Response {
    let path = uri.path();
    let product_id: ProductId = match dto::parse_id(&product_id, path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    common::ok(
        services
            .run_blocking(path, move |engine| engine.availability(product_id))
            .await,
    )
}

pub async fn availability_at(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    Path((warehouse_id, product_id)): Path<(String, String)>,
) -> Response {
    let path = uri.path();
    let ids = dto::parse_id::<WarehouseId>(&warehouse_id, path)
        .and_then(|w| dto::parse_id::<ProductId>(&product_id, path).map(|p| (w, p)));
    let (warehouse_id, product_id) = match ids {
        Ok(ids) => ids,
        Err(resp) => return resp,
    };

    common::ok(
        services
            .run_blocking(path, move |engine| {
                engine.availability_at(warehouse_id, product_id)
            })
            .await,
    )
}

pub async fn receive_stock(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    body: Result<Json<ReceiptRequest>, JsonRejection>,
) -> Response {
    let path = uri.path();
    let request = match common::body(body, path) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    common::created(
        services
            .run_blocking(path, move |engine| engine.receive_stock(request))
            .await,
    )
}
