use std::sync::Arc;

use axum::{
    extract::{Extension, OriginalUri, Path, rejection::JsonRejection},
    response::Response,
    routing::{get, post},
    Json, Router,
};

use stockflow_core::AggregateId;
use stockflow_infra::fulfillment::CreatePurchaseOrderRequest;
use stockflow_purchasing::PurchaseOrderId;

use crate::app::dto;
use crate::app::routes::common;
use crate::app::services::AppServices;
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_purchase_order))
        .route("/:id", get(get_purchase_order))
        .route("/:id/approve", post(approve_purchase_order))
        .route("/:id/cancel", post(cancel_purchase_order))
        .route("/:id/receive", post(receive_goods))
        .route("/:id/receive-all", post(receive_all))
}

fn po_id(raw: &str, path: &str) -> Result<PurchaseOrderId, Response> {
    dto::parse_id::<AggregateId>(raw, path).map(PurchaseOrderId::new)
}

pub async fn create_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    OriginalUri(uri): OriginalUri,
    body: Result<Json<CreatePurchaseOrderRequest>, JsonRejection>,
) -> Response {
    let path = uri.path();
    let request = match common::body(body, path) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let created_by = user.user_id();

    common::created(
        services
            .run_blocking(path, move |engine| {
                engine.create_purchase_order(request, created_by)
            })
            .await,
    )
}

pub async fn get_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
) -> Response {
    let path = uri.path();
    let po_id = match po_id(&id, path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    common::ok(
        services
            .run_blocking(path, move |engine| engine.get_purchase_order(po_id))
            .await,
    )
}

pub async fn approve_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
) -> Response {
    let path = uri.path();
    let po_id = match po_id(&id, path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    common::ok(
        services
            .run_blocking(path, move |engine| engine.approve_purchase_order(po_id))
            .await,
    )
}

pub async fn cancel_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
) -> Response {
    let path = uri.path();
    let po_id = match po_id(&id, path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    common::ok(
        services
            .run_blocking(path, move |engine| engine.cancel_purchase_order(po_id))
            .await,
    )
}

pub async fn receive_goods(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
    body: Result<Json<dto::ReceiveRequest>, JsonRejection>,
) -> Response {
    let path = uri.path();
    let po_id = match po_id(&id, path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let request = match common::body(body, path) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    common::ok(
        services
            .run_blocking(path, move |engine| engine.receive_goods(po_id, request.items))
            .await,
    )
}

pub async fn receive_all(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
) -> Response {
    let path = uri.path();
    let po_id = match po_id(&id, path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    common::ok(
        services
            .run_blocking(path, move |engine| engine.receive_all(po_id))
            .await,
    )
}
