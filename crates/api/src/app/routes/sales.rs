use std::sync::Arc;

use axum::{
    extract::{
        Extension, OriginalUri, Path, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    response::Response,
    routing::{get, post},
    Json, Router,
};

use stockflow_core::AggregateId;
use stockflow_infra::fulfillment::CreateOrderRequest;
use stockflow_sales::SalesOrderId;

use crate::app::dto;
use crate::app::routes::common;
use crate::app::services::AppServices;
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_sales_order).get(list_sales_orders))
        .route("/:id", get(get_sales_order))
        .route("/:id/confirm", post(confirm_sales_order))
        .route("/:id/reserve", post(reserve_sales_order))
        .route("/:id/cancel", post(cancel_sales_order))
}

fn order_id(raw: &str, path: &str) -> Result<SalesOrderId, Response> {
    dto::parse_id::<AggregateId>(raw, path).map(SalesOrderId::new)
}

pub async fn create_sales_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    OriginalUri(uri): OriginalUri,
    body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Response {
    let path = uri.path();
    let request = match common::body(body, path) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let created_by = user.user_id();

    common::created(
        services
            .run_blocking(path, move |engine| engine.create_order(request, created_by))
            .await,
    )
}

pub async fn list_sales_orders(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    query: Result<Query<dto::ListOrdersQuery>, QueryRejection>,
) -> Response {
    let path = uri.path();
    let status = match common::query(query, path) {
        Ok(q) => q.status,
        Err(resp) => return resp,
    };

    common::ok(
        services
            .run_blocking(path, move |engine| Ok(engine.list_orders(status)))
            .await,
    )
}

pub async fn get_sales_order(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
) -> Response {
    let path = uri.path();
    let order_id = match order_id(&id, path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    common::ok(
        services
            .run_blocking(path, move |engine| engine.get_order(order_id))
            .await,
    )
}

pub async fn confirm_sales_order(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
) -> Response {
    let path = uri.path();
    let order_id = match order_id(&id, path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    common::ok(
        services
            .run_blocking(path, move |engine| engine.confirm_order(order_id))
            .await,
    )
}

pub async fn reserve_sales_order(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
    query: Result<Query<dto::ReserveQuery>, QueryRejection>,
) -> Response {
    let path = uri.path();
    let order_id = match order_id(&id, path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let query = match common::query(query, path) {
        Ok(q) => q,
        Err(resp) => return resp,
    };
    let preferred = match query.preferred_warehouse(path) {
        Ok(w) => w,
        Err(resp) => return resp,
    };
    let allow_partial = query.allow_partial;

    common::ok(
        services
            .run_blocking(path, move |engine| {
                engine.reserve_order(order_id, allow_partial, preferred)
            })
            .await,
    )
}

pub async fn cancel_sales_order(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
) -> Response {
    let path = uri.path();
    let order_id = match order_id(&id, path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    common::ok(
        services
            .run_blocking(path, move |engine| engine.cancel_order(order_id))
            .await,
    )
}
