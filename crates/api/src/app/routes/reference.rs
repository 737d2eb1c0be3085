use std::sync::Arc;

use axum::{
    extract::{Extension, OriginalUri, Path, rejection::JsonRejection},
    response::Response,
    routing::put,
    Json, Router,
};

use stockflow_core::{CarrierId, ProductId, SupplierId, WarehouseId};
use stockflow_infra::command_dispatcher::DispatchError;
use stockflow_infra::read_model::{Carrier, Product, Supplier, Warehouse};

use crate::app::dto;
use crate::app::routes::common;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/products/:id", put(upsert_product))
        .route("/warehouses/:id", put(upsert_warehouse))
        .route("/carriers/:id", put(upsert_carrier))
        .route("/suppliers/:id", put(upsert_supplier))
}

pub async fn upsert_product(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
    body: Result<Json<dto::ProductUpsert>, JsonRejection>,
) -> Response {
    let path = uri.path();
    let parsed = dto::parse_id::<ProductId>(&id, path)
        .and_then(|id| common::body(body, path).map(|b| (id, b)));
    let (id, body) = match parsed {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let product = Product {
        id,
        sku: body.sku,
        name: body.name,
        active: body.active,
        unit_price: body.unit_price,
    };

    common::ok(
        services
            .run_blocking(path, move |engine| {
                engine.reference().upsert_product(product).map_err(DispatchError::from)
            })
            .await,
    )
}

pub async fn upsert_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
    body: Result<Json<dto::WarehouseUpsert>, JsonRejection>,
) -> Response {
    let path = uri.path();
    let parsed = dto::parse_id::<WarehouseId>(&id, path)
        .and_then(|id| common::body(body, path).map(|b| (id, b)));
    let (id, body) = match parsed {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let warehouse = Warehouse {
        id,
        name: body.name,
        active: body.active,
        capacity: body.capacity,
    };

    common::ok(
        services
            .run_blocking(path, move |engine| {
                engine.reference().upsert_warehouse(warehouse).map_err(DispatchError::from)
            })
            .await,
    )
}

pub async fn upsert_carrier(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
    body: Result<Json<dto::CarrierUpsert>, JsonRejection>,
) -> Response {
    let path = uri.path();
    let parsed = dto::parse_id::<CarrierId>(&id, path)
        .and_then(|id| common::body(body, path).map(|b| (id, b)));
    let (id, body) = match parsed {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let carrier = Carrier {
        id,
        name: body.name,
        active: body.active,
        daily_capacity: body.daily_capacity,
    };

    common::ok(
        services
            .run_blocking(path, move |engine| {
                engine.reference().upsert_carrier(carrier).map_err(DispatchError::from)
            })
            .await,
    )
}

pub async fn upsert_supplier(
    Extension(services): Extension<Arc<AppServices>>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
    body: Result<Json<dto::SupplierUpsert>, JsonRejection>,
) -> Response {
    let path = uri.path();
    let parsed = dto::parse_id::<SupplierId>(&id, path)
        .and_then(|id| common::body(body, path).map(|b| (id, b)));
    let (id, body) = match parsed {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let supplier = Supplier {
        id,
        name: body.name,
        active: body.active,
    };

    common::ok(
        services
            .run_blocking(path, move |engine| {
                engine.reference().upsert_supplier(supplier).map_err(DispatchError::from)
            })
            .await,
    )
}
