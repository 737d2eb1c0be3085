use axum::Router;

pub mod common;
pub mod inventory;
pub mod purchases;
pub mod reference;
pub mod sales;
pub mod shipments;
pub mod system;

/// Router for every business endpoint.
pub fn router() -> Router {
    Router::new()
        .nest("/sales-orders", sales::router())
        .nest("/shipments", shipments::router())
        .nest("/purchase-orders", purchases::router())
        .nest("/inventory", inventory::router())
        .nest("/reference", reference::router())
}
