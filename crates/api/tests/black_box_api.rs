use std::sync::Arc;

use chrono::{Days, Utc};
use reqwest::StatusCode;
use serde_json::{Value, json};
use uuid::Uuid;

use stockflow_api::app::{AppServices, build_app, services};
use stockflow_api::config::AppConfig;

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, on an ephemeral port with an in-memory store.
        let config = AppConfig::default();
        let services = services::build_services(&config)
            .await
            .expect("failed to build services");
        let app = build_app(services.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
        self.services.shutdown();
    }
}

struct Catalog {
    product: String,
    warehouse_a: String,
    warehouse_b: String,
    carrier: String,
    supplier: String,
}

async fn put(client: &reqwest::Client, server: &TestServer, path: &str, body: Value) {
    let res = client.put(server.url(path)).json(&body).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK, "PUT {path}");
}

async fn seed(client: &reqwest::Client, server: &TestServer) -> Catalog {
    let catalog = Catalog {
        product: Uuid::now_v7().to_string(),
        warehouse_a: Uuid::now_v7().to_string(),
        warehouse_b: Uuid::now_v7().to_string(),
        carrier: Uuid::now_v7().to_string(),
        supplier: Uuid::now_v7().to_string(),
    };

    put(
        client,
        server,
        &format!("/reference/products/{}", catalog.product),
        json!({"sku": format!("SKU-{}", &catalog.product[..8]), "name": "Widget", "unitPrice": 250}),
    )
    .await;
    for wid in [&catalog.warehouse_a, &catalog.warehouse_b] {
        put(
            client,
            server,
            &format!("/reference/warehouses/{wid}"),
            json!({"name": "Warehouse"}),
        )
        .await;
    }
    put(
        client,
        server,
        &format!("/reference/carriers/{}", catalog.carrier),
        json!({"name": "Carrier", "dailyCapacity": 1}),
    )
    .await;
    put(
        client,
        server,
        &format!("/reference/suppliers/{}", catalog.supplier),
        json!({"name": "Supplier"}),
    )
    .await;

    catalog
}

async fn receive(client: &reqwest::Client, server: &TestServer, product: &str, warehouse: &str, qty: u64) {
    let res = client
        .post(server.url("/inventory/receipts"))
        .json(&json!({"productId": product, "warehouseId": warehouse, "quantity": qty}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
}

/// Create and confirm an order for `qty` units; returns its id.
async fn confirmed_order(client: &reqwest::Client, server: &TestServer, product: &str, qty: u64) -> String {
    let res = client
        .post(server.url("/sales-orders"))
        .header("x-user-id", Uuid::now_v7().to_string())
        .json(&json!({"clientRef": "C-1", "lines": [{"productId": product, "quantity": qty}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let order: Value = res.json().await.unwrap();
    assert!(order["createdBy"].is_string());
    let id = order["id"].as_str().unwrap().to_string();

    let res = client
        .post(server.url(&format!("/sales-orders/{id}/confirm")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    id
}

async fn available(client: &reqwest::Client, server: &TestServer, product: &str) -> u64 {
    let body: Value = client
        .get(server.url(&format!("/inventory/availability/{product}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["available"].as_u64().unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let server = TestServer::spawn().await;
    let res = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn partial_reservation_splits_across_warehouses() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let c = seed(&client, &server).await;
    receive(&client, &server, &c.product, &c.warehouse_a, 20).await;
    receive(&client, &server, &c.product, &c.warehouse_b, 5).await;

    let id = confirmed_order(&client, &server, &c.product, 30).await;
    let res = client
        .post(server.url(&format!("/sales-orders/{id}/reserve?allowPartial=true")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let order: Value = res.json().await.unwrap();

    assert_eq!(order["status"], "PARTIALLY_RESERVED");
    let allocations = order["reservation"]["allocations"].as_array().unwrap();
    assert_eq!(allocations.len(), 2);
    assert_eq!(allocations[0]["warehouseId"], c.warehouse_a.as_str());
    assert_eq!(allocations[0]["allocatedQty"], 20);
    assert_eq!(allocations[1]["warehouseId"], c.warehouse_b.as_str());
    assert_eq!(allocations[1]["allocatedQty"], 5);
    assert_eq!(order["reservation"]["backorders"][0]["shortfallQty"], 5);
    assert_eq!(available(&client, &server, &c.product).await, 0);
}

#[tokio::test]
async fn all_or_nothing_shortfall_is_a_conflict_with_details() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let c = seed(&client, &server).await;
    receive(&client, &server, &c.product, &c.warehouse_a, 4).await;

    let id = confirmed_order(&client, &server, &c.product, 14).await;
    let path = format!("/sales-orders/{id}/reserve?allowPartial=false");
    let res = client.post(server.url(&path)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], 409);
    assert_eq!(body["path"], format!("/sales-orders/{id}/reserve"));
    assert_eq!(body["errors"][0]["shortfallQty"], 10);
    assert_eq!(available(&client, &server, &c.product).await, 4);
}

#[tokio::test]
async fn cancel_restores_availability() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let c = seed(&client, &server).await;
    receive(&client, &server, &c.product, &c.warehouse_a, 10).await;

    let id = confirmed_order(&client, &server, &c.product, 6).await;
    client
        .post(server.url(&format!("/sales-orders/{id}/reserve")))
        .send()
        .await
        .unwrap();
    assert_eq!(available(&client, &server, &c.product).await, 4);

    let res = client
        .post(server.url(&format!("/sales-orders/{id}/cancel")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let order: Value = res.json().await.unwrap();
    assert_eq!(order["status"], "CANCELED");
    assert_eq!(available(&client, &server, &c.product).await, 10);
}

#[tokio::test]
async fn shipment_flow_and_slot_capacity() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let c = seed(&client, &server).await;
    receive(&client, &server, &c.product, &c.warehouse_a, 10).await;
    let tomorrow = Utc::now()
        .date_naive()
        .checked_add_days(Days::new(1))
        .unwrap()
        .to_string();

    let first = confirmed_order(&client, &server, &c.product, 2).await;
    let second = confirmed_order(&client, &server, &c.product, 2).await;
    for id in [&first, &second] {
        client
            .post(server.url(&format!("/sales-orders/{id}/reserve")))
            .send()
            .await
            .unwrap();
    }

    let res = client
        .post(server.url("/shipments"))
        .json(&json!({"salesOrderId": first, "carrierId": c.carrier, "plannedDate": tomorrow}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let shipment: Value = res.json().await.unwrap();
    assert_eq!(shipment["status"], "PLANNED");
    let shipment_id = shipment["id"].as_str().unwrap().to_string();

    // Capacity 1: the second order cannot book the same day.
    let res = client
        .post(server.url("/shipments"))
        .json(&json!({"salesOrderId": second, "carrierId": c.carrier, "plannedDate": tomorrow}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let slots: Value = client
        .get(server.url(&format!("/shipments/slots/{tomorrow}?carrierId={}", c.carrier)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(slots, json!({"capacity": 1, "used": 1, "available": 0}));

    let res = client
        .post(server.url(&format!("/shipments/{shipment_id}/ship")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let shipped: Value = res.json().await.unwrap();
    assert_eq!(shipped["status"], "IN_TRANSIT");
    assert!(shipped["trackingNumber"].as_str().unwrap().starts_with("TRK-"));

    let res = client
        .post(server.url(&format!("/shipments/{shipment_id}/deliver")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let order: Value = client
        .get(server.url(&format!("/sales-orders/{first}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(order["status"], "DELIVERED");
}

#[tokio::test]
async fn over_receipt_is_rejected_without_ledger_change() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let c = seed(&client, &server).await;

    let res = client
        .post(server.url("/purchase-orders"))
        .json(&json!({
            "supplierId": c.supplier,
            "warehouseId": c.warehouse_a,
            "lines": [{"productId": c.product, "quantity": 10, "unitPrice": 100}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let po: Value = res.json().await.unwrap();
    let po_id = po["id"].as_str().unwrap().to_string();

    client
        .post(server.url(&format!("/purchase-orders/{po_id}/approve")))
        .send()
        .await
        .unwrap();

    let res = client
        .post(server.url(&format!("/purchase-orders/{po_id}/receive")))
        .json(&json!({"items": [{"lineId": 1, "receivedQty": 11}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(available(&client, &server, &c.product).await, 0);

    let res = client
        .post(server.url(&format!("/purchase-orders/{po_id}/receive-all")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let po: Value = res.json().await.unwrap();
    assert_eq!(po["status"], "RECEIVED");

    let level: Value = client
        .get(server.url(&format!(
            "/inventory/availability/warehouse/{}/product/{}",
            c.warehouse_a, c.product
        )))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(level["qtyOnHand"], 10);
}

#[tokio::test]
async fn unknown_and_malformed_ids() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(server.url(&format!("/sales-orders/{}", Uuid::now_v7())))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .post(server.url("/sales-orders/not-a-uuid/confirm"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], 400);

    let res = client
        .get(server.url("/health"))
        .header("x-user-id", "nope")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn order_list_catches_up_with_the_projection() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let c = seed(&client, &server).await;
    let id = confirmed_order(&client, &server, &c.product, 1).await;

    // The list is served from a projection fed asynchronously; poll briefly.
    for _ in 0..100 {
        let orders: Value = client
            .get(server.url("/sales-orders?status=CONFIRMED"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if orders.as_array().unwrap().iter().any(|o| o["id"] == id.as_str()) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    panic!("order did not become visible in the projection within timeout");
}
