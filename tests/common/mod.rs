//! Shared test harness: in-memory SQLite, real router, mock gateway.
#![allow(dead_code)]

use axum::{
    body::{self, Body},
    http::{header, Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait, PaginatorTrait,
    Set,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use storefront_checkout_api::config::{AppConfig, CheckoutConfig};
use storefront_checkout_api::entities::{
    cart_item, checkout_session, product, product_variant, CheckoutSession, Order, Payment,
};
use storefront_checkout_api::services::{CheckoutService, MockPaymentGateway, PaymentGateway};
use storefront_checkout_api::{api_v1_routes, db, events, AppState};

/// Test configuration: spec defaults except a short gateway timeout so the
/// timeout path can be exercised quickly.
pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        host: "127.0.0.1".into(),
        port: 0,
        environment: "test".into(),
        log_level: "info".into(),
        log_json: false,
        auto_migrate: true,
        cors_allowed_origins: None,
        db_max_connections: 1,
        db_min_connections: 1,
        db_connect_timeout_secs: 5,
        db_idle_timeout_secs: 600,
        db_acquire_timeout_secs: 8,
        request_timeout_secs: 30,
        event_channel_capacity: 64,
        checkout: CheckoutConfig {
            session_ttl_secs: 900,
            gateway_timeout_ms: 250,
            ..CheckoutConfig::default()
        },
    }
}

pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub router: Router,
    pub gateway: Arc<MockPaymentGateway>,
    pub config: Arc<AppConfig>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        // A single pooled connection keeps every test on the same in-memory
        // database.
        let mut options = ConnectOptions::new("sqlite::memory:");
        options
            .max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);
        let pool = Database::connect(options).await.expect("sqlite connect");
        db::bootstrap_schema(&pool).await.expect("schema bootstrap");
        let db = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
        let event_sender = events::EventSender::new(event_tx);
        tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(MockPaymentGateway::new());
        let gateway_dyn: Arc<dyn PaymentGateway> = gateway.clone();

        let config = Arc::new(config);
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            gateway_dyn,
            Arc::new(event_sender.clone()),
            config.clone(),
        ));

        let state = AppState {
            db: db.clone(),
            config: config.clone(),
            event_sender,
            checkout,
        };

        let router = Router::new()
            .nest("/api/v1", api_v1_routes())
            .with_state(state);

        Self {
            db,
            router,
            gateway,
            config,
        }
    }

    pub async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Response {
        let builder = Request::builder().method(method).uri(path);
        let request = match body {
            Some(value) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(value.to_string()))
                .expect("request build"),
            None => builder.body(Body::empty()).expect("request build"),
        };

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }

    // ---- catalog / cart seeding ----

    pub async fn seed_product(
        &self,
        name: &str,
        base_price: Decimal,
        discount_percent: Option<Decimal>,
    ) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            base_price: Set(base_price),
            discount_percent: Set(discount_percent),
            image_url: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("insert product")
    }

    pub async fn seed_variant(
        &self,
        product_id: Uuid,
        name: &str,
        price: Option<Decimal>,
        discount_percent: Option<Decimal>,
        stock: i32,
    ) -> product_variant::Model {
        product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            name: Set(name.to_string()),
            price: Set(price),
            discount_percent: Set(discount_percent),
            stock: Set(stock),
            image_url: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("insert variant")
    }

    pub async fn seed_cart_item(
        &self,
        customer_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        quantity: i32,
    ) -> cart_item::Model {
        cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            product_id: Set(product_id),
            variant_id: Set(variant_id),
            quantity: Set(quantity),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("insert cart item")
    }

    // ---- direct state manipulation ----

    pub async fn set_product_price(&self, product_id: Uuid, base_price: Decimal) {
        let model = storefront_checkout_api::entities::Product::find_by_id(product_id)
            .one(&*self.db)
            .await
            .expect("load product")
            .expect("product exists");
        let mut active: product::ActiveModel = model.into();
        active.base_price = Set(base_price);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await.expect("update product");
    }

    pub async fn set_variant_stock(&self, variant_id: Uuid, stock: i32) {
        let model = storefront_checkout_api::entities::ProductVariant::find_by_id(variant_id)
            .one(&*self.db)
            .await
            .expect("load variant")
            .expect("variant exists");
        let mut active: product_variant::ActiveModel = model.into();
        active.stock = Set(stock);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await.expect("update variant");
    }

    pub async fn variant_stock(&self, variant_id: Uuid) -> i32 {
        storefront_checkout_api::entities::ProductVariant::find_by_id(variant_id)
            .one(&*self.db)
            .await
            .expect("load variant")
            .expect("variant exists")
            .stock
    }

    /// Pushes a session's expiry into the past to exercise lazy expiry.
    pub async fn force_expire_session(&self, session_id: Uuid) {
        let model = CheckoutSession::find_by_id(session_id)
            .one(&*self.db)
            .await
            .expect("load session")
            .expect("session exists");
        let mut active: checkout_session::ActiveModel = model.into();
        active.expires_at = Set(Utc::now() - chrono::Duration::seconds(60));
        active.update(&*self.db).await.expect("update session");
    }

    pub async fn session_status(&self, session_id: Uuid) -> String {
        CheckoutSession::find_by_id(session_id)
            .one(&*self.db)
            .await
            .expect("load session")
            .expect("session exists")
            .status
            .to_string()
    }

    pub async fn count_sessions(&self) -> u64 {
        CheckoutSession::find()
            .count(&*self.db)
            .await
            .expect("count sessions")
    }

    pub async fn count_payments(&self) -> u64 {
        Payment::find().count(&*self.db).await.expect("count payments")
    }

    pub async fn count_orders(&self) -> u64 {
        Order::find().count(&*self.db).await.expect("count orders")
    }

    // ---- flow helpers ----

    /// Initiates a checkout for the given cart items; returns the session id.
    pub async fn initiate(&self, customer_id: Uuid, item_ids: &[Uuid], key: &str) -> Uuid {
        let response = self
            .request(
                Method::POST,
                "/api/v1/checkout/initiate",
                Some(json!({
                    "customerId": customer_id,
                    "selectedItemIds": item_ids,
                    "idempotencyKey": key,
                })),
            )
            .await;
        assert_eq!(response.status(), 201, "initiate should create a session");
        let body = response_json(response).await;
        body["sessionId"]
            .as_str()
            .expect("sessionId in response")
            .parse()
            .expect("sessionId is a uuid")
    }

    /// Initiates and validates, leaving the session awaiting payment.
    pub async fn initiate_to_awaiting_payment(
        &self,
        customer_id: Uuid,
        item_ids: &[Uuid],
        key: &str,
    ) -> Uuid {
        let session_id = self.initiate(customer_id, item_ids, key).await;
        let response = self
            .request(
                Method::POST,
                &format!("/api/v1/checkout/{}/validate", session_id),
                None,
            )
            .await;
        assert_eq!(response.status(), 200, "validate should succeed");
        session_id
    }

    /// Runs a full checkout to a confirmed order; returns (session_id, order_id).
    pub async fn checkout_to_order(
        &self,
        customer_id: Uuid,
        item_ids: &[Uuid],
        key_prefix: &str,
    ) -> (Uuid, Uuid) {
        let session_id = self
            .initiate_to_awaiting_payment(customer_id, item_ids, &format!("{key_prefix}-init"))
            .await;

        let pay = self
            .request(
                Method::POST,
                &format!("/api/v1/checkout/{}/pay", session_id),
                Some(json!({
                    "paymentMethod": "CARD",
                    "idempotencyKey": format!("{key_prefix}-pay"),
                })),
            )
            .await;
        assert_eq!(pay.status(), 200, "pay should succeed");
        let pay_body = response_json(pay).await;
        let payment_id = pay_body["paymentId"].as_str().expect("paymentId");

        let complete = self
            .request(
                Method::POST,
                &format!("/api/v1/checkout/{}/complete", session_id),
                Some(json!({ "paymentId": payment_id })),
            )
            .await;
        assert_eq!(complete.status(), 201, "complete should create an order");
        let complete_body = response_json(complete).await;
        let order_id = complete_body["orderId"]
            .as_str()
            .expect("orderId")
            .parse()
            .expect("orderId is a uuid");

        (session_id, order_id)
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
