#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use nursery_api::{
    auth::{Claims, JwtVerifier},
    config::AppConfig,
    entities::commerce::{address, coupon, product, product_variant, DiscountType},
    events::{self, EventSender},
    handlers::AppServices,
    repositories::InMemoryStore,
    services::payments::{http_client, signature, PaymentGateways, RazorpayClient, StripeClient},
    AppState,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, Request as MockRequest, Respond, ResponseTemplate,
};

pub const JWT_SECRET: &str = "integration_tests_only_secret_with_plenty_of_entropy_0123456789";
pub const RAZORPAY_KEY_ID: &str = "rzp_test_key";
pub const RAZORPAY_KEY_SECRET: &str = "rzp_test_secret";
pub const RAZORPAY_WEBHOOK_SECRET: &str = "rzp_webhook_secret";
pub const STRIPE_WEBHOOK_SECRET: &str = "whsec_integration";

/// Answers Razorpay order creation with a fresh order id echoing the requested amount.
struct RazorpayOrders {
    counter: AtomicUsize,
}

impl Respond for RazorpayOrders {
    fn respond(&self, request: &MockRequest) -> ResponseTemplate {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
        ResponseTemplate::new(200).set_body_json(json!({
            "id": format!("order_test_{n}"),
            "amount": body["amount"],
            "currency": body["currency"],
            "status": "created"
        }))
    }
}

/// Answers Stripe PaymentIntent creation with a fresh intent id.
struct StripeIntents {
    counter: AtomicUsize,
}

impl Respond for StripeIntents {
    fn respond(&self, _request: &MockRequest) -> ResponseTemplate {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        ResponseTemplate::new(200).set_body_json(json!({
            "id": format!("pi_test_{n}"),
            "amount": 0,
            "currency": "inr",
            "status": "requires_payment_method",
            "client_secret": format!("pi_test_{n}_secret")
        }))
    }
}

/// Application wired to an in-memory store and a mock payment provider.
pub struct TestApp {
    pub store: InMemoryStore,
    pub services: AppServices,
    pub router: Router,
    pub provider: MockServer,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Provider mock answers order / intent creation successfully.
    pub async fn new() -> Self {
        let provider = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/orders"))
            .respond_with(RazorpayOrders {
                counter: AtomicUsize::new(0),
            })
            .mount(&provider)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .respond_with(StripeIntents {
                counter: AtomicUsize::new(0),
            })
            .mount(&provider)
            .await;
        Self::with_provider(provider).await
    }

    /// Uses `provider` as-is; the caller mounts whatever responses it needs.
    pub async fn with_provider(provider: MockServer) -> Self {
        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );

        let http = http_client(Duration::from_secs(2)).expect("http client");
        let gateways = PaymentGateways::new()
            .with_gateway(Arc::new(RazorpayClient::new(
                http.clone(),
                provider.uri(),
                RAZORPAY_KEY_ID.to_string(),
                RAZORPAY_KEY_SECRET.to_string(),
                Some(RAZORPAY_WEBHOOK_SECRET.to_string()),
            )))
            .with_gateway(Arc::new(StripeClient::new(
                http,
                provider.uri(),
                "sk_test_integration".to_string(),
                Some(STRIPE_WEBHOOK_SECRET.to_string()),
                300,
            )));

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let store = InMemoryStore::new();
        let services = AppServices::new(
            Arc::new(store.clone()),
            Arc::new(gateways),
            Arc::new(EventSender::new(event_tx)),
            cfg.pricing(),
        );

        let state = AppState {
            db: None,
            jwt: Arc::new(JwtVerifier::new(JWT_SECRET)),
            config: Arc::new(cfg),
            services: services.clone(),
        };

        Self {
            store,
            services,
            router: nursery_api::app_router(state),
            provider,
            _event_task: event_task,
        }
    }

    /// Seeds a product with one variant and returns the variant id.
    pub async fn seed_variant(&self, name: &str, price: Decimal, inventory: i32) -> Uuid {
        let now = Utc::now();
        let product_id = Uuid::new_v4();
        let variant_id = Uuid::new_v4();
        self.store
            .insert_product(product::Model {
                id: product_id,
                name: name.to_string(),
                image_url: Some(format!("https://cdn.example.com/{}.jpg", product_id)),
                created_at: now,
            })
            .await;
        self.store
            .insert_variant(product_variant::Model {
                id: variant_id,
                product_id,
                sku: format!("SKU-{}", &variant_id.simple().to_string()[..8]),
                name: "Standard pot".to_string(),
                price,
                inventory,
                created_at: now,
                updated_at: now,
            })
            .await;
        variant_id
    }

    /// Overwrites a variant's stock level.
    pub async fn set_inventory(&self, variant_id: Uuid, inventory: i32) {
        let mut variant = self.store.variant(variant_id).await.expect("variant seeded");
        variant.inventory = inventory;
        self.store.insert_variant(variant).await;
    }

    pub async fn inventory(&self, variant_id: Uuid) -> i32 {
        self.store
            .variant(variant_id)
            .await
            .expect("variant seeded")
            .inventory
    }

    pub async fn seed_coupon(&self, coupon: coupon::Model) {
        self.store.insert_coupon(coupon).await;
    }

    pub async fn seed_address(&self, user_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        self.store
            .insert_address(address::Model {
                id,
                user_id,
                full_name: "Asha Gardener".to_string(),
                line1: "12 Fern Lane".to_string(),
                line2: None,
                city: "Pune".to_string(),
                state: "MH".to_string(),
                postal_code: "411001".to_string(),
                country: "IN".to_string(),
                phone: "+91 98765 43210".to_string(),
                created_at: Utc::now(),
            })
            .await;
        id
    }

    /// Sends a request through the full router and returns status plus JSON body.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}

pub fn token_for(user_id: Uuid, role: Option<&str>) -> String {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        role: role.map(str::to_string),
        exp: (now + chrono::Duration::hours(1)).timestamp(),
        iat: Some(now.timestamp()),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("encode token")
}

pub fn coupon(code: &str, discount_type: DiscountType, value: Decimal) -> coupon::Model {
    let now = Utc::now();
    coupon::Model {
        id: Uuid::new_v4(),
        code: code.to_string(),
        description: None,
        discount_type,
        discount_value: value,
        min_purchase_amount: None,
        max_discount_amount: None,
        usage_limit: None,
        usage_count: 0,
        valid_from: now - chrono::Duration::days(1),
        valid_until: now + chrono::Duration::days(30),
        is_active: true,
        created_at: now,
    }
}

/// Razorpay checkout callback signature for `order_ref|payment_id`.
pub fn razorpay_callback_signature(order_ref: &str, payment_id: &str) -> String {
    signature::sign_hex(
        RAZORPAY_KEY_SECRET,
        format!("{}|{}", order_ref, payment_id).as_bytes(),
    )
}
