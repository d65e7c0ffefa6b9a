mod common;

use assert_matches::assert_matches;
use common::{coupon, TestApp};
use nursery_api::{
    entities::{commerce::DiscountType, OrderStatus, PaymentMethod},
    errors::ServiceError,
    services::commerce::{AddToCartInput, CreateOrderInput, PlacedOrder},
};
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Razorpay mock that takes `delay` to create an order.
async fn slow_provider(delay: Duration) -> MockServer {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(delay)
                .set_body_json(json!({
                    "id": "order_slow_1",
                    "amount": 0,
                    "currency": "INR",
                    "status": "created"
                })),
        )
        .mount(&provider)
        .await;
    provider
}

/// Resolves once the provider has received a request.
async fn provider_called(provider: &MockServer) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let seen = provider
                .received_requests()
                .await
                .map_or(false, |requests| !requests.is_empty());
            if seen {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("checkout never reached the provider");
}

async fn shopper_with_cart(app: &TestApp, variant: Uuid, quantity: i32) -> (Uuid, Uuid) {
    let user = Uuid::new_v4();
    let address = app.seed_address(user).await;
    app.services
        .cart
        .add_item(user, AddToCartInput { variant_id: variant, quantity })
        .await
        .unwrap();
    (user, address)
}

fn spawn_checkout(
    app: &Arc<TestApp>,
    (user, address): (Uuid, Uuid),
    payment_method: PaymentMethod,
) -> tokio::task::JoinHandle<Result<PlacedOrder, ServiceError>> {
    let app = app.clone();
    tokio::spawn(async move {
        app.services
            .orders
            .create_order(
                user,
                CreateOrderInput {
                    shipping_address_id: address,
                    payment_method,
                },
            )
            .await
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checkouts_never_oversell() {
    const SHOPPERS: usize = 12;
    const STOCK: i32 = 5;

    let app = Arc::new(TestApp::new().await);
    let variant = app.seed_variant("Variegated Monstera", dec!(2499), STOCK).await;

    let mut shoppers = Vec::with_capacity(SHOPPERS);
    for _ in 0..SHOPPERS {
        let user = Uuid::new_v4();
        let address = app.seed_address(user).await;
        app.services
            .cart
            .add_item(user, AddToCartInput { variant_id: variant, quantity: 1 })
            .await
            .unwrap();
        shoppers.push((user, address));
    }

    let mut tasks = Vec::with_capacity(SHOPPERS);
    for (user, address) in shoppers {
        let app = app.clone();
        tasks.push(tokio::spawn(async move {
            app.services
                .orders
                .create_order(
                    user,
                    CreateOrderInput {
                        shipping_address_id: address,
                        payment_method: PaymentMethod::Cod,
                    },
                )
                .await
        }));
    }

    let mut placed = 0;
    let mut out_of_stock = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => placed += 1,
            Err(ServiceError::InsufficientStock(_)) => out_of_stock += 1,
            Err(other) => panic!("unexpected checkout error: {other}"),
        }
    }

    assert_eq!(placed, STOCK as usize);
    assert_eq!(out_of_stock, SHOPPERS - STOCK as usize);
    assert_eq!(app.inventory(variant).await, 0);
}

#[tokio::test]
async fn last_coupon_use_goes_to_one_checkout() {
    let app = TestApp::new().await;
    let variant = app.seed_variant("Snake Plant", dec!(300), 10).await;
    let mut one_off = coupon("ONEOFF", DiscountType::Fixed, dec!(50));
    one_off.usage_limit = Some(1);
    app.seed_coupon(one_off).await;

    let mut shoppers = Vec::new();
    for _ in 0..2 {
        let user = Uuid::new_v4();
        let address = app.seed_address(user).await;
        app.services
            .cart
            .add_item(user, AddToCartInput { variant_id: variant, quantity: 1 })
            .await
            .unwrap();
        app.services.cart.apply_coupon(user, "ONEOFF").await.unwrap();
        shoppers.push((user, address));
    }

    let checkout = |(user, address): (Uuid, Uuid)| {
        app.services.orders.create_order(
            user,
            CreateOrderInput {
                shipping_address_id: address,
                payment_method: PaymentMethod::Cod,
            },
        )
    };

    let first = checkout(shoppers[0]).await.unwrap();
    assert_eq!(first.order.order.discount, dec!(50));

    assert_matches!(checkout(shoppers[1]).await, Err(ServiceError::CouponExhausted));

    // The losing checkout rolled back entirely.
    assert_eq!(app.store.coupon("ONEOFF").await.unwrap().usage_count, 1);
    assert_eq!(app.inventory(variant).await, 9);
    let cart = app.services.cart.get_cart(shoppers[1].0).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert!(app.services.orders.list_orders(shoppers[1].0).await.unwrap().is_empty());
}

#[tokio::test]
async fn stock_sold_during_provider_call_rolls_back_checkout() {
    let app = Arc::new(TestApp::with_provider(slow_provider(Duration::from_millis(800)).await).await);
    let variant = app.seed_variant("Fiddle Leaf Fig", dec!(899), 3).await;
    let shopper = shopper_with_cart(&app, variant, 2).await;

    let checkout = spawn_checkout(&app, shopper, PaymentMethod::Razorpay);
    provider_called(&app.provider).await;
    // Stock was there when the checkout started and is gone before it writes.
    app.set_inventory(variant, 1).await;

    assert_matches!(
        checkout.await.unwrap(),
        Err(ServiceError::InsufficientStock(label)) if label.contains("Fiddle Leaf Fig")
    );

    assert_eq!(app.inventory(variant).await, 1);
    let cart = app.services.cart.get_cart(shopper.0).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 2);
    assert!(app.services.orders.list_orders(shopper.0).await.unwrap().is_empty());
}

#[tokio::test]
async fn slow_provider_does_not_hold_up_other_shoppers() {
    let app = Arc::new(TestApp::with_provider(slow_provider(Duration::from_millis(1500)).await).await);
    let variant = app.seed_variant("Peace Lily", dec!(450), 10).await;
    let paying = shopper_with_cart(&app, variant, 1).await;
    let browsing = shopper_with_cart(&app, variant, 3).await;

    let checkout = spawn_checkout(&app, paying, PaymentMethod::Razorpay);
    provider_called(&app.provider).await;

    let cart = tokio::time::timeout(
        Duration::from_millis(500),
        app.services.cart.get_cart(browsing.0),
    )
    .await
    .expect("cart read waited on another shopper's checkout")
    .unwrap();
    assert_eq!(cart.items.len(), 1);

    let placed = checkout.await.unwrap().unwrap();
    assert_eq!(placed.order.order.status, OrderStatus::Pending);
    assert_eq!(app.inventory(variant).await, 9);
}

#[tokio::test]
async fn cart_edited_during_provider_call_aborts_checkout() {
    let app = Arc::new(TestApp::with_provider(slow_provider(Duration::from_millis(800)).await).await);
    let variant = app.seed_variant("Jade Plant", dec!(199), 10).await;
    let shopper = shopper_with_cart(&app, variant, 1).await;

    let checkout = spawn_checkout(&app, shopper, PaymentMethod::Razorpay);
    provider_called(&app.provider).await;
    app.services
        .cart
        .add_item(shopper.0, AddToCartInput { variant_id: variant, quantity: 4 })
        .await
        .unwrap();

    assert_matches!(checkout.await.unwrap(), Err(ServiceError::InvalidState(_)));
    assert_eq!(app.inventory(variant).await, 10);
    let cart = app.services.cart.get_cart(shopper.0).await.unwrap();
    assert_eq!(cart.items[0].quantity, 5);
    assert!(app.services.orders.list_orders(shopper.0).await.unwrap().is_empty());
}
