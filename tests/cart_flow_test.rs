mod common;

use assert_matches::assert_matches;
use common::{coupon, TestApp};
use nursery_api::{
    entities::commerce::DiscountType, errors::ServiceError, services::commerce::AddToCartInput,
};
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test]
async fn adding_the_same_variant_accumulates_quantity() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let fern = app.seed_variant("Boston Fern", dec!(250), 20).await;

    app.services
        .cart
        .add_item(user, AddToCartInput { variant_id: fern, quantity: 2 })
        .await
        .unwrap();
    let cart = app
        .services
        .cart
        .add_item(user, AddToCartInput { variant_id: fern, quantity: 2 })
        .await
        .unwrap();

    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 4);
    assert_eq!(cart.items[0].product_name, "Boston Fern");
    assert_eq!(cart.cart.subtotal, dec!(1000));
    assert_eq!(cart.cart.tax, dec!(180));
    assert_eq!(cart.cart.total, dec!(1180));
}

#[tokio::test]
async fn apply_and_remove_percentage_coupon() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let monstera = app.seed_variant("Monstera", dec!(500), 10).await;
    app.seed_coupon(coupon("SAVE10", DiscountType::Percentage, dec!(10)))
        .await;

    app.services
        .cart
        .add_item(user, AddToCartInput { variant_id: monstera, quantity: 2 })
        .await
        .unwrap();

    let cart = app.services.cart.apply_coupon(user, "save10").await.unwrap();
    assert_eq!(cart.cart.coupon_code.as_deref(), Some("SAVE10"));
    assert_eq!(cart.cart.discount, dec!(100));
    assert_eq!(cart.cart.tax, dec!(162));
    assert_eq!(cart.cart.total, dec!(1062));

    let cart = app.services.cart.remove_coupon(user).await.unwrap();
    assert_eq!(cart.cart.coupon_code, None);
    assert_eq!(cart.cart.discount, dec!(0));
    assert_eq!(cart.cart.total, dec!(1180));
}

#[tokio::test]
async fn minimum_purchase_rejection_leaves_cart_unchanged() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let pothos = app.seed_variant("Pothos", dec!(250), 10).await;
    let mut big_spender = coupon("BIG100", DiscountType::Fixed, dec!(100));
    big_spender.min_purchase_amount = Some(dec!(1000));
    app.seed_coupon(big_spender).await;

    app.services
        .cart
        .add_item(user, AddToCartInput { variant_id: pothos, quantity: 2 })
        .await
        .unwrap();

    let err = app.services.cart.apply_coupon(user, "BIG100").await.unwrap_err();
    assert_matches!(err, ServiceError::MinimumPurchaseNotMet { required } if required == dec!(1000));

    let cart = app.services.cart.get_cart(user).await.unwrap();
    assert_eq!(cart.cart.coupon_code, None);
    assert_eq!(cart.cart.discount, dec!(0));
    assert_eq!(cart.cart.subtotal, dec!(500));
}

#[tokio::test]
async fn fixed_coupon_never_exceeds_subtotal() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let cactus = app.seed_variant("Cactus", dec!(150), 10).await;
    app.seed_coupon(coupon("FLAT2000", DiscountType::Fixed, dec!(2000)))
        .await;

    app.services
        .cart
        .add_item(user, AddToCartInput { variant_id: cactus, quantity: 1 })
        .await
        .unwrap();
    let cart = app.services.cart.apply_coupon(user, "flat2000").await.unwrap();

    assert_eq!(cart.cart.discount, dec!(150));
    assert_eq!(cart.cart.tax, dec!(0));
    assert_eq!(cart.cart.total, dec!(0));
}

#[tokio::test]
async fn coupon_invalidated_by_cart_change_is_flagged_not_removed() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let palm = app.seed_variant("Areca Palm", dec!(600), 10).await;
    let mut coupon_model = coupon("PALM50", DiscountType::Fixed, dec!(50));
    coupon_model.min_purchase_amount = Some(dec!(1000));
    app.seed_coupon(coupon_model).await;

    let cart = app
        .services
        .cart
        .add_item(user, AddToCartInput { variant_id: palm, quantity: 2 })
        .await
        .unwrap();
    let item_id = cart.items[0].id;
    app.services.cart.apply_coupon(user, "PALM50").await.unwrap();

    let cart = app.services.cart.update_item(user, item_id, 1).await.unwrap();
    assert_eq!(cart.cart.coupon_code.as_deref(), Some("PALM50"));
    assert_eq!(cart.cart.discount, dec!(0));
    assert!(cart.coupon_warning.is_some());
    assert_eq!(cart.cart.total, dec!(708));

    // Back above the minimum the discount returns.
    let cart = app.services.cart.update_item(user, item_id, 2).await.unwrap();
    assert_eq!(cart.cart.discount, dec!(50));
    assert!(cart.coupon_warning.is_none());
}

#[tokio::test]
async fn item_operations_are_scoped_to_the_callers_cart() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let intruder = Uuid::new_v4();
    let orchid = app.seed_variant("Orchid", dec!(899), 5).await;

    let cart = app
        .services
        .cart
        .add_item(owner, AddToCartInput { variant_id: orchid, quantity: 1 })
        .await
        .unwrap();
    let item_id = cart.items[0].id;

    assert_matches!(
        app.services.cart.update_item(intruder, item_id, 3).await,
        Err(ServiceError::ItemNotFound(_))
    );
    assert_matches!(
        app.services.cart.remove_item(intruder, item_id).await,
        Err(ServiceError::ItemNotFound(_))
    );
    assert_matches!(
        app.services.cart.update_item(owner, item_id, 0).await,
        Err(ServiceError::ValidationError(_))
    );

    let cart = app.services.cart.remove_item(owner, item_id).await.unwrap();
    assert!(cart.items.is_empty());
    assert_eq!(cart.cart.total, dec!(0));
}

#[tokio::test]
async fn clear_resets_items_coupon_and_totals() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let aloe = app.seed_variant("Aloe Vera", dec!(199), 10).await;
    app.seed_coupon(coupon("SAVE10", DiscountType::Percentage, dec!(10)))
        .await;

    app.services
        .cart
        .add_item(user, AddToCartInput { variant_id: aloe, quantity: 3 })
        .await
        .unwrap();
    app.services.cart.apply_coupon(user, "SAVE10").await.unwrap();

    let cart = app.services.cart.clear(user).await.unwrap();
    assert!(cart.items.is_empty());
    assert_eq!(cart.cart.coupon_code, None);
    assert_eq!(
        (cart.cart.subtotal, cart.cart.discount, cart.cart.tax, cart.cart.total),
        (dec!(0), dec!(0), dec!(0), dec!(0))
    );
}

#[tokio::test]
async fn unknown_or_expired_coupons_are_rejected() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let ivy = app.seed_variant("English Ivy", dec!(300), 10).await;
    let mut expired = coupon("OLD20", DiscountType::Percentage, dec!(20));
    expired.valid_until = chrono::Utc::now() - chrono::Duration::days(1);
    app.seed_coupon(expired).await;

    app.services
        .cart
        .add_item(user, AddToCartInput { variant_id: ivy, quantity: 1 })
        .await
        .unwrap();

    assert_matches!(
        app.services.cart.apply_coupon(user, "NOPE").await,
        Err(ServiceError::CouponNotFound)
    );
    assert_matches!(
        app.services.cart.apply_coupon(user, "old20").await,
        Err(ServiceError::CouponExpired)
    );
}
