/// Storefront API handlers
pub mod carts;
pub mod coupons;
pub mod orders;
pub mod payment_webhooks;

// Re-export route builders
pub use carts::cart_routes;
pub use coupons::coupon_routes;
pub use orders::{admin_order_routes, order_routes};
pub use payment_webhooks::payment_webhook_routes;
