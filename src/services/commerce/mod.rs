/// Commerce services module - cart pricing, checkout and payment confirmation
pub mod cart_service;
pub mod coupon_service;
pub mod order_service;
pub mod payment_service;
pub mod pricing;

// Re-export services for convenience
pub use cart_service::{AddToCartInput, CartLine, CartService, CartWithItems};
pub use coupon_service::{CouponPreview, CouponService};
pub use order_service::{CreateOrderInput, OrderDetails, OrderService, PlacedOrder};
pub use payment_service::{
    ConfirmOutcome, PaymentConfirmation, PaymentService, PaymentVerification, VerifyPaymentInput,
};
