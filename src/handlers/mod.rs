pub mod commerce;
pub mod common;
pub mod health;

use crate::{
    config::PricingConfig,
    events::EventSender,
    repositories::CommerceStore,
    services::{
        commerce::{CartService, CouponService, OrderService, PaymentService},
        payments::PaymentGateways,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub coupons: Arc<CouponService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
}

impl AppServices {
    /// Wires every service to the same store, providers and event channel.
    pub fn new(
        store: Arc<dyn CommerceStore>,
        gateways: Arc<PaymentGateways>,
        event_sender: Arc<EventSender>,
        pricing: PricingConfig,
    ) -> Self {
        Self {
            cart: Arc::new(CartService::new(
                store.clone(),
                event_sender.clone(),
                pricing.clone(),
            )),
            coupons: Arc::new(CouponService::new(store.clone())),
            orders: Arc::new(OrderService::new(
                store.clone(),
                gateways.clone(),
                event_sender.clone(),
                pricing,
            )),
            payments: Arc::new(PaymentService::new(store, gateways, event_sender)),
        }
    }
}
