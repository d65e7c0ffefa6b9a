//! Database entities for the storefront.
//!
//! Cart-side data (carts, catalog, coupons, addresses) lives under [`commerce`];
//! checkout output (orders, their items and payments) sits at the top level.

pub mod commerce;
pub mod order;
pub mod order_item;
pub mod payment;

pub use order::{OrderStatus, PaymentMethod, PaymentStatus};
