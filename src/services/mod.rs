// Storefront services
pub mod commerce;

// Payment provider integration
pub mod payments;
