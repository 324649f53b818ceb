// Coupons and pricing
pub mod coupons;
pub mod discounts;

// Checkout
pub mod orders;

// Carrier shipments
pub mod shipping;
