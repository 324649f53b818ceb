pub mod coupon;
pub mod order;
pub mod order_item;
pub mod shipment;
pub mod shipment_event;
pub mod shipping_quote;

pub use coupon::{DiscountType, Entity as Coupon};
pub use order::{Entity as Order, OrderStatus};
pub use order_item::Entity as OrderItem;
pub use shipment::{Entity as Shipment, ShippingStatus};
pub use shipment_event::{Entity as ShipmentEvent, EventSource};
pub use shipping_quote::Entity as ShippingQuote;
