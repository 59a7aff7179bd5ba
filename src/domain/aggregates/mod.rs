//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;
pub mod coupon;

pub use product::ProductSnapshot;
pub use order::{Order, OrderError, OrderStatus, PaymentStatus, PricedLineItem, ShippingAddress, TransitionSource};
pub use cart::{Cart, CartError, CartLine};
pub use coupon::{Coupon, CouponDiscount, CouponError, CouponRejection, DiscountType, DiscountableLine};
