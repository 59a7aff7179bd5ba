//! Checkout domain: value objects, aggregates, pricing arithmetic and events.
pub mod aggregates;
pub mod events;
pub mod pricing;
pub mod value_objects;
