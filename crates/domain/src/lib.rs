//! Domain layer for the storefront order/payment saga.
//!
//! This crate provides:
//! - the Order record with its status state machine and priced line snapshots
//! - the Payment record with its status state machine
//! - domain events routed to the notification queues

pub mod events;
pub mod order;
pub mod payment;

pub use events::{
    Contact, DomainEvent, EventBody, OrderCreatedData, PaymentCompletedData, PaymentFailedData,
};
pub use order::{
    Currency, Money, MoneyError, Order, OrderError, OrderItem, OrderStatus, ShippingAddress,
};
pub use payment::{Payment, PaymentStatus};
