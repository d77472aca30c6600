//! Identifier types shared by every storefront crate.

mod types;

pub use types::{OrderId, PaymentId, ProductId, UserId};
