//! Order record and related types.

mod record;
mod state;
mod value_objects;

pub use record::Order;
pub use state::OrderStatus;
pub use value_objects::{Currency, Money, MoneyError, OrderItem, ShippingAddress};

use common::ProductId;
use thiserror::Error;

/// Errors raised by order invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// Order is not in the expected state.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: OrderStatus,
        action: &'static str,
    },

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Invalid quantity.
    #[error("Invalid quantity for {product_id}: {quantity} (must be at least 1)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// Invalid price.
    #[error("Invalid price for {product_id}: {price}")]
    InvalidPrice { product_id: ProductId, price: i64 },

    /// Lines in different currencies, or a total that overflows.
    #[error("Order total error: {0}")]
    Money(#[from] MoneyError),

    /// A shipping address field is blank.
    #[error("Shipping address field '{field}' is required")]
    MissingAddressField { field: &'static str },
}
