//! Saga error types.

use common::{OrderId, PaymentId, ProductId};
use domain::OrderError;
use ledger::{EntityKind, LedgerError};
use thiserror::Error;

use crate::publisher::PublishError;
use crate::services::GatewayError;

/// Errors returned by [`crate::SagaCoordinator`] operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Malformed input: a blank address field, mixed currencies and the like.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The caller's cart has no items.
    #[error("Cart is empty")]
    EmptyCart,

    /// A catalog lookup failed.
    #[error("Product {product_id} is unavailable: {source}")]
    ProductUnavailable {
        product_id: ProductId,
        #[source]
        source: GatewayError,
    },

    /// A cart line asks for more than the catalog has.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// The cart could not be read.
    #[error("Cart service error: {0}")]
    Cart(#[source] GatewayError),

    /// The payment provider refused or failed to create an intent.
    #[error("Payment provider error: {0}")]
    PaymentProvider(#[source] GatewayError),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The caller has never placed an order.
    #[error("No orders found")]
    NoOrders,

    /// No pending payment matches the provider order id.
    #[error("No pending payment for provider order {0}")]
    PaymentNotFound(String),

    /// The caller may not act on this order or payment.
    #[error("Not allowed to access this resource")]
    Forbidden,

    /// The order's status does not allow the operation.
    #[error("Cannot {action} an order in {current} state")]
    InvalidState {
        current: String,
        action: &'static str,
    },

    /// Another request changed the record between read and write.
    #[error("Concurrent update: {0}")]
    Conflict(String),

    /// The order already has a pending or completed payment.
    #[error("Order {0} already has a pending or completed payment")]
    DuplicatePayment(OrderId),

    /// The payment signature does not match.
    #[error("Payment signature is invalid")]
    SignatureInvalid,

    /// The state change committed but its event could not be published.
    #[error("{event_type} not delivered for payment {payment_id} (order {order_id}): {source}")]
    NotificationUndelivered {
        event_type: &'static str,
        payment_id: PaymentId,
        order_id: OrderId,
        #[source]
        source: PublishError,
    },

    /// Any other ledger failure.
    #[error("Ledger error: {0}")]
    Ledger(#[source] LedgerError),
}

impl SagaError {
    /// True if repeating the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SagaError::ProductUnavailable { source, .. } => source.is_retryable(),
            SagaError::Cart(e) | SagaError::PaymentProvider(e) => e.is_retryable(),
            SagaError::Ledger(e) => e.is_transient(),
            SagaError::NotificationUndelivered { .. } => true,
            _ => false,
        }
    }

    /// The collaborator failure behind this error, if any.
    pub fn gateway_error(&self) -> Option<&GatewayError> {
        match self {
            SagaError::ProductUnavailable { source, .. } => Some(source),
            SagaError::Cart(e) | SagaError::PaymentProvider(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LedgerError> for SagaError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::OrderNotFound(id) => SagaError::OrderNotFound(id),
            LedgerError::DuplicateLivePayment(id) => SagaError::DuplicatePayment(id),
            LedgerError::StatusConflict {
                entity,
                expected,
                actual,
                ..
            } => SagaError::Conflict(match entity {
                EntityKind::Order => format!("order moved from {expected} to {actual}"),
                EntityKind::Payment => format!("payment moved from {expected} to {actual}"),
            }),
            other => SagaError::Ledger(other),
        }
    }
}

impl From<OrderError> for SagaError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::InvalidStateTransition {
                current_state,
                action,
            } => SagaError::InvalidState {
                current: current_state.to_string(),
                action,
            },
            other => SagaError::Validation(other.to_string()),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
