use common::{OrderId, PaymentId};
use thiserror::Error;
use uuid::Uuid;

use crate::EntityKind;

/// Errors that can occur when reading or writing the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The order does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The payment does not exist.
    #[error("Payment not found: {0}")]
    PaymentNotFound(PaymentId),

    /// A conditional update found the record in a different status than
    /// the caller expected.
    #[error("Status conflict for {entity} {id}: expected {expected}, found {actual}")]
    StatusConflict {
        entity: EntityKind,
        id: Uuid,
        expected: String,
        actual: String,
    },

    /// The order already has a pending or completed payment.
    #[error("Order {0} already has a live payment")]
    DuplicateLivePayment(OrderId),

    /// The provider order id is already recorded against another payment.
    #[error("Provider order id already recorded: {0}")]
    DuplicateProviderOrder(String),

    /// The backing store cannot be reached right now.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be mapped back to a record.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl LedgerError {
    /// Returns true if retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Unavailable(_) => true,
            LedgerError::Database(err) => matches!(
                err,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }

    pub(crate) fn conflict(
        entity: EntityKind,
        id: Uuid,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        metrics::counter!("ledger_status_conflicts_total", "entity" => entity.as_str())
            .increment(1);
        LedgerError::StatusConflict {
            entity,
            id,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LedgerError::Unavailable("down".into()).is_transient());
        assert!(LedgerError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!LedgerError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!LedgerError::OrderNotFound(OrderId::new()).is_transient());
        assert!(
            !LedgerError::conflict(EntityKind::Order, Uuid::new_v4(), "PENDING", "SHIPPED")
                .is_transient()
        );
    }

    #[test]
    fn test_conflict_message() {
        let id = Uuid::nil();
        let err = LedgerError::conflict(EntityKind::Payment, id, "PENDING", "COMPLETED");
        assert_eq!(
            err.to_string(),
            format!("Status conflict for payment {id}: expected PENDING, found COMPLETED")
        );
    }
}
