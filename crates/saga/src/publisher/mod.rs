//! Domain event delivery.
//!
//! Events go to a durable queue named after their type (see
//! [`domain::DomainEvent::queue`]). Delivery is at least once; consumers
//! dedupe on `(type, orderId)`.

mod memory;
mod postgres;

use async_trait::async_trait;
use domain::DomainEvent;
use thiserror::Error;

pub use memory::InMemoryPublisher;
pub use postgres::{PostgresEventQueue, QueuedEvent};

/// Errors raised while handing an event to the queue.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The queue refused or could not be reached.
    #[error("Event queue unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The event could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Hands domain events to a durable queue.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Enqueues `event` on the queue for its type.
    ///
    /// Returns once the queue has accepted the event durably.
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError>;
}
