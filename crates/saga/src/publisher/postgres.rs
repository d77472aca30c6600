use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::OrderId;
use domain::{DomainEvent, EventBody};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::{EventPublisher, PublishError};

/// A leased queue row handed to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub id: Uuid,
    pub queue: String,
    /// Delivery attempts including this one.
    pub attempts: i32,
    pub event: DomainEvent,
}

/// Durable event queue on the `event_queue` table.
///
/// `payload` holds the flat event data (`orderId`, `email`, `amount`, ...);
/// the event id, type, order id and timestamp live in their own columns.
///
/// Consumers [`claim`](Self::claim) a batch, which leases the rows until
/// `now + lease`, and [`ack`](Self::ack) each one once handled. Rows whose
/// lease runs out unacked become claimable again, so delivery is at least
/// once.
///
/// The queue holds only a [`PgPool`] built by the caller. The pool drops
/// broken connections and opens fresh ones on the next acquire, so a
/// database restart costs the in-flight publishes and nothing else.
#[derive(Clone)]
pub struct PostgresEventQueue {
    pool: PgPool,
}

impl PostgresEventQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Leases up to `limit` unacked events from `queue`, oldest first.
    ///
    /// Rows locked by a concurrent claim are skipped rather than waited on.
    #[tracing::instrument(skip(self))]
    pub async fn claim(
        &self,
        queue: &str,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<QueuedEvent>, PublishError> {
        let now = Utc::now();
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| PublishError::Unavailable(format!("invalid lease: {e}")))?;

        let rows = sqlx::query(
            r#"
            UPDATE event_queue
            SET available_at = $3, attempts = attempts + 1
            WHERE id IN (
                SELECT id FROM event_queue
                WHERE queue = $1 AND acked_at IS NULL AND available_at <= $4
                ORDER BY created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, queue, attempts, event_type, order_id, payload, created_at
            "#,
        )
        .bind(queue)
        .bind(limit)
        .bind(now + lease)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut claimed = rows
            .into_iter()
            .map(Self::row_to_queued)
            .collect::<Result<Vec<_>, _>>()?;
        // UPDATE ... RETURNING does not keep the subquery order.
        claimed.sort_by_key(|q| q.event.created_at);
        Ok(claimed)
    }

    /// Marks an event as handled. Returns false if it was already acked or
    /// does not exist.
    pub async fn ack(&self, id: Uuid) -> Result<bool, PublishError> {
        let result =
            sqlx::query("UPDATE event_queue SET acked_at = $2 WHERE id = $1 AND acked_at IS NULL")
                .bind(id)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Number of unacked events on a queue.
    pub async fn pending(&self, queue: &str) -> Result<i64, PublishError> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM event_queue WHERE queue = $1 AND acked_at IS NULL",
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    fn row_to_queued(row: PgRow) -> Result<QueuedEvent, PublishError> {
        let id: Uuid = row.try_get("id")?;
        let event_type: String = row.try_get("event_type")?;
        let order_id: Option<Uuid> = row.try_get("order_id")?;
        let payload: serde_json::Value = row.try_get("payload")?;

        Ok(QueuedEvent {
            id,
            queue: row.try_get("queue")?,
            attempts: row.try_get("attempts")?,
            event: DomainEvent {
                id,
                order_id: order_id.map(OrderId::from_uuid),
                body: EventBody::from_parts(&event_type, payload)?,
                created_at: row.try_get("created_at")?,
            },
        })
    }
}

#[async_trait]
impl EventPublisher for PostgresEventQueue {
    #[tracing::instrument(skip(self, event), fields(event_type = event.event_type(), event_id = %event.id))]
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let payload = event.body.payload()?;

        sqlx::query(
            r#"
            INSERT INTO event_queue (id, queue, event_type, order_id, payload, created_at, available_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(event.queue())
        .bind(event.event_type())
        .bind(event.order_id.map(|id| id.as_uuid()))
        .bind(payload)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
