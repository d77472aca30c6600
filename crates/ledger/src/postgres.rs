use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, UserId};
use domain::{
    Currency, Money, Order, OrderItem, OrderStatus, Payment, PaymentStatus, ShippingAddress,
};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow, types::Json};
use uuid::Uuid;

use crate::{
    EntityKind, Inserted, LedgerError, LedgerStore, Page, PageRequest, Result, Settlement,
    StatusChange,
};

/// PostgreSQL-backed ledger.
///
/// Status transitions are `UPDATE ... WHERE status = $expected RETURNING *`.
/// Concurrent writers on the same row queue on the row lock and the loser
/// re-evaluates the predicate after the winner commits, matching zero rows.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the migrations under `migrations/`.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let currency: Currency = parse(row.try_get::<String, _>("currency")?)?;
        let Json(items): Json<Vec<OrderItem>> = row.try_get("items")?;
        let Json(shipping_address): Json<ShippingAddress> = row.try_get("shipping_address")?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::new(row.try_get::<String, _>("user_id")?),
            items,
            total_amount: Money::new(row.try_get("total_amount")?, currency),
            status: parse(row.try_get::<String, _>("status")?)?,
            shipping_address,
            idempotency_key: row.try_get("idempotency_key")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        let currency: Currency = parse(row.try_get::<String, _>("currency")?)?;

        Ok(Payment {
            id: PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            user_id: UserId::new(row.try_get::<String, _>("user_id")?),
            provider_order_id: row.try_get("provider_order_id")?,
            provider_payment_id: row.try_get("provider_payment_id")?,
            signature: row.try_get("signature")?,
            status: parse(row.try_get::<String, _>("status")?)?,
            amount: Money::new(row.try_get("amount")?, currency),
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_change(row: PgRow) -> Result<StatusChange> {
        Ok(StatusChange {
            entity: parse(row.try_get::<String, _>("entity")?)?,
            entity_id: row.try_get("entity_id")?,
            from: row.try_get("from_status")?,
            to: row.try_get("to_status")?,
            at: row.try_get("at")?,
        })
    }
}

fn parse<T>(raw: String) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e: T::Err| LedgerError::Corrupt(e.to_string()))
}

async fn record_change(
    conn: &mut PgConnection,
    entity: EntityKind,
    entity_id: Uuid,
    from: Option<&str>,
    to: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO status_history (entity, entity_id, from_status, to_status, at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(entity.as_str())
    .bind(entity_id)
    .bind(from)
    .bind(to)
    .bind(at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Explains why a conditional order update matched no rows.
async fn order_miss(conn: &mut PgConnection, id: OrderId, expected: OrderStatus) -> LedgerError {
    let current: std::result::Result<Option<String>, sqlx::Error> =
        sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(conn)
            .await;
    match current {
        Ok(Some(actual)) => LedgerError::conflict(EntityKind::Order, id.as_uuid(), expected, actual),
        Ok(None) => LedgerError::OrderNotFound(id),
        Err(e) => LedgerError::Database(e),
    }
}

/// Explains why a conditional payment update matched no rows.
async fn payment_miss(
    conn: &mut PgConnection,
    id: PaymentId,
    expected: PaymentStatus,
) -> LedgerError {
    let current: std::result::Result<Option<String>, sqlx::Error> =
        sqlx::query_scalar("SELECT status FROM payments WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(conn)
            .await;
    match current {
        Ok(Some(actual)) => {
            LedgerError::conflict(EntityKind::Payment, id.as_uuid(), expected, actual)
        }
        Ok(None) => LedgerError::PaymentNotFound(id),
        Err(e) => LedgerError::Database(e),
    }
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id))]
    async fn insert_order(&self, order: Order) -> Result<Inserted<Order>> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, items, total_amount, currency, status,
                                shipping_address, idempotency_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT ON CONSTRAINT unique_user_idempotency_key DO NOTHING
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_str())
        .bind(Json(&order.items))
        .bind(order.total_amount.amount())
        .bind(order.currency().as_str())
        .bind(order.status.as_str())
        .bind(Json(&order.shipping_address))
        .bind(order.idempotency_key.as_deref())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            let key = order.idempotency_key.as_deref().unwrap_or_default();
            return match self
                .find_order_by_idempotency_key(&order.user_id, key)
                .await?
            {
                Some(existing) => Ok(Inserted::Existing(existing)),
                None => Err(LedgerError::Corrupt(format!(
                    "idempotency conflict for key {key} but no stored order"
                ))),
            };
        }

        record_change(
            &mut tx,
            EntityKind::Order,
            order.id.as_uuid(),
            None,
            order.status.as_str(),
            order.created_at,
        )
        .await?;
        tx.commit().await?;

        Ok(Inserted::New(order))
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(Self::row_to_order)
            .transpose()
    }

    async fn find_order_by_idempotency_key(
        &self,
        user_id: &UserId,
        key: &str,
    ) -> Result<Option<Order>> {
        sqlx::query("SELECT * FROM orders WHERE user_id = $1 AND idempotency_key = $2")
            .bind(user_id.as_str())
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .map(Self::row_to_order)
            .transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn list_orders_for_user(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Order>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE user_id = $1")
            .bind(user_id.as_str())
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM orders
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id.as_str())
        .bind(i64::from(page.limit))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items: rows
                .into_iter()
                .map(Self::row_to_order)
                .collect::<Result<_>>()?,
            total: total as u64,
            request: page,
        })
    }

    async fn count_orders(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    #[tracing::instrument(skip(self))]
    async fn transition_order(
        &self,
        id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE orders SET status = $3, updated_at = $4
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(order_miss(&mut tx, id, expected).await);
        };
        let order = Self::row_to_order(row)?;

        record_change(
            &mut tx,
            EntityKind::Order,
            id.as_uuid(),
            Some(expected.as_str()),
            next.as_str(),
            now,
        )
        .await?;
        tx.commit().await?;

        Ok(order)
    }

    #[tracing::instrument(skip(self, address))]
    async fn update_shipping_address(
        &self,
        id: OrderId,
        expected: OrderStatus,
        address: ShippingAddress,
    ) -> Result<Order> {
        let mut conn = self.pool.acquire().await?;

        let row = sqlx::query(
            r#"
            UPDATE orders SET shipping_address = $3, updated_at = $4
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(expected.as_str())
        .bind(Json(&address))
        .bind(Utc::now())
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => Self::row_to_order(row),
            None => Err(order_miss(&mut conn, id, expected).await),
        }
    }

    #[tracing::instrument(skip(self, payment), fields(payment_id = %payment.id, order_id = %payment.order_id))]
    async fn insert_payment(&self, payment: Payment) -> Result<Payment> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, user_id, provider_order_id, provider_payment_id,
                                  signature, status, amount, currency, failure_reason,
                                  created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(payment.user_id.as_str())
        .bind(&payment.provider_order_id)
        .bind(payment.provider_payment_id.as_deref())
        .bind(payment.signature.as_deref())
        .bind(payment.status.as_str())
        .bind(payment.amount.amount())
        .bind(payment.amount.currency().as_str())
        .bind(payment.failure_reason.as_deref())
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                match db_err.constraint() {
                    Some("unique_live_payment_per_order") => {
                        return LedgerError::DuplicateLivePayment(payment.order_id);
                    }
                    Some("unique_provider_order_id") => {
                        return LedgerError::DuplicateProviderOrder(
                            payment.provider_order_id.clone(),
                        );
                    }
                    _ => {}
                }
            }
            LedgerError::Database(e)
        })?;

        record_change(
            &mut tx,
            EntityKind::Payment,
            payment.id.as_uuid(),
            None,
            payment.status.as_str(),
            payment.created_at,
        )
        .await?;
        tx.commit().await?;

        Ok(payment)
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        sqlx::query("SELECT * FROM payments WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(Self::row_to_payment)
            .transpose()
    }

    async fn find_live_payment_for_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        sqlx::query(
            "SELECT * FROM payments WHERE order_id = $1 AND status IN ('PENDING', 'COMPLETED')",
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(Self::row_to_payment)
        .transpose()
    }

    async fn find_payment_by_provider_order(
        &self,
        provider_order_id: &str,
    ) -> Result<Option<Payment>> {
        sqlx::query("SELECT * FROM payments WHERE provider_order_id = $1")
            .bind(provider_order_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Self::row_to_payment)
            .transpose()
    }

    async fn find_pending_payment_by_provider_order(
        &self,
        provider_order_id: &str,
    ) -> Result<Option<Payment>> {
        sqlx::query("SELECT * FROM payments WHERE provider_order_id = $1 AND status = 'PENDING'")
            .bind(provider_order_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Self::row_to_payment)
            .transpose()
    }

    #[tracing::instrument(skip(self, settlement), fields(payment_id = %settlement.payment_id))]
    async fn settle_payment(&self, settlement: Settlement) -> Result<(Payment, Order)> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'COMPLETED', provider_payment_id = $2, signature = $3, updated_at = $4
            WHERE id = $1 AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(settlement.payment_id.as_uuid())
        .bind(&settlement.provider_payment_id)
        .bind(&settlement.signature)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(payment_miss(&mut tx, settlement.payment_id, PaymentStatus::Pending).await);
        };
        let payment = Self::row_to_payment(row)?;

        let row = sqlx::query(
            r#"
            UPDATE orders SET status = 'CONFIRMED', updated_at = $2
            WHERE id = $1 AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(payment.order_id.as_uuid())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let err = order_miss(&mut tx, payment.order_id, OrderStatus::Pending).await;
            // Dropping the payment update with the order miss keeps both or neither.
            tx.rollback().await?;
            return Err(err);
        };
        let order = Self::row_to_order(row)?;

        record_change(
            &mut tx,
            EntityKind::Payment,
            payment.id.as_uuid(),
            Some(PaymentStatus::Pending.as_str()),
            PaymentStatus::Completed.as_str(),
            now,
        )
        .await?;
        record_change(
            &mut tx,
            EntityKind::Order,
            order.id.as_uuid(),
            Some(OrderStatus::Pending.as_str()),
            OrderStatus::Confirmed.as_str(),
            now,
        )
        .await?;
        tx.commit().await?;

        Ok((payment, order))
    }

    #[tracing::instrument(skip(self))]
    async fn fail_payment(&self, id: PaymentId, reason: &str) -> Result<Payment> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE payments SET status = 'FAILED', failure_reason = $2, updated_at = $3
            WHERE id = $1 AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(reason)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(payment_miss(&mut tx, id, PaymentStatus::Pending).await);
        };
        let payment = Self::row_to_payment(row)?;

        record_change(
            &mut tx,
            EntityKind::Payment,
            id.as_uuid(),
            Some(PaymentStatus::Pending.as_str()),
            PaymentStatus::Failed.as_str(),
            now,
        )
        .await?;
        tx.commit().await?;

        Ok(payment)
    }

    async fn list_stale_pending_payments(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Payment>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM payments
            WHERE status = 'PENDING' AND created_at < $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_payment).collect()
    }

    async fn status_history(&self, entity_id: Uuid) -> Result<Vec<StatusChange>> {
        let rows = sqlx::query(
            r#"
            SELECT entity, entity_id, from_status, to_status, at
            FROM status_history
            WHERE entity_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_change).collect()
    }
}
