use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, UserId};
use domain::{Order, OrderStatus, Payment, ShippingAddress};
use uuid::Uuid;

use crate::{Page, PageRequest, Result, StatusChange};

/// Outcome of an insert keyed by an idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inserted<T> {
    /// The record was written.
    New(T),
    /// A record with the same `(user, idempotency key)` already existed and
    /// was returned instead.
    Existing(T),
}

impl<T> Inserted<T> {
    pub fn into_inner(self) -> T {
        match self {
            Inserted::New(v) | Inserted::Existing(v) => v,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Inserted::New(_))
    }
}

/// Data recorded when a verified payment completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub payment_id: PaymentId,
    pub provider_payment_id: String,
    pub signature: String,
}

/// Durable storage for orders, payments and their status history.
///
/// Every status-changing method is a conditional update: it applies only if
/// the record is still in the expected prior status and otherwise fails with
/// [`crate::LedgerError::StatusConflict`] carrying the status it found.
/// Each successful transition appends one [`StatusChange`] per record.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Inserts a new order.
    ///
    /// If the order carries an idempotency key already used by the same user,
    /// nothing is written and the stored order is returned as
    /// [`Inserted::Existing`].
    async fn insert_order(&self, order: Order) -> Result<Inserted<Order>>;

    /// Loads an order by id.
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Finds the order a user created with the given idempotency key.
    async fn find_order_by_idempotency_key(
        &self,
        user_id: &UserId,
        key: &str,
    ) -> Result<Option<Order>>;

    /// Lists a user's orders, newest first.
    async fn list_orders_for_user(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Order>>;

    /// Total number of stored orders.
    async fn count_orders(&self) -> Result<u64>;

    /// Moves an order from `expected` to `next`.
    async fn transition_order(
        &self,
        id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order>;

    /// Replaces the shipping address of an order still in `expected`.
    async fn update_shipping_address(
        &self,
        id: OrderId,
        expected: OrderStatus,
        address: ShippingAddress,
    ) -> Result<Order>;

    /// Inserts a new pending payment.
    ///
    /// Fails with [`crate::LedgerError::DuplicateLivePayment`] if the order
    /// already has a pending or completed payment.
    async fn insert_payment(&self, payment: Payment) -> Result<Payment>;

    /// Loads a payment by id.
    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>>;

    /// The pending or completed payment of an order, if any.
    async fn find_live_payment_for_order(&self, order_id: OrderId) -> Result<Option<Payment>>;

    /// The payment for a provider order id, in any status.
    async fn find_payment_by_provider_order(
        &self,
        provider_order_id: &str,
    ) -> Result<Option<Payment>>;

    /// The payment for a provider order id, only while it is pending.
    async fn find_pending_payment_by_provider_order(
        &self,
        provider_order_id: &str,
    ) -> Result<Option<Payment>> {
        Ok(self
            .find_payment_by_provider_order(provider_order_id)
            .await?
            .filter(|p| p.status == domain::PaymentStatus::Pending))
    }

    /// Completes a pending payment and confirms its pending order.
    ///
    /// Both conditional updates apply together or not at all. Two concurrent
    /// settlements of the same payment cannot both succeed.
    async fn settle_payment(&self, settlement: Settlement) -> Result<(Payment, Order)>;

    /// Moves a pending payment to failed with a reason.
    async fn fail_payment(&self, id: PaymentId, reason: &str) -> Result<Payment>;

    /// Pending payments created before `older_than`, oldest first.
    async fn list_stale_pending_payments(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Payment>>;

    /// Status history of an order or payment, oldest first.
    async fn status_history(&self, entity_id: Uuid) -> Result<Vec<StatusChange>>;
}
