use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, UserId};
use domain::{Order, OrderStatus, Payment, PaymentStatus, ShippingAddress};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    EntityKind, Inserted, LedgerError, LedgerStore, Page, PageRequest, Result, Settlement,
    StatusChange,
};

#[derive(Default)]
struct State {
    orders: HashMap<OrderId, Order>,
    payments: HashMap<PaymentId, Payment>,
    history: Vec<StatusChange>,
}

impl State {
    fn order_mut(&mut self, id: OrderId) -> Result<&mut Order> {
        self.orders.get_mut(&id).ok_or(LedgerError::OrderNotFound(id))
    }

    fn payment_mut(&mut self, id: PaymentId) -> Result<&mut Payment> {
        self.payments
            .get_mut(&id)
            .ok_or(LedgerError::PaymentNotFound(id))
    }

    fn record(&mut self, entity: EntityKind, id: Uuid, from: Option<&str>, to: &str) {
        self.history
            .push(StatusChange::new(entity, id, from, to, Utc::now()));
    }
}

/// In-memory ledger for tests and local development.
///
/// A single write lock covers every mutation, so conditional updates and
/// settlement are atomic in the same way the PostgreSQL transaction is.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<RwLock<State>>,
    fail_settlement: Arc<AtomicBool>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `settle_payment` fail with [`LedgerError::Unavailable`].
    pub fn set_fail_settlement(&self, fail: bool) {
        self.fail_settlement.store(fail, Ordering::SeqCst);
    }

    pub async fn payment_count(&self) -> usize {
        self.state.read().await.payments.len()
    }

    /// Overwrites an order's status without any checks or history entry.
    ///
    /// Test setup helper for states that are otherwise only reachable through
    /// several saga steps.
    pub async fn force_order_status(&self, id: OrderId, status: OrderStatus) -> Result<()> {
        let mut state = self.state.write().await;
        state.order_mut(id)?.status = status;
        Ok(())
    }

    /// Backdates a payment, for reconciliation tests.
    pub async fn backdate_payment(&self, id: PaymentId, created_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        state.payment_mut(id)?.created_at = created_at;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn insert_order(&self, order: Order) -> Result<Inserted<Order>> {
        let mut state = self.state.write().await;

        if let Some(key) = order.idempotency_key.as_deref()
            && let Some(existing) = state
                .orders
                .values()
                .find(|o| o.user_id == order.user_id && o.idempotency_key.as_deref() == Some(key))
        {
            return Ok(Inserted::Existing(existing.clone()));
        }

        state.record(
            EntityKind::Order,
            order.id.as_uuid(),
            None,
            order.status.as_str(),
        );
        state.orders.insert(order.id, order.clone());
        Ok(Inserted::New(order))
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn find_order_by_idempotency_key(
        &self,
        user_id: &UserId,
        key: &str,
    ) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .find(|o| &o.user_id == user_id && o.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn list_orders_for_user(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<_> = state
            .orders
            .values()
            .filter(|o| &o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = orders.len() as u64;
        let items = orders
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .collect();

        Ok(Page {
            items,
            total,
            request: page,
        })
    }

    async fn count_orders(&self) -> Result<u64> {
        Ok(self.state.read().await.orders.len() as u64)
    }

    async fn transition_order(
        &self,
        id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order> {
        let mut state = self.state.write().await;
        let order = state.order_mut(id)?;
        if order.status != expected {
            return Err(LedgerError::conflict(
                EntityKind::Order,
                id.as_uuid(),
                expected,
                order.status,
            ));
        }
        order.status = next;
        order.updated_at = Utc::now();
        let updated = order.clone();

        state.record(
            EntityKind::Order,
            id.as_uuid(),
            Some(expected.as_str()),
            next.as_str(),
        );
        Ok(updated)
    }

    async fn update_shipping_address(
        &self,
        id: OrderId,
        expected: OrderStatus,
        address: ShippingAddress,
    ) -> Result<Order> {
        let mut state = self.state.write().await;
        let order = state.order_mut(id)?;
        if order.status != expected {
            return Err(LedgerError::conflict(
                EntityKind::Order,
                id.as_uuid(),
                expected,
                order.status,
            ));
        }
        order.shipping_address = address;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn insert_payment(&self, payment: Payment) -> Result<Payment> {
        let mut state = self.state.write().await;

        if state
            .payments
            .values()
            .any(|p| p.order_id == payment.order_id && p.status.is_live())
        {
            return Err(LedgerError::DuplicateLivePayment(payment.order_id));
        }
        if state
            .payments
            .values()
            .any(|p| p.provider_order_id == payment.provider_order_id)
        {
            return Err(LedgerError::DuplicateProviderOrder(
                payment.provider_order_id,
            ));
        }

        state.record(
            EntityKind::Payment,
            payment.id.as_uuid(),
            None,
            payment.status.as_str(),
        );
        state.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        Ok(self.state.read().await.payments.get(&id).cloned())
    }

    async fn find_live_payment_for_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .values()
            .find(|p| p.order_id == order_id && p.status.is_live())
            .cloned())
    }

    async fn find_payment_by_provider_order(
        &self,
        provider_order_id: &str,
    ) -> Result<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .values()
            .find(|p| p.provider_order_id == provider_order_id)
            .cloned())
    }

    async fn settle_payment(&self, settlement: Settlement) -> Result<(Payment, Order)> {
        if self.fail_settlement.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable(
                "settlement disabled for test".to_string(),
            ));
        }

        let mut state = self.state.write().await;

        // Check both preconditions before touching either record.
        let payment = state
            .payments
            .get(&settlement.payment_id)
            .ok_or(LedgerError::PaymentNotFound(settlement.payment_id))?;
        if payment.status != PaymentStatus::Pending {
            return Err(LedgerError::conflict(
                EntityKind::Payment,
                payment.id.as_uuid(),
                PaymentStatus::Pending,
                payment.status,
            ));
        }
        let order_id = payment.order_id;
        let order = state
            .orders
            .get(&order_id)
            .ok_or(LedgerError::OrderNotFound(order_id))?;
        if order.status != OrderStatus::Pending {
            return Err(LedgerError::conflict(
                EntityKind::Order,
                order_id.as_uuid(),
                OrderStatus::Pending,
                order.status,
            ));
        }

        let now = Utc::now();
        let payment = state.payment_mut(settlement.payment_id)?;
        payment.status = PaymentStatus::Completed;
        payment.provider_payment_id = Some(settlement.provider_payment_id);
        payment.signature = Some(settlement.signature);
        payment.updated_at = now;
        let payment = payment.clone();

        let order = state.order_mut(order_id)?;
        order.status = OrderStatus::Confirmed;
        order.updated_at = now;
        let order = order.clone();

        state.record(
            EntityKind::Payment,
            payment.id.as_uuid(),
            Some(PaymentStatus::Pending.as_str()),
            PaymentStatus::Completed.as_str(),
        );
        state.record(
            EntityKind::Order,
            order.id.as_uuid(),
            Some(OrderStatus::Pending.as_str()),
            OrderStatus::Confirmed.as_str(),
        );

        Ok((payment, order))
    }

    async fn fail_payment(&self, id: PaymentId, reason: &str) -> Result<Payment> {
        let mut state = self.state.write().await;
        let payment = state.payment_mut(id)?;
        if payment.status != PaymentStatus::Pending {
            return Err(LedgerError::conflict(
                EntityKind::Payment,
                id.as_uuid(),
                PaymentStatus::Pending,
                payment.status,
            ));
        }
        payment.status = PaymentStatus::Failed;
        payment.failure_reason = Some(reason.to_string());
        payment.updated_at = Utc::now();
        let updated = payment.clone();

        state.record(
            EntityKind::Payment,
            id.as_uuid(),
            Some(PaymentStatus::Pending.as_str()),
            PaymentStatus::Failed.as_str(),
        );
        Ok(updated)
    }

    async fn list_stale_pending_payments(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Payment>> {
        let state = self.state.read().await;
        let mut stale: Vec<_> = state
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Pending && p.created_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|p| p.created_at);
        Ok(stale)
    }

    async fn status_history(&self, entity_id: Uuid) -> Result<Vec<StatusChange>> {
        let state = self.state.read().await;
        Ok(state
            .history
            .iter()
            .filter(|c| c.entity_id == entity_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{Currency, Money, OrderItem};

    fn address() -> ShippingAddress {
        ShippingAddress {
            street: "1 Main St".into(),
            city: "Pune".into(),
            state: "MH".into(),
            zip: "411001".into(),
            country: "IN".into(),
        }
    }

    fn order_for(user: &str, key: Option<&str>) -> Order {
        Order::place(
            UserId::new(user),
            vec![OrderItem::new(
                "P1",
                "Lamp",
                2,
                Money::new(100, Currency::Inr),
            )],
            address(),
            key.map(str::to_string),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get_order() {
        let ledger = InMemoryLedger::new();
        let order = order_for("u1", None);

        let inserted = ledger.insert_order(order.clone()).await.unwrap();
        assert!(inserted.is_new());

        let loaded = ledger.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(loaded, order);
        assert_eq!(ledger.count_orders().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_idempotency_key_is_scoped_per_user() {
        let ledger = InMemoryLedger::new();
        let first = ledger
            .insert_order(order_for("u1", Some("k1")))
            .await
            .unwrap()
            .into_inner();

        let retry = ledger
            .insert_order(order_for("u1", Some("k1")))
            .await
            .unwrap();
        assert_eq!(retry, Inserted::Existing(first.clone()));

        let other_user = ledger
            .insert_order(order_for("u2", Some("k1")))
            .await
            .unwrap();
        assert!(other_user.is_new());
        assert_eq!(ledger.count_orders().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_transition_is_conditional() {
        let ledger = InMemoryLedger::new();
        let order = ledger
            .insert_order(order_for("u1", None))
            .await
            .unwrap()
            .into_inner();

        let cancelled = ledger
            .transition_order(order.id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let err = ledger
            .transition_order(order.id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await
            .unwrap_err();
        match err {
            LedgerError::StatusConflict {
                entity, actual, ..
            } => {
                assert_eq!(entity, EntityKind::Order);
                assert_eq!(actual, "CANCELLED");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let history = ledger.status_history(order.id.as_uuid()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].from, None);
        assert_eq!(history[1].from.as_deref(), Some("PENDING"));
        assert_eq!(history[1].to, "CANCELLED");
    }

    #[tokio::test]
    async fn test_one_live_payment_per_order() {
        let ledger = InMemoryLedger::new();
        let order = ledger
            .insert_order(order_for("u1", None))
            .await
            .unwrap()
            .into_inner();

        let first = ledger
            .insert_payment(Payment::initiate(&order, "order_a"))
            .await
            .unwrap();
        let err = ledger
            .insert_payment(Payment::initiate(&order, "order_b"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateLivePayment(id) if id == order.id));

        ledger.fail_payment(first.id, "expired").await.unwrap();
        ledger
            .insert_payment(Payment::initiate(&order, "order_c"))
            .await
            .unwrap();
        assert_eq!(ledger.payment_count().await, 2);
    }

    #[tokio::test]
    async fn test_settle_applies_both_or_neither() {
        let ledger = InMemoryLedger::new();
        let order = ledger
            .insert_order(order_for("u1", None))
            .await
            .unwrap()
            .into_inner();
        let payment = ledger
            .insert_payment(Payment::initiate(&order, "order_a"))
            .await
            .unwrap();

        ledger
            .transition_order(order.id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await
            .unwrap();

        let err = ledger
            .settle_payment(Settlement {
                payment_id: payment.id,
                provider_payment_id: "pay_1".into(),
                signature: "sig".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::StatusConflict {
                entity: EntityKind::Order,
                ..
            }
        ));

        let payment = ledger.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(payment.provider_payment_id.is_none());
    }

    #[tokio::test]
    async fn test_settle_twice_conflicts() {
        let ledger = InMemoryLedger::new();
        let order = ledger
            .insert_order(order_for("u1", None))
            .await
            .unwrap()
            .into_inner();
        let payment = ledger
            .insert_payment(Payment::initiate(&order, "order_a"))
            .await
            .unwrap();
        let settlement = Settlement {
            payment_id: payment.id,
            provider_payment_id: "pay_1".into(),
            signature: "sig".into(),
        };

        let (paid, confirmed) = ledger.settle_payment(settlement.clone()).await.unwrap();
        assert_eq!(paid.status, PaymentStatus::Completed);
        assert_eq!(paid.provider_payment_id.as_deref(), Some("pay_1"));
        assert_eq!(confirmed.status, OrderStatus::Confirmed);

        let err = ledger.settle_payment(settlement).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::StatusConflict {
                entity: EntityKind::Payment,
                ..
            }
        ));
        assert!(
            ledger
                .find_pending_payment_by_provider_order("order_a")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_list_orders_newest_first_and_paged() {
        let ledger = InMemoryLedger::new();
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut order = order_for("u1", None);
            order.created_at = Utc::now() + chrono::Duration::seconds(i);
            ids.push(order.id);
            ledger.insert_order(order).await.unwrap();
        }
        ledger.insert_order(order_for("u2", None)).await.unwrap();

        let page = ledger
            .list_orders_for_user(&UserId::new("u1"), PageRequest::new(1, 2))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages(), 2);
        assert_eq!(page.items[0].id, ids[2]);
        assert_eq!(page.items[1].id, ids[1]);

        let second = ledger
            .list_orders_for_user(&UserId::new("u1"), PageRequest::new(2, 2))
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].id, ids[0]);
    }

    #[tokio::test]
    async fn test_stale_pending_payments() {
        let ledger = InMemoryLedger::new();
        let order = ledger
            .insert_order(order_for("u1", None))
            .await
            .unwrap()
            .into_inner();
        let payment = ledger
            .insert_payment(Payment::initiate(&order, "order_a"))
            .await
            .unwrap();

        let cutoff = Utc::now() - chrono::Duration::minutes(30);
        assert!(
            ledger
                .list_stale_pending_payments(cutoff)
                .await
                .unwrap()
                .is_empty()
        );

        ledger
            .backdate_payment(payment.id, Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        let stale = ledger.list_stale_pending_payments(cutoff).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, payment.id);
    }
}
