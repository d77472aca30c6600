//! Saga coordinator for order placement and payment.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use common::OrderId;
use domain::{DomainEvent, Order, OrderItem, OrderStatus, Payment, ShippingAddress};
use futures_util::future::try_join_all;
use ledger::{EntityKind, Inserted, LedgerError, LedgerStore, Page, PageRequest, Settlement};

use crate::caller::Caller;
use crate::error::{Result, SagaError};
use crate::publisher::{EventPublisher, PublishError};
use crate::services::{CartService, CatalogService, PaymentProvider, verify_signature};

/// Reason recorded on payments expired by reconciliation.
pub const PAYMENT_EXPIRED_REASON: &str = "payment window expired";

/// Coordinator settings.
#[derive(Clone, Default)]
pub struct SagaConfig {
    /// Publish `ORDER_CREATED` after an order is placed.
    pub publish_order_events: bool,
    /// Shared secret the payment provider signs verifications with.
    pub signature_secret: String,
}

impl std::fmt::Debug for SagaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaConfig")
            .field("publish_order_events", &self.publish_order_events)
            .finish_non_exhaustive()
    }
}

/// The external services the coordinator calls.
#[derive(Clone)]
pub struct Collaborators {
    pub cart: Arc<dyn CartService>,
    pub catalog: Arc<dyn CatalogService>,
    pub payment_provider: Arc<dyn PaymentProvider>,
}

/// Proof of payment sent back by the client after checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentVerification {
    pub provider_order_id: String,
    pub provider_payment_id: String,
    pub signature: String,
}

/// A settled payment and the order it confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPayment {
    pub payment: Payment,
    pub order: Order,
}

/// Orchestrates order placement, cancellation, payment initiation and
/// payment verification.
///
/// The coordinator is the only writer of order and payment status. Every
/// write is a conditional ledger update, so two requests racing on the same
/// record cannot both win. Collaborators are never called while a ledger
/// write is in progress.
#[derive(Clone)]
pub struct SagaCoordinator {
    ledger: Arc<dyn LedgerStore>,
    collaborators: Collaborators,
    publisher: Arc<dyn EventPublisher>,
    config: SagaConfig,
}

impl SagaCoordinator {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        collaborators: Collaborators,
        publisher: Arc<dyn EventPublisher>,
        config: SagaConfig,
    ) -> Self {
        Self {
            ledger,
            collaborators,
            publisher,
            config,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    // -- Orders --

    /// Places a pending order from the caller's cart.
    ///
    /// With an idempotency key, a repeat of an earlier request returns the
    /// earlier order as [`Inserted::Existing`] without calling any
    /// collaborator.
    #[tracing::instrument(skip(self, caller, address), fields(user_id = %caller.user_id))]
    pub async fn create_order(
        &self,
        caller: &Caller,
        address: ShippingAddress,
        idempotency_key: Option<String>,
    ) -> Result<Inserted<Order>> {
        let idempotency_key = match idempotency_key {
            Some(key) if key.trim().is_empty() => {
                return Err(SagaError::Validation(
                    "Idempotency key must not be blank".to_string(),
                ));
            }
            other => other,
        };

        if let Some(key) = idempotency_key.as_deref()
            && let Some(existing) = self
                .ledger
                .find_order_by_idempotency_key(&caller.user_id, key)
                .await?
        {
            tracing::info!(order_id = %existing.id, "idempotent replay of order creation");
            return Ok(Inserted::Existing(existing));
        }

        if let Some(field) = address.first_missing_field() {
            return Err(SagaError::Validation(format!(
                "Shipping address field '{field}' is required"
            )));
        }

        let cart = timed(
            "fetch_cart",
            self.collaborators.cart.get_cart(&caller.bearer_token),
        )
        .await
        .map_err(SagaError::Cart)?;
        if cart.is_empty() {
            return Err(SagaError::EmptyCart);
        }

        let catalog = &self.collaborators.catalog;
        let products = timed(
            "fetch_products",
            try_join_all(cart.iter().map(|line| async move {
                catalog
                    .get_product(&line.product_id)
                    .await
                    .map_err(|source| SagaError::ProductUnavailable {
                        product_id: line.product_id.clone(),
                        source,
                    })
            })),
        )
        .await?;

        let mut items = Vec::with_capacity(cart.len());
        for (line, product) in cart.iter().zip(products) {
            if let Some(available) = product.stock
                && line.quantity > available
            {
                tracing::warn!(
                    product_id = %line.product_id,
                    requested = line.quantity,
                    available,
                    "insufficient stock"
                );
                return Err(SagaError::InsufficientStock {
                    product_id: line.product_id.clone(),
                    requested: line.quantity,
                    available,
                });
            }
            let unit_price = product.price.to_money().ok_or_else(|| {
                SagaError::Validation(format!(
                    "Product {} has price {} which is not a whole number of minor units",
                    line.product_id, product.price.amount
                ))
            })?;
            items.push(OrderItem::new(
                line.product_id.clone(),
                product.title,
                line.quantity,
                unit_price,
            ));
        }

        let order = Order::place(caller.user_id.clone(), items, address, idempotency_key)?;
        let inserted = timed("persist_order", self.ledger.insert_order(order)).await?;

        let order = match inserted {
            Inserted::New(order) => order,
            Inserted::Existing(existing) => {
                tracing::info!(order_id = %existing.id, "lost idempotency race, returning winner");
                return Ok(Inserted::Existing(existing));
            }
        };

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(
            order_id = %order.id,
            total = order.total_amount.amount(),
            currency = %order.currency(),
            items = order.items.len(),
            "order created"
        );

        if self.config.publish_order_events
            && let Err(err) = self.publish(&DomainEvent::order_created(&order)).await
        {
            tracing::warn!(order_id = %order.id, error = %err, "ORDER_CREATED not published");
        }

        Ok(Inserted::New(order))
    }

    /// The caller's orders, newest first.
    ///
    /// A caller with no orders at all gets [`SagaError::NoOrders`].
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn list_my_orders(&self, caller: &Caller, page: PageRequest) -> Result<Page<Order>> {
        let page = self
            .ledger
            .list_orders_for_user(&caller.user_id, page)
            .await?;
        if page.total == 0 {
            return Err(SagaError::NoOrders);
        }
        Ok(page)
    }

    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn get_order(&self, caller: &Caller, order_id: OrderId) -> Result<Order> {
        self.load_accessible_order(caller, order_id).await
    }

    /// Cancels a pending order.
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn cancel_order(&self, caller: &Caller, order_id: OrderId) -> Result<Order> {
        let order = self.load_accessible_order(caller, order_id).await?;
        order.ensure_transition(OrderStatus::Cancelled, "cancel")?;

        let cancelled = self
            .ledger
            .transition_order(order_id, order.status, OrderStatus::Cancelled)
            .await?;

        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::info!(%order_id, "order cancelled");
        Ok(cancelled)
    }

    /// Replaces the shipping address of a pending order.
    #[tracing::instrument(skip(self, caller, address), fields(user_id = %caller.user_id))]
    pub async fn update_address(
        &self,
        caller: &Caller,
        order_id: OrderId,
        address: ShippingAddress,
    ) -> Result<Order> {
        if let Some(field) = address.first_missing_field() {
            return Err(SagaError::Validation(format!(
                "Shipping address field '{field}' is required"
            )));
        }

        let order = self.load_accessible_order(caller, order_id).await?;
        order.ensure_address_editable()?;

        let updated = self
            .ledger
            .update_shipping_address(order_id, order.status, address)
            .await?;
        tracing::info!(%order_id, "shipping address updated");
        Ok(updated)
    }

    /// Moves a paid order one fulfilment step: confirmed to shipped, shipped
    /// to delivered. Admin only.
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn advance_order(&self, caller: &Caller, order_id: OrderId) -> Result<Order> {
        if !caller.is_admin() {
            return Err(SagaError::Forbidden);
        }

        let order = self
            .ledger
            .get_order(order_id)
            .await?
            .ok_or(SagaError::OrderNotFound(order_id))?;
        let next = order
            .status
            .next_fulfilment()
            .ok_or_else(|| SagaError::InvalidState {
                current: order.status.to_string(),
                action: "advance",
            })?;

        let advanced = self
            .ledger
            .transition_order(order_id, order.status, next)
            .await?;
        tracing::info!(%order_id, from = %order.status, to = %next, "order advanced");
        Ok(advanced)
    }

    // -- Payments --

    /// Creates a provider payment intent for a pending order and records it
    /// as a pending payment.
    ///
    /// The provider call is made once. If the ledger then refuses the payment
    /// because a concurrent initiation won, the orphaned intent id is logged.
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn initiate_payment(&self, caller: &Caller, order_id: OrderId) -> Result<Payment> {
        let order = self.load_accessible_order(caller, order_id).await?;
        if !order.status.can_accept_payment() {
            return Err(SagaError::InvalidState {
                current: order.status.to_string(),
                action: "pay for",
            });
        }

        if let Some(live) = self.ledger.find_live_payment_for_order(order_id).await? {
            tracing::info!(%order_id, payment_id = %live.id, status = %live.status, "payment already live");
            return Err(SagaError::DuplicatePayment(order_id));
        }

        let intent = timed(
            "create_payment_intent",
            self.collaborators
                .payment_provider
                .create_order(order.total_amount, &order.id.to_string()),
        )
        .await
        .map_err(SagaError::PaymentProvider)?;

        let payment = Payment::initiate(&order, intent.id.clone());
        let payment = match self.ledger.insert_payment(payment).await {
            Ok(payment) => payment,
            Err(err @ LedgerError::DuplicateLivePayment(_)) => {
                tracing::warn!(
                    %order_id,
                    provider_order_id = %intent.id,
                    "orphaned provider intent after losing initiation race"
                );
                return Err(err.into());
            }
            Err(err) => {
                tracing::error!(
                    %order_id,
                    provider_order_id = %intent.id,
                    error = %err,
                    "provider intent created but payment not recorded"
                );
                return Err(err.into());
            }
        };

        metrics::counter!("payments_initiated_total").increment(1);
        tracing::info!(
            %order_id,
            payment_id = %payment.id,
            provider_order_id = %payment.provider_order_id,
            amount = payment.amount.amount(),
            "payment initiated"
        );
        Ok(payment)
    }

    /// Verifies the provider's signature and settles the payment.
    ///
    /// A bad signature changes nothing and emits `PAYMENT_FAILED`. A good
    /// signature moves the payment to completed and the order to confirmed
    /// in one ledger write, then emits `PAYMENT_COMPLETED`.
    #[tracing::instrument(
        skip(self, caller, proof),
        fields(user_id = %caller.user_id, provider_order_id = %proof.provider_order_id)
    )]
    pub async fn verify_payment(
        &self,
        caller: &Caller,
        proof: PaymentVerification,
    ) -> Result<VerifiedPayment> {
        for (field, value) in [
            ("razorpayOrderId", &proof.provider_order_id),
            ("paymentId", &proof.provider_payment_id),
            ("signature", &proof.signature),
        ] {
            if value.trim().is_empty() {
                return Err(SagaError::Validation(format!("{field} is required")));
            }
        }

        if !verify_signature(
            &proof.provider_order_id,
            &proof.provider_payment_id,
            &proof.signature,
            &self.config.signature_secret,
        ) {
            return Err(self.reject_signature(caller, &proof).await);
        }

        let payment = self
            .ledger
            .find_pending_payment_by_provider_order(&proof.provider_order_id)
            .await?
            .ok_or_else(|| SagaError::PaymentNotFound(proof.provider_order_id.clone()))?;
        if !caller.is_admin() && payment.user_id != caller.user_id {
            return Err(SagaError::Forbidden);
        }

        let settlement = Settlement {
            payment_id: payment.id,
            provider_payment_id: proof.provider_payment_id.clone(),
            signature: proof.signature.clone(),
        };

        match timed("settle_payment", self.ledger.settle_payment(settlement)).await {
            Ok((payment, order)) => {
                metrics::counter!("payments_completed_total").increment(1);
                tracing::info!(
                    payment_id = %payment.id,
                    order_id = %order.id,
                    "payment completed, order confirmed"
                );

                let event = DomainEvent::payment_completed(&payment, &caller.contact);
                if let Err(source) = self.publish(&event).await {
                    tracing::error!(
                        payment_id = %payment.id,
                        order_id = %order.id,
                        error = %source,
                        "PAYMENT_COMPLETED not delivered after commit"
                    );
                    return Err(SagaError::NotificationUndelivered {
                        event_type: event.event_type(),
                        payment_id: payment.id,
                        order_id: order.id,
                        source,
                    });
                }
                Ok(VerifiedPayment { payment, order })
            }
            Err(LedgerError::StatusConflict {
                entity: EntityKind::Order,
                actual,
                ..
            }) => {
                // The order moved on (e.g. cancelled) while the payment was out.
                let reason = format!("order is {actual}");
                match self.ledger.fail_payment(payment.id, &reason).await {
                    Ok(failed) => {
                        metrics::counter!("payments_failed_total").increment(1);
                        tracing::warn!(payment_id = %failed.id, %reason, "payment failed at settlement");
                        self.publish_failure(
                            &proof.provider_order_id,
                            Some(&failed),
                            caller,
                            &reason,
                        )
                        .await;
                        Err(SagaError::InvalidState {
                            current: actual,
                            action: "confirm payment for",
                        })
                    }
                    // Someone else settled or failed the payment first.
                    Err(err) => Err(err.into()),
                }
            }
            Err(err @ LedgerError::StatusConflict { .. }) => {
                tracing::info!(payment_id = %payment.id, "lost settlement race");
                Err(err.into())
            }
            Err(LedgerError::PaymentNotFound(_)) => {
                tracing::warn!(payment_id = %payment.id, "payment vanished before settlement");
                Err(SagaError::PaymentNotFound(proof.provider_order_id))
            }
            Err(err) => {
                // Payment stays pending so the client can retry.
                tracing::error!(payment_id = %payment.id, error = %err, "settlement failed");
                self.publish_failure(
                    &proof.provider_order_id,
                    Some(&payment),
                    caller,
                    &err.to_string(),
                )
                .await;
                Err(err.into())
            }
        }
    }

    /// Fails every pending payment older than `max_age` and emits one
    /// `PAYMENT_FAILED` per expired payment. Returns the expired payments.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_stale_payments(&self, max_age: Duration) -> Result<Vec<Payment>> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| SagaError::Validation(format!("invalid max age: {e}")))?;
        let cutoff = Utc::now() - max_age;

        let stale = self.ledger.list_stale_pending_payments(cutoff).await?;
        let mut expired = Vec::with_capacity(stale.len());

        for payment in stale {
            match self
                .ledger
                .fail_payment(payment.id, PAYMENT_EXPIRED_REASON)
                .await
            {
                Ok(failed) => {
                    metrics::counter!("payments_failed_total").increment(1);
                    tracing::info!(
                        payment_id = %failed.id,
                        provider_order_id = %failed.provider_order_id,
                        "expired stale payment"
                    );
                    let event = DomainEvent::payment_failed(
                        failed.provider_order_id.clone(),
                        Some(&failed),
                        &domain::Contact::default(),
                        PAYMENT_EXPIRED_REASON,
                    );
                    if let Err(err) = self.publish(&event).await {
                        tracing::warn!(payment_id = %failed.id, error = %err, "PAYMENT_FAILED not published");
                    }
                    expired.push(failed);
                }
                Err(LedgerError::StatusConflict { .. }) => {
                    tracing::debug!(payment_id = %payment.id, "payment settled during reconciliation");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(expired)
    }

    // -- Helpers --

    async fn load_accessible_order(&self, caller: &Caller, order_id: OrderId) -> Result<Order> {
        let order = self
            .ledger
            .get_order(order_id)
            .await?
            .ok_or(SagaError::OrderNotFound(order_id))?;
        if !caller.can_access(&order) {
            return Err(SagaError::Forbidden);
        }
        Ok(order)
    }

    async fn reject_signature(&self, caller: &Caller, proof: &PaymentVerification) -> SagaError {
        metrics::counter!("payments_failed_total").increment(1);
        tracing::warn!("payment signature mismatch");

        // Only used to enrich the event; a lookup failure still rejects.
        let payment = self
            .ledger
            .find_payment_by_provider_order(&proof.provider_order_id)
            .await
            .ok()
            .flatten();
        self.publish_failure(
            &proof.provider_order_id,
            payment.as_ref(),
            caller,
            "signature mismatch",
        )
        .await;
        SagaError::SignatureInvalid
    }

    async fn publish_failure(
        &self,
        provider_order_id: &str,
        payment: Option<&Payment>,
        caller: &Caller,
        reason: &str,
    ) {
        let event = DomainEvent::payment_failed(provider_order_id, payment, &caller.contact, reason);
        if let Err(err) = self.publish(&event).await {
            tracing::warn!(%provider_order_id, error = %err, "PAYMENT_FAILED not published");
        }
    }

    async fn publish(&self, event: &DomainEvent) -> std::result::Result<(), PublishError> {
        match self.publisher.publish(event).await {
            Ok(()) => {
                metrics::counter!("events_published_total", "type" => event.event_type())
                    .increment(1);
                Ok(())
            }
            Err(err) => {
                metrics::counter!("events_publish_failures_total", "type" => event.event_type())
                    .increment(1);
                Err(err)
            }
        }
    }
}

async fn timed<F: Future>(step: &'static str, fut: F) -> F::Output {
    let start = Instant::now();
    let output = fut.await;
    metrics::histogram!("saga_step_duration_seconds", "step" => step)
        .record(start.elapsed().as_secs_f64());
    output
}
