//! Domain events published to the notification queue.

use chrono::{DateTime, SubsecRound, Utc};
use common::{OrderId, PaymentId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::order::{Currency, Order};
use crate::payment::Payment;

/// Contact details of the user an event concerns, taken from their token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub email: Option<String>,
    pub username: Option<String>,
}

/// An immutable fact about an order, delivered at least once.
///
/// Consumers must be idempotent on `(type, order_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    pub id: Uuid,
    pub order_id: Option<OrderId>,
    #[serde(flatten)]
    pub body: EventBody,
    pub created_at: DateTime<Utc>,
}

/// Event type and payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum EventBody {
    OrderCreated(OrderCreatedData),
    PaymentCompleted(PaymentCompletedData),
    PaymentFailed(PaymentFailedData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedData {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: i64,
    pub currency: Currency,
    pub item_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCompletedData {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub amount: i64,
    pub currency: Currency,
    pub email: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailedData {
    pub order_id: Option<OrderId>,
    pub payment_id: Option<PaymentId>,
    pub provider_order_id: String,
    pub email: Option<String>,
    pub reason: String,
}

impl EventBody {
    /// The payload alone, flat, as notification consumers read it.
    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            EventBody::OrderCreated(data) => serde_json::to_value(data),
            EventBody::PaymentCompleted(data) => serde_json::to_value(data),
            EventBody::PaymentFailed(data) => serde_json::to_value(data),
        }
    }

    /// Rebuilds a body from its type name and flat payload.
    pub fn from_parts(event_type: &str, payload: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(serde_json::json!({ "type": event_type, "payload": payload }))
    }
}

impl DomainEvent {
    fn new(order_id: Option<OrderId>, body: EventBody) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            body,
            // Microseconds, the precision the queue table keeps.
            created_at: Utc::now().trunc_subsecs(6),
        }
    }

    pub fn order_created(order: &Order) -> Self {
        Self::new(
            Some(order.id),
            EventBody::OrderCreated(OrderCreatedData {
                order_id: order.id,
                user_id: order.user_id.clone(),
                amount: order.total_amount.amount(),
                currency: order.currency(),
                item_count: order.items.len(),
            }),
        )
    }

    pub fn payment_completed(payment: &Payment, contact: &Contact) -> Self {
        Self::new(
            Some(payment.order_id),
            EventBody::PaymentCompleted(PaymentCompletedData {
                order_id: payment.order_id,
                payment_id: payment.id,
                amount: payment.amount.amount(),
                currency: payment.amount.currency(),
                email: contact.email.clone(),
                username: contact.username.clone(),
            }),
        )
    }

    /// A failed verification. `payment` is absent when no local payment
    /// matches the provider order id.
    pub fn payment_failed(
        provider_order_id: impl Into<String>,
        payment: Option<&Payment>,
        contact: &Contact,
        reason: impl Into<String>,
    ) -> Self {
        let order_id = payment.map(|p| p.order_id);
        Self::new(
            order_id,
            EventBody::PaymentFailed(PaymentFailedData {
                order_id,
                payment_id: payment.map(|p| p.id),
                provider_order_id: provider_order_id.into(),
                email: contact.email.clone(),
                reason: reason.into(),
            }),
        )
    }

    /// Event type name as consumers see it.
    pub fn event_type(&self) -> &'static str {
        match self.body {
            EventBody::OrderCreated(_) => "ORDER_CREATED",
            EventBody::PaymentCompleted(_) => "PAYMENT_COMPLETED",
            EventBody::PaymentFailed(_) => "PAYMENT_FAILED",
        }
    }

    /// Durable queue the event is routed to.
    pub fn queue(&self) -> &'static str {
        match self.body {
            EventBody::OrderCreated(_) => "ORDER_NOTIFICATION.ORDER_CREATED",
            EventBody::PaymentCompleted(_) => "PAYMENT_NOTIFICATION.PAYMENT_COMPLETED",
            EventBody::PaymentFailed(_) => "PAYMENT_NOTIFICATION.PAYMENT_FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{Money, OrderItem, ShippingAddress};

    fn order() -> Order {
        Order::place(
            UserId::new("u1"),
            vec![OrderItem::new("P1", "Lamp", 2, Money::new(100, Currency::Inr))],
            ShippingAddress {
                street: "s".into(),
                city: "c".into(),
                state: "st".into(),
                zip: "z".into(),
                country: "IN".into(),
            },
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_payment_completed_wire_format() {
        let order = order();
        let payment = Payment::initiate(&order, "order_abc");
        let contact = Contact {
            email: Some("test@email.com".into()),
            username: Some("test-user".into()),
        };

        let event = DomainEvent::payment_completed(&payment, &contact);
        assert_eq!(event.event_type(), "PAYMENT_COMPLETED");
        assert_eq!(event.queue(), "PAYMENT_NOTIFICATION.PAYMENT_COMPLETED");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PAYMENT_COMPLETED");
        assert_eq!(json["orderId"], order.id.to_string());
        assert_eq!(json["payload"]["amount"], 200);
        assert_eq!(json["payload"]["currency"], "INR");
        assert_eq!(json["payload"]["email"], "test@email.com");
        assert!(json["createdAt"].is_string());
    }

    #[test]
    fn test_payment_failed_without_local_payment() {
        let event = DomainEvent::payment_failed(
            "order_unknown",
            None,
            &Contact::default(),
            "signature mismatch",
        );
        assert_eq!(event.order_id, None);
        assert_eq!(event.queue(), "PAYMENT_NOTIFICATION.PAYMENT_FAILED");
        match event.body {
            EventBody::PaymentFailed(data) => {
                assert_eq!(data.provider_order_id, "order_unknown");
                assert_eq!(data.reason, "signature mismatch");
                assert!(data.payment_id.is_none());
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_flat_payload_keeps_fields_at_top_level() {
        let order = order();
        let payment = Payment::initiate(&order, "order_abc");
        let contact = Contact {
            email: Some("test@email.com".into()),
            username: None,
        };
        let event = DomainEvent::payment_completed(&payment, &contact);

        let payload = event.body.payload().unwrap();
        assert_eq!(payload["email"], "test@email.com");
        assert_eq!(payload["amount"], 200);
        assert_eq!(payload["orderId"], order.id.to_string());
        assert!(payload.get("payload").is_none());

        let back = EventBody::from_parts(event.event_type(), payload).unwrap();
        assert_eq!(back, event.body);
        assert!(EventBody::from_parts("ORDER_SHIPPED", serde_json::json!({})).is_err());
    }

    #[test]
    fn test_order_created_event() {
        let order = order();
        let event = DomainEvent::order_created(&order);
        assert_eq!(event.event_type(), "ORDER_CREATED");
        assert_eq!(event.order_id, Some(order.id));

        let back: DomainEvent =
            serde_json::from_value(serde_json::to_value(&event).unwrap()).unwrap();
        assert_eq!(back, event);
    }
}
