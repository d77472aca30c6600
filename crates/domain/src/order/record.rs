//! Order record.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};

use super::{Currency, Money, OrderError, OrderItem, OrderStatus, ShippingAddress};

/// A placed order.
///
/// Items, total and currency are frozen by [`Order::place`]. Only the status
/// and (while pending) the shipping address change afterwards, and only
/// through the ledger's conditional updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    pub total_amount: Money,
    pub status: OrderStatus,
    pub shipping_address: ShippingAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a new pending order from priced lines.
    ///
    /// Rejects empty orders, zero quantities, negative prices and lines in
    /// different currencies. The total is the exact sum of the line totals.
    pub fn place(
        user_id: UserId,
        items: Vec<OrderItem>,
        shipping_address: ShippingAddress,
        idempotency_key: Option<String>,
    ) -> Result<Self, OrderError> {
        if let Some(field) = shipping_address.first_missing_field() {
            return Err(OrderError::MissingAddressField { field });
        }

        let total_amount = Self::sum_lines(&items)?;
        let now = Utc::now();

        Ok(Self {
            id: OrderId::new(),
            user_id,
            items,
            total_amount,
            status: OrderStatus::Pending,
            shipping_address,
            idempotency_key,
            created_at: now,
            updated_at: now,
        })
    }

    /// Sums line totals, validating each line on the way.
    pub fn sum_lines(items: &[OrderItem]) -> Result<Money, OrderError> {
        let first = items.first().ok_or(OrderError::NoItems)?;
        let mut total = Money::zero(first.unit_price.currency());

        for item in items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id.clone(),
                    quantity: item.quantity,
                });
            }
            if item.unit_price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    product_id: item.product_id.clone(),
                    price: item.unit_price.amount(),
                });
            }
            total = total.checked_add(item.line_total()?)?;
        }

        Ok(total)
    }

    pub fn currency(&self) -> Currency {
        self.total_amount.currency()
    }

    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        &self.user_id == user_id
    }

    /// Checks that `next` is a legal successor of the current status.
    pub fn ensure_transition(
        &self,
        next: OrderStatus,
        action: &'static str,
    ) -> Result<(), OrderError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action,
            })
        }
    }

    pub fn ensure_address_editable(&self) -> Result<(), OrderError> {
        if self.status.can_update_address() {
            Ok(())
        } else {
            Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "update address",
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> ShippingAddress {
        ShippingAddress {
            street: "221B Baker Street".into(),
            city: "London".into(),
            state: "LDN".into(),
            zip: "NW16XE".into(),
            country: "UK".into(),
        }
    }

    fn inr(amount: i64) -> Money {
        Money::new(amount, Currency::Inr)
    }

    #[test]
    fn test_place_computes_total_from_snapshots() {
        let order = Order::place(
            UserId::new("u1"),
            vec![
                OrderItem::new("P1", "Lamp", 2, inr(100)),
                OrderItem::new("P2", "Desk", 1, inr(2500)),
            ],
            address(),
            None,
        )
        .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total_amount, inr(2700));
        assert_eq!(order.currency(), Currency::Inr);
        assert!(order.is_owned_by(&UserId::new("u1")));
        assert!(!order.is_owned_by(&UserId::new("u2")));
    }

    #[test]
    fn test_place_rejects_empty_order() {
        let result = Order::place(UserId::new("u1"), vec![], address(), None);
        assert_eq!(result.unwrap_err(), OrderError::NoItems);
    }

    #[test]
    fn test_place_rejects_zero_quantity() {
        let result = Order::place(
            UserId::new("u1"),
            vec![OrderItem::new("P1", "Lamp", 0, inr(100))],
            address(),
            None,
        );
        assert!(matches!(result, Err(OrderError::InvalidQuantity { .. })));
    }

    #[test]
    fn test_place_rejects_mixed_currencies() {
        let result = Order::place(
            UserId::new("u1"),
            vec![
                OrderItem::new("P1", "Lamp", 1, inr(100)),
                OrderItem::new("P2", "Desk", 1, Money::new(5, Currency::Usd)),
            ],
            address(),
            None,
        );
        assert!(matches!(result, Err(OrderError::Money(_))));
    }

    #[test]
    fn test_place_requires_full_address() {
        let mut partial = address();
        partial.city = String::new();
        let result = Order::place(
            UserId::new("u1"),
            vec![OrderItem::new("P1", "Lamp", 1, inr(100))],
            partial,
            None,
        );
        assert_eq!(
            result.unwrap_err(),
            OrderError::MissingAddressField { field: "city" }
        );
    }

    #[test]
    fn test_ensure_transition_reports_current_state() {
        let mut order = Order::place(
            UserId::new("u1"),
            vec![OrderItem::new("P1", "Lamp", 1, inr(100))],
            address(),
            None,
        )
        .unwrap();
        assert!(order.ensure_transition(OrderStatus::Cancelled, "cancel").is_ok());

        order.status = OrderStatus::Shipped;
        assert_eq!(
            order.ensure_transition(OrderStatus::Cancelled, "cancel"),
            Err(OrderError::InvalidStateTransition {
                current_state: OrderStatus::Shipped,
                action: "cancel"
            })
        );
        assert!(order.ensure_address_editable().is_err());
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let order = Order::place(
            UserId::new("u1"),
            vec![OrderItem::new("P1", "Lamp", 2, inr(100))],
            address(),
            None,
        )
        .unwrap();
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["totalAmount"]["amount"], 200);
        assert_eq!(json["items"][0]["productId"], "P1");
        assert_eq!(json["items"][0]["unitPrice"]["currency"], "INR");
        assert!(json.get("idempotencyKey").is_none());
    }
}
