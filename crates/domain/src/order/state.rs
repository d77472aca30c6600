//! Order status state machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Confirmed ──► Shipped ──► Delivered
///    │
///    └──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Placed, awaiting payment. Address may still change.
    #[default]
    Pending,

    /// Paid.
    Confirmed,

    Shipped,

    /// Terminal.
    Delivered,

    /// Terminal.
    Cancelled,
}

impl OrderStatus {
    /// Returns true if the order can be cancelled in this state.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if the shipping address can be replaced in this state.
    pub fn can_update_address(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if a payment may be started or settled in this state.
    pub fn can_accept_payment(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Confirmed)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Confirmed, OrderStatus::Shipped)
                | (OrderStatus::Shipped, OrderStatus::Delivered)
        )
    }

    /// The next fulfilment step after payment, if any.
    pub fn next_fulfilment(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Confirmed => Some(OrderStatus::Shipped),
            OrderStatus::Shipped => Some(OrderStatus::Delivered),
            _ => None,
        }
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Returns the state name as stored and sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "CONFIRMED" => Ok(OrderStatus::Confirmed),
            "SHIPPED" => Ok(OrderStatus::Shipped),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}
