//! Payment record and its status machine.

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, UserId};
use serde::{Deserialize, Serialize};

use crate::order::{Money, Order};

/// The status of a payment.
///
/// ```text
/// Pending ──┬──► Completed
///           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }

    /// A live payment blocks any new payment for the same order.
    pub fn is_live(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "COMPLETED" => Ok(PaymentStatus::Completed),
            "FAILED" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// A payment attempt against one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub provider_order_id: String,
    /// Set only once the payment completes.
    pub provider_payment_id: Option<String>,
    pub signature: Option<String>,
    pub status: PaymentStatus,
    /// Order total at initiation time.
    pub amount: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Starts a pending payment for the order's current total.
    pub fn initiate(order: &Order, provider_order_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::new(),
            order_id: order.id,
            user_id: order.user_id.clone(),
            provider_order_id: provider_order_id.into(),
            provider_payment_id: None,
            signature: None,
            status: PaymentStatus::Pending,
            amount: order.total_amount,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}
