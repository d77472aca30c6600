//! Payment provider collaborator.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use domain::{Currency, Money};
use serde::{Deserialize, Serialize};

use super::{GatewayError, HttpClient};

pub const SERVICE: &str = "payment_provider";

/// A payment intent created at the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOrder {
    pub id: String,
    pub amount: i64,
    pub currency: Currency,
}

/// Creates payment intents. Calls are not idempotent and are never retried.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_order(&self, amount: Money, receipt: &str)
    -> Result<ProviderOrder, GatewayError>;
}

#[derive(Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: Currency,
    receipt: &'a str,
}

/// `POST {base_url}/v1/orders` with HTTP basic auth.
#[derive(Clone)]
pub struct HttpPaymentProvider {
    client: HttpClient,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpPaymentProvider {
    pub fn new(
        client: HttpClient,
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        }
    }
}

impl std::fmt::Debug for HttpPaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPaymentProvider")
            .field("base_url", &self.base_url)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    #[tracing::instrument(skip(self), fields(amount = amount.amount(), currency = %amount.currency()))]
    async fn create_order(
        &self,
        amount: Money,
        receipt: &str,
    ) -> Result<ProviderOrder, GatewayError> {
        let request = self
            .client
            .inner()
            .post(format!("{}/v1/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&CreateOrderBody {
                amount: amount.amount(),
                currency: amount.currency(),
                receipt,
            });
        self.client.send_json(SERVICE, "order", request).await
    }
}

#[derive(Debug, Default)]
struct InMemoryProviderState {
    created: Vec<ProviderOrder>,
    next_id: u32,
    failure: Option<GatewayError>,
}

/// In-memory payment provider for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentProvider {
    state: Arc<Mutex<InMemoryProviderState>>,
}

impl InMemoryPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every call fail with `error` until cleared with `None`.
    pub fn set_failure(&self, error: Option<GatewayError>) {
        self.state().failure = error;
    }

    /// Number of intents successfully created.
    pub fn created_count(&self) -> usize {
        self.state().created.len()
    }

    pub fn created(&self) -> Vec<ProviderOrder> {
        self.state().created.clone()
    }
}

#[async_trait]
impl PaymentProvider for InMemoryPaymentProvider {
    async fn create_order(
        &self,
        amount: Money,
        _receipt: &str,
    ) -> Result<ProviderOrder, GatewayError> {
        let mut state = self.state();
        if let Some(err) = &state.failure {
            return Err(err.clone());
        }

        state.next_id += 1;
        let order = ProviderOrder {
            id: format!("order_{:04}", state.next_id),
            amount: amount.amount(),
            currency: amount.currency(),
        };
        state.created.push(order.clone());
        Ok(order)
    }
}
