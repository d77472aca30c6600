//! Cart collaborator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::ProductId;
use serde::{Deserialize, Serialize};

use super::{GatewayError, HttpClient};

pub const SERVICE: &str = "cart";

/// A line in the caller's cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl CartLine {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Reads the current cart of the user the bearer token belongs to.
#[async_trait]
pub trait CartService: Send + Sync {
    async fn get_cart(&self, bearer_token: &str) -> Result<Vec<CartLine>, GatewayError>;
}

#[derive(Deserialize)]
struct CartEnvelope {
    #[serde(default)]
    cart: Option<CartBody>,
}

#[derive(Deserialize)]
struct CartBody {
    #[serde(default)]
    items: Vec<CartLine>,
}

/// `GET {base_url}/cart` with the caller's bearer token.
#[derive(Debug, Clone)]
pub struct HttpCartService {
    client: HttpClient,
    base_url: String,
}

impl HttpCartService {
    pub fn new(client: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CartService for HttpCartService {
    #[tracing::instrument(skip_all)]
    async fn get_cart(&self, bearer_token: &str) -> Result<Vec<CartLine>, GatewayError> {
        let url = format!("{}/cart", self.base_url);
        let envelope: CartEnvelope = self
            .client
            .get_json(SERVICE, "cart", |http| {
                http.get(&url).bearer_auth(bearer_token)
            })
            .await?;
        Ok(envelope.cart.map(|c| c.items).unwrap_or_default())
    }
}

#[derive(Debug, Default)]
struct InMemoryCartState {
    carts: HashMap<String, Vec<CartLine>>,
    failure: Option<GatewayError>,
    calls: usize,
}

/// In-memory cart service for testing. Carts are keyed by bearer token.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCartService {
    state: Arc<Mutex<InMemoryCartState>>,
}

impl InMemoryCartService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryCartState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_cart(&self, bearer_token: &str, lines: Vec<CartLine>) {
        self.state().carts.insert(bearer_token.to_string(), lines);
    }

    /// Makes every call fail with `error` until cleared with `None`.
    pub fn set_failure(&self, error: Option<GatewayError>) {
        self.state().failure = error;
    }

    pub fn call_count(&self) -> usize {
        self.state().calls
    }
}

#[async_trait]
impl CartService for InMemoryCartService {
    async fn get_cart(&self, bearer_token: &str) -> Result<Vec<CartLine>, GatewayError> {
        let mut state = self.state();
        state.calls += 1;
        if let Some(err) = &state.failure {
            return Err(err.clone());
        }
        Ok(state.carts.get(bearer_token).cloned().unwrap_or_default())
    }
}
