//! Catalog collaborator.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::ProductId;
use domain::{Currency, Money};
use serde::Deserialize;

use super::{GatewayError, HttpClient};

pub const SERVICE: &str = "catalog";

/// Price and stock of a product at the moment it was read.
///
/// `stock` is `None` when the catalog does not track inventory for the
/// product; such products are never refused for stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSnapshot {
    pub id: ProductId,
    pub title: String,
    pub price: CatalogPrice,
    pub stock: Option<u32>,
}

/// A price exactly as the catalog reported it. The amount is any JSON number.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogPrice {
    pub amount: serde_json::Number,
    pub currency: Currency,
}

impl CatalogPrice {
    /// The price as [`Money`], or `None` when the amount is not a whole
    /// number of minor units that fits in an `i64`.
    pub fn to_money(&self) -> Option<Money> {
        if let Some(amount) = self.amount.as_i64() {
            return Some(Money::new(amount, self.currency));
        }
        let amount = self.amount.as_f64()?;
        let whole = amount.fract() == 0.0 && amount.abs() < i64::MAX as f64;
        whole.then(|| Money::new(amount as i64, self.currency))
    }
}

impl From<Money> for CatalogPrice {
    fn from(money: Money) -> Self {
        Self {
            amount: money.amount().into(),
            currency: money.currency(),
        }
    }
}

#[async_trait]
pub trait CatalogService: Send + Sync {
    async fn get_product(&self, id: &ProductId) -> Result<ProductSnapshot, GatewayError>;
}

#[derive(Deserialize)]
struct ProductEnvelope {
    product: ProductBody,
}

#[derive(Deserialize)]
struct ProductBody {
    #[serde(rename = "_id")]
    id: ProductId,
    title: String,
    price: CatalogPrice,
    #[serde(default)]
    stock: Option<i64>,
}

impl From<ProductBody> for ProductSnapshot {
    fn from(body: ProductBody) -> Self {
        Self {
            id: body.id,
            title: body.title,
            price: body.price,
            // Negative stock counts as none left.
            stock: body
                .stock
                .map(|stock| stock.clamp(0, i64::from(u32::MAX)) as u32),
        }
    }
}

/// `GET {base_url}/product/{id}`.
#[derive(Debug, Clone)]
pub struct HttpCatalogService {
    client: HttpClient,
    base_url: String,
}

impl HttpCatalogService {
    pub fn new(client: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CatalogService for HttpCatalogService {
    #[tracing::instrument(skip(self), fields(product_id = %id))]
    async fn get_product(&self, id: &ProductId) -> Result<ProductSnapshot, GatewayError> {
        let url = format!("{}/product/{}", self.base_url, id);
        let resource = format!("product {id}");
        let envelope: ProductEnvelope = self
            .client
            .get_json(SERVICE, &resource, |http| http.get(&url))
            .await?;
        Ok(envelope.product.into())
    }
}

#[derive(Debug, Default)]
struct InMemoryCatalogState {
    products: HashMap<ProductId, ProductSnapshot>,
    unavailable: HashSet<ProductId>,
    calls: usize,
}

/// In-memory catalog for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalogService {
    state: Arc<Mutex<InMemoryCatalogState>>,
}

impl InMemoryCatalogService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryCatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_product(
        &self,
        id: impl Into<ProductId>,
        title: impl Into<String>,
        price: Money,
        stock: u32,
    ) {
        let id = id.into();
        self.state().products.insert(
            id.clone(),
            ProductSnapshot {
                id,
                title: title.into(),
                price: price.into(),
                stock: Some(stock),
            },
        );
    }

    /// Stores `product` as given, e.g. without stock or with a fractional price.
    pub fn insert(&self, product: ProductSnapshot) {
        self.state().products.insert(product.id.clone(), product);
    }

    /// Makes lookups of `id` fail with a 503.
    pub fn set_unavailable(&self, id: impl Into<ProductId>) {
        self.state().unavailable.insert(id.into());
    }

    pub fn call_count(&self) -> usize {
        self.state().calls
    }
}

#[async_trait]
impl CatalogService for InMemoryCatalogService {
    async fn get_product(&self, id: &ProductId) -> Result<ProductSnapshot, GatewayError> {
        let mut state = self.state();
        state.calls += 1;
        if state.unavailable.contains(id) {
            return Err(GatewayError::Status {
                service: SERVICE,
                code: 503,
            });
        }
        state
            .products
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                service: SERVICE,
                resource: format!("product {id}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(body: &str) -> ProductSnapshot {
        let envelope: ProductEnvelope = serde_json::from_str(body).unwrap();
        envelope.product.into()
    }

    #[test]
    fn test_wire_format() {
        let snapshot = decode(
            r#"{"product":{"_id":"P1","title":"Lamp","price":{"amount":100,"currency":"INR"},"stock":10}}"#,
        );
        assert_eq!(snapshot.id, ProductId::new("P1"));
        assert_eq!(snapshot.price.to_money(), Some(Money::new(100, Currency::Inr)));
        assert_eq!(snapshot.stock, Some(10));
    }

    #[test]
    fn test_missing_stock_is_untracked() {
        let snapshot =
            decode(r#"{"product":{"_id":"P1","title":"Lamp","price":{"amount":5,"currency":"USD"}}}"#);
        assert_eq!(snapshot.stock, None);

        let snapshot = decode(
            r#"{"product":{"_id":"P1","title":"Lamp","price":{"amount":5,"currency":"USD"},"stock":-2}}"#,
        );
        assert_eq!(snapshot.stock, Some(0));
    }

    #[test]
    fn test_fractional_price_decodes() {
        let snapshot = decode(
            r#"{"product":{"_id":"P1","title":"Lamp","price":{"amount":99.5,"currency":"INR"},"stock":4}}"#,
        );
        assert_eq!(snapshot.price.amount.as_f64(), Some(99.5));
        assert_eq!(snapshot.price.to_money(), None);
    }

    #[test]
    fn test_whole_float_price_converts() {
        let snapshot = decode(
            r#"{"product":{"_id":"P1","title":"Lamp","price":{"amount":250.0,"currency":"INR"}}}"#,
        );
        assert_eq!(snapshot.price.to_money(), Some(Money::new(250, Currency::Inr)));
    }

    #[tokio::test]
    async fn test_in_memory_lookup() {
        let catalog = InMemoryCatalogService::new();
        catalog.add_product("P1", "Lamp", Money::new(100, Currency::Inr), 3);
        catalog.set_unavailable("P2");

        let product = catalog.get_product(&ProductId::new("P1")).await.unwrap();
        assert_eq!(product.stock, Some(3));

        let err = catalog.get_product(&ProductId::new("P2")).await.unwrap_err();
        assert!(err.is_retryable());

        let err = catalog.get_product(&ProductId::new("P3")).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound { .. }));
    }
}
