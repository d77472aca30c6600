//! Typed clients for the external collaborators.
//!
//! Each collaborator has a trait, a reqwest implementation and an in-memory
//! fake. Every HTTP call has a timeout and surfaces failures as
//! [`GatewayError`]. Only idempotent reads (cart, catalog) are retried.

pub mod cart;
pub mod catalog;
mod error;
pub mod http;
pub mod payment_provider;
pub mod retry;
pub mod signature;

pub use cart::{CartLine, CartService, HttpCartService, InMemoryCartService};
pub use catalog::{
    CatalogPrice, CatalogService, HttpCatalogService, InMemoryCatalogService, ProductSnapshot,
};
pub use error::GatewayError;
pub use http::HttpClient;
pub use payment_provider::{
    HttpPaymentProvider, InMemoryPaymentProvider, PaymentProvider, ProviderOrder,
};
pub use retry::{RetryPolicy, retry_read};
pub use signature::{sign, verify_signature};
