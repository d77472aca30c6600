//! Order and payment saga.
//!
//! The [`SagaCoordinator`] drives two flows across independently owned
//! collaborators:
//!
//! 1. Order creation: read the cart, snapshot product prices and stock,
//!    persist a pending order.
//! 2. Payment: create a provider intent, then verify the provider's
//!    signature and settle the payment and order together.
//!
//! State lives in the [`ledger`]; outcomes are announced through an
//! [`EventPublisher`]. Nothing is compensated by rollback: a pending payment
//! whose verification never arrives is expired by
//! [`SagaCoordinator::reconcile_stale_payments`].

pub mod caller;
pub mod coordinator;
pub mod error;
pub mod publisher;
pub mod services;

pub use caller::{Caller, Role};
pub use coordinator::{
    Collaborators, PAYMENT_EXPIRED_REASON, PaymentVerification, SagaConfig, SagaCoordinator,
    VerifiedPayment,
};
pub use error::SagaError;
pub use publisher::{EventPublisher, InMemoryPublisher, PostgresEventQueue, PublishError, QueuedEvent};
pub use services::{
    CartLine, CartService, CatalogPrice, CatalogService, GatewayError, HttpCartService,
    HttpCatalogService, HttpClient, HttpPaymentProvider, InMemoryCartService,
    InMemoryCatalogService, InMemoryPaymentProvider, PaymentProvider, ProductSnapshot,
    ProviderOrder, RetryPolicy,
};
