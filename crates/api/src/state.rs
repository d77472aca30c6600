//! Shared application state and its construction from [`Config`].

use std::sync::Arc;

use ledger::{InMemoryLedger, LedgerError, LedgerStore, PostgresLedger};
use saga::{
    Collaborators, EventPublisher, GatewayError, HttpCartService, HttpCatalogService, HttpClient,
    HttpPaymentProvider, InMemoryPublisher, PostgresEventQueue, RetryPolicy, SagaConfig,
    SagaCoordinator,
};
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use crate::auth::JwtAuth;
use crate::config::Config;

/// Where orders, payments and events are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Memory,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Postgres => "postgres",
            Backend::Memory => "memory",
        }
    }
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub coordinator: SagaCoordinator,
    pub auth: JwtAuth,
    pub backend: Backend,
}

impl AppState {
    pub fn new(coordinator: SagaCoordinator, auth: JwtAuth, backend: Backend) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            auth,
            backend,
        })
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("{0} must be set")]
    MissingSetting(&'static str),

    #[error("HTTP client: {0}")]
    Http(#[from] GatewayError),

    #[error("database connection: {0}")]
    Database(#[from] sqlx::Error),

    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}

/// Builds the state for the configured backend.
///
/// With `DATABASE_URL` set, connects, runs migrations and uses PostgreSQL
/// for the ledger and the event queue. Without it, both live in memory.
/// Collaborators are always reached over HTTP.
pub async fn build(config: &Config) -> Result<Arc<AppState>, BootstrapError> {
    let jwt_secret = config
        .jwt_secret
        .as_deref()
        .ok_or(BootstrapError::MissingSetting("JWT_SECRET"))?;
    let key_id = config
        .payment_provider_key_id
        .clone()
        .ok_or(BootstrapError::MissingSetting("PAYMENT_PROVIDER_KEY_ID"))?;
    let key_secret = config
        .payment_provider_key_secret
        .clone()
        .ok_or(BootstrapError::MissingSetting("PAYMENT_PROVIDER_KEY_SECRET"))?;

    let (ledger, publisher, backend): (Arc<dyn LedgerStore>, Arc<dyn EventPublisher>, Backend) =
        match &config.database_url {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await?;
                let ledger = PostgresLedger::new(pool.clone());
                ledger.run_migrations().await?;
                tracing::info!("using PostgreSQL ledger and event queue");
                (
                    Arc::new(ledger),
                    Arc::new(PostgresEventQueue::new(pool)),
                    Backend::Postgres,
                )
            }
            None => {
                tracing::warn!("DATABASE_URL not set, state is kept in memory");
                (
                    Arc::new(InMemoryLedger::new()),
                    Arc::new(InMemoryPublisher::new()),
                    Backend::Memory,
                )
            }
        };

    let http = HttpClient::new(
        config.http_timeout,
        RetryPolicy::new(config.read_retries, config.retry_base_delay),
    )?;
    let collaborators = Collaborators {
        cart: Arc::new(HttpCartService::new(
            http.clone(),
            &config.cart_service_url,
        )),
        catalog: Arc::new(HttpCatalogService::new(
            http.clone(),
            &config.catalog_service_url,
        )),
        payment_provider: Arc::new(HttpPaymentProvider::new(
            http,
            &config.payment_provider_url,
            key_id,
            key_secret.clone(),
        )),
    };

    let coordinator = SagaCoordinator::new(
        ledger,
        collaborators,
        publisher,
        SagaConfig {
            publish_order_events: config.publish_order_events,
            signature_secret: key_secret,
        },
    );

    Ok(AppState::new(coordinator, JwtAuth::new(jwt_secret), backend))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_secrets_are_reported() {
        let err = build(&Config::default()).await.err().unwrap();
        assert!(matches!(err, BootstrapError::MissingSetting("JWT_SECRET")));

        let config = Config {
            jwt_secret: Some("jwt".into()),
            payment_provider_key_id: Some("key".into()),
            ..Config::default()
        };
        let err = build(&config).await.err().unwrap();
        assert!(matches!(
            err,
            BootstrapError::MissingSetting("PAYMENT_PROVIDER_KEY_SECRET")
        ));
    }

    #[tokio::test]
    async fn test_memory_backend_without_database() {
        let config = Config {
            jwt_secret: Some("jwt".into()),
            payment_provider_key_id: Some("key".into()),
            payment_provider_key_secret: Some("secret".into()),
            ..Config::default()
        };
        let state = build(&config).await.unwrap();
        assert_eq!(state.backend, Backend::Memory);
    }
}
