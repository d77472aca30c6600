//! Application configuration loaded from environment variables.

use std::time::Duration;

/// Output format of the `fmt` tracing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration with defaults for everything but secrets.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3003`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json`
/// - `DATABASE_URL`: PostgreSQL ledger and event queue; unset means in-memory
/// - `JWT_SECRET`: HS256 key for caller tokens
/// - `CART_SERVICE_URL`, `CATALOG_SERVICE_URL`, `PAYMENT_PROVIDER_URL`
/// - `PAYMENT_PROVIDER_KEY_ID`, `PAYMENT_PROVIDER_KEY_SECRET`: provider
///   credentials; the secret also keys payment signatures
/// - `HTTP_TIMEOUT_MS`, `READ_RETRIES`, `RETRY_BASE_DELAY_MS`
/// - `PUBLISH_ORDER_EVENTS`: emit `ORDER_CREATED` (default `false`)
/// - `PAYMENT_PENDING_TTL_SECS`: expire pending payments older than this
///
/// Unparsable numbers fall back to their defaults.
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub jwt_secret: Option<String>,
    pub cart_service_url: String,
    pub catalog_service_url: String,
    pub payment_provider_url: String,
    pub payment_provider_key_id: Option<String>,
    pub payment_provider_key_secret: Option<String>,
    pub http_timeout: Duration,
    pub read_retries: u32,
    pub retry_base_delay: Duration,
    pub publish_order_events: bool,
    pub payment_pending_ttl: Option<Duration>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which returns a variable's value
    /// if set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let number = |key: &str| var(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: var("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match var("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: var("DATABASE_URL"),
            jwt_secret: var("JWT_SECRET"),
            cart_service_url: var("CART_SERVICE_URL").unwrap_or(defaults.cart_service_url),
            catalog_service_url: var("CATALOG_SERVICE_URL")
                .unwrap_or(defaults.catalog_service_url),
            payment_provider_url: var("PAYMENT_PROVIDER_URL")
                .unwrap_or(defaults.payment_provider_url),
            payment_provider_key_id: var("PAYMENT_PROVIDER_KEY_ID"),
            payment_provider_key_secret: var("PAYMENT_PROVIDER_KEY_SECRET"),
            http_timeout: number("HTTP_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.http_timeout),
            read_retries: var("READ_RETRIES")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.read_retries),
            retry_base_delay: number("RETRY_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            publish_order_events: var("PUBLISH_ORDER_EVENTS")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(defaults.publish_order_events),
            payment_pending_ttl: number("PAYMENT_PENDING_TTL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// How often stale payments are swept: a quarter of the TTL, between
    /// one second and five minutes.
    pub fn reconcile_interval(&self) -> Option<Duration> {
        self.payment_pending_ttl
            .map(|ttl| (ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(300)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3003,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            jwt_secret: None,
            cart_service_url: "http://localhost:3002".to_string(),
            catalog_service_url: "http://localhost:3001".to_string(),
            payment_provider_url: "https://api.razorpay.com".to_string(),
            payment_provider_key_id: None,
            payment_provider_key_secret: None,
            http_timeout: Duration::from_millis(5000),
            read_retries: 2,
            retry_base_delay: Duration::from_millis(50),
            publish_order_events: false,
            payment_pending_ttl: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("addr", &self.addr())
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("database", &self.database_url.is_some())
            .field("cart_service_url", &self.cart_service_url)
            .field("catalog_service_url", &self.catalog_service_url)
            .field("payment_provider_url", &self.payment_provider_url)
            .field("http_timeout", &self.http_timeout)
            .field("read_retries", &self.read_retries)
            .field("publish_order_events", &self.publish_order_events)
            .field("payment_pending_ttl", &self.payment_pending_ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.addr(), "0.0.0.0:3003");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert_eq!(config.read_retries, 2);
        assert!(!config.publish_order_events);
        assert!(config.database_url.is_none());
        assert!(config.reconcile_interval().is_none());
    }

    #[test]
    fn test_empty_environment_matches_defaults() {
        let config = load(&[]);
        assert_eq!(config.addr(), Config::default().addr());
        assert_eq!(config.cart_service_url, "http://localhost:3002");
        assert_eq!(config.catalog_service_url, "http://localhost:3001");
    }

    #[test]
    fn test_reads_overrides() {
        let config = load(&[
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/orders"),
            ("HTTP_TIMEOUT_MS", "1500"),
            ("READ_RETRIES", "0"),
            ("PUBLISH_ORDER_EVENTS", "true"),
            ("PAYMENT_PENDING_TTL_SECS", "900"),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/orders")
        );
        assert_eq!(config.http_timeout, Duration::from_millis(1500));
        assert_eq!(config.read_retries, 0);
        assert!(config.publish_order_events);
        assert_eq!(config.payment_pending_ttl, Some(Duration::from_secs(900)));
        assert_eq!(config.reconcile_interval(), Some(Duration::from_secs(225)));
    }

    #[test]
    fn test_unparsable_numbers_fall_back() {
        let config = load(&[
            ("PORT", "http"),
            ("HTTP_TIMEOUT_MS", "-5"),
            ("RETRY_BASE_DELAY_MS", "soon"),
            ("PAYMENT_PENDING_TTL_SECS", "0"),
        ]);
        assert_eq!(config.port, 3003);
        assert_eq!(config.http_timeout, Duration::from_millis(5000));
        assert_eq!(config.retry_base_delay, Duration::from_millis(50));
        assert!(config.payment_pending_ttl.is_none());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = load(&[
            ("JWT_SECRET", "jwt-shh"),
            ("PAYMENT_PROVIDER_KEY_SECRET", "provider-shh"),
        ]);
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("jwt-shh"));
        assert!(!rendered.contains("provider-shh"));
    }
}
