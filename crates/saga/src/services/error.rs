use thiserror::Error;

/// A failed call to an external collaborator.
///
/// Transport errors are classified here and never passed upward raw.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// No response within the configured timeout.
    #[error("{service} timed out")]
    Timeout { service: &'static str },

    /// Connection refused, reset, DNS failure and the like.
    #[error("{service} unavailable: {reason}")]
    Unavailable {
        service: &'static str,
        reason: String,
    },

    /// The collaborator answered with a non-success status.
    #[error("{service} returned HTTP {code}")]
    Status { service: &'static str, code: u16 },

    /// The requested resource does not exist upstream.
    #[error("{service}: {resource} not found")]
    NotFound {
        service: &'static str,
        resource: String,
    },

    /// The response body could not be decoded.
    #[error("{service} sent an unreadable response: {reason}")]
    Decode {
        service: &'static str,
        reason: String,
    },
}

impl GatewayError {
    /// Timeouts, connection failures, 5xx and 429 may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Timeout { .. } | GatewayError::Unavailable { .. } => true,
            GatewayError::Status { code, .. } => *code >= 500 || *code == 429,
            GatewayError::NotFound { .. } | GatewayError::Decode { .. } => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout { .. })
    }

    /// Name of the collaborator that failed.
    pub fn service(&self) -> &'static str {
        match self {
            GatewayError::Timeout { service }
            | GatewayError::Unavailable { service, .. }
            | GatewayError::Status { service, .. }
            | GatewayError::NotFound { service, .. }
            | GatewayError::Decode { service, .. } => service,
        }
    }

    /// Short label used for the `outcome` metric dimension.
    pub(crate) fn outcome(&self) -> &'static str {
        match self {
            GatewayError::Timeout { .. } => "timeout",
            GatewayError::Unavailable { .. } => "unavailable",
            GatewayError::Status { .. } => "status",
            GatewayError::NotFound { .. } => "not_found",
            GatewayError::Decode { .. } => "decode",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(GatewayError::Timeout { service: "cart" }.is_retryable());
        assert!(
            GatewayError::Unavailable {
                service: "cart",
                reason: "connection refused".into()
            }
            .is_retryable()
        );
        assert!(
            GatewayError::Status {
                service: "catalog",
                code: 503
            }
            .is_retryable()
        );
        assert!(
            GatewayError::Status {
                service: "catalog",
                code: 429
            }
            .is_retryable()
        );
        assert!(
            !GatewayError::Status {
                service: "catalog",
                code: 400
            }
            .is_retryable()
        );
        assert!(
            !GatewayError::NotFound {
                service: "catalog",
                resource: "product P1".into()
            }
            .is_retryable()
        );
        assert!(
            !GatewayError::Decode {
                service: "payment_provider",
                reason: "missing field `id`".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_service_name() {
        let err = GatewayError::Status {
            service: "payment_provider",
            code: 401,
        };
        assert_eq!(err.service(), "payment_provider");
        assert_eq!(err.to_string(), "payment_provider returned HTTP 401");
        assert!(!err.is_timeout());
    }
}
