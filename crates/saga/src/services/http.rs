//! Shared reqwest client for the HTTP collaborators.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::{GatewayError, RetryPolicy, retry_read};

/// A reqwest client with a fixed per-request timeout and a retry policy
/// for idempotent reads.
///
/// Cloning is cheap and shares the connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    read_retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(timeout: Duration, read_retry: RetryPolicy) -> Result<Self, GatewayError> {
        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable {
                service: "http",
                reason: e.to_string(),
            })?;
        Ok(Self { inner, read_retry })
    }

    pub(crate) fn inner(&self) -> &reqwest::Client {
        &self.inner
    }

    /// GET with retries. `build` is called once per attempt.
    pub(crate) async fn get_json<T, F>(
        &self,
        service: &'static str,
        resource: &str,
        build: F,
    ) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        retry_read(&self.read_retry, service, || {
            self.send_json(service, resource, build(&self.inner))
        })
        .await
    }

    /// Sends a request exactly once.
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        service: &'static str,
        resource: &str,
        request: RequestBuilder,
    ) -> Result<T, GatewayError> {
        let result = match request.send().await {
            Ok(response) => read_json(service, resource, response).await,
            Err(err) => Err(classify(service, err)),
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.outcome(),
        };
        metrics::counter!("gateway_requests_total", "service" => service, "outcome" => outcome)
            .increment(1);
        if let Err(err) = &result {
            tracing::debug!(service, resource, error = %err, "gateway call failed");
        }
        result
    }
}

fn classify(service: &'static str, err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout { service }
    } else if err.is_decode() {
        GatewayError::Decode {
            service,
            reason: err.to_string(),
        }
    } else if let Some(status) = err.status() {
        GatewayError::Status {
            service,
            code: status.as_u16(),
        }
    } else {
        GatewayError::Unavailable {
            service,
            reason: err.to_string(),
        }
    }
}

async fn read_json<T: DeserializeOwned>(
    service: &'static str,
    resource: &str,
    response: Response,
) -> Result<T, GatewayError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(GatewayError::NotFound {
            service,
            resource: resource.to_string(),
        });
    }
    if !status.is_success() {
        return Err(GatewayError::Status {
            service,
            code: status.as_u16(),
        });
    }

    // The body can stall after the headers arrive, so timeouts show up here too.
    let body = response.bytes().await.map_err(|e| classify(service, e))?;
    serde_json::from_slice(&body).map_err(|e| GatewayError::Decode {
        service,
        reason: e.to_string(),
    })
}
