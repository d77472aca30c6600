//! API error types with HTTP response mapping.
//!
//! Every failure renders as
//! `{"success": false, "message": ..., "error": {"code", "retryable", "details"}}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;
use serde::Serialize;
use serde_json::{Value, json};

use crate::auth::AuthError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request body, path or query.
    BadRequest(String),
    /// Missing or invalid credential.
    Auth(AuthError),
    /// Authenticated, but the role may not use the route.
    Forbidden(String),
    /// Saga operation failure.
    Saga(SagaError),
    /// Internal server error. The text is logged, never returned.
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    retryable: bool,
    details: Value,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    success: bool,
    message: String,
    error: ErrorBody,
}

struct Rendered {
    status: StatusCode,
    code: &'static str,
    message: String,
    retryable: bool,
    details: Value,
}

impl Rendered {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retryable: false,
            details: Value::Null,
        }
    }

    fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

impl ApiError {
    fn render(self) -> Rendered {
        match self {
            ApiError::BadRequest(msg) => {
                Rendered::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg)
            }
            ApiError::Auth(err) => {
                Rendered::new(StatusCode::UNAUTHORIZED, "AUTH_ERROR", err.to_string())
            }
            ApiError::Forbidden(msg) => Rendered::new(StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            ApiError::Saga(err) => saga_error(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                Rendered::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error",
                )
            }
        }
    }
}

fn saga_error(err: SagaError) -> Rendered {
    let message = err.to_string();
    let retryable = err.is_retryable();

    match &err {
        SagaError::Validation(_) | SagaError::EmptyCart => {
            Rendered::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
        }
        SagaError::SignatureInvalid => {
            Rendered::new(StatusCode::BAD_REQUEST, "SIGNATURE_INVALID", message)
        }
        SagaError::Forbidden => Rendered::new(StatusCode::FORBIDDEN, "FORBIDDEN", message),
        SagaError::InvalidState { current, .. } => {
            Rendered::new(StatusCode::FORBIDDEN, "INVALID_STATE", message)
                .details(json!({ "currentStatus": current }))
        }
        SagaError::OrderNotFound(id) => Rendered::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
            .details(json!({ "orderId": id })),
        SagaError::NoOrders => Rendered::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "No orders found for this user",
        ),
        SagaError::PaymentNotFound(provider_order_id) => {
            Rendered::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
                .details(json!({ "razorpayOrderId": provider_order_id }))
        }
        SagaError::InsufficientStock {
            product_id,
            requested,
            available,
        } => Rendered::new(StatusCode::CONFLICT, "INSUFFICIENT_STOCK", message).details(json!({
            "productId": product_id,
            "requested": requested,
            "available": available,
        })),
        SagaError::Conflict(_) => Rendered::new(StatusCode::CONFLICT, "CONFLICT", message),
        SagaError::DuplicatePayment(order_id) => {
            Rendered::new(StatusCode::CONFLICT, "DUPLICATE_PAYMENT", message)
                .details(json!({ "orderId": order_id }))
        }
        SagaError::ProductUnavailable { .. } | SagaError::Cart(_) | SagaError::PaymentProvider(_) => {
            upstream(&err, message, retryable)
        }
        SagaError::NotificationUndelivered {
            event_type,
            payment_id,
            order_id,
            ..
        } => {
            tracing::error!(error = %err, "notification undelivered");
            Rendered::new(StatusCode::BAD_GATEWAY, "NOTIFICATION_UNDELIVERED", message)
                .retryable(retryable)
                .details(json!({
                    "eventType": event_type,
                    "paymentId": payment_id,
                    "orderId": order_id,
                }))
        }
        SagaError::Ledger(_) => {
            tracing::error!(error = %err, "ledger failure");
            Rendered::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error",
            )
            .retryable(retryable)
        }
    }
}

fn upstream(err: &SagaError, message: String, retryable: bool) -> Rendered {
    let Some(gateway) = err.gateway_error() else {
        return Rendered::new(StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", message);
    };
    tracing::warn!(service = gateway.service(), error = %gateway, "upstream failure");

    let status = if gateway.is_timeout() {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::BAD_GATEWAY
    };
    let mut details = json!({ "service": gateway.service() });
    if let SagaError::ProductUnavailable { product_id, .. } = err {
        details["productId"] = json!(product_id);
    }

    Rendered::new(status, "UPSTREAM_ERROR", message)
        .retryable(retryable)
        .details(details)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let rendered = self.render();
        let body = ErrorEnvelope {
            success: false,
            message: rendered.message,
            error: ErrorBody {
                code: rendered.code,
                retryable: rendered.retryable,
                details: rendered.details,
            },
        };
        (rendered.status, Json(body)).into_response()
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<axum::extract::rejection::JsonRejection> for ApiError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
