//! Payment endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use domain::{Order, Payment};
use saga::{PaymentVerification, Role, SagaError};
use serde::{Deserialize, Serialize};

use super::orders::parse_order_id;
use crate::auth::Authenticated;
use crate::error::ApiError;
use crate::state::AppState;

/// Provider callback fields, named as the checkout widget sends them.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    pub razorpay_order_id: String,
    #[serde(alias = "paymentId")]
    pub razorpay_payment_id: String,
    pub signature: String,
}

impl From<VerifyPaymentRequest> for PaymentVerification {
    fn from(req: VerifyPaymentRequest) -> Self {
        Self {
            provider_order_id: req.razorpay_order_id,
            provider_payment_id: req.razorpay_payment_id,
            signature: req.signature,
        }
    }
}

#[derive(Serialize)]
pub struct PaymentResponse {
    pub success: bool,
    pub message: &'static str,
    pub payment: Payment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
}

/// POST /payment/create/{orderId}
#[tracing::instrument(skip(state, auth))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    Path(order_id): Path<String>,
) -> Result<(StatusCode, Json<PaymentResponse>), ApiError> {
    let caller = auth.require(&[Role::User])?;
    let payment = state
        .coordinator
        .initiate_payment(&caller, parse_order_id(&order_id)?)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(PaymentResponse {
            success: true,
            message: "Payment initiated successfully",
            payment,
            order: None,
        }),
    ))
}

/// POST /payment/verify
#[tracing::instrument(skip_all)]
pub async fn verify(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    payload: Result<Json<VerifyPaymentRequest>, JsonRejection>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let caller = auth.require(&[Role::User])?;
    let Json(req) = payload?;

    let verified = state
        .coordinator
        .verify_payment(&caller, req.into())
        .await
        .inspect_err(|err| {
            if matches!(err, SagaError::SignatureInvalid) {
                tracing::warn!(user_id = %caller.user_id, "payment signature rejected");
            }
        })?;

    Ok(Json(PaymentResponse {
        success: true,
        message: "Payment verified successfully",
        payment: verified.payment,
        order: Some(verified.order),
    }))
}
