//! Order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use common::OrderId;
use domain::{Order, ShippingAddress};
use ledger::PageRequest;
use saga::Role;
use serde::{Deserialize, Serialize};

use crate::auth::Authenticated;
use crate::error::ApiError;
use crate::state::AppState;

const IDEMPOTENCY_KEY: &str = "idempotency-key";

// -- Request types --

/// Address fields. Missing fields arrive blank and are rejected by name.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AddressRequest {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: String,
}

impl From<AddressRequest> for ShippingAddress {
    fn from(req: AddressRequest) -> Self {
        Self {
            street: req.street,
            city: req.city,
            state: req.state,
            zip: req.zip,
            country: req.country,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub shipping_address: AddressRequest,
}

/// `page` and `limit` as sent. Anything unparsable falls back to the default.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl PageQuery {
    fn to_request(&self) -> PageRequest {
        let defaults = PageRequest::default();
        let parse = |v: &Option<String>| v.as_deref().and_then(|s| s.trim().parse::<u32>().ok());
        PageRequest::new(
            parse(&self.page).unwrap_or(defaults.page),
            parse(&self.limit).unwrap_or(defaults.limit),
        )
    }
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub success: bool,
    pub message: &'static str,
    pub order: Order,
}

impl OrderResponse {
    fn ok(message: &'static str, order: Order) -> Json<Self> {
        Json(Self {
            success: true,
            message,
            order,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total_orders: u64,
    pub total_pages: u64,
    pub current_page: u32,
    pub page_size: u32,
}

#[derive(Serialize)]
pub struct OrderListResponse {
    pub success: bool,
    pub message: &'static str,
    pub orders: Vec<Order>,
    pub pagination: Pagination,
}

// -- Handlers --

/// POST /orders: place an order from the caller's cart.
///
/// Answers 201 for a new order and 200 when an `Idempotency-Key` replay
/// returns an existing one.
#[tracing::instrument(skip_all)]
pub async fn create(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    headers: HeaderMap,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let caller = auth.require(&[Role::User])?;
    let Json(req) = payload?;
    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY)
        .map(|v| {
            v.to_str()
                .map(str::to_string)
                .map_err(|_| ApiError::BadRequest("Idempotency-Key must be ASCII".to_string()))
        })
        .transpose()?;

    let inserted = state
        .coordinator
        .create_order(&caller, req.shipping_address.into(), idempotency_key)
        .await?;

    Ok(if inserted.is_new() {
        (
            StatusCode::CREATED,
            OrderResponse::ok("Order created successfully", inserted.into_inner()),
        )
    } else {
        (
            StatusCode::OK,
            OrderResponse::ok("Order already created", inserted.into_inner()),
        )
    })
}

/// GET /orders/me: the caller's orders, newest first.
#[tracing::instrument(skip_all)]
pub async fn list_mine(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    Query(query): Query<PageQuery>,
) -> Result<Json<OrderListResponse>, ApiError> {
    let caller = auth.require(&[Role::User])?;
    let page = state
        .coordinator
        .list_my_orders(&caller, query.to_request())
        .await?;

    let pagination = Pagination {
        total_orders: page.total,
        total_pages: page.total_pages(),
        current_page: page.request.page,
        page_size: page.request.limit,
    };
    Ok(Json(OrderListResponse {
        success: true,
        message: "User's orders fetched successfully",
        orders: page.items,
        pagination,
    }))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state, auth))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let caller = auth.require(&[Role::User, Role::Admin])?;
    let order = state
        .coordinator
        .get_order(&caller, parse_order_id(&id)?)
        .await?;
    Ok(OrderResponse::ok("Order fetched successfully", order))
}

/// POST /orders/{id}/cancel
#[tracing::instrument(skip(state, auth))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let caller = auth.require(&[Role::User, Role::Admin])?;
    let order = state
        .coordinator
        .cancel_order(&caller, parse_order_id(&id)?)
        .await?;
    Ok(OrderResponse::ok("Order cancelled successfully", order))
}

/// PATCH /orders/{id}/address: replaces the whole address.
#[tracing::instrument(skip(state, auth, payload))]
pub async fn update_address(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    Path(id): Path<String>,
    payload: Result<Json<AddressRequest>, JsonRejection>,
) -> Result<Json<OrderResponse>, ApiError> {
    let caller = auth.require(&[Role::User])?;
    let order_id = parse_order_id(&id)?;
    let Json(address) = payload?;

    let order = state
        .coordinator
        .update_address(&caller, order_id, address.into())
        .await?;
    Ok(OrderResponse::ok("Order address updated successfully", order))
}

/// POST /orders/{id}/advance: moves a confirmed order to shipped, or a
/// shipped one to delivered.
#[tracing::instrument(skip(state, auth))]
pub async fn advance(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let caller = auth.require(&[Role::Admin])?;
    let order = state
        .coordinator
        .advance_order(&caller, parse_order_id(&id)?)
        .await?;
    Ok(OrderResponse::ok("Order advanced successfully", order))
}

pub(crate) fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid order id: {id}")))
}
