use crate::handlers::common::{created_response, success_response, validate_input};
use crate::{
    entities::{checkout_session, CheckoutStatus, LockedPriceItem, PaymentStatus},
    errors::ServiceError,
    services::checkout::{
        CompleteCheckoutInput, InitiateCheckoutInput, PriceChange, ProcessPaymentInput,
    },
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::Response,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/initiate", post(initiate_checkout))
        .route("/methods/available", get(list_payment_methods))
        .route(
            "/:session_id",
            get(get_checkout_session).delete(cancel_checkout),
        )
        .route("/:session_id/validate", post(validate_checkout))
        .route("/:session_id/pay", post(process_payment))
        .route("/:session_id/complete", post(complete_checkout))
}

// Request/Response DTOs

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCheckoutRequest {
    pub customer_id: Uuid,
    #[validate(length(min = 1, message = "at least one cart item must be selected"))]
    pub selected_item_ids: Vec<Uuid>,
    #[validate(length(min = 1, message = "idempotency key is required"))]
    pub idempotency_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCheckoutResponse {
    pub success: bool,
    pub is_existing: bool,
    pub session_id: Uuid,
    pub status: CheckoutStatus,
    pub locked_prices: Vec<LockedPriceItem>,
    pub total_amount: Decimal,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionView {
    pub session_id: Uuid,
    pub customer_id: Uuid,
    pub status: CheckoutStatus,
    pub locked_prices: Vec<LockedPriceItem>,
    pub total_amount: Decimal,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<checkout_session::Model> for CheckoutSessionView {
    type Error = ServiceError;

    fn try_from(session: checkout_session::Model) -> Result<Self, Self::Error> {
        let locked_prices = session.locked_items()?;
        Ok(Self {
            session_id: session.id,
            customer_id: session.customer_id,
            status: session.status,
            locked_prices,
            total_amount: session.total_amount,
            expires_at: session.expires_at,
            created_at: session.created_at,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct GetSessionResponse {
    pub success: bool,
    pub session: CheckoutSessionView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCheckoutResponse {
    pub success: bool,
    pub status: CheckoutStatus,
    pub price_changes: Vec<PriceChange>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPaymentRequest {
    #[validate(length(min = 1, message = "payment method is required"))]
    pub payment_method: String,
    #[validate(length(min = 1, message = "idempotency key is required"))]
    pub idempotency_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPaymentResponse {
    pub success: bool,
    pub is_existing: bool,
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub gateway_ref: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CompleteCheckoutRequest {
    pub payment_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteCheckoutResponse {
    pub success: bool,
    pub is_existing: bool,
    pub order_id: Uuid,
    pub status: String,
    pub total_amount: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelCheckoutResponse {
    pub success: bool,
    pub session_id: Uuid,
    pub status: CheckoutStatus,
}

#[derive(Debug, Serialize)]
pub struct AvailableMethodsResponse {
    pub success: bool,
    pub methods: Vec<String>,
}

// Handlers

/// Start a checkout: lock prices for the selected cart lines
async fn initiate_checkout(
    State(state): State<AppState>,
    Json(payload): Json<InitiateCheckoutRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;

    let outcome = state
        .checkout
        .initiate(InitiateCheckoutInput {
            customer_id: payload.customer_id,
            selected_item_ids: payload.selected_item_ids,
            idempotency_key: payload.idempotency_key,
        })
        .await?;

    let session = outcome.session;
    let response = InitiateCheckoutResponse {
        success: true,
        is_existing: outcome.is_existing,
        session_id: session.id,
        status: session.status,
        locked_prices: session.locked_items()?,
        total_amount: session.total_amount,
        expires_at: session.expires_at,
    };

    // Idempotent replays answer 200, fresh sessions 201
    if outcome.is_existing {
        Ok(success_response(response))
    } else {
        Ok(created_response(response))
    }
}

/// Get checkout session (lazy-expires overdue sessions)
async fn get_checkout_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let session = state.checkout.get_session(session_id).await?;
    Ok(success_response(GetSessionResponse {
        success: true,
        session: session.try_into()?,
    }))
}

/// Re-validate stock and report price drift
async fn validate_checkout(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let outcome = state.checkout.validate(session_id).await?;
    Ok(success_response(ValidateCheckoutResponse {
        success: true,
        status: outcome.session.status,
        price_changes: outcome.price_changes,
    }))
}

/// Charge the locked total through the payment gateway
async fn process_payment(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<ProcessPaymentRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;

    let outcome = state
        .checkout
        .process_payment(
            session_id,
            ProcessPaymentInput {
                payment_method: payload.payment_method,
                idempotency_key: payload.idempotency_key,
            },
        )
        .await?;

    let payment = outcome.payment;
    match payment.status {
        // A replayed failure answers exactly like the original attempt
        PaymentStatus::Failed => Err(ServiceError::PaymentFailed {
            payment_id: payment.id,
            error_code: "PAYMENT_FAILED".to_string(),
            message: payment
                .error_message
                .unwrap_or_else(|| "payment failed".to_string()),
        }),
        status => Ok(success_response(ProcessPaymentResponse {
            success: true,
            is_existing: outcome.is_existing,
            payment_id: payment.id,
            status,
            gateway_ref: payment.gateway_reference,
        })),
    }
}

/// Commit the order atomically
async fn complete_checkout(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<CompleteCheckoutRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;

    let outcome = state
        .checkout
        .complete(
            session_id,
            CompleteCheckoutInput {
                payment_id: payload.payment_id,
                idempotency_key: payload.idempotency_key,
            },
        )
        .await?;

    let order = outcome.order;
    let response = CompleteCheckoutResponse {
        success: true,
        is_existing: outcome.is_existing,
        order_id: order.id,
        status: order.status,
        total_amount: order.total_amount,
    };

    if outcome.is_existing {
        Ok(success_response(response))
    } else {
        Ok(created_response(response))
    }
}

/// Cancel a checkout session
async fn cancel_checkout(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let session = state.checkout.cancel(session_id).await?;
    Ok(success_response(CancelCheckoutResponse {
        success: true,
        session_id: session.id,
        status: session.status,
    }))
}

/// List payment methods the gateway accepts
async fn list_payment_methods(State(state): State<AppState>) -> Result<Response, ServiceError> {
    let methods = state
        .checkout
        .gateway()
        .available_methods()
        .iter()
        .map(|m| m.to_string())
        .collect();

    Ok(success_response(AvailableMethodsResponse {
        success: true,
        methods,
    }))
}
