use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Wire-level error envelope. Every failed request body has this shape.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    /// Machine-readable error code (e.g. "INSUFFICIENT_STOCK")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Structured detail payload (shortfall lists, payment ids, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// A single line that could not be satisfied from current stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockShortfall {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub product_name: String,
    pub requested: i32,
    pub available: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("No matching cart items were found for checkout")]
    EmptyCart,

    #[error("Insufficient stock for {} line(s)", .0.len())]
    InsufficientStock(Vec<StockShortfall>),

    #[error("Stock validation failed for {} line(s)", .0.len())]
    StockValidationFailed(Vec<StockShortfall>),

    #[error("Stock for {product_name} was claimed by a concurrent checkout")]
    StockConflict {
        product_id: Uuid,
        product_name: String,
    },

    #[error("Checkout session {0} not found")]
    SessionNotFound(Uuid),

    #[error("Checkout session {0} has expired; start a new checkout")]
    SessionExpired(Uuid),

    #[error("Checkout session {0} is already completed")]
    SessionCompleted(Uuid),

    #[error("Checkout session {0} is already completed")]
    AlreadyCompleted(Uuid),

    #[error("Unsupported payment method: {0}")]
    InvalidPaymentMethod(String),

    #[error("Payment failed: {message}")]
    PaymentFailed {
        payment_id: Uuid,
        error_code: String,
        message: String,
    },

    #[error("No successful payment found for checkout session {0}")]
    PaymentNotFound(Uuid),

    #[error("Checkout session {0} cannot be cancelled")]
    CannotCancel(Uuid),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SessionNotFound(_) | Self::PaymentNotFound(_) => StatusCode::NOT_FOUND,
            Self::SessionExpired(_) => StatusCode::GONE,
            Self::StockConflict { .. } => StatusCode::CONFLICT,
            Self::InvalidRequest(_)
            | Self::ValidationError(_)
            | Self::EmptyCart
            | Self::InsufficientStock(_)
            | Self::StockValidationFailed(_)
            | Self::SessionCompleted(_)
            | Self::AlreadyCompleted(_)
            | Self::InvalidPaymentMethod(_)
            | Self::PaymentFailed { .. }
            | Self::CannotCancel(_) => StatusCode::BAD_REQUEST,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_)
            | Self::EventError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the machine-readable error code carried in the response body.
    pub fn error_code(&self) -> &'static str {
        match self {
            // Schema-level rejections share the client-input error code
            Self::InvalidRequest(_) | Self::ValidationError(_) => "INVALID_REQUEST",
            Self::EmptyCart => "EMPTY_CART",
            Self::InsufficientStock(_) => "INSUFFICIENT_STOCK",
            Self::StockValidationFailed(_) => "STOCK_VALIDATION_FAILED",
            Self::StockConflict { .. } => "STOCK_CONFLICT",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::SessionExpired(_) => "SESSION_EXPIRED",
            Self::SessionCompleted(_) => "SESSION_COMPLETED",
            Self::AlreadyCompleted(_) => "ALREADY_COMPLETED",
            Self::InvalidPaymentMethod(_) => "INVALID_PAYMENT_METHOD",
            Self::PaymentFailed { .. } => "PAYMENT_FAILED",
            Self::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            Self::CannotCancel(_) => "CANNOT_CANCEL",
            Self::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            Self::DatabaseError(_)
            | Self::EventError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_)
            | Self::EventError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Structured detail payload for errors that carry one.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InsufficientStock(shortfalls) | Self::StockValidationFailed(shortfalls) => {
                Some(json!({ "shortfalls": shortfalls }))
            }
            Self::StockConflict {
                product_id,
                product_name,
            } => Some(json!({ "productId": product_id, "productName": product_name })),
            Self::PaymentFailed {
                payment_id,
                error_code,
                ..
            } => Some(json!({ "paymentId": payment_id, "errorCode": error_code })),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed with internal error");
        }

        let body = ErrorResponse {
            success: false,
            error: self.error_code().to_string(),
            message: self.response_message(),
            details: self.details(),
        };

        (status, Json(body)).into_response()
    }
}
