use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::responses::JsonResponse;
use crate::services::stripe::StripeServiceError;

/// Machine-readable error category surfaced to API callers as `code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authorization,
    NotFound,
    BusinessRule,
    Integration,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Authorization => "authorization",
            ErrorKind::NotFound => "not_found",
            ErrorKind::BusinessRule => "business_rule",
            ErrorKind::Integration => "integration",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::BusinessRule => StatusCode::CONFLICT,
            ErrorKind::Integration => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BusinessRule(String),
    #[error("billing provider error: {0}")]
    Stripe(#[from] StripeServiceError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl BillingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::Validation(_) => ErrorKind::Validation,
            BillingError::Forbidden(_) => ErrorKind::Authorization,
            BillingError::NotFound(_) => ErrorKind::NotFound,
            BillingError::BusinessRule(_) => ErrorKind::BusinessRule,
            BillingError::Stripe(_) | BillingError::Database(_) => ErrorKind::Integration,
            BillingError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to show to the caller. Integration and internal failures are
    /// reported generically; the detail goes to the logs.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Integration => "Billing service temporarily unavailable".to_string(),
            ErrorKind::Internal => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        if matches!(kind, ErrorKind::Integration | ErrorKind::Internal) {
            error!(err = %self, kind = kind.as_str(), "billing request failed");
        }
        JsonResponse::error_with_code(kind.status_code(), &self.public_message(), kind.as_str())
            .into_response()
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
