//! Broker API error types.
//!
//! Every variant maps to a status code of the broker API.  The enum
//! implements [`axum::response::IntoResponse`] so handlers can simply
//! return `Err(BrokerError::InstanceGone { .. })`.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::cloud::CloudError;

/// Broker error conditions expressed as a Rust enum.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Provisioning was requested without `accepts_incomplete=true`.
    #[error("This service plan requires client support for asynchronous service operations.")]
    AsyncRequired,

    /// The instance does not exist (deprovision, poll, unbind).
    #[error("Service instance {instance_id} does not exist")]
    InstanceGone { instance_id: String },

    /// The binding does not exist (unbind).
    #[error("Service binding {binding_id} does not exist")]
    BindingGone { binding_id: String },

    /// The instance does not exist (bind).
    #[error("Service instance {instance_id} not found")]
    InstanceNotFound { instance_id: String },

    /// An instance with the same ID but different attributes exists.
    #[error("Service instance {instance_id} already exists with different attributes")]
    Conflict { instance_id: String },

    /// Missing or invalid Basic-Auth credentials.
    #[error("{message}")]
    Unauthorized { message: String },

    /// The platform speaks an older broker API version.
    #[error("Broker API version {version} is not supported, {minimum} or later is required")]
    ApiVersionNotSupported { version: String, minimum: String },

    /// The request body failed parsing or validation.
    #[error("Invalid request: {0}")]
    InvalidParameters(String),

    /// Catch-all for adapter, store, and catalog failures.
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl BrokerError {
    /// Broker API error code, where the API defines one.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            BrokerError::AsyncRequired => Some("AsyncRequired"),
            _ => None,
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            BrokerError::AsyncRequired => StatusCode::UNPROCESSABLE_ENTITY,
            BrokerError::InstanceGone { .. } => StatusCode::GONE,
            BrokerError::BindingGone { .. } => StatusCode::GONE,
            BrokerError::InstanceNotFound { .. } => StatusCode::NOT_FOUND,
            BrokerError::Conflict { .. } => StatusCode::CONFLICT,
            BrokerError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            BrokerError::ApiVersionNotSupported { .. } => StatusCode::PRECONDITION_FAILED,
            BrokerError::InvalidParameters(_) => StatusCode::BAD_REQUEST,
            BrokerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CloudError> for BrokerError {
    fn from(err: CloudError) -> Self {
        BrokerError::Internal(err.into())
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Gone responses carry an empty object, as the platform expects.
        let body = match (&self, self.code()) {
            (BrokerError::InstanceGone { .. } | BrokerError::BindingGone { .. }, _) => json!({}),
            (_, Some(code)) => json!({ "error": code, "description": self.to_string() }),
            (_, None) => json!({ "description": self.to_string() }),
        };

        if matches!(self, BrokerError::Unauthorized { .. }) {
            return (
                status,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"service-broker\"")],
                Json(body),
            )
                .into_response();
        }

        (status, Json(body)).into_response()
    }
}
