//! Service catalog handler.

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, warn};

use crate::errors::BrokerError;
use crate::metrics::record_operation;
use crate::AppState;

/// Header carrying the platform's broker API version.
pub const API_VERSION_HEADER: &str = "x-broker-api-version";

/// Oldest broker API version this broker speaks.
pub const MIN_API_VERSION: (u32, u32) = (2, 5);

/// Parse `"major.minor"`.
fn parse_api_version(version: &str) -> Option<(u32, u32)> {
    let (major, minor) = version.trim().split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

/// Reject API versions older than [`MIN_API_VERSION`].
///
/// A missing header is accepted; a malformed one is not.
pub fn validate_api_version(version: Option<&str>) -> Result<(), BrokerError> {
    let Some(version) = version else {
        return Ok(());
    };
    match parse_api_version(version) {
        Some(parsed) if parsed >= MIN_API_VERSION => Ok(()),
        _ => Err(BrokerError::ApiVersionNotSupported {
            version: version.to_string(),
            minimum: format!("{}.{}", MIN_API_VERSION.0, MIN_API_VERSION.1),
        }),
    }
}

/// `GET /v2/catalog` -- Return the catalog document verbatim.
///
/// The file is re-read on every request so edits take effect without a
/// restart.
#[utoipa::path(
    get,
    path = "/v2/catalog",
    tag = "Catalog",
    operation_id = "GetCatalog",
    params(("X-Broker-Api-Version" = Option<String>, Header, description = "Broker API version, at least 2.5")),
    responses(
        (status = 200, description = "Service catalog"),
        (status = 412, description = "Broker API version not supported"),
        (status = 500, description = "Catalog unreadable")
    )
)]
pub async fn get_catalog(state: Arc<AppState>, headers: &HeaderMap) -> Result<Response, BrokerError> {
    let version = headers
        .get(API_VERSION_HEADER)
        .and_then(|v| v.to_str().ok());
    if let Err(e) = validate_api_version(version) {
        warn!("Rejected catalog request: {}", e);
        record_operation("catalog", "rejected");
        return Err(e);
    }

    let path = &state.config.catalog.path;
    let contents = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read catalog {path}"))?;
    let catalog: serde_json::Value = serde_json::from_slice(&contents)
        .with_context(|| format!("Catalog {path} is not valid JSON"))?;

    debug!("Served catalog from {}", path);
    record_operation("catalog", "ok");
    Ok((StatusCode::OK, Json(catalog)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_version_accepted() {
        assert!(validate_api_version(None).is_ok());
    }

    #[test]
    fn test_supported_versions() {
        assert!(validate_api_version(Some("2.5")).is_ok());
        assert!(validate_api_version(Some("2.13")).is_ok());
        assert!(validate_api_version(Some("3.0")).is_ok());
    }

    #[test]
    fn test_old_version_rejected() {
        let err = validate_api_version(Some("2.4")).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::PRECONDITION_FAILED);
        assert!(validate_api_version(Some("1.9")).is_err());
    }

    #[test]
    fn test_malformed_version_rejected() {
        assert!(validate_api_version(Some("latest")).is_err());
        assert!(validate_api_version(Some("2")).is_err());
        assert!(validate_api_version(Some("2.x")).is_err());
    }
}
