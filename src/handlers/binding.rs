//! Service binding handlers: bind and unbind.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{info, warn};

use super::refresh_inventory;
use crate::errors::BrokerError;
use crate::metrics::record_operation;
use crate::model::{BindRequest, BindResponse, Credentials, ServiceBinding};
use crate::AppState;

/// `PUT /v2/service_instances/{instance_id}/service_bindings/{binding_id}`
/// -- Issue credentials for the instance's storage account.
///
/// Creates the instance's container on first use.
#[utoipa::path(
    put,
    path = "/v2/service_instances/{instance_id}/service_bindings/{binding_id}",
    tag = "Binding",
    operation_id = "Bind",
    params(
        ("instance_id" = String, Path, description = "Service instance ID"),
        ("binding_id" = String, Path, description = "Service binding ID")
    ),
    responses(
        (status = 201, description = "Binding created with credentials"),
        (status = 400, description = "Malformed body"),
        (status = 404, description = "Instance does not exist"),
        (status = 500, description = "Azure or store failure")
    )
)]
pub async fn bind(
    state: Arc<AppState>,
    instance_id: &str,
    binding_id: &str,
    body: &[u8],
) -> Result<Response, BrokerError> {
    let request =
        BindRequest::from_body(body).inspect_err(|_| record_operation("bind", "invalid"))?;

    let Some(instance) = state.store.get_instance(instance_id).await? else {
        record_operation("bind", "not_found");
        return Err(BrokerError::InstanceNotFound {
            instance_id: instance_id.to_string(),
        });
    };

    let keys = state
        .cloud
        .get_access_keys(
            instance_id,
            &instance.resource_group_name,
            &instance.storage_account_name,
            instance.container_access_type,
        )
        .await
        .inspect_err(|_| record_operation("bind", "error"))?;

    let binding = ServiceBinding {
        id: binding_id.to_string(),
        service_id: request.service_id.unwrap_or(instance.service_id),
        app_id: request.app_guid.unwrap_or_default(),
        service_plan_id: request.plan_id.unwrap_or(instance.plan_id),
        service_instance_id: instance_id.to_string(),
        credentials: Credentials {
            storage_account_name: instance.storage_account_name,
            container_name: keys.container_name,
            primary_access_key: keys.primary,
            secondary_access_key: keys.secondary,
        },
    };
    let credentials = binding.credentials.clone();
    state.store.put_binding(binding).await?;
    refresh_inventory(&state).await;

    info!("Bound {} to service instance {}", binding_id, instance_id);
    record_operation("bind", "ok");
    Ok((StatusCode::CREATED, Json(BindResponse { credentials })).into_response())
}

/// `DELETE /v2/service_instances/{instance_id}/service_bindings/{binding_id}`
/// -- Revoke a binding.
///
/// Azure accounts have a single pair of keys, so revocation regenerates
/// both of them.  Every other binding of the instance loses access too.
#[utoipa::path(
    delete,
    path = "/v2/service_instances/{instance_id}/service_bindings/{binding_id}",
    tag = "Binding",
    operation_id = "Unbind",
    params(
        ("instance_id" = String, Path, description = "Service instance ID"),
        ("binding_id" = String, Path, description = "Service binding ID")
    ),
    responses(
        (status = 200, description = "Binding removed"),
        (status = 410, description = "Instance or binding does not exist"),
        (status = 500, description = "Azure or store failure")
    )
)]
pub async fn unbind(
    state: Arc<AppState>,
    instance_id: &str,
    binding_id: &str,
) -> Result<Response, BrokerError> {
    let Some(instance) = state.store.get_instance(instance_id).await? else {
        record_operation("unbind", "gone");
        return Err(BrokerError::InstanceGone {
            instance_id: instance_id.to_string(),
        });
    };

    let bindings = state.store.bindings_for_instance(instance_id).await?;
    if !bindings.iter().any(|b| b.id == binding_id) {
        record_operation("unbind", "gone");
        return Err(BrokerError::BindingGone {
            binding_id: binding_id.to_string(),
        });
    }

    let siblings: Vec<&str> = bindings
        .iter()
        .map(|b| b.id.as_str())
        .filter(|id| *id != binding_id)
        .collect();
    if !siblings.is_empty() {
        warn!(
            "Regenerating keys of {} also revokes bindings {:?}",
            instance.storage_account_name, siblings
        );
    }

    state
        .cloud
        .regenerate_access_keys(&instance.resource_group_name, &instance.storage_account_name)
        .await
        .inspect_err(|_| record_operation("unbind", "error"))?;

    state.store.delete_binding(binding_id).await?;
    refresh_inventory(&state).await;

    info!("Unbound {} from service instance {}", binding_id, instance_id);
    record_operation("unbind", "ok");
    Ok((StatusCode::OK, Json(json!({}))).into_response())
}
