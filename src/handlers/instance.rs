//! Service instance handlers: provision, poll, deprovision.

use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{info, warn};

use super::refresh_inventory;
use crate::cloud::{naming, CloudError};
use crate::errors::BrokerError;
use crate::metrics::record_operation;
use crate::model::{
    LastOperation, LastOperationResponse, OperationState, ProvisionRequest, ProvisionResponse,
    ServiceInstance,
};
use crate::AppState;

/// `operation` value returned from provisioning.
const PROVISION_OPERATION: &str = "provision";

/// `PUT /v2/service_instances/{instance_id}` -- Start provisioning.
///
/// Only asynchronous provisioning is supported, so the request must carry
/// `accepts_incomplete=true`.  The call returns once Azure has accepted
/// the storage account creation.
#[utoipa::path(
    put,
    path = "/v2/service_instances/{instance_id}",
    tag = "Instance",
    operation_id = "Provision",
    params(
        ("instance_id" = String, Path, description = "Service instance ID"),
        ("accepts_incomplete" = Option<bool>, Query, description = "Must be true")
    ),
    responses(
        (status = 202, description = "Provisioning started"),
        (status = 200, description = "Identical instance already exists"),
        (status = 400, description = "Invalid parameters"),
        (status = 409, description = "Instance exists with different attributes"),
        (status = 422, description = "Asynchronous provisioning required"),
        (status = 500, description = "Azure or store failure")
    )
)]
pub async fn provision(
    state: Arc<AppState>,
    instance_id: &str,
    accepts_incomplete: bool,
    body: &[u8],
) -> Result<Response, BrokerError> {
    if !accepts_incomplete {
        record_operation("provision", "async_required");
        return Err(BrokerError::AsyncRequired);
    }

    let request = ProvisionRequest::from_body(body).inspect_err(|e| {
        warn!("Invalid provision request for {}: {}", instance_id, e);
        record_operation("provision", "invalid");
    })?;

    if let Some(existing) = state.store.get_instance(instance_id).await? {
        if existing.matches_request(&request) {
            info!("Service instance {} already provisioned", instance_id);
            record_operation("provision", "exists");
            let body = ProvisionResponse {
                dashboard_url: existing.dashboard_url,
                operation: PROVISION_OPERATION.to_string(),
            };
            return Ok((StatusCode::OK, Json(body)).into_response());
        }
        record_operation("provision", "conflict");
        return Err(BrokerError::Conflict {
            instance_id: instance_id.to_string(),
        });
    }

    let parameters = request.parameters.unwrap_or_default();
    if parameters.storage_account_name.is_none() {
        let derived =
            naming::storage_account_name(&state.config.azure.storage_account_prefix, instance_id);
        if derived.len() < naming::STORAGE_ACCOUNT_NAME_MIN {
            record_operation("provision", "invalid");
            return Err(BrokerError::InvalidParameters(format!(
                "storage account name {derived:?} derived from instance {instance_id} is too short; \
                 set parameters.storage_account_name"
            )));
        }
    }
    let (resource_group_name, storage_account_name) = state
        .cloud
        .create_instance(instance_id, &parameters)
        .await
        .inspect_err(|_| record_operation("provision", "error"))?;

    let azure = &state.config.azure;
    let instance = ServiceInstance {
        id: instance_id.to_string(),
        dashboard_url: azure.dashboard_url.clone(),
        organization_guid: request.organization_guid,
        plan_id: request.plan_id,
        service_id: request.service_id,
        space_guid: request.space_guid,
        container_access_type: parameters.container_access_type.unwrap_or_default(),
        parameters,
        resource_group_name,
        storage_account_name,
        last_operation: LastOperation::provisioning(azure.async_poll_interval_seconds),
    };
    state.store.put_instance(instance.clone()).await?;
    refresh_inventory(&state).await;

    info!(
        "Provisioning service instance {} as {}.{}",
        instance.id, instance.resource_group_name, instance.storage_account_name
    );
    record_operation("provision", "accepted");

    let body = ProvisionResponse {
        dashboard_url: instance.dashboard_url,
        operation: PROVISION_OPERATION.to_string(),
    };
    Ok((StatusCode::ACCEPTED, Json(body)).into_response())
}

/// `GET /v2/service_instances/{instance_id}/last_operation` -- Poll
/// provisioning.
///
/// While the record is in progress Azure is asked for the storage
/// account's provisioning state and the record is updated.  Terminal
/// records are answered from the store.
#[utoipa::path(
    get,
    path = "/v2/service_instances/{instance_id}/last_operation",
    tag = "Instance",
    operation_id = "LastOperation",
    params(("instance_id" = String, Path, description = "Service instance ID")),
    responses(
        (status = 200, description = "Operation state"),
        (status = 410, description = "Instance does not exist"),
        (status = 500, description = "Azure or store failure")
    )
)]
pub async fn last_operation(
    state: Arc<AppState>,
    instance_id: &str,
) -> Result<Response, BrokerError> {
    let Some(instance) = state.store.get_instance(instance_id).await? else {
        record_operation("last_operation", "gone");
        return Err(BrokerError::InstanceGone {
            instance_id: instance_id.to_string(),
        });
    };

    let mut current = instance.last_operation;
    if !current.state.is_terminal() {
        let remote = match state
            .cloud
            .get_instance_state(&instance.resource_group_name, &instance.storage_account_name)
            .await
        {
            Ok(remote) => remote,
            Err(CloudError::NotFound { .. }) => {
                warn!(
                    "Storage account {}.{} of instance {} no longer exists",
                    instance.resource_group_name, instance.storage_account_name, instance_id
                );
                record_operation("last_operation", "gone");
                return Err(BrokerError::InstanceGone {
                    instance_id: instance_id.to_string(),
                });
            }
            Err(e) => {
                record_operation("last_operation", "error");
                return Err(e.into());
            }
        };

        let updated = LastOperation::from_remote(&remote, current.async_poll_interval_seconds);
        if updated != current {
            if updated.state != current.state {
                info!(
                    "Service instance {}: {} -> {} ({})",
                    instance_id,
                    current.state.as_str(),
                    updated.state.as_str(),
                    remote.as_str()
                );
            }
            if !state
                .store
                .update_last_operation(instance_id, updated.clone())
                .await?
            {
                // Deprovisioned while Azure was being polled.
                record_operation("last_operation", "gone");
                return Err(BrokerError::InstanceGone {
                    instance_id: instance_id.to_string(),
                });
            }
            current = updated;
        }
    }

    record_operation("last_operation", "ok");
    let retry_after = current.async_poll_interval_seconds;
    let in_progress = current.state == OperationState::InProgress;
    let body = LastOperationResponse {
        state: current.state,
        description: current.description,
    };
    let mut response = (StatusCode::OK, Json(body)).into_response();
    if in_progress {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    }
    Ok(response)
}

/// `DELETE /v2/service_instances/{instance_id}` -- Delete the storage
/// account and forget the instance and its bindings.
#[utoipa::path(
    delete,
    path = "/v2/service_instances/{instance_id}",
    tag = "Instance",
    operation_id = "Deprovision",
    params(("instance_id" = String, Path, description = "Service instance ID")),
    responses(
        (status = 200, description = "Instance deleted"),
        (status = 410, description = "Instance does not exist"),
        (status = 500, description = "Azure or store failure")
    )
)]
pub async fn deprovision(state: Arc<AppState>, instance_id: &str) -> Result<Response, BrokerError> {
    let Some(instance) = state.store.get_instance(instance_id).await? else {
        record_operation("deprovision", "gone");
        return Err(BrokerError::InstanceGone {
            instance_id: instance_id.to_string(),
        });
    };

    match state
        .cloud
        .delete_instance(&instance.resource_group_name, &instance.storage_account_name)
        .await
    {
        Ok(()) => {}
        Err(CloudError::NotFound { .. }) => {
            warn!(
                "Storage account {}.{} already gone; removing instance {}",
                instance.resource_group_name, instance.storage_account_name, instance_id
            );
        }
        Err(e) => {
            record_operation("deprovision", "error");
            return Err(e.into());
        }
    }

    let removed = state.store.delete_instance(instance_id).await?;
    refresh_inventory(&state).await;

    info!(
        "Deprovisioned service instance {} ({} bindings removed)",
        instance_id,
        removed.len()
    );
    record_operation("deprovision", "ok");
    Ok((StatusCode::OK, Json(json!({}))).into_response())
}
