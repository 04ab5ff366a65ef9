//! Broker data model: service instances, bindings, and the request and
//! response bodies of the broker API.

use serde::{Deserialize, Serialize};

use crate::errors::BrokerError;

// ── Last operation ─────────────────────────────────────────────────

/// Local tri-state of an instance's asynchronous provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
}

impl OperationState {
    /// Wire representation used by the broker API.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::InProgress => "in progress",
            OperationState::Succeeded => "succeeded",
            OperationState::Failed => "failed",
        }
    }

    /// `succeeded` and `failed` are terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationState::InProgress)
    }
}

/// Provisioning state reported by Azure for a storage account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningState {
    Creating,
    ResolvingDns,
    Succeeded,
    Other(String),
}

impl ProvisioningState {
    pub fn as_str(&self) -> &str {
        match self {
            ProvisioningState::Creating => "Creating",
            ProvisioningState::ResolvingDns => "ResolvingDNS",
            ProvisioningState::Succeeded => "Succeeded",
            ProvisioningState::Other(s) => s,
        }
    }
}

impl From<&str> for ProvisioningState {
    fn from(s: &str) -> Self {
        match s {
            "Creating" => ProvisioningState::Creating,
            "ResolvingDNS" => ProvisioningState::ResolvingDns,
            "Succeeded" => ProvisioningState::Succeeded,
            other => ProvisioningState::Other(other.to_string()),
        }
    }
}

/// The `last_operation` block of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastOperation {
    pub state: OperationState,
    pub description: String,
    pub async_poll_interval_seconds: u64,
}

impl LastOperation {
    /// Record written when provisioning has been started.
    pub fn provisioning(async_poll_interval_seconds: u64) -> Self {
        Self {
            state: OperationState::InProgress,
            description: "creating service instance...".to_string(),
            async_poll_interval_seconds,
        }
    }

    /// Map a remote provisioning state onto the local tri-state.
    ///
    /// `Creating` and `ResolvingDNS` are still in progress, `Succeeded`
    /// succeeded, and anything else is a failure.
    pub fn from_remote(remote: &ProvisioningState, async_poll_interval_seconds: u64) -> Self {
        let (state, description) = match remote {
            ProvisioningState::Creating | ProvisioningState::ResolvingDns => (
                OperationState::InProgress,
                format!("Creating the service instance, state: {}", remote.as_str()),
            ),
            ProvisioningState::Succeeded => (
                OperationState::Succeeded,
                format!(
                    "Successfully created the service instance, state: {}",
                    remote.as_str()
                ),
            ),
            ProvisioningState::Other(_) => (
                OperationState::Failed,
                format!(
                    "Failed to create the service instance, state: {}",
                    remote.as_str()
                ),
            ),
        };
        Self {
            state,
            description,
            async_poll_interval_seconds,
        }
    }
}

// ── Provisioning parameters ────────────────────────────────────────

/// Public access level of the container created on bind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerAccessType {
    #[default]
    Private,
    Blob,
    Container,
}

impl ContainerAccessType {
    /// Value for the `x-ms-blob-public-access` header, if any.
    pub fn public_access_header(&self) -> Option<&'static str> {
        match self {
            ContainerAccessType::Private => None,
            ContainerAccessType::Blob => Some("blob"),
            ContainerAccessType::Container => Some("container"),
        }
    }
}

/// Replication SKU of the storage account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    #[default]
    #[serde(rename = "Standard_LRS")]
    StandardLrs,
    #[serde(rename = "Standard_ZRS")]
    StandardZrs,
    #[serde(rename = "Standard_GRS")]
    StandardGrs,
    #[serde(rename = "Standard_RAGRS")]
    StandardRagrs,
    #[serde(rename = "Premium_LRS")]
    PremiumLrs,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::StandardLrs => "Standard_LRS",
            AccountType::StandardZrs => "Standard_ZRS",
            AccountType::StandardGrs => "Standard_GRS",
            AccountType::StandardRagrs => "Standard_RAGRS",
            AccountType::PremiumLrs => "Premium_LRS",
        }
    }
}

/// Caller-supplied overrides accepted in the `parameters` object of a
/// provision request. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, garde::Validate)]
#[serde(deny_unknown_fields)]
pub struct ProvisionParameters {
    /// Resource group to create the account in.
    #[garde(length(min = 1, max = 90), pattern(r"^[-A-Za-z0-9_.()]*[-A-Za-z0-9_()]$"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group_name: Option<String>,

    /// Explicit storage account name: 3-24 lowercase letters and digits.
    #[garde(length(min = 3, max = 24), pattern(r"^[a-z0-9]+$"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_account_name: Option<String>,

    /// Azure region, e.g. `westus`.
    #[garde(length(min = 1, max = 64), pattern(r"^[a-z0-9]+$"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_type: Option<AccountType>,

    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_access_type: Option<ContainerAccessType>,
}

/// Body of `PUT /v2/service_instances/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, garde::Validate)]
pub struct ProvisionRequest {
    #[garde(skip)]
    #[serde(default)]
    pub service_id: String,

    #[garde(skip)]
    #[serde(default)]
    pub plan_id: String,

    #[garde(skip)]
    #[serde(default)]
    pub organization_guid: String,

    #[garde(skip)]
    #[serde(default)]
    pub space_guid: String,

    #[garde(dive)]
    #[serde(default)]
    pub parameters: Option<ProvisionParameters>,
}

impl ProvisionRequest {
    /// Parse and validate a request body. An empty body is an empty request.
    pub fn from_body(body: &[u8]) -> Result<Self, BrokerError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let request: Self = serde_json::from_slice(body)
            .map_err(|e| BrokerError::InvalidParameters(e.to_string()))?;
        garde::Validate::validate(&request)
            .map_err(|e| BrokerError::InvalidParameters(e.to_string()))?;
        Ok(request)
    }
}

/// Body of `PUT /v2/service_instances/{id}/service_bindings/{bid}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BindRequest {
    #[serde(default)]
    pub service_id: Option<String>,

    #[serde(default)]
    pub plan_id: Option<String>,

    #[serde(default)]
    pub app_guid: Option<String>,
}

impl BindRequest {
    /// Parse a request body. An empty body is an empty request.
    pub fn from_body(body: &[u8]) -> Result<Self, BrokerError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| BrokerError::InvalidParameters(e.to_string()))
    }
}

// ── Records ────────────────────────────────────────────────────────

/// One provisioned storage account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub dashboard_url: String,
    pub organization_guid: String,
    pub plan_id: String,
    pub service_id: String,
    pub space_guid: String,
    #[serde(default)]
    pub parameters: ProvisionParameters,
    pub resource_group_name: String,
    pub storage_account_name: String,
    #[serde(default)]
    pub container_access_type: ContainerAccessType,
    pub last_operation: LastOperation,
}

impl ServiceInstance {
    /// Whether a repeated provision request asks for exactly this instance.
    pub fn matches_request(&self, request: &ProvisionRequest) -> bool {
        self.service_id == request.service_id
            && self.plan_id == request.plan_id
            && self.organization_guid == request.organization_guid
            && self.space_guid == request.space_guid
            && self.parameters == request.parameters.clone().unwrap_or_default()
    }
}

/// Credentials handed to an application on bind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub storage_account_name: String,
    pub container_name: String,
    pub primary_access_key: String,
    pub secondary_access_key: String,
}

/// One app-to-instance credential grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBinding {
    pub id: String,
    pub service_id: String,
    pub app_id: String,
    pub service_plan_id: String,
    pub service_instance_id: String,
    pub credentials: Credentials,
}

// ── Responses ──────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ProvisionResponse {
    pub dashboard_url: String,
    pub operation: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LastOperationResponse {
    pub state: OperationState,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BindResponse {
    pub credentials: Credentials,
}
