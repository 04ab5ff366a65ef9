//! Abstract cloud client trait.
//!
//! Every call is a single blocking round trip from the caller's point of
//! view: no retries, no backoff, no idempotency keys.  A failure part way
//! through [`CloudClient::create_instance`] can leave an orphaned
//! resource group behind.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::model::{ContainerAccessType, ProvisionParameters, ProvisioningState};

/// Failures surfaced by a [`CloudClient`].
#[derive(Debug, Error)]
pub enum CloudError {
    /// The addressed resource does not exist remotely.
    #[error("Azure {context}: resource not found")]
    NotFound { context: String },

    /// The storage account name is taken.
    #[error("Storage account name {name} is unavailable")]
    NameUnavailable { name: String },

    /// Token acquisition failed.
    #[error("Azure authentication failed: {0}")]
    Auth(String),

    /// The remote API answered with an unexpected status.
    #[error("Azure {context}: HTTP {status} - {body}")]
    Api {
        context: String,
        status: u16,
        body: String,
    },

    /// The request never produced a response.
    #[error("Azure {context} request failed: {message}")]
    Transport { context: String, message: String },

    /// The response could not be interpreted.
    #[error("Azure {context}: unexpected response: {message}")]
    InvalidResponse { context: String, message: String },
}

/// Result of fetching keys and ensuring the instance's container exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessKeys {
    pub primary: String,
    pub secondary: String,
    pub container_name: String,
}

/// Async cloud provider contract.
pub trait CloudClient: Send + Sync + 'static {
    /// Create the resource group and start creating the storage account.
    /// Does not wait for the account to finish provisioning.
    /// Returns `(resource_group_name, storage_account_name)`.
    fn create_instance(
        &self,
        instance_id: &str,
        parameters: &ProvisionParameters,
    ) -> Pin<Box<dyn Future<Output = Result<(String, String), CloudError>> + Send + '_>>;

    /// Fetch the provisioning state of a storage account.
    fn get_instance_state(
        &self,
        resource_group_name: &str,
        storage_account_name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ProvisioningState, CloudError>> + Send + '_>>;

    /// List the account keys and create the instance's container if absent.
    fn get_access_keys(
        &self,
        instance_id: &str,
        resource_group_name: &str,
        storage_account_name: &str,
        access_type: ContainerAccessType,
    ) -> Pin<Box<dyn Future<Output = Result<AccessKeys, CloudError>> + Send + '_>>;

    /// Delete a storage account.
    fn delete_instance(
        &self,
        resource_group_name: &str,
        storage_account_name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CloudError>> + Send + '_>>;

    /// Regenerate both account keys, invalidating every issued credential.
    fn regenerate_access_keys(
        &self,
        resource_group_name: &str,
        storage_account_name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CloudError>> + Send + '_>>;
}
