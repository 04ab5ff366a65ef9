//! Scriptable in-process cloud client for handler tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use super::client::{AccessKeys, CloudClient, CloudError};
use super::naming;
use crate::config::AzureConfig;
use crate::model::{ContainerAccessType, ProvisionParameters, ProvisioningState};

#[derive(Debug)]
struct FakeState {
    calls: Vec<String>,
    remote_state: ProvisioningState,
    missing: bool,
    fail_create: bool,
    key_generation: u32,
}

/// Records every call and answers from settable state.
///
/// Keys are `primary-{n}` / `secondary-{n}` where `n` counts
/// regenerations, so tests can tell rotated keys apart.
pub struct FakeCloudClient {
    config: AzureConfig,
    state: Mutex<FakeState>,
}

impl FakeCloudClient {
    pub fn new() -> Self {
        Self {
            config: AzureConfig::default(),
            state: Mutex::new(FakeState {
                calls: Vec::new(),
                remote_state: ProvisioningState::Creating,
                missing: false,
                fail_create: false,
                key_generation: 0,
            }),
        }
    }

    pub fn set_remote_state(&self, state: &str) {
        self.state.lock().unwrap().remote_state = ProvisioningState::from(state);
    }

    /// Make every lookup of an existing account answer "not found".
    pub fn set_missing(&self, missing: bool) {
        self.state.lock().unwrap().missing = missing;
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.state.lock().unwrap().fail_create = fail;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of recorded calls whose name starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn key_generation(&self) -> u32 {
        self.state.lock().unwrap().key_generation
    }

    fn record(&self, call: String) -> std::sync::MutexGuard<'_, FakeState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state
    }

    fn not_found(context: &str) -> CloudError {
        CloudError::NotFound {
            context: context.to_string(),
        }
    }
}

impl Default for FakeCloudClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CloudClient for FakeCloudClient {
    fn create_instance(
        &self,
        instance_id: &str,
        parameters: &ProvisionParameters,
    ) -> Pin<Box<dyn Future<Output = Result<(String, String), CloudError>> + Send + '_>> {
        let names = naming::resolve(instance_id, parameters, &self.config);
        let state = self.record(format!("create_instance {instance_id}"));
        let result = if state.fail_create {
            Err(CloudError::Api {
                context: "create storage account".to_string(),
                status: 500,
                body: "injected".to_string(),
            })
        } else {
            Ok((names.resource_group_name, names.storage_account_name))
        };
        drop(state);
        Box::pin(async move { result })
    }

    fn get_instance_state(
        &self,
        resource_group_name: &str,
        storage_account_name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ProvisioningState, CloudError>> + Send + '_>> {
        let state = self.record(format!(
            "get_instance_state {resource_group_name} {storage_account_name}"
        ));
        let result = if state.missing {
            Err(Self::not_found("get storage account"))
        } else {
            Ok(state.remote_state.clone())
        };
        drop(state);
        Box::pin(async move { result })
    }

    fn get_access_keys(
        &self,
        instance_id: &str,
        resource_group_name: &str,
        storage_account_name: &str,
        _access_type: ContainerAccessType,
    ) -> Pin<Box<dyn Future<Output = Result<AccessKeys, CloudError>> + Send + '_>> {
        let container_name = naming::container_name(&self.config.container_prefix, instance_id);
        let state = self.record(format!(
            "get_access_keys {resource_group_name} {storage_account_name}"
        ));
        let result = if state.missing {
            Err(Self::not_found("list access keys"))
        } else {
            Ok(AccessKeys {
                primary: format!("primary-{}", state.key_generation),
                secondary: format!("secondary-{}", state.key_generation),
                container_name,
            })
        };
        drop(state);
        Box::pin(async move { result })
    }

    fn delete_instance(
        &self,
        resource_group_name: &str,
        storage_account_name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CloudError>> + Send + '_>> {
        let state = self.record(format!(
            "delete_instance {resource_group_name} {storage_account_name}"
        ));
        let result = if state.missing {
            Err(Self::not_found("delete storage account"))
        } else {
            Ok(())
        };
        drop(state);
        Box::pin(async move { result })
    }

    fn regenerate_access_keys(
        &self,
        resource_group_name: &str,
        storage_account_name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CloudError>> + Send + '_>> {
        let mut state = self.record(format!(
            "regenerate_access_keys {resource_group_name} {storage_account_name}"
        ));
        let result = if state.missing {
            Err(Self::not_found("regenerate access key"))
        } else {
            state.key_generation += 1;
            Ok(())
        };
        drop(state);
        Box::pin(async move { result })
    }
}
