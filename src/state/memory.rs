//! In-memory broker store.
//!
//! Stores all state in memory with no persistence. Useful for testing
//! and ephemeral deployments. Uses `RwLock` for thread-safe access.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use super::store::BrokerStore;
use crate::model::{LastOperation, ServiceBinding, ServiceInstance};

/// The two broker tables plus the rules that keep them consistent.
///
/// Shared by the in-memory and JSON file stores.
#[derive(Debug, Default, Clone)]
pub(crate) struct Tables {
    pub(crate) instances: BTreeMap<String, ServiceInstance>,
    pub(crate) bindings: BTreeMap<String, ServiceBinding>,
}

impl Tables {
    pub(crate) fn insert_binding(&mut self, binding: ServiceBinding) -> anyhow::Result<()> {
        if !self.instances.contains_key(&binding.service_instance_id) {
            return Err(anyhow::anyhow!(
                "Cannot bind {}: service instance {} does not exist",
                binding.id,
                binding.service_instance_id
            ));
        }
        self.bindings.insert(binding.id.clone(), binding);
        Ok(())
    }

    pub(crate) fn set_last_operation(
        &mut self,
        instance_id: &str,
        last_operation: LastOperation,
    ) -> bool {
        match self.instances.get_mut(instance_id) {
            Some(instance) => {
                instance.last_operation = last_operation;
                true
            }
            None => false,
        }
    }

    /// Remove an instance and cascade to its bindings.
    pub(crate) fn remove_instance(&mut self, instance_id: &str) -> Vec<String> {
        self.instances.remove(instance_id);
        let dependent: Vec<String> = self
            .bindings
            .values()
            .filter(|b| b.service_instance_id == instance_id)
            .map(|b| b.id.clone())
            .collect();
        for id in &dependent {
            self.bindings.remove(id);
        }
        dependent
    }

    pub(crate) fn bindings_of(&self, instance_id: &str) -> Vec<ServiceBinding> {
        self.bindings
            .values()
            .filter(|b| b.service_instance_id == instance_id)
            .cloned()
            .collect()
    }
}

pub struct MemoryBrokerStore {
    inner: RwLock<Tables>,
}

impl MemoryBrokerStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Tables::default()),
        }
    }
}

impl Default for MemoryBrokerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerStore for MemoryBrokerStore {
    fn get_instance(
        &self,
        instance_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ServiceInstance>>> + Send + '_>> {
        let instance_id = instance_id.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.instances.get(&instance_id).cloned())
        })
    }

    fn put_instance(
        &self,
        instance: ServiceInstance,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            inner.instances.insert(instance.id.clone(), instance);
            Ok(())
        })
    }

    fn update_last_operation(
        &self,
        instance_id: &str,
        last_operation: LastOperation,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let instance_id = instance_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            Ok(inner.set_last_operation(&instance_id, last_operation))
        })
    }

    fn delete_instance(
        &self,
        instance_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<String>>> + Send + '_>> {
        let instance_id = instance_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            Ok(inner.remove_instance(&instance_id))
        })
    }

    fn list_instances(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ServiceInstance>>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.instances.values().cloned().collect())
        })
    }

    fn get_binding(
        &self,
        binding_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ServiceBinding>>> + Send + '_>> {
        let binding_id = binding_id.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.bindings.get(&binding_id).cloned())
        })
    }

    fn put_binding(
        &self,
        binding: ServiceBinding,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            inner.insert_binding(binding)
        })
    }

    fn delete_binding(
        &self,
        binding_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let binding_id = binding_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            Ok(inner.bindings.remove(&binding_id).is_some())
        })
    }

    fn list_bindings(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ServiceBinding>>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.bindings.values().cloned().collect())
        })
    }

    fn bindings_for_instance(
        &self,
        instance_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ServiceBinding>>> + Send + '_>> {
        let instance_id = instance_id.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.bindings_of(&instance_id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ContainerAccessType, Credentials, OperationState, ProvisionParameters, ProvisioningState,
    };

    fn make_instance(id: &str) -> ServiceInstance {
        ServiceInstance {
            id: id.to_string(),
            dashboard_url: "http://dashboard_url".to_string(),
            organization_guid: "org".to_string(),
            plan_id: "plan".to_string(),
            service_id: "svc".to_string(),
            space_guid: "space".to_string(),
            parameters: ProvisionParameters::default(),
            resource_group_name: format!("cloud-foundry-{id}"),
            storage_account_name: format!("cf{id}"),
            container_access_type: ContainerAccessType::Private,
            last_operation: LastOperation::provisioning(30),
        }
    }

    fn make_binding(id: &str, instance_id: &str) -> ServiceBinding {
        ServiceBinding {
            id: id.to_string(),
            service_id: "svc".to_string(),
            app_id: "app".to_string(),
            service_plan_id: "plan".to_string(),
            service_instance_id: instance_id.to_string(),
            credentials: Credentials {
                storage_account_name: format!("cf{instance_id}"),
                container_name: format!("cloud-foundry-{instance_id}"),
                primary_access_key: "k1".to_string(),
                secondary_access_key: "k2".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_put_and_get_instance() {
        let store = MemoryBrokerStore::new();
        store.put_instance(make_instance("abc")).await.unwrap();

        let fetched = store.get_instance("abc").await.unwrap().unwrap();
        assert_eq!(fetched.storage_account_name, "cfabc");
        assert!(store.get_instance("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_binding_requires_instance() {
        let store = MemoryBrokerStore::new();
        let result = store.put_binding(make_binding("b1", "nope")).await;
        assert!(result.is_err());
        assert!(store.list_bindings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_instance_cascades() {
        let store = MemoryBrokerStore::new();
        store.put_instance(make_instance("x")).await.unwrap();
        store.put_instance(make_instance("y")).await.unwrap();
        store.put_binding(make_binding("b1", "x")).await.unwrap();
        store.put_binding(make_binding("b2", "x")).await.unwrap();
        store.put_binding(make_binding("b3", "y")).await.unwrap();

        let removed = store.delete_instance("x").await.unwrap();
        assert_eq!(removed, vec!["b1".to_string(), "b2".to_string()]);

        let remaining = store.list_bindings().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "b3");
        assert!(store.get_instance("x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_last_operation() {
        let store = MemoryBrokerStore::new();
        store.put_instance(make_instance("abc")).await.unwrap();

        let done = LastOperation::from_remote(&ProvisioningState::Succeeded, 30);
        assert!(store.update_last_operation("abc", done).await.unwrap());
        let fetched = store.get_instance("abc").await.unwrap().unwrap();
        assert_eq!(fetched.last_operation.state, OperationState::Succeeded);

        // A deleted instance is not brought back.
        store.delete_instance("abc").await.unwrap();
        let again = LastOperation::from_remote(&ProvisioningState::Succeeded, 30);
        assert!(!store.update_last_operation("abc", again).await.unwrap());
        assert!(store.get_instance("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_binding() {
        let store = MemoryBrokerStore::new();
        store.put_instance(make_instance("x")).await.unwrap();
        store.put_binding(make_binding("b1", "x")).await.unwrap();

        assert!(store.delete_binding("b1").await.unwrap());
        assert!(!store.delete_binding("b1").await.unwrap());
        assert!(store.bindings_for_instance("x").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_instances_sorted() {
        let store = MemoryBrokerStore::new();
        store.put_instance(make_instance("beta")).await.unwrap();
        store.put_instance(make_instance("alpha")).await.unwrap();

        let ids: Vec<_> = store
            .list_instances()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["alpha", "beta"]);
    }
}
