//! Abstract broker state store trait.
//!
//! Any state backend must implement [`BrokerStore`].  The trait uses
//! manually desugared async methods (pinned boxed futures) so it stays
//! object safe and can sit behind `Arc<dyn BrokerStore>`.

use std::future::Future;
use std::pin::Pin;

use crate::model::{LastOperation, ServiceBinding, ServiceInstance};

/// Async instance/binding store contract.
///
/// Implementations own their own locking; every method is safe to call
/// from concurrent requests.
pub trait BrokerStore: Send + Sync + 'static {
    // ── Instances ───────────────────────────────────────────────────

    /// Get an instance by ID.
    fn get_instance(
        &self,
        instance_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ServiceInstance>>> + Send + '_>>;

    /// Insert or replace an instance record.
    fn put_instance(
        &self,
        instance: ServiceInstance,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Replace the `last_operation` of an existing instance.
    /// Returns `false` (and stores nothing) if the instance is gone.
    fn update_last_operation(
        &self,
        instance_id: &str,
        last_operation: LastOperation,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// Delete an instance and every binding that references it.
    /// Returns the IDs of the removed bindings.
    fn delete_instance(
        &self,
        instance_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<String>>> + Send + '_>>;

    /// List all instances, ordered by ID.
    fn list_instances(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ServiceInstance>>> + Send + '_>>;

    // ── Bindings ────────────────────────────────────────────────────

    /// Get a binding by ID.
    fn get_binding(
        &self,
        binding_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ServiceBinding>>> + Send + '_>>;

    /// Insert or replace a binding. Fails if the referenced instance does
    /// not exist.
    fn put_binding(
        &self,
        binding: ServiceBinding,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Delete a binding. Returns whether it existed.
    fn delete_binding(
        &self,
        binding_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// List all bindings, ordered by ID.
    fn list_bindings(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ServiceBinding>>> + Send + '_>>;

    /// List the bindings of one instance, ordered by ID.
    fn bindings_for_instance(
        &self,
        instance_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ServiceBinding>>> + Send + '_>>;
}
