//! JSON file broker store.
//!
//! Keeps both tables in memory and mirrors them to
//! `service_instances.json` and `service_bindings.json` after every
//! mutation.  Each file is a JSON object keyed by ID and is fully
//! rewritten through a temp file and rename, so a crash mid-write leaves
//! the previous version intact.  Both files are reloaded on startup.
//!
//! Every mutation is applied to a copy of the affected table, written out,
//! and only then committed to memory, so a failed write leaves the store
//! as it was.  There is no transaction spanning the two files: a cascade
//! delete writes the bindings file first, and if the instances file then
//! fails the instance survives without its bindings, on disk and in memory.

use std::collections::BTreeMap;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::memory::Tables;
use super::store::BrokerStore;
use crate::config::LocalStoreConfig;
use crate::model::{LastOperation, ServiceBinding, ServiceInstance};

pub const INSTANCES_FILE: &str = "service_instances.json";
pub const BINDINGS_FILE: &str = "service_bindings.json";

pub struct LocalBrokerStore {
    data_dir: PathBuf,
    inner: Mutex<Tables>,
}

impl LocalBrokerStore {
    pub fn new(config: &LocalStoreConfig) -> anyhow::Result<Self> {
        let data_dir = PathBuf::from(&config.data_dir);
        std::fs::create_dir_all(&data_dir)?;

        let instances: BTreeMap<String, ServiceInstance> =
            Self::load_table(&data_dir.join(INSTANCES_FILE))?;
        let bindings: BTreeMap<String, ServiceBinding> =
            Self::load_table(&data_dir.join(BINDINGS_FILE))?;

        info!(
            "Loaded {} service instances and {} service bindings from {}",
            instances.len(),
            bindings.len(),
            data_dir.display()
        );

        Ok(Self {
            data_dir,
            inner: Mutex::new(Tables {
                instances,
                bindings,
            }),
        })
    }

    fn load_table<T: DeserializeOwned>(path: &Path) -> anyhow::Result<BTreeMap<String, T>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))
    }

    /// Atomically replace `file_name` with the JSON encoding of `table`.
    fn write_table<T: Serialize>(
        &self,
        file_name: &str,
        table: &BTreeMap<String, T>,
    ) -> anyhow::Result<()> {
        let path = self.data_dir.join(file_name);
        let mut tmp = NamedTempFile::new_in(&self.data_dir)?;
        serde_json::to_writer_pretty(&mut tmp, table)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path)
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", path.display(), e))?;
        debug!("Wrote {} records to {}", table.len(), path.display());
        Ok(())
    }

}

impl BrokerStore for LocalBrokerStore {
    fn get_instance(
        &self,
        instance_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ServiceInstance>>> + Send + '_>> {
        let instance_id = instance_id.to_string();
        Box::pin(async move {
            let inner = self.inner.lock().expect("mutex poisoned");
            Ok(inner.instances.get(&instance_id).cloned())
        })
    }

    fn put_instance(
        &self,
        instance: ServiceInstance,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().expect("mutex poisoned");
            let mut instances = inner.instances.clone();
            instances.insert(instance.id.clone(), instance);
            self.write_table(INSTANCES_FILE, &instances)?;
            inner.instances = instances;
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
            let mut inner = self.inner.lock().expect("mutex poisoned");
            let mut next = inner.clone();
            if !next.set_last_operation(&instance_id, last_operation) {
                return Ok(false);
            }
            self.write_table(INSTANCES_FILE, &next.instances)?;
            inner.instances = next.instances;
            Ok(true)
        })
    }

    fn delete_instance(
        &self,
        instance_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<String>>> + Send + '_>> {
        let instance_id = instance_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock().expect("mutex poisoned");
            let mut next = inner.clone();
            let removed = next.remove_instance(&instance_id);
            if !removed.is_empty() {
                self.write_table(BINDINGS_FILE, &next.bindings)?;
                inner.bindings = next.bindings;
            }
            self.write_table(INSTANCES_FILE, &next.instances)?;
            inner.instances = next.instances;
            Ok(removed)
        })
    }

    fn list_instances(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ServiceInstance>>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.lock().expect("mutex poisoned");
            Ok(inner.instances.values().cloned().collect())
        })
    }

    fn get_binding(
        &self,
        binding_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ServiceBinding>>> + Send + '_>> {
        let binding_id = binding_id.to_string();
        Box::pin(async move {
            let inner = self.inner.lock().expect("mutex poisoned");
            Ok(inner.bindings.get(&binding_id).cloned())
        })
    }

    fn put_binding(
        &self,
        binding: ServiceBinding,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().expect("mutex poisoned");
            let mut next = inner.clone();
            next.insert_binding(binding)?;
            self.write_table(BINDINGS_FILE, &next.bindings)?;
            inner.bindings = next.bindings;
            Ok(())
        })
    }

    fn delete_binding(
        &self,
        binding_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let binding_id = binding_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock().expect("mutex poisoned");
            if !inner.bindings.contains_key(&binding_id) {
                return Ok(false);
            }
            let mut bindings = inner.bindings.clone();
            bindings.remove(&binding_id);
            self.write_table(BINDINGS_FILE, &bindings)?;
            inner.bindings = bindings;
            Ok(true)
        })
    }

    fn list_bindings(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ServiceBinding>>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.lock().expect("mutex poisoned");
            Ok(inner.bindings.values().cloned().collect())
        })
    }

    fn bindings_for_instance(
        &self,
        instance_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ServiceBinding>>> + Send + '_>> {
        let instance_id = instance_id.to_string();
        Box::pin(async move {
            let inner = self.inner.lock().expect("mutex poisoned");
            Ok(inner.bindings_of(&instance_id))
        })
    }
}
