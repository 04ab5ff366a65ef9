//! Azure Storage service broker.
//!
//! Implements the Open Service Broker API on top of Azure Resource
//! Manager: each service instance is a storage account in its own
//! resource group, and each binding hands out the account's access keys
//! together with a container dedicated to the instance.

use std::sync::Arc;

pub mod auth;
pub mod cloud;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod model;
pub mod server;
pub mod state;

use crate::cloud::CloudClient;
use crate::config::Config;
use crate::state::store::BrokerStore;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Broker configuration.
    pub config: Config,
    /// Instance and binding records (JSON files or memory).
    pub store: Arc<dyn BrokerStore>,
    /// Azure adapter.
    pub cloud: Arc<dyn CloudClient>,
}
