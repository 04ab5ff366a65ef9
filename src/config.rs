//! Configuration loading and types for the broker.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: networking, broker authentication, the service catalog, state
//! persistence, the Azure adapter, and logging.
//!
//! Azure service-principal credentials never live in the file; they are
//! read from the process environment by [`AzureCredentials::from_env`].

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Broker Basic-Auth settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Service catalog settings.
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Instance/binding state persistence settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Azure adapter settings.
    #[serde(default)]
    pub azure: AzureConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Timeout in seconds for each outbound Azure request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Broker Basic-Auth credentials.
///
/// The `authUsername` and `authPassword` environment variables take
/// precedence over the values in the file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Expected Basic-Auth username.
    #[serde(default)]
    pub username: String,

    /// Expected Basic-Auth password.
    #[serde(default)]
    pub password: String,
}

impl AuthConfig {
    /// Apply `authUsername` / `authPassword` from `lookup` and make sure
    /// both values end up non-empty.
    pub fn resolve<F>(mut self, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(username) = lookup("authUsername").filter(|v| !v.is_empty()) {
            self.username = username;
        }
        if let Some(password) = lookup("authPassword").filter(|v| !v.is_empty()) {
            self.password = password;
        }

        if self.username.is_empty() {
            return Err(anyhow::anyhow!(
                "No broker username configured (set authUsername or auth.username)"
            ));
        }
        if self.password.is_empty() {
            return Err(anyhow::anyhow!(
                "No broker password configured (set authPassword or auth.password)"
            ));
        }
        Ok(self)
    }
}

/// Service catalog configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Path to the catalog JSON document served on `GET /v2/catalog`.
    #[serde(default = "default_catalog_path")]
    pub path: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
        }
    }
}

/// State store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Store engine: `local` (JSON files) or `memory`.
    #[serde(default = "default_store_engine")]
    pub engine: String,

    /// JSON file store configuration.
    #[serde(default)]
    pub local: LocalStoreConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            engine: default_store_engine(),
            local: LocalStoreConfig::default(),
        }
    }
}

/// JSON file store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStoreConfig {
    /// Directory holding `service_instances.json` and `service_bindings.json`.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Azure adapter settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AzureConfig {
    /// Default region for new resource groups and storage accounts.
    #[serde(default = "default_location")]
    pub location: String,

    /// Prefix for derived resource group names.
    #[serde(default = "default_resource_group_prefix")]
    pub resource_group_prefix: String,

    /// Prefix for derived storage account names.
    #[serde(default = "default_storage_account_prefix")]
    pub storage_account_prefix: String,

    /// Prefix for container names created on bind.
    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,

    /// Dashboard URL returned from provisioning.
    #[serde(default = "default_dashboard_url")]
    pub dashboard_url: String,

    /// Poll interval suggested to the platform while provisioning.
    #[serde(default = "default_poll_interval")]
    pub async_poll_interval_seconds: u64,

    /// Azure Resource Manager endpoint.
    #[serde(default = "default_arm_endpoint")]
    pub arm_endpoint: String,

    /// Azure Active Directory login endpoint.
    #[serde(default = "default_login_endpoint")]
    pub login_endpoint: String,

    /// DNS suffix for storage endpoints (`{account}.blob.{suffix}`).
    #[serde(default = "default_storage_endpoint_suffix")]
    pub storage_endpoint_suffix: String,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            location: default_location(),
            resource_group_prefix: default_resource_group_prefix(),
            storage_account_prefix: default_storage_account_prefix(),
            container_prefix: default_container_prefix(),
            dashboard_url: default_dashboard_url(),
            async_poll_interval_seconds: default_poll_interval(),
            arm_endpoint: default_arm_endpoint(),
            login_endpoint: default_login_endpoint(),
            storage_endpoint_suffix: default_storage_endpoint_suffix(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

// -- Azure credentials -------------------------------------------------------

/// A required Azure identity variable is absent from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("No subscriptionID provided in environment variables")]
    MissingSubscriptionId,

    #[error("No tenantID provided in environment variables")]
    MissingTenantId,

    #[error("No clientID provided in environment variables")]
    MissingClientId,

    #[error("No clientSecret provided in environment variables")]
    MissingClientSecret,
}

/// Service-principal identity used to obtain ARM tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct AzureCredentials {
    pub subscription_id: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for AzureCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureCredentials")
            .field("subscription_id", &self.subscription_id)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl AzureCredentials {
    /// Read `subscriptionID`, `tenantID`, `clientID` and `clientSecret`
    /// from the process environment.
    pub fn from_env() -> Result<Self, CredentialError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build credentials from an arbitrary variable source. Empty values
    /// count as missing; the first missing variable wins.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CredentialError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let subscription_id = get("subscriptionID").ok_or(CredentialError::MissingSubscriptionId)?;
        let tenant_id = get("tenantID").ok_or(CredentialError::MissingTenantId)?;
        let client_id = get("clientID").ok_or(CredentialError::MissingClientId)?;
        let client_secret = get("clientSecret").ok_or(CredentialError::MissingClientSecret)?;

        Ok(Self {
            subscription_id,
            tenant_id,
            client_id,
            client_secret,
        })
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    60
}

fn default_catalog_path() -> String {
    "./catalog.json".to_string()
}

fn default_store_engine() -> String {
    "local".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_location() -> String {
    "westus".to_string()
}

fn default_resource_group_prefix() -> String {
    "cloud-foundry-".to_string()
}

fn default_storage_account_prefix() -> String {
    "cf".to_string()
}

fn default_container_prefix() -> String {
    "cloud-foundry-".to_string()
}

fn default_dashboard_url() -> String {
    "http://dashboard_url".to_string()
}

fn default_poll_interval() -> u64 {
    30
}

fn default_arm_endpoint() -> String {
    "https://management.azure.com".to_string()
}

fn default_login_endpoint() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_storage_endpoint_suffix() -> String {
    "core.windows.net".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    if path.as_ref().exists() {
        load_config(path)
    } else {
        Ok(Config::default())
    }
}
