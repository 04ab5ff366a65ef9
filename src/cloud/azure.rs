//! Azure Resource Manager + Blob Storage cloud client.
//!
//! Talks to the ARM REST API with a bearer token obtained through the
//! OAuth2 client-credentials grant of the configured service principal,
//! and to the Blob REST API with Shared Key authorization for the single
//! data-plane call the broker needs (container creation).
//!
//! Resource mapping per service instance:
//!   Resource group:  `{resource_group_prefix}{instance_id}` (overridable)
//!   Storage account: `{storage_account_prefix}{instance_id sans dashes}` cut to 24
//!   Container:       `{container_prefix}{instance_id}`
//!
//! ARM calls are issued with polling disabled: creation returns as soon as
//! Azure accepts the request and the broker learns about completion via
//! `get_instance_state`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, error, info};

use super::client::{AccessKeys, CloudClient, CloudError};
use super::naming::{self, ResolvedNames};
use crate::config::{AzureConfig, AzureCredentials};
use crate::model::{ContainerAccessType, ProvisionParameters, ProvisioningState};

/// API version for `Microsoft.Storage` ARM operations.
const STORAGE_API_VERSION: &str = "2016-01-01";

/// API version for resource group ARM operations.
const RESOURCES_API_VERSION: &str = "2015-11-01";

/// Blob REST API version used for data-plane requests.
const BLOB_API_VERSION: &str = "2023-11-03";

/// Tokens are refreshed this long before Azure says they expire.
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 60;

// -- ARM response types -------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// The v1 token endpoint encodes this as a string.
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NameAvailability {
    name_available: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StorageAccount {
    properties: StorageAccountProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageAccountProperties {
    provisioning_state: String,
}

#[derive(Debug, Deserialize)]
struct KeyList {
    keys: Vec<AccountKey>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountKey {
    key_name: String,
    value: String,
}

// -- Token management ---------------------------------------------------------

/// Cached access token with expiry.
struct CachedToken {
    access_token: String,
    expiry: Instant,
}

/// Cloud client backed by the Azure REST APIs.
pub struct AzureCloudClient {
    /// HTTP client for ARM and Blob REST calls.
    client: reqwest::Client,
    /// Service principal and subscription.
    credentials: AzureCredentials,
    /// Endpoints, naming prefixes, and defaults.
    config: AzureConfig,
    /// Cached ARM bearer token.
    token_cache: Mutex<Option<CachedToken>>,
}

impl AzureCloudClient {
    /// Create a new client. No request is made until the first call.
    pub fn new(
        credentials: AzureCredentials,
        config: AzureConfig,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        info!(
            "Azure cloud client initialized: subscription={} tenant={} arm={}",
            credentials.subscription_id, credentials.tenant_id, config.arm_endpoint
        );

        Ok(Self {
            client,
            credentials,
            config,
            token_cache: Mutex::new(None),
        })
    }

    /// Get an ARM access token, reusing the cached one while it is valid.
    async fn get_access_token(&self) -> Result<String, CloudError> {
        {
            let cache = self.token_cache.lock().expect("token cache mutex poisoned");
            if let Some(ref cached) = *cache {
                if cached.expiry > Instant::now() {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let (token, expires_in) = self.fetch_access_token().await?;
        let expiry =
            Instant::now() + Duration::from_secs(expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN_SECS));

        {
            let mut cache = self.token_cache.lock().expect("token cache mutex poisoned");
            *cache = Some(CachedToken {
                access_token: token.clone(),
                expiry,
            });
        }

        Ok(token)
    }

    /// Exchange the service principal's secret for a token.
    async fn fetch_access_token(&self) -> Result<(String, u64), CloudError> {
        let url = format!(
            "{}/{}/oauth2/token",
            self.config.login_endpoint.trim_end_matches('/'),
            self.credentials.tenant_id
        );
        let resource = format!("{}/", self.config.arm_endpoint.trim_end_matches('/'));

        debug!("Requesting ARM token from {}", url);
        let resp = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("resource", resource.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CloudError::Auth(format!("token request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CloudError::Auth(format!("token endpoint returned {status}: {body}")));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| CloudError::Auth(format!("invalid token response: {e}")))?;
        let expires_in = token
            .expires_in
            .as_ref()
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(3600);

        Ok((token.access_token, expires_in))
    }

    fn subscription_url(&self) -> String {
        format!(
            "{}/subscriptions/{}",
            self.config.arm_endpoint.trim_end_matches('/'),
            self.credentials.subscription_id
        )
    }

    fn resource_group_url(&self, resource_group_name: &str) -> String {
        format!(
            "{}/resourcegroups/{}?api-version={}",
            self.subscription_url(),
            resource_group_name,
            RESOURCES_API_VERSION
        )
    }

    /// URL of a storage account, optionally followed by an action segment
    /// such as `listKeys`.
    fn storage_account_url(
        &self,
        resource_group_name: &str,
        storage_account_name: &str,
        action: Option<&str>,
    ) -> String {
        let action = action.map(|a| format!("/{a}")).unwrap_or_default();
        format!(
            "{}/resourceGroups/{}/providers/Microsoft.Storage/storageAccounts/{}{}?api-version={}",
            self.subscription_url(),
            resource_group_name,
            storage_account_name,
            action,
            STORAGE_API_VERSION
        )
    }

    /// Send an authorized ARM request and check the status against
    /// `accepted`. A 404 becomes [`CloudError::NotFound`].
    async fn arm_request(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
        context: &str,
        accepted: &[StatusCode],
    ) -> Result<reqwest::Response, CloudError> {
        let token = self.get_access_token().await?;

        debug!("ARM {} {}", method, url);
        let mut req = self.client.request(method, url).bearer_auth(token);
        req = match body {
            Some(body) => req.json(&body),
            // ARM rejects POST actions without a Content-Length.
            None => req.header(reqwest::header::CONTENT_LENGTH, "0"),
        };

        let resp = req.send().await.map_err(|e| CloudError::Transport {
            context: context.to_string(),
            message: e.to_string(),
        })?;

        let status = resp.status();
        if accepted.contains(&status) {
            return Ok(resp);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(CloudError::NotFound {
                context: context.to_string(),
            });
        }
        let body = resp.text().await.unwrap_or_default();
        Err(CloudError::Api {
            context: context.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
        context: &str,
    ) -> Result<T, CloudError> {
        resp.json().await.map_err(|e| CloudError::InvalidResponse {
            context: context.to_string(),
            message: e.to_string(),
        })
    }

    // -- ARM operations --------------------------------------------------------

    async fn create_resource_group(
        &self,
        resource_group_name: &str,
        location: &str,
    ) -> Result<(), CloudError> {
        self.arm_request(
            Method::PUT,
            &self.resource_group_url(resource_group_name),
            Some(json!({ "location": location })),
            "create resource group",
            &[StatusCode::OK, StatusCode::CREATED, StatusCode::ACCEPTED],
        )
        .await?;
        info!("Creation initiated for resource group {}", resource_group_name);
        Ok(())
    }

    async fn check_name_availability(&self, storage_account_name: &str) -> Result<bool, CloudError> {
        let url = format!(
            "{}/providers/Microsoft.Storage/checkNameAvailability?api-version={}",
            self.subscription_url(),
            STORAGE_API_VERSION
        );
        let context = "check storage account name";
        let resp = self
            .arm_request(
                Method::POST,
                &url,
                Some(json!({
                    "name": storage_account_name,
                    "type": "Microsoft.Storage/storageAccounts",
                })),
                context,
                &[StatusCode::OK],
            )
            .await?;
        let availability: NameAvailability = Self::parse_json(resp, context).await?;
        if !availability.name_available {
            debug!(
                "Storage account name {} unavailable: {}",
                storage_account_name,
                availability.message.unwrap_or_default()
            );
        }
        Ok(availability.name_available)
    }

    async fn create_storage_account(&self, names: &ResolvedNames) -> Result<(), CloudError> {
        self.arm_request(
            Method::PUT,
            &self.storage_account_url(
                &names.resource_group_name,
                &names.storage_account_name,
                None,
            ),
            Some(json!({
                "location": names.location,
                "kind": "Storage",
                "sku": { "name": names.account_type.as_str() },
            })),
            "create storage account",
            &[StatusCode::OK, StatusCode::ACCEPTED],
        )
        .await?;
        info!(
            "Creation initiated for storage account {}.{}",
            names.resource_group_name, names.storage_account_name
        );
        Ok(())
    }

    async fn list_keys(
        &self,
        resource_group_name: &str,
        storage_account_name: &str,
    ) -> Result<(String, String), CloudError> {
        let context = "list access keys";
        let resp = self
            .arm_request(
                Method::POST,
                &self.storage_account_url(resource_group_name, storage_account_name, Some("listKeys")),
                None,
                context,
                &[StatusCode::OK],
            )
            .await?;
        let list: KeyList = Self::parse_json(resp, context).await?;
        let find = |name: &str| {
            list.keys
                .iter()
                .find(|k| k.key_name.eq_ignore_ascii_case(name))
                .map(|k| k.value.clone())
        };
        match (find("key1"), find("key2")) {
            (Some(primary), Some(secondary)) => Ok((primary, secondary)),
            _ => Err(CloudError::InvalidResponse {
                context: context.to_string(),
                message: format!("expected key1 and key2, got {} keys", list.keys.len()),
            }),
        }
    }

    async fn regenerate_key(
        &self,
        resource_group_name: &str,
        storage_account_name: &str,
        key_name: &str,
    ) -> Result<(), CloudError> {
        self.arm_request(
            Method::POST,
            &self.storage_account_url(
                resource_group_name,
                storage_account_name,
                Some("regenerateKey"),
            ),
            Some(json!({ "keyName": key_name })),
            "regenerate access key",
            &[StatusCode::OK],
        )
        .await?;
        debug!(
            "Regenerated {} of {}.{}",
            key_name, resource_group_name, storage_account_name
        );
        Ok(())
    }

    // -- Blob operations -------------------------------------------------------

    /// Create a container, treating "already exists" as success.
    async fn create_container(
        &self,
        storage_account_name: &str,
        account_key: &str,
        container_name: &str,
        access_type: ContainerAccessType,
    ) -> Result<(), CloudError> {
        let context = "create container";
        let key_bytes = BASE64_STANDARD
            .decode(account_key)
            .map_err(|e| CloudError::InvalidResponse {
                context: context.to_string(),
                message: format!("account key is not valid base64: {e}"),
            })?;

        let url = format!(
            "https://{}.blob.{}/{}?restype=container",
            storage_account_name, self.config.storage_endpoint_suffix, container_name
        );
        let date = httpdate::fmt_http_date(std::time::SystemTime::now());

        let mut ms_headers = vec![
            ("x-ms-date".to_string(), date),
            ("x-ms-version".to_string(), BLOB_API_VERSION.to_string()),
        ];
        if let Some(level) = access_type.public_access_header() {
            ms_headers.push(("x-ms-blob-public-access".to_string(), level.to_string()));
        }

        let resource = format!("/{storage_account_name}/{container_name}\nrestype:container");
        let authorization = shared_key_authorization(
            storage_account_name,
            &key_bytes,
            "PUT",
            0,
            "",
            &ms_headers,
            &resource,
        )?;

        let mut req = self
            .client
            .put(&url)
            .header("Authorization", authorization)
            .header(reqwest::header::CONTENT_LENGTH, "0");
        for (name, value) in &ms_headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = req.send().await.map_err(|e| CloudError::Transport {
            context: context.to_string(),
            message: e.to_string(),
        })?;

        match resp.status() {
            StatusCode::CREATED => {
                info!("Created container {}/{}", storage_account_name, container_name);
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!(
                    "Container {}/{} already exists",
                    storage_account_name, container_name
                );
                Ok(())
            }
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(CloudError::Api {
                    context: context.to_string(),
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}

/// Build the Shared Key string-to-sign for a Blob service request.
///
/// Layout: VERB, Content-Encoding, Content-Language, Content-Length,
/// Content-MD5, Content-Type, Date, If-Modified-Since, If-Match,
/// If-None-Match, If-Unmodified-Since, Range, then the canonicalized
/// `x-ms-*` headers and the canonicalized resource. A zero length is
/// signed as the empty string.
pub fn string_to_sign(
    method: &str,
    content_length: usize,
    content_type: &str,
    ms_headers: &[(String, String)],
    canonicalized_resource: &str,
) -> String {
    let content_length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };

    let mut headers: Vec<(String, &str)> = ms_headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.trim()))
        .filter(|(k, _)| k.starts_with("x-ms-"))
        .collect();
    headers.sort_by(|a, b| a.0.cmp(&b.0));
    let canonicalized_headers = headers
        .iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{method}\n\n\n{content_length}\n\n{content_type}\n\n\n\n\n\n\n{canonicalized_headers}\n{canonicalized_resource}"
    )
}

/// Compute the `Authorization` header value for Shared Key auth.
pub fn shared_key_authorization(
    account: &str,
    key_bytes: &[u8],
    method: &str,
    content_length: usize,
    content_type: &str,
    ms_headers: &[(String, String)],
    canonicalized_resource: &str,
) -> Result<String, CloudError> {
    let to_sign = string_to_sign(
        method,
        content_length,
        content_type,
        ms_headers,
        canonicalized_resource,
    );

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(key_bytes)
        .map_err(|e| CloudError::Auth(format!("HMAC key error: {e}")))?;
    mac.update(to_sign.as_bytes());
    let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

    Ok(format!("SharedKey {account}:{signature}"))
}

impl CloudClient for AzureCloudClient {
    fn create_instance(
        &self,
        instance_id: &str,
        parameters: &ProvisionParameters,
    ) -> Pin<Box<dyn Future<Output = Result<(String, String), CloudError>> + Send + '_>> {
        let names = naming::resolve(instance_id, parameters, &self.config);
        Box::pin(async move {
            if let Err(e) = self
                .create_resource_group(&names.resource_group_name, &names.location)
                .await
            {
                error!(
                    "Creating resource group {} failed: {}",
                    names.resource_group_name, e
                );
                return Err(e);
            }

            if !self
                .check_name_availability(&names.storage_account_name)
                .await?
            {
                error!(
                    "Storage account name {} is unavailable; resource group {} left in place",
                    names.storage_account_name, names.resource_group_name
                );
                return Err(CloudError::NameUnavailable {
                    name: names.storage_account_name,
                });
            }

            if let Err(e) = self.create_storage_account(&names).await {
                error!(
                    "Creating storage account {}.{} failed: {}",
                    names.resource_group_name, names.storage_account_name, e
                );
                return Err(e);
            }

            Ok((names.resource_group_name, names.storage_account_name))
        })
    }

    fn get_instance_state(
        &self,
        resource_group_name: &str,
        storage_account_name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ProvisioningState, CloudError>> + Send + '_>> {
        let url = self.storage_account_url(resource_group_name, storage_account_name, None);
        Box::pin(async move {
            let context = "get storage account";
            let resp = self
                .arm_request(Method::GET, &url, None, context, &[StatusCode::OK])
                .await?;
            let account: StorageAccount = Self::parse_json(resp, context).await?;
            Ok(ProvisioningState::from(
                account.properties.provisioning_state.as_str(),
            ))
        })
    }

    fn get_access_keys(
        &self,
        instance_id: &str,
        resource_group_name: &str,
        storage_account_name: &str,
        access_type: ContainerAccessType,
    ) -> Pin<Box<dyn Future<Output = Result<AccessKeys, CloudError>> + Send + '_>> {
        let container_name = naming::container_name(&self.config.container_prefix, instance_id);
        let resource_group_name = resource_group_name.to_string();
        let storage_account_name = storage_account_name.to_string();
        Box::pin(async move {
            let (primary, secondary) = self
                .list_keys(&resource_group_name, &storage_account_name)
                .await
                .map_err(|e| {
                    error!(
                        "Getting access keys of {}.{} failed: {}",
                        resource_group_name, storage_account_name, e
                    );
                    e
                })?;

            self.create_container(&storage_account_name, &primary, &container_name, access_type)
                .await
                .map_err(|e| {
                    error!(
                        "Creating container {}.{}.{} failed: {}",
                        resource_group_name, storage_account_name, container_name, e
                    );
                    e
                })?;

            Ok(AccessKeys {
                primary,
                secondary,
                container_name,
            })
        })
    }

    fn delete_instance(
        &self,
        resource_group_name: &str,
        storage_account_name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CloudError>> + Send + '_>> {
        let url = self.storage_account_url(resource_group_name, storage_account_name, None);
        let label = format!("{resource_group_name}.{storage_account_name}");
        Box::pin(async move {
            self.arm_request(
                Method::DELETE,
                &url,
                None,
                "delete storage account",
                &[StatusCode::OK, StatusCode::NO_CONTENT],
            )
            .await
            .map_err(|e| {
                error!("Deleting {} failed: {}", label, e);
                e
            })?;
            info!("Deleted storage account {}", label);
            Ok(())
        })
    }

    fn regenerate_access_keys(
        &self,
        resource_group_name: &str,
        storage_account_name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CloudError>> + Send + '_>> {
        let resource_group_name = resource_group_name.to_string();
        let storage_account_name = storage_account_name.to_string();
        Box::pin(async move {
            for key_name in ["key1", "key2"] {
                self.regenerate_key(&resource_group_name, &storage_account_name, key_name)
                    .await
                    .map_err(|e| {
                        error!(
                            "Regenerating {} of {}.{} failed: {}",
                            key_name, resource_group_name, storage_account_name, e
                        );
                        e
                    })?;
            }
            Ok(())
        })
    }
}
