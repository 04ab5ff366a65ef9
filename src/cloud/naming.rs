//! Azure resource naming for service instances.
//!
//! Storage account names must be 3-24 lowercase letters and digits and
//! globally unique, so they are derived from the instance GUID with its
//! dashes stripped.  Container names allow 3-63 lowercase letters, digits
//! and single hyphens.

use crate::config::AzureConfig;
use crate::model::{AccountType, ProvisionParameters};

/// Minimum length of a storage account name.
pub const STORAGE_ACCOUNT_NAME_MIN: usize = 3;

/// Maximum length of a storage account name.
pub const STORAGE_ACCOUNT_NAME_MAX: usize = 24;

/// Maximum length of a blob container name.
pub const CONTAINER_NAME_MAX: usize = 63;

/// Everything needed to create the Azure resources of one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNames {
    pub resource_group_name: String,
    pub storage_account_name: String,
    pub location: String,
    pub account_type: AccountType,
}

/// Apply caller overrides on top of the names derived from `instance_id`.
pub fn resolve(
    instance_id: &str,
    parameters: &ProvisionParameters,
    config: &AzureConfig,
) -> ResolvedNames {
    ResolvedNames {
        resource_group_name: parameters
            .resource_group_name
            .clone()
            .unwrap_or_else(|| resource_group_name(&config.resource_group_prefix, instance_id)),
        storage_account_name: parameters
            .storage_account_name
            .clone()
            .unwrap_or_else(|| storage_account_name(&config.storage_account_prefix, instance_id)),
        location: parameters
            .location
            .clone()
            .unwrap_or_else(|| config.location.clone()),
        account_type: parameters.account_type.unwrap_or_default(),
    }
}

pub fn resource_group_name(prefix: &str, instance_id: &str) -> String {
    format!("{prefix}{instance_id}")
}

/// `prefix` + the lowercase alphanumerics of `instance_id`, cut to 24.
pub fn storage_account_name(prefix: &str, instance_id: &str) -> String {
    let mut name: String = prefix
        .chars()
        .chain(instance_id.chars())
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    name.truncate(STORAGE_ACCOUNT_NAME_MAX);
    name
}

pub fn container_name(prefix: &str, instance_id: &str) -> String {
    let mut name = String::with_capacity(prefix.len() + instance_id.len());
    for c in prefix.chars().chain(instance_id.chars()) {
        let c = if c.is_ascii_alphanumeric() {
            c.to_ascii_lowercase()
        } else {
            '-'
        };
        // Collapse runs of hyphens.
        if c == '-' && name.ends_with('-') {
            continue;
        }
        name.push(c);
    }
    name.truncate(CONTAINER_NAME_MAX);
    name.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUID: &str = "6f9e1e5a-2c5b-4d8e-9f3a-1b2c3d4e5f60";

    #[test]
    fn test_storage_account_name_from_guid() {
        let name = storage_account_name("cf", GUID);
        assert_eq!(name, "cf6f9e1e5a2c5b4d8e9f3a1b");
        assert_eq!(name.len(), STORAGE_ACCOUNT_NAME_MAX);
    }

    #[test]
    fn test_storage_account_name_short_id() {
        assert_eq!(storage_account_name("cf", "abc"), "cfabc");
    }

    #[test]
    fn test_storage_account_name_sanitizes() {
        assert_eq!(storage_account_name("cf", "My_Instance.1"), "cfmyinstance1");
    }

    #[test]
    fn test_storage_account_name_without_alphanumerics() {
        let name = storage_account_name("cf", "--");
        assert_eq!(name, "cf");
        assert!(name.len() < STORAGE_ACCOUNT_NAME_MIN);
    }

    #[test]
    fn test_resource_group_name() {
        assert_eq!(
            resource_group_name("cloud-foundry-", "abc"),
            "cloud-foundry-abc"
        );
    }

    #[test]
    fn test_container_name() {
        assert_eq!(
            container_name("cloud-foundry-", GUID),
            format!("cloud-foundry-{GUID}")
        );
        assert_eq!(container_name("cf--", "A_B"), "cf-a-b");
        assert!(container_name("x-", &"y".repeat(100)).len() <= CONTAINER_NAME_MAX);
    }

    #[test]
    fn test_resolve_defaults() {
        let config = AzureConfig::default();
        let names = resolve("abc", &ProvisionParameters::default(), &config);
        assert_eq!(names.resource_group_name, "cloud-foundry-abc");
        assert_eq!(names.storage_account_name, "cfabc");
        assert_eq!(names.location, "westus");
        assert_eq!(names.account_type, AccountType::StandardLrs);
    }

    #[test]
    fn test_resolve_overrides() {
        let config = AzureConfig::default();
        let params = ProvisionParameters {
            resource_group_name: Some("shared-rg".to_string()),
            storage_account_name: Some("mystorage".to_string()),
            location: Some("eastus".to_string()),
            account_type: Some(AccountType::StandardGrs),
            container_access_type: None,
        };
        let names = resolve("abc", &params, &config);
        assert_eq!(names.resource_group_name, "shared-rg");
        assert_eq!(names.storage_account_name, "mystorage");
        assert_eq!(names.location, "eastus");
        assert_eq!(names.account_type, AccountType::StandardGrs);
    }
}
