//! Cloud provider adapter.
//!
//! The [`client::CloudClient`] trait is the narrow surface the broker
//! handlers consume.  [`azure::AzureCloudClient`] implements it on top of
//! the Azure Resource Manager and Blob Storage REST APIs using `reqwest`.

pub mod azure;
pub mod client;
#[cfg(test)]
pub mod fake;
pub mod naming;

pub use client::{AccessKeys, CloudClient, CloudError};
