// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Credential custom resources and the uniform view the operator takes of them.

pub mod ecr_credentials;
pub mod registry_credentials;
pub mod status;

pub use ecr_credentials::{EcrCredentials, EcrCredentialsSpec, EcrCredentialsStatus};
pub use registry_credentials::{
    AwsElasticContainerRegistry, ImageSelector, RegistryCredentials, RegistryCredentialsSpec,
    RegistryCredentialsStatus, RegistryProvider,
};
pub use status::{is_pending, Phase, StatusUpdate};

use chrono::{DateTime, Utc};
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// A namespaced resource declaring registry credentials.
///
/// Both schema generations are driven by the same reconciliation state machine
/// and are visible to the admission gate through this trait.
pub trait CredentialResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Provider configuration, interpreted only by the matching authenticator
    fn provider(&self) -> RegistryProvider;

    /// Observed phase; `None` while no status has been written yet
    fn phase(&self) -> Option<Phase>;

    fn image_selector(&self) -> ImageSelector;

    /// Expiry of the last issued token, when the schema records one
    fn expiration_time(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Merge patch body for the status subresource
    fn status_patch(update: &StatusUpdate) -> serde_json::Value;
}
