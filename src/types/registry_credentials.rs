// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::types::status::{format_time, Phase, StatusUpdate};
use crate::types::CredentialResource;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
#[kube(
    group = "registry.credentials.io",
    version = "v1alpha1",
    kind = "RegistryCredentials",
    plural = "registrycredentials",
    shortname = "regcred"
)]
#[kube(namespaced)]
#[kube(status = "RegistryCredentialsStatus")]
#[kube(printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.state"}"#)]
#[kube(printcolumn = r#"{"name":"Error","type":"string","jsonPath":".status.errorMessage","priority":1}"#)]
#[serde(rename_all = "camelCase")]
pub struct RegistryCredentialsSpec {
    pub provider: RegistryProvider,
    #[serde(default)]
    pub image_selector: ImageSelector,
}

/// Provider configuration. Exactly one provider is expected to be set.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistryProvider {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aws_elastic_container_registry: Option<AwsElasticContainerRegistry>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AwsElasticContainerRegistry {
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    #[serde(default)]
    pub region: String,
}

// Keeps the secret access key out of logs
impl std::fmt::Debug for AwsElasticContainerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsElasticContainerRegistry")
            .field("access_key_id", &self.access_key_id)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Rules selecting the images a credential's pull-secret applies to.
/// A single matching rule selects the credential.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageSelector {
    /// Regular expressions matched against the full image reference
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_regexp: Vec<String>,
    /// Full image references matched exactly
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_exact: Vec<String>,
    /// Regular expressions matched against the registry host
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_host_regexp: Vec<String>,
    /// Registry hosts matched exactly
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_host_exact: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistryCredentialsStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticated_time: Option<DateTime<Utc>>,
}

impl CredentialResource for RegistryCredentials {
    fn provider(&self) -> RegistryProvider {
        self.spec.provider.clone()
    }

    fn phase(&self) -> Option<Phase> {
        self.status.as_ref().and_then(|s| s.state)
    }

    fn image_selector(&self) -> ImageSelector {
        self.spec.image_selector.clone()
    }

    fn expiration_time(&self) -> Option<DateTime<Utc>> {
        self.status.as_ref().and_then(|s| s.expiration_time)
    }

    fn status_patch(update: &StatusUpdate) -> serde_json::Value {
        let mut status = json!({
            "state": update.phase,
            "errorMessage": update.error_message,
        });
        if update.phase == Phase::Authenticated {
            status["authenticatedTime"] = json!(update.authenticated_at.as_ref().map(format_time));
            status["expirationTime"] = json!(update.expires_at.as_ref().map(format_time));
        }
        json!({ "status": status })
    }
}
