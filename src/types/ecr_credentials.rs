// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Legacy ECR-only credential resource. Its image selector is a flat list of
//! regular expressions matched against the full image reference.

use crate::types::registry_credentials::{AwsElasticContainerRegistry, ImageSelector, RegistryProvider};
use crate::types::status::{Phase, StatusUpdate};
use crate::types::CredentialResource;
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(CustomResource, Serialize, Deserialize, Clone, schemars::JsonSchema)]
#[kube(
    group = "registry.credentials.io",
    version = "v1alpha1",
    kind = "ECRCredentials",
    root = "EcrCredentials",
    plural = "ecrcredentials"
)]
#[kube(namespaced)]
#[kube(status = "EcrCredentialsStatus")]
#[kube(printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.phase"}"#)]
#[serde(rename_all = "camelCase")]
pub struct EcrCredentialsSpec {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_selector: Vec<String>,
}

impl std::fmt::Debug for EcrCredentialsSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcrCredentialsSpec")
            .field("access_key_id", &self.access_key_id)
            .field("region", &self.region)
            .field("image_selector", &self.image_selector)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EcrCredentialsStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CredentialResource for EcrCredentials {
    fn provider(&self) -> RegistryProvider {
        RegistryProvider {
            aws_elastic_container_registry: Some(AwsElasticContainerRegistry {
                access_key_id: self.spec.access_key_id.clone(),
                secret_access_key: self.spec.secret_access_key.clone(),
                region: self.spec.region.clone(),
            }),
        }
    }

    fn phase(&self) -> Option<Phase> {
        self.status.as_ref().and_then(|s| s.phase)
    }

    fn image_selector(&self) -> ImageSelector {
        ImageSelector {
            match_regexp: self.spec.image_selector.clone(),
            ..Default::default()
        }
    }

    fn status_patch(update: &StatusUpdate) -> serde_json::Value {
        json!({
            "status": {
                "phase": update.phase,
                "errorMessage": update.error_message,
            }
        })
    }
}
