// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Registry pull-secret synthesis and create-or-update

use crate::constants::pull_secret;
use crate::error::{RegcredError, Result};
use crate::providers::AuthenticationResult;
use crate::types::CredentialResource;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::{
    api::{ObjectMeta, PostParams},
    Api, Client, ResourceExt,
};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// Which write the upsert performed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Build the docker config document `{"auths":{"<host>":{"auth":"<token>"}}}`
pub fn docker_config_json(login: &AuthenticationResult) -> Result<Vec<u8>> {
    let document = json!({
        "auths": {
            login.host.as_str(): { "auth": login.token }
        }
    });
    Ok(serde_json::to_vec(&document)?)
}

/// Build the pull-secret for a credential resource: same name and namespace,
/// controlled by the credential resource.
pub fn build_pull_secret<K: CredentialResource>(
    owner: &K,
    login: &AuthenticationResult,
) -> Result<Secret> {
    let name = owner.name_any();
    let namespace = owner
        .namespace()
        .ok_or_else(|| RegcredError::MissingNamespace(name.clone()))?;

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace),
            owner_references: owner.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            pull_secret::DATA_KEY.to_string(),
            ByteString(docker_config_json(login)?),
        )])),
        type_: Some(pull_secret::TYPE.to_string()),
        ..Default::default()
    })
}

/// Read the secret, then create it when absent or replace it when present.
/// Store failures propagate, except a missing secret (on read or on update)
/// which means "create".
#[instrument(
    skip(client, secret),
    fields(secret = %format!("{}/{}", secret.namespace().unwrap_or_default(), secret.name_any()))
)]
pub async fn upsert_secret(client: &Client, secret: &Secret) -> Result<UpsertOutcome> {
    let name = secret.name_any();
    let namespace = secret
        .namespace()
        .ok_or_else(|| RegcredError::MissingNamespace(name.clone()))?;
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);

    if let Some(existing) = secrets.get_opt(&name).await? {
        let mut replacement = secret.clone();
        replacement.metadata.resource_version = existing.resource_version();
        match secrets
            .replace(&name, &PostParams::default(), &replacement)
            .await
        {
            Ok(_) => {
                info!("Updated secret {}/{}", namespace, name);
                return Ok(UpsertOutcome::Updated);
            }
            // Deleted after the read
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!("Secret {}/{} vanished before update, creating it", namespace, name);
            }
            Err(e) => return Err(e.into()),
        }
    }

    secrets.create(&PostParams::default(), secret).await?;
    info!("Created secret {}/{}", namespace, name);
    Ok(UpsertOutcome::Created)
}
