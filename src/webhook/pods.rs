// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Pod mutation: inject the pull-secrets of every credential resource whose
//! image selector matches one of the pod's images.

use crate::error::{RegcredError, Result};
use crate::events::reasons;
use crate::selector::ImageReference;
use crate::types::{is_pending, CredentialResource, EcrCredentials, ImageSelector, RegistryCredentials};
use k8s_openapi::api::core::v1::{LocalObjectReference, ObjectReference, Pod};
use kube::{
    api::{Api, DynamicObject, ListParams},
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
    runtime::events::EventType,
    ResourceExt,
};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::WebhookState;

/// A credential resource as seen by the gate: its secret name and selector
#[derive(Debug, Clone)]
pub struct VisibleCredentials {
    pub name: String,
    pub pending: bool,
    pub selector: ImageSelector,
}

impl VisibleCredentials {
    fn from_resource<K: CredentialResource>(resource: &K) -> Self {
        VisibleCredentials {
            name: resource.name_any(),
            pending: is_pending(resource.phase()),
            selector: resource.image_selector(),
        }
    }
}

/// Handle a pod admission review
pub async fn mutate(
    state: &WebhookState,
    review: AdmissionReview<DynamicObject>,
) -> AdmissionReview<DynamicObject> {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return AdmissionResponse::invalid(e.to_string()).into_review();
        }
    };

    mutate_pod(state, &request).await.into_review()
}

/// Decode the pod, wait briefly for pending credentials, and patch in the
/// matching pull-secret references.
pub async fn mutate_pod(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let uid = request.uid.clone();

    let Some(object) = &request.object else {
        debug!(uid = %uid, "No pod object in request, allowing unchanged");
        return AdmissionResponse::from(request);
    };

    let mut pod: Pod = match serde_json::to_value(object).and_then(serde_json::from_value) {
        Ok(pod) => pod,
        Err(e) => {
            error!(uid = %uid, error = %e, "Unable to decode pod");
            return reject(request, 400, e.to_string());
        }
    };

    let Some(namespace) = pod.namespace().or_else(|| request.namespace.clone()) else {
        return reject(
            request,
            400,
            RegcredError::MissingNamespace(pod.name_any()).to_string(),
        );
    };

    let images = pod_images(&pod);
    if images.is_empty() {
        return AdmissionResponse::from(request);
    }

    wait_for_credentials(state, &pod, &namespace).await;

    let secret_names = match visible_credentials(state, &namespace)
        .await
        .and_then(|credentials| compute_secret_names(&images, &credentials))
    {
        Ok(names) => names,
        Err(e) => {
            error!(uid = %uid, namespace = %namespace, error = %e, "Unable to select pull-secrets");
            return reject(request, 500, e.to_string());
        }
    };

    if secret_names.is_empty() {
        debug!(uid = %uid, "No credentials match the pod images");
        return AdmissionResponse::from(request);
    }

    match patch_pull_secrets(&mut pod, secret_names.clone()) {
        Ok(patch) => {
            info!(uid = %uid, namespace = %namespace, secrets = ?secret_names, "Injecting pull-secrets");
            match AdmissionResponse::from(request).with_patch(patch) {
                Ok(response) => response,
                Err(e) => reject(request, 500, format!("patch serialization error: {e}")),
            }
        }
        Err(e) => reject(request, 500, e.to_string()),
    }
}

/// Image references of a pod, init containers first
pub fn pod_images(pod: &Pod) -> Vec<String> {
    let Some(spec) = &pod.spec else {
        return Vec::new();
    };

    spec.init_containers
        .iter()
        .flatten()
        .chain(spec.containers.iter())
        .filter_map(|c| c.image.clone())
        .collect()
}

/// Secret names to inject, in image order then resource order.
/// Repeats are kept; a malformed selector fails the whole computation.
pub fn compute_secret_names(
    images: &[String],
    credentials: &[VisibleCredentials],
) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for image in images {
        let reference = ImageReference::parse(image);
        for candidate in credentials {
            if candidate.selector.matches(&reference)? {
                names.push(candidate.name.clone());
            }
        }
    }
    Ok(names)
}

/// Append pull-secret references and diff the result against the decoded pod
fn patch_pull_secrets(pod: &mut Pod, names: Vec<String>) -> Result<json_patch::Patch> {
    let original = serde_json::to_value(&*pod)?;

    pod.spec
        .get_or_insert_with(Default::default)
        .image_pull_secrets
        .get_or_insert_with(Vec::new)
        .extend(names.into_iter().map(|name| LocalObjectReference { name }));

    let patched = serde_json::to_value(&*pod)?;
    Ok(json_patch::diff(&original, &patched))
}

/// Poll until no credential resource in the namespace is pending, or the
/// configured bound is exhausted. Exhausting the bound is not an error.
async fn wait_for_credentials(state: &WebhookState, pod: &Pod, namespace: &str) {
    let attempts = state.config.admission_poll_attempts;

    for attempt in 1..=attempts {
        match visible_credentials(state, namespace).await {
            Ok(credentials) => match credentials.iter().find(|c| c.pending) {
                None => return,
                Some(pending) => {
                    state
                        .events
                        .publish(
                            &pod_reference(pod, namespace),
                            EventType::Warning,
                            reasons::WAITING_FOR_CREDENTIALS,
                            "Admission",
                            Some(format!(
                                "Waiting for credentials {:?} to finish authenticating",
                                pending.name
                            )),
                        )
                        .await;
                }
            },
            Err(e) => warn!(namespace = %namespace, error = %e, "Unable to list credentials"),
        }

        if attempt < attempts {
            sleep(state.config.admission_poll_interval).await;
        }
    }

    info!(namespace = %namespace, "Credentials still pending, admitting with current secrets");
}

/// All credential resources of both kinds in the namespace
async fn visible_credentials(state: &WebhookState, namespace: &str) -> Result<Vec<VisibleCredentials>> {
    let mut credentials: Vec<VisibleCredentials> = list_or_empty::<RegistryCredentials>(state, namespace)
        .await?
        .iter()
        .map(VisibleCredentials::from_resource)
        .collect();

    credentials.extend(
        list_or_empty::<EcrCredentials>(state, namespace)
            .await?
            .iter()
            .map(VisibleCredentials::from_resource),
    );

    Ok(credentials)
}

async fn list_or_empty<K: CredentialResource>(state: &WebhookState, namespace: &str) -> Result<Vec<K>> {
    let api: Api<K> = Api::namespaced(state.client.clone(), namespace);
    match api.list(&ListParams::default()).await {
        Ok(list) => Ok(list.items),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

fn pod_reference(pod: &Pod, namespace: &str) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("Pod".to_string()),
        name: pod
            .metadata
            .name
            .clone()
            .or_else(|| pod.metadata.generate_name.clone()),
        namespace: Some(namespace.to_string()),
        uid: pod.metadata.uid.clone(),
        ..Default::default()
    }
}

fn reject(
    request: &AdmissionRequest<DynamicObject>,
    code: u16,
    message: String,
) -> AdmissionResponse {
    let mut response = AdmissionResponse::from(request).deny(message);
    response.result.code = code;
    response
}
