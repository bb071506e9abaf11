// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Credential reconciler - drives a credential resource from unauthenticated to
//! authenticated (or an error phase) and materializes its pull-secret.

use crate::config::Config;
use crate::constants::pull_secret;
use crate::constants::reconcile::MIN_REQUEUE_SECS;
use crate::error::{RegcredError, Result};
use crate::events::{reasons, EventPublisher};
use crate::providers::{AuthenticationResult, AuthenticatorFactory};
use crate::secrets::{build_pull_secret, upsert_secret, UpsertOutcome};
use crate::types::{CredentialResource, Phase, StatusUpdate};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{Patch, PatchParams},
    runtime::{controller::Action, events::EventType, Controller},
    Api, Client, Resource, ResourceExt,
};
use kube_runtime::watcher::Config as WatcherConfig;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Terminal observation of a single reconcile pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Deletion was observed; no further authentication happens
    Terminated,
    /// The pull-secret was written with a fresh token
    Authenticated { expires_at: Option<DateTime<Utc>> },
    /// Authentication or the secret write failed
    Failed { phase: Phase, message: String },
}

pub struct CredentialsReconciler<K> {
    client: Client,
    config: Config,
    authenticators: Arc<dyn AuthenticatorFactory>,
    events: Arc<dyn EventPublisher>,
    _resource: PhantomData<fn() -> K>,
}

impl<K: CredentialResource> CredentialsReconciler<K> {
    pub fn new(
        client: Client,
        config: Config,
        authenticators: Arc<dyn AuthenticatorFactory>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            client,
            config,
            authenticators,
            events,
            _resource: PhantomData,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let resources: Api<K> = Api::all(self.client.clone());
        let secrets: Api<Secret> = Api::all(self.client.clone());
        let context = Arc::new(self);

        Controller::new(resources, WatcherConfig::default())
            .owns(secrets, owned_secrets_watcher())
            .shutdown_on_signal()
            .run(reconcile::<K>, error_policy::<K>, context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled {}: {:?}", K::kind(&()), o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }

    /// Run one pass of the state machine and write the resulting phase.
    /// The phase is written only after the secret write settled.
    #[instrument(skip(self, resource), fields(kind = %K::kind(&()), resource = %format!("{}/{}", resource.namespace().unwrap_or_default(), resource.name_any())))]
    pub async fn transition(&self, resource: &K) -> Result<Transition> {
        let name = resource.name_any();
        let namespace = resource
            .namespace()
            .ok_or_else(|| RegcredError::MissingNamespace(name.clone()))?;
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);

        if resource.meta().deletion_timestamp.is_some() {
            if resource.phase() != Some(Phase::Terminating) {
                info!("Deletion requested, marking as terminating");
                write_status(&api, &name, &StatusUpdate::phase(Phase::Terminating)).await?;
            }
            return Ok(Transition::Terminated);
        }

        if resource.phase().is_none() {
            write_status(&api, &name, &StatusUpdate::phase(Phase::Authenticating)).await?;
        }

        let login = match self.authenticate(resource).await {
            Ok(login) => login,
            Err(failure) => return self.fail(&api, resource, failure).await,
        };

        if let Err(e) = self.store_secret(resource, &login).await {
            error!("Unable to write pull-secret: {}", e);
            return self
                .fail(&api, resource, (Phase::Errored, e.to_string()))
                .await;
        }

        write_status(
            &api,
            &name,
            &StatusUpdate::authenticated(Utc::now(), login.expires_at),
        )
        .await?;
        info!("Authenticated against {}", login.host);

        Ok(Transition::Authenticated {
            expires_at: login.expires_at,
        })
    }

    async fn authenticate(
        &self,
        resource: &K,
    ) -> std::result::Result<AuthenticationResult, (Phase, String)> {
        let authenticator = self
            .authenticators
            .authenticator(&resource.provider())
            .map_err(|e| (Phase::from(e.class), e.message))?;

        authenticator
            .authenticate()
            .await
            .map_err(|e| (Phase::from(e.class), e.message))
    }

    async fn store_secret(&self, resource: &K, login: &AuthenticationResult) -> Result<()> {
        let secret = build_pull_secret(resource, login)?;
        let outcome = upsert_secret(&self.client, &secret).await?;

        let (reason, verb) = match outcome {
            UpsertOutcome::Created => (reasons::SECRET_CREATED, "Created"),
            UpsertOutcome::Updated => (reasons::SECRET_UPDATED, "Updated"),
        };
        self.events
            .publish(
                &secret.object_ref(&()),
                EventType::Normal,
                reason,
                "Reconcile",
                Some(format!("{} secret {:?}", verb, secret.name_any())),
            )
            .await;

        Ok(())
    }

    async fn fail(
        &self,
        api: &Api<K>,
        resource: &K,
        (phase, message): (Phase, String),
    ) -> Result<Transition> {
        info!("Authentication ended in {}: {}", phase, message);
        write_status(api, &resource.name_any(), &StatusUpdate::failed(phase, &message)).await?;

        self.events
            .publish(
                &resource.object_ref(&()),
                EventType::Warning,
                reasons::AUTHENTICATION_FAILED,
                "Reconcile",
                Some(message.clone()),
            )
            .await;

        Ok(Transition::Failed { phase, message })
    }
}

/// Only pull-secrets can be owned by a credential resource
fn owned_secrets_watcher() -> WatcherConfig {
    WatcherConfig::default().fields(&format!("type={}", pull_secret::TYPE))
}

async fn write_status<K: CredentialResource>(
    api: &Api<K>,
    name: &str,
    update: &StatusUpdate,
) -> Result<()> {
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(K::status_patch(update)))
        .await?;
    Ok(())
}

/// Delay after which the external scheduler should reconcile again.
/// Authenticated credentials are refreshed ahead of token expiry.
pub fn requeue_after(transition: &Transition, config: &Config, now: DateTime<Utc>) -> Option<Duration> {
    match transition {
        Transition::Terminated => None,
        // Rejected credentials only change when the user edits them
        Transition::Failed {
            phase: Phase::Unauthorized,
            ..
        } => Some(config.resync_interval),
        Transition::Failed { .. } => Some(config.error_requeue),
        Transition::Authenticated { expires_at } => {
            let until_refresh = expires_at.map(|expiry| {
                let margin = chrono::Duration::from_std(config.expiry_refresh_margin)
                    .unwrap_or_else(|_| chrono::Duration::zero());
                (expiry - margin - now).to_std().unwrap_or(Duration::ZERO)
            });
            let delay = until_refresh.map_or(config.resync_interval, |d| d.min(config.resync_interval));
            Some(delay.max(Duration::from_secs(MIN_REQUEUE_SECS)))
        }
    }
}

async fn reconcile<K: CredentialResource>(
    resource: Arc<K>,
    ctx: Arc<CredentialsReconciler<K>>,
) -> Result<Action> {
    let transition = ctx.transition(&resource).await?;

    Ok(match requeue_after(&transition, &ctx.config, Utc::now()) {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    })
}

fn error_policy<K: CredentialResource>(
    _resource: Arc<K>,
    error: &RegcredError,
    ctx: Arc<CredentialsReconciler<K>>,
) -> Action {
    error!("Reconciliation error: {}", error);
    Action::requeue(ctx.config.error_requeue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventPublisher;
    use crate::providers::{
        AuthenticationError, Authenticator, DefaultAuthenticatorFactory, ErrorClass, ProviderError,
    };
    use crate::test_utils::{
        not_found_json, registry_credentials_value, secret_json, status_json, MockService,
    };
    use crate::types::{RegistryCredentials, RegistryProvider};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const STATUS_PATH: &str =
        "/apis/registry.credentials.io/v1alpha1/namespaces/default/registrycredentials/ecr/status";
    const SECRET_PATH: &str = "/api/v1/namespaces/default/secrets/ecr";
    const SECRETS_PATH: &str = "/api/v1/namespaces/default/secrets";

    #[derive(Clone)]
    struct FakeAuthenticator {
        result: std::result::Result<AuthenticationResult, AuthenticationError>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Authenticator for FakeAuthenticator {
        async fn authenticate(
            &self,
        ) -> std::result::Result<AuthenticationResult, AuthenticationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }

        fn classify_error(&self, _error: &ProviderError) -> ErrorClass {
            ErrorClass::Errored
        }
    }

    impl AuthenticatorFactory for FakeAuthenticator {
        fn authenticator(
            &self,
            _provider: &RegistryProvider,
        ) -> std::result::Result<Box<dyn Authenticator>, AuthenticationError> {
            Ok(Box::new(self.clone()))
        }
    }

    fn fake(result: std::result::Result<AuthenticationResult, AuthenticationError>) -> FakeAuthenticator {
        FakeAuthenticator {
            result,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn login() -> AuthenticationResult {
        AuthenticationResult {
            host: "123.dkr.ecr.eu-central-1.amazonaws.com".to_string(),
            token: "QVdTOnBhc3N3b3Jk".to_string(),
            expires_at: Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()),
        }
    }

    fn make_credentials(state: Option<&str>) -> RegistryCredentials {
        serde_json::from_value(registry_credentials_value(
            "ecr",
            "default",
            serde_json::json!({}),
            state,
        ))
        .unwrap()
    }

    fn status_response() -> String {
        registry_credentials_value("ecr", "default", serde_json::json!({}), None).to_string()
    }

    fn reconciler(
        mock: &MockService,
        factory: Arc<dyn AuthenticatorFactory>,
    ) -> CredentialsReconciler<RegistryCredentials> {
        CredentialsReconciler::new(
            mock.clone().into_client(),
            Config::default(),
            factory,
            Arc::new(NoopEventPublisher),
        )
    }

    fn status_bodies(mock: &MockService) -> Vec<serde_json::Value> {
        mock.requests_for("PATCH", STATUS_PATH)
            .iter()
            .map(|r| serde_json::from_str(&r.body).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_rejected_credentials_become_unauthorized() {
        let mock = MockService::new().on_patch(STATUS_PATH, 200, &status_response());
        let authenticator = fake(Err(AuthenticationError::unauthorized(
            "UnrecognizedClientException: The security token included in the request is invalid",
        )));
        let reconciler = reconciler(&mock, Arc::new(authenticator));

        let transition = reconciler
            .transition(&make_credentials(Some("Authenticated")))
            .await
            .unwrap();

        assert!(matches!(transition, Transition::Failed { phase: Phase::Unauthorized, .. }));
        let bodies = status_bodies(&mock);
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["status"]["state"], "Unauthorized");
        assert!(bodies[0]["status"]["errorMessage"]
            .as_str()
            .unwrap()
            .contains("UnrecognizedClientException"));
        assert!(mock.requests_for("GET", SECRET_PATH).is_empty());
    }

    #[tokio::test]
    async fn test_missing_provider_is_errored() {
        let mock = MockService::new().on_patch(STATUS_PATH, 200, &status_response());
        let reconciler = reconciler(&mock, Arc::new(DefaultAuthenticatorFactory));

        let transition = reconciler
            .transition(&make_credentials(Some("Authenticating")))
            .await
            .unwrap();

        assert_eq!(
            transition,
            Transition::Failed {
                phase: Phase::Errored,
                message: "Provider not implemented".to_string(),
            }
        );
        assert_eq!(status_bodies(&mock)[0]["status"]["errorMessage"], "Provider not implemented");
    }

    #[tokio::test]
    async fn test_first_success_creates_secret_and_authenticates() {
        let mock = MockService::new()
            .on_patch(STATUS_PATH, 200, &status_response())
            .on_get(SECRET_PATH, 404, &not_found_json("secrets", "ecr"))
            .on_post(SECRETS_PATH, 201, &secret_json("ecr", "default"));
        let reconciler = reconciler(&mock, Arc::new(fake(Ok(login()))));

        let transition = reconciler.transition(&make_credentials(None)).await.unwrap();

        assert_eq!(
            transition,
            Transition::Authenticated {
                expires_at: login().expires_at
            }
        );

        let bodies = status_bodies(&mock);
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[0]["status"]["state"], "Authenticating");
        assert_eq!(bodies[1]["status"]["state"], "Authenticated");
        assert!(bodies[1]["status"]["errorMessage"].is_null());
        assert_eq!(bodies[1]["status"]["expirationTime"], "2030-01-01T00:00:00Z");

        let created: Secret =
            serde_json::from_str(&mock.requests_for("POST", SECRETS_PATH)[0].body).unwrap();
        let document: serde_json::Value =
            serde_json::from_slice(&created.data.unwrap()[".dockerconfigjson"].0).unwrap();
        assert_eq!(
            document["auths"]["123.dkr.ecr.eu-central-1.amazonaws.com"]["auth"],
            "QVdTOnBhc3N3b3Jk"
        );
    }

    #[tokio::test]
    async fn test_reauthentication_rewrites_identical_secret() {
        let first = MockService::new()
            .on_patch(STATUS_PATH, 200, &status_response())
            .on_get(SECRET_PATH, 404, &not_found_json("secrets", "ecr"))
            .on_post(SECRETS_PATH, 201, &secret_json("ecr", "default"));
        reconciler(&first, Arc::new(fake(Ok(login()))))
            .transition(&make_credentials(None))
            .await
            .unwrap();

        let second = MockService::new()
            .on_patch(STATUS_PATH, 200, &status_response())
            .on_get(SECRET_PATH, 200, &secret_json("ecr", "default"))
            .on_put(SECRET_PATH, 200, &secret_json("ecr", "default"));
        let transition = reconciler(&second, Arc::new(fake(Ok(login()))))
            .transition(&make_credentials(Some("Authenticated")))
            .await
            .unwrap();

        assert!(matches!(transition, Transition::Authenticated { .. }));
        let created: Secret =
            serde_json::from_str(&first.requests_for("POST", SECRETS_PATH)[0].body).unwrap();
        let replaced: Secret =
            serde_json::from_str(&second.requests_for("PUT", SECRET_PATH)[0].body).unwrap();
        assert_eq!(created.data, replaced.data);
        assert_eq!(created.type_, replaced.type_);
    }

    #[tokio::test]
    async fn test_secret_write_failure_is_errored() {
        let mock = MockService::new()
            .on_patch(STATUS_PATH, 200, &status_response())
            .on_get(SECRET_PATH, 200, &secret_json("ecr", "default"))
            .on_put(
                SECRET_PATH,
                403,
                &status_json(403, "Forbidden", "secrets \"ecr\" is forbidden"),
            );
        let reconciler = reconciler(&mock, Arc::new(fake(Ok(login()))));

        let transition = reconciler
            .transition(&make_credentials(Some("Authenticated")))
            .await
            .unwrap();

        match transition {
            Transition::Failed { phase, message } => {
                assert_eq!(phase, Phase::Errored);
                assert!(message.contains("forbidden"));
            }
            other => panic!("unexpected transition {:?}", other),
        }
        let bodies = status_bodies(&mock);
        assert_eq!(bodies.last().unwrap()["status"]["state"], "Errored");
    }

    #[tokio::test]
    async fn test_deletion_terminates_without_authenticating() {
        let mock = MockService::new().on_patch(STATUS_PATH, 200, &status_response());
        let authenticator = fake(Ok(login()));
        let calls = authenticator.calls.clone();
        let reconciler = reconciler(&mock, Arc::new(authenticator));

        let mut credentials = make_credentials(Some("Authenticated"));
        credentials.metadata.deletion_timestamp = Some(Time(Utc::now()));

        let transition = reconciler.transition(&credentials).await.unwrap();

        assert_eq!(transition, Transition::Terminated);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(status_bodies(&mock)[0]["status"]["state"], "Terminating");
    }

    #[tokio::test]
    async fn test_terminating_resource_is_left_alone() {
        let mock = MockService::new();
        let authenticator = fake(Ok(login()));
        let calls = authenticator.calls.clone();
        let reconciler = reconciler(&mock, Arc::new(authenticator));

        let mut credentials = make_credentials(Some("Terminating"));
        credentials.metadata.deletion_timestamp = Some(Time(Utc::now()));

        assert_eq!(reconciler.transition(&credentials).await.unwrap(), Transition::Terminated);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(status_bodies(&mock).is_empty());
    }

    #[tokio::test]
    async fn test_failed_status_write_is_a_reconcile_error() {
        let mock = MockService::new().on_patch(
            STATUS_PATH,
            409,
            &status_json(409, "Conflict", "the object has been modified"),
        );
        let reconciler = reconciler(
            &mock,
            Arc::new(fake(Err(AuthenticationError::errored("timeout")))),
        );

        assert!(reconciler
            .transition(&make_credentials(Some("Errored")))
            .await
            .is_err());
    }

    #[test]
    fn test_requeue_after_failure_uses_error_delay() {
        let config = Config::default();
        let transition = Transition::Failed {
            phase: Phase::Errored,
            message: "boom".to_string(),
        };

        assert_eq!(
            requeue_after(&transition, &config, Utc::now()),
            Some(config.error_requeue)
        );
    }

    #[test]
    fn test_requeue_after_rejection_waits_for_resync() {
        let config = Config::default();
        let transition = Transition::Failed {
            phase: Phase::Unauthorized,
            message: "UnrecognizedClientException: invalid token".to_string(),
        };

        let delay = requeue_after(&transition, &config, Utc::now()).unwrap();

        assert_eq!(delay, config.resync_interval);
        assert!(delay > config.error_requeue);
    }

    #[test]
    fn test_owned_secret_watch_is_limited_to_pull_secrets() {
        assert_eq!(
            owned_secrets_watcher().field_selector.as_deref(),
            Some("type=kubernetes.io/dockerconfigjson")
        );
    }

    #[test]
    fn test_requeue_after_termination_waits_for_change() {
        assert_eq!(
            requeue_after(&Transition::Terminated, &Config::default(), Utc::now()),
            None
        );
    }

    #[test]
    fn test_requeue_before_expiry() {
        let config = Config::default();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let transition = Transition::Authenticated {
            expires_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()),
        };

        // 30 minutes to expiry minus the 5 minute margin
        assert_eq!(
            requeue_after(&transition, &config, now),
            Some(Duration::from_secs(25 * 60))
        );
    }

    #[test]
    fn test_requeue_capped_by_resync_interval() {
        let config = Config::default();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let transition = Transition::Authenticated {
            expires_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
        };

        assert_eq!(
            requeue_after(&transition, &config, now),
            Some(config.resync_interval)
        );
    }

    #[test]
    fn test_requeue_never_immediate() {
        let config = Config::default();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let transition = Transition::Authenticated {
            expires_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap()),
        };

        assert_eq!(
            requeue_after(&transition, &config, now),
            Some(Duration::from_secs(MIN_REQUEUE_SECS))
        );
    }
}
