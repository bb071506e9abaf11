// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Client;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use regcred::config::Config;
use regcred::events::{EventPublisher, KubeEventPublisher};
use regcred::kubernetes::wait_for_credential_crds;
use regcred::providers::{AuthenticatorFactory, DefaultAuthenticatorFactory};
use regcred::reconcilers::CredentialsReconciler;
use regcred::types::{EcrCredentials, RegistryCredentials};
use regcred::webhook::{self, WebhookState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Both the kube client and the webhook server use rustls
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting registry credentials operator");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Configuration loaded: resync_interval={:?}, error_requeue={:?}, webhook={}",
        config.resync_interval, config.error_requeue, config.webhook_bind_address
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    info!("Waiting for credential CRDs to become available...");
    wait_for_credential_crds(&client).await?;

    let authenticators: Arc<dyn AuthenticatorFactory> = Arc::new(DefaultAuthenticatorFactory);
    let events: Arc<dyn EventPublisher> = Arc::new(KubeEventPublisher::new(client.clone()));

    let registry_credentials = CredentialsReconciler::<RegistryCredentials>::new(
        client.clone(),
        config.clone(),
        authenticators.clone(),
        events.clone(),
    );
    let ecr_credentials = CredentialsReconciler::<EcrCredentials>::new(
        client.clone(),
        config.clone(),
        authenticators,
        events.clone(),
    );
    let webhook_state = Arc::new(WebhookState {
        client,
        config,
        events,
    });

    info!("Starting reconcilers and admission webhook...");

    tokio::try_join!(
        registry_credentials.run(),
        ecr_credentials.run(),
        webhook::serve(webhook_state)
    )?;

    warn!("All reconcilers stopped");
    Ok(())
}
