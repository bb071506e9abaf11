// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CRD availability checking utilities

use crate::constants::crd::{POLL_INTERVAL_SECS, POLL_MAX_INTERVAL_SECS};
use crate::constants::{API_GROUP, API_VERSION};
use crate::error::Result;
use kube::{discovery::Discovery, Client};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Kinds that must be served before the reconcilers and the webhook start
pub const REQUIRED_KINDS: &[&str] = &["RegistryCredentials", "ECRCredentials"];

/// Wait for the credential CRDs to become available in the cluster.
/// This uses exponential backoff starting at POLL_INTERVAL_SECS seconds.
pub async fn wait_for_credential_crds(client: &Client) -> Result<()> {
    let mut interval = POLL_INTERVAL_SECS;

    loop {
        match missing_kinds(client).await {
            Ok(missing) if missing.is_empty() => {
                info!("Credential CRDs ({}/{}) are available", API_GROUP, API_VERSION);
                return Ok(());
            }
            Ok(missing) => {
                info!(
                    "CRDs {:?} ({}/{}) not yet available, waiting {} seconds...",
                    missing, API_GROUP, API_VERSION, interval
                );
            }
            Err(e) => {
                warn!(
                    "Error checking for credential CRDs: {}, retrying in {} seconds...",
                    e, interval
                );
            }
        }

        sleep(Duration::from_secs(interval)).await;

        // Exponential backoff with max cap
        interval = (interval * 2).min(POLL_MAX_INTERVAL_SECS);
    }
}

/// Required kinds that discovery does not report yet
async fn missing_kinds(client: &Client) -> Result<Vec<&'static str>> {
    let discovery = Discovery::new(client.clone())
        .filter(&[API_GROUP])
        .run()
        .await?;

    let served: Vec<String> = discovery
        .groups()
        .filter(|group| group.name() == API_GROUP)
        .flat_map(|group| group.recommended_resources())
        .filter(|(ar, _)| ar.version == API_VERSION)
        .map(|(ar, _)| ar.kind)
        .collect();

    Ok(REQUIRED_KINDS
        .iter()
        .copied()
        .filter(|kind| !served.iter().any(|s| s == kind))
        .collect())
}
