// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Observed lifecycle of a credential resource.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of a credential resource. An unset phase is treated as `Authenticating`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub enum Phase {
    Authenticating,
    Unauthorized,
    #[serde(alias = "Error")]
    Errored,
    Authenticated,
    #[serde(alias = "Terminanting")]
    Terminating,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Authenticating => "Authenticating",
            Phase::Unauthorized => "Unauthorized",
            Phase::Errored => "Errored",
            Phase::Authenticated => "Authenticated",
            Phase::Terminating => "Terminating",
        }
    }

    /// Phases that carry an error message
    pub fn is_error(&self) -> bool {
        matches!(self, Phase::Unauthorized | Phase::Errored)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check whether an observed phase still waits for its first authentication outcome
pub fn is_pending(phase: Option<Phase>) -> bool {
    matches!(phase, None | Some(Phase::Authenticating))
}

/// A status transition to be written to the status subresource
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusUpdate {
    pub phase: Phase,
    pub error_message: Option<String>,
    pub authenticated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    /// Enter a phase that carries no error message
    pub fn phase(phase: Phase) -> Self {
        StatusUpdate {
            phase,
            error_message: None,
            authenticated_at: None,
            expires_at: None,
        }
    }

    /// Enter an error phase with its message. Non-error phases never keep a message.
    pub fn failed(phase: Phase, message: impl Into<String>) -> Self {
        StatusUpdate {
            error_message: phase.is_error().then(|| message.into()),
            ..StatusUpdate::phase(phase)
        }
    }

    pub fn authenticated(at: DateTime<Utc>, expires_at: Option<DateTime<Utc>>) -> Self {
        StatusUpdate {
            authenticated_at: Some(at),
            expires_at,
            ..StatusUpdate::phase(Phase::Authenticated)
        }
    }
}

/// Format a timestamp the way the Kubernetes API serializes `metav1.Time`
pub fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}
