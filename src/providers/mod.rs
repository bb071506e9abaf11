// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Authenticators exchanging static provider credentials for a short-lived
//! registry token.

pub mod ecr;

use crate::types::{Phase, RegistryProvider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

pub use ecr::EcrAuthenticator;

/// A usable registry login produced by an authenticator
#[derive(Clone, PartialEq, Eq)]
pub struct AuthenticationResult {
    /// Registry host the token is valid for
    pub host: String,
    /// Opaque token placed verbatim in the pull-secret `auth` field
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for AuthenticationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationResult")
            .field("host", &self.host)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// How an authentication failure is surfaced on the credential resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The provider rejected the credentials; fixable only by the user
    Unauthorized,
    /// Anything else: network, region, throttling, unknown codes
    Errored,
}

impl From<ErrorClass> for Phase {
    fn from(class: ErrorClass) -> Self {
        match class {
            ErrorClass::Unauthorized => Phase::Unauthorized,
            ErrorClass::Errored => Phase::Errored,
        }
    }
}

/// A classified authentication failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AuthenticationError {
    pub class: ErrorClass,
    pub message: String,
}

impl AuthenticationError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        AuthenticationError {
            class: ErrorClass::Unauthorized,
            message: message.into(),
        }
    }

    pub fn errored(message: impl Into<String>) -> Self {
        AuthenticationError {
            class: ErrorClass::Errored,
            message: message.into(),
        }
    }
}

/// Raw failure of a remote provider call, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// Provider error code, e.g. `UnrecognizedClientException`
    pub code: Option<String>,
    pub message: String,
}

/// Exchanges long-lived provider credentials for a registry token.
/// Implementations never touch the credential resource itself.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Failures are returned already classified with `classify_error`.
    async fn authenticate(&self) -> std::result::Result<AuthenticationResult, AuthenticationError>;

    /// Provider policy: which failures only the user can fix
    fn classify_error(&self, error: &ProviderError) -> ErrorClass;

    fn classify(&self, error: ProviderError) -> AuthenticationError {
        AuthenticationError {
            class: self.classify_error(&error),
            message: error.message,
        }
    }
}

/// Resolves the provider configuration of a credential resource to its authenticator
pub trait AuthenticatorFactory: Send + Sync {
    fn authenticator(
        &self,
        provider: &RegistryProvider,
    ) -> std::result::Result<Box<dyn Authenticator>, AuthenticationError>;
}

/// Dispatches to the built-in providers
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAuthenticatorFactory;

impl AuthenticatorFactory for DefaultAuthenticatorFactory {
    fn authenticator(
        &self,
        provider: &RegistryProvider,
    ) -> std::result::Result<Box<dyn Authenticator>, AuthenticationError> {
        if let Some(ecr) = &provider.aws_elastic_container_registry {
            return Ok(Box::new(EcrAuthenticator::from_static_credentials(ecr)));
        }

        Err(AuthenticationError::errored("Provider not implemented"))
    }
}
