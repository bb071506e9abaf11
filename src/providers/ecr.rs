// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! AWS Elastic Container Registry authenticator.
//!
//! Requests an authorization token and resolves the caller's account, since
//! the registry host is `{account}.dkr.ecr.{region}.amazonaws.com` and is not
//! returned by the token call.

use crate::constants::ecr::{CLOUD_DOMAIN, REGISTRY_DOMAIN, UNAUTHORIZED_CODES};
use crate::constants::OPERATOR_NAME;
use crate::providers::{
    AuthenticationError, AuthenticationResult, Authenticator, ErrorClass, ProviderError,
};
use crate::types::AwsElasticContainerRegistry;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_sdk_ecr::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

impl ProviderError {
    fn from_sdk<E, R>(err: SdkError<E, R>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
        R: std::fmt::Debug + 'static,
    {
        let message = match (err.code(), err.message()) {
            (Some(code), Some(message)) => format!("{}: {}", code, message),
            _ => DisplayErrorContext(&err).to_string(),
        };
        ProviderError {
            code: err.code().map(str::to_string),
            message,
        }
    }

    fn missing(what: &str) -> Self {
        ProviderError {
            code: None,
            message: format!("AWS response did not contain {}", what),
        }
    }
}

/// Token returned by the registry authorization call
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// The two remote operations the ECR authenticator depends on
#[async_trait]
pub trait EcrApi: Send + Sync {
    /// Issue a registry authorization token for the authenticated session
    async fn authorization_token(&self) -> Result<AuthorizationToken, ProviderError>;

    /// Resolve the account id of the authenticated caller
    async fn caller_account(&self) -> Result<String, ProviderError>;
}

/// `EcrApi` backed by the AWS SDK, authenticated with static credentials
pub struct SdkEcrApi {
    ecr: aws_sdk_ecr::Client,
    sts: aws_sdk_sts::Client,
}

impl SdkEcrApi {
    pub fn new(credentials: &AwsElasticContainerRegistry) -> Self {
        let static_credentials = Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            None,
            None,
            OPERATOR_NAME,
        );

        let sdk_config = SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(credentials.region.clone()))
            .credentials_provider(SharedCredentialsProvider::new(static_credentials))
            .build();

        SdkEcrApi {
            ecr: aws_sdk_ecr::Client::new(&sdk_config),
            sts: aws_sdk_sts::Client::new(&sdk_config),
        }
    }
}

#[async_trait]
impl EcrApi for SdkEcrApi {
    async fn authorization_token(&self) -> Result<AuthorizationToken, ProviderError> {
        let output = self
            .ecr
            .get_authorization_token()
            .send()
            .await
            .map_err(ProviderError::from_sdk)?;

        let data = output
            .authorization_data()
            .first()
            .ok_or_else(|| ProviderError::missing("authorization data"))?;
        let token = data
            .authorization_token()
            .ok_or_else(|| ProviderError::missing("an authorization token"))?;

        Ok(AuthorizationToken {
            token: token.to_string(),
            expires_at: data
                .expires_at()
                .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
        })
    }

    async fn caller_account(&self) -> Result<String, ProviderError> {
        let output = self
            .sts
            .get_caller_identity()
            .send()
            .await
            .map_err(ProviderError::from_sdk)?;

        output
            .account()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::missing("an account id"))
    }
}

pub struct EcrAuthenticator<A = SdkEcrApi> {
    api: A,
    region: String,
}

impl EcrAuthenticator<SdkEcrApi> {
    pub fn from_static_credentials(credentials: &AwsElasticContainerRegistry) -> Self {
        EcrAuthenticator::new(SdkEcrApi::new(credentials), credentials.region.clone())
    }
}

impl<A: EcrApi> EcrAuthenticator<A> {
    pub fn new(api: A, region: impl Into<String>) -> Self {
        EcrAuthenticator {
            api,
            region: region.into(),
        }
    }
}

#[async_trait]
impl<A: EcrApi> Authenticator for EcrAuthenticator<A> {
    #[instrument(skip(self), fields(region = %self.region))]
    async fn authenticate(&self) -> Result<AuthenticationResult, AuthenticationError> {
        let token = self.api.authorization_token().await.map_err(|e| {
            info!("Unable to get authorization token: {}", e.message);
            self.classify(e)
        })?;

        // A token without a resolvable host is not a usable login
        let account = self.api.caller_account().await.map_err(|e| {
            info!("Unable to get caller identity: {}", e.message);
            self.classify(e)
        })?;

        let host = registry_host(&account, &self.region);
        debug!("Authenticated against registry {}", host);

        Ok(AuthenticationResult {
            host,
            token: token.token,
            expires_at: token.expires_at,
        })
    }

    /// Rejected or badly signed credentials are the caller's to fix; everything else is transient
    fn classify_error(&self, error: &ProviderError) -> ErrorClass {
        match error.code.as_deref() {
            Some(code) if UNAUTHORIZED_CODES.contains(&code) => ErrorClass::Unauthorized,
            _ => ErrorClass::Errored,
        }
    }
}

/// Build the registry host for an account and region
pub fn registry_host(account: &str, region: &str) -> String {
    format!("{}.{}.{}.{}", account, REGISTRY_DOMAIN, region, CLOUD_DOMAIN)
}
