// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// API group served by the credential CRDs
pub const API_GROUP: &str = "registry.credentials.io";

/// API version served by the credential CRDs
pub const API_VERSION: &str = "v1alpha1";

/// The operator name used as event reporter and field manager
pub const OPERATOR_NAME: &str = "regcred-operator";

/// Registry pull-secret layout
pub mod pull_secret {
    /// Secret type marker understood by the kubelet
    pub const TYPE: &str = "kubernetes.io/dockerconfigjson";
    /// The single data key holding the docker config document
    pub const DATA_KEY: &str = ".dockerconfigjson";
}

/// AWS Elastic Container Registry host composition
pub mod ecr {
    /// Registry component of `{account}.dkr.ecr.{region}.amazonaws.com`
    pub const REGISTRY_DOMAIN: &str = "dkr.ecr";
    /// Cloud component of `{account}.dkr.ecr.{region}.amazonaws.com`
    pub const CLOUD_DOMAIN: &str = "amazonaws.com";
    /// Provider error codes meaning the static credentials were rejected
    pub const UNAUTHORIZED_CODES: &[&str] = &[
        "UnrecognizedClientException",
        "InvalidSignatureException",
        "InvalidClientTokenId",
        "SignatureDoesNotMatch",
    ];
}

/// Image reference defaults
pub mod image {
    /// Registry assumed for references without an explicit host
    pub const DEFAULT_REGISTRY: &str = "docker.io";
}

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}

/// Reconciliation timing
pub mod reconcile {
    /// Lower bound for any scheduled re-authentication, in seconds
    pub const MIN_REQUEUE_SECS: u64 = 30;
}
