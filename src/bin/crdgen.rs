// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Print the credential CRD manifests as a multi-document YAML stream.

use kube::CustomResourceExt;
use regcred::types::{EcrCredentials, RegistryCredentials};

fn main() -> anyhow::Result<()> {
    let manifests = [
        serde_yaml::to_string(&RegistryCredentials::crd())?,
        serde_yaml::to_string(&EcrCredentials::crd())?,
    ];

    for manifest in manifests {
        println!("---");
        print!("{manifest}");
    }

    Ok(())
}
