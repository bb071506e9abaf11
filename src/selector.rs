// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Image reference parsing and image selector evaluation.

use crate::constants::image::DEFAULT_REGISTRY;
use crate::error::Result;
use crate::types::ImageSelector;
use regex::Regex;

/// A container image reference split into its registry host and the full reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference<'a> {
    pub full: &'a str,
    pub host: &'a str,
}

impl<'a> ImageReference<'a> {
    /// Parse an image reference. The first path component is the registry host
    /// when it looks like one (contains `.` or `:`, or is `localhost`);
    /// otherwise the image lives on the default registry.
    pub fn parse(full: &'a str) -> Self {
        let host = match full.split_once('/') {
            Some((first, _))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                first
            }
            _ => DEFAULT_REGISTRY,
        };
        ImageReference { full, host }
    }
}

impl ImageSelector {
    /// Check whether any rule of this selector matches the image.
    /// A malformed regular expression is an error, never a silent mismatch.
    pub fn matches(&self, image: &ImageReference<'_>) -> Result<bool> {
        let host_regexps = compile(&self.match_host_regexp)?;
        let full_regexps = compile(&self.match_regexp)?;

        Ok(self.match_host_exact.iter().any(|h| h == image.host)
            || self.match_exact.iter().any(|e| e == image.full)
            || host_regexps.iter().any(|r| r.is_match(image.host))
            || full_regexps.iter().any(|r| r.is_match(image.full)))
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(Into::into))
        .collect()
}
