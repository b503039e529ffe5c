//! ---
//! cf_section: "02-provider-adapters"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Provider-tagged instance identifiers."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Closed set of supported cloud providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Provider {
    Aws,
    Azure,
    Gcp,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Aws, Provider::Azure, Provider::Gcp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "AWS",
            Provider::Azure => "AZURE",
            Provider::Gcp => "GCP",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" => Ok(Provider::Aws),
            "azure" => Ok(Provider::Azure),
            "gcp" => Ok(Provider::Gcp),
            other => Err(ProviderError::InvalidHandle(format!(
                "unknown provider '{other}'"
            ))),
        }
    }
}

/// Immutable identifier of one cloud instance.
///
/// `region` is the provider's placement scope: an AWS region, a GCP zone, or an
/// Azure resource group. Equality and hashing cover all three fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceHandle {
    instance_id: String,
    region: String,
    provider: Provider,
}

impl InstanceHandle {
    pub fn new(instance_id: impl Into<String>, region: impl Into<String>, provider: Provider) -> Self {
        Self {
            instance_id: instance_id.into(),
            region: region.into(),
            provider,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Opaque, URL-safe form usable as a path segment or map key.
    pub fn to_token(&self) -> String {
        // Serializing a struct of strings and a unit enum cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Inverse of [`InstanceHandle::to_token`].
    pub fn from_token(token: &str) -> Result<Self, ProviderError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|err| ProviderError::InvalidHandle(format!("{token}: {err}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|err| ProviderError::InvalidHandle(format!("{token}: {err}")))
    }
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.provider, self.region, self.instance_id)
    }
}

impl FromStr for InstanceHandle {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_token(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn equality_is_structural() {
        let a = InstanceHandle::new("i-1", "us-east-1", Provider::Aws);
        let b = InstanceHandle::new("i-1", "us-east-1", Provider::Aws);
        assert_eq!(a, b);
        assert_ne!(a, InstanceHandle::new("i-1", "us-east-2", Provider::Aws));
        assert_ne!(a, InstanceHandle::new("i-2", "us-east-1", Provider::Aws));
        assert_ne!(a, InstanceHandle::new("i-1", "us-east-1", Provider::Gcp));

        let set: HashSet<_> = [a.clone(), b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn token_is_lossless_and_path_safe() {
        let handles = [
            InstanceHandle::new("i-0abc", "eu-west-1", Provider::Aws),
            InstanceHandle::new("web/1 ?x", "us-central1-a", Provider::Gcp),
            InstanceHandle::new("vm-ü", "SeniorDesign", Provider::Azure),
        ];
        for handle in handles {
            let token = handle.to_token();
            assert!(token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
            assert_eq!(token.parse::<InstanceHandle>().unwrap(), handle);
        }
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        assert!(matches!(
            InstanceHandle::from_token("not*base64"),
            Err(ProviderError::InvalidHandle(_))
        ));
        let not_json = URL_SAFE_NO_PAD.encode(b"plain");
        assert!(InstanceHandle::from_token(&not_json).is_err());
    }

    #[test]
    fn provider_parses_case_insensitively() {
        assert_eq!("aws".parse::<Provider>().unwrap(), Provider::Aws);
        assert_eq!("GCP".parse::<Provider>().unwrap(), Provider::Gcp);
        assert_eq!(" Azure ".parse::<Provider>().unwrap(), Provider::Azure);
        assert!("oracle".parse::<Provider>().is_err());
    }
}
