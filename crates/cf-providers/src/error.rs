//! ---
//! cf_section: "02-provider-adapters"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Uniform instance management across cloud providers."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use crate::handle::{InstanceHandle, Provider};

/// Result alias used throughout the provider crate.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Failures raised by adapters and the multi-provider facade.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// No adapter was configured for the provider.
    #[error("provider {0} has not been initialised")]
    NotInitialized(Provider),
    /// The instance vanished outside of this system.
    #[error("instance {0} was not found")]
    NotFound(InstanceHandle),
    /// Any other upstream failure: bad request, quota, transient network.
    #[error("{provider} request failed: {message}")]
    Upstream { provider: Provider, message: String },
    /// A serialized handle could not be decoded.
    #[error("invalid instance handle: {0}")]
    InvalidHandle(String),
    /// A state name outside the shared vocabulary.
    #[error("unknown instance state '{0}'")]
    UnknownState(String),
}

impl ProviderError {
    /// Wrap an SDK failure, keeping its full context chain in the message.
    pub fn upstream(provider: Provider, err: impl std::fmt::Display) -> Self {
        ProviderError::Upstream {
            provider,
            message: err.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_not_found_is_recoverable() {
        let handle = InstanceHandle::new("i-1", "us-east-1", Provider::Aws);
        assert!(ProviderError::NotFound(handle).is_not_found());
        assert!(!ProviderError::NotInitialized(Provider::Gcp).is_not_found());
        assert!(!ProviderError::upstream(Provider::Azure, "quota exceeded").is_not_found());
    }

    #[test]
    fn upstream_message_is_surfaced() {
        let err = ProviderError::upstream(Provider::Aws, "throttled");
        assert_eq!(err.to_string(), "AWS request failed: throttled");
    }
}
