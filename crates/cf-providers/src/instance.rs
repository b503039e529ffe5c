//! ---
//! cf_section: "02-provider-adapters"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Shared instance state vocabulary and descriptors."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::handle::{InstanceHandle, Provider};

/// Provider-neutral lifecycle state. Every native status maps onto one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    Stopped,
    Running,
    Pending,
    Stopping,
    Deleted,
    Deleting,
    Unknown,
    Provisioning,
    Staging,
    Repairing,
    Terminated,
    Deallocated,
    Deallocating,
    Starting,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Stopped => "STOPPED",
            InstanceState::Running => "RUNNING",
            InstanceState::Pending => "PENDING",
            InstanceState::Stopping => "STOPPING",
            InstanceState::Deleted => "DELETED",
            InstanceState::Deleting => "DELETING",
            InstanceState::Unknown => "UNKNOWN",
            InstanceState::Provisioning => "PROVISIONING",
            InstanceState::Staging => "STAGING",
            InstanceState::Repairing => "REPAIRING",
            InstanceState::Terminated => "TERMINATED",
            InstanceState::Deallocated => "DEALLOCATED",
            InstanceState::Deallocating => "DEALLOCATING",
            InstanceState::Starting => "STARTING",
        }
    }

    /// Halted for good: nothing left to wait for after a stop request.
    pub fn is_stopped(&self) -> bool {
        matches!(
            self,
            InstanceState::Stopped | InstanceState::Terminated | InstanceState::Deallocated
        )
    }

    /// Halted, halting, or gone. Such members need no stop request.
    pub fn is_stopped_or_stopping(&self) -> bool {
        self.is_stopped()
            || matches!(
                self,
                InstanceState::Stopping
                    | InstanceState::Deallocating
                    | InstanceState::Deleted
                    | InstanceState::Deleting
            )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceState {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s.trim().to_ascii_uppercase().as_str() {
            "STOPPED" => InstanceState::Stopped,
            "RUNNING" => InstanceState::Running,
            "PENDING" => InstanceState::Pending,
            "STOPPING" => InstanceState::Stopping,
            "DELETED" => InstanceState::Deleted,
            "DELETING" => InstanceState::Deleting,
            "UNKNOWN" => InstanceState::Unknown,
            "PROVISIONING" => InstanceState::Provisioning,
            "STAGING" => InstanceState::Staging,
            "REPAIRING" => InstanceState::Repairing,
            "TERMINATED" => InstanceState::Terminated,
            "DEALLOCATED" => InstanceState::Deallocated,
            "DEALLOCATING" => InstanceState::Deallocating,
            "STARTING" => InstanceState::Starting,
            other => return Err(ProviderError::UnknownState(other.to_owned())),
        };
        Ok(state)
    }
}

/// Fresh snapshot of one instance as reported by its provider. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub provider: Provider,
    pub name: String,
    pub instance_type: String,
    pub state: InstanceState,
    pub handle: InstanceHandle,
    pub host: String,
}

/// Parameters for provisioning a new instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    pub provider: Provider,
    pub name: String,
    pub instance_type: String,
    pub image: String,
    /// Region, zone, or resource group depending on the provider.
    pub region: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_predicates_cover_provider_vocabularies() {
        for state in [
            InstanceState::Stopped,
            InstanceState::Terminated,
            InstanceState::Deallocated,
        ] {
            assert!(state.is_stopped());
            assert!(state.is_stopped_or_stopping());
        }
        for state in [
            InstanceState::Stopping,
            InstanceState::Deallocating,
            InstanceState::Deleted,
            InstanceState::Deleting,
        ] {
            assert!(!state.is_stopped());
            assert!(state.is_stopped_or_stopping());
        }
        for state in [
            InstanceState::Running,
            InstanceState::Pending,
            InstanceState::Starting,
            InstanceState::Staging,
            InstanceState::Unknown,
        ] {
            assert!(!state.is_stopped_or_stopping());
        }
    }

    #[test]
    fn state_names_round_trip() {
        let state: InstanceState = "deallocating".parse().unwrap();
        assert_eq!(state, InstanceState::Deallocating);
        assert_eq!(state.to_string(), "DEALLOCATING");
        assert_eq!(
            serde_json::to_string(&InstanceState::Running).unwrap(),
            "\"RUNNING\""
        );
    }
}
