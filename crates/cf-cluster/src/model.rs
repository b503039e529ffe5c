//! ---
//! cf_section: "01-core-functionality"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Cluster aggregate and persistence contract."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use cf_providers::InstanceHandle;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ClusterError;

/// Globally unique cluster identifier, generated once at creation.
pub type ClusterId = Uuid;

/// Lifecycle state of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterState {
    /// The cluster has no members.
    #[default]
    NoInstances,
    /// Traffic is served by the access instance.
    Operational,
    /// A transition is starting, repointing, or stopping members.
    Transitioning,
    /// Reserved for operator-marked failures.
    Failed,
    /// State could not be determined.
    Unknown,
}

impl ClusterState {
    /// Upper snake case name, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterState::NoInstances => "NO_INSTANCES",
            ClusterState::Operational => "OPERATIONAL",
            ClusterState::Transitioning => "TRANSITIONING",
            ClusterState::Failed => "FAILED",
            ClusterState::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Association of an instance with a priority. Lower numbers win.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMembership {
    /// Member instance.
    pub handle: InstanceHandle,
    /// Selection priority; lower is preferred.
    pub priority: i32,
}

impl ClusterMembership {
    /// Build a membership record.
    pub fn new(handle: InstanceHandle, priority: i32) -> Self {
        Self { handle, priority }
    }
}

/// Logical failover unit grouping candidate instances behind one route.
///
/// Memberships keep insertion order, which is also the tie-break order for
/// equal priorities. `access_instance` and `backup_instance` always reference
/// current members; mutators enforce this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Identifier.
    pub id: ClusterId,
    /// Display name.
    pub name: String,
    memberships: Vec<ClusterMembership>,
    access_instance: Option<InstanceHandle>,
    backup_instance: Option<InstanceHandle>,
    /// Port on the access instance that traffic is forwarded to.
    pub target_port: u16,
    /// Path prefix appended to the forwarding target.
    pub target_path: String,
    /// Whether the engine starts and stops members on its own.
    pub enable_instance_state_management: bool,
    /// Keep the backup running alongside the access instance.
    pub enable_hot_backup: bool,
    /// Worsen the access instance's priority when latency anomalies pile up.
    pub enable_automatic_priority_adjustment: bool,
    /// Lifecycle state. Repositories only change it through their state operations.
    #[serde(default)]
    pub state: ClusterState,
}

impl Cluster {
    /// Empty cluster with a fresh id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            memberships: Vec::new(),
            access_instance: None,
            backup_instance: None,
            target_port: 80,
            target_path: String::new(),
            enable_instance_state_management: false,
            enable_hot_backup: false,
            enable_automatic_priority_adjustment: false,
            state: ClusterState::NoInstances,
        }
    }

    /// Memberships in insertion order.
    pub fn memberships(&self) -> &[ClusterMembership] {
        &self.memberships
    }

    /// Member handles in insertion order.
    pub fn handles(&self) -> Vec<InstanceHandle> {
        self.memberships.iter().map(|m| m.handle.clone()).collect()
    }

    /// Number of members.
    pub fn member_count(&self) -> usize {
        self.memberships.len()
    }

    /// Whether `handle` is a member.
    pub fn has_member(&self, handle: &InstanceHandle) -> bool {
        self.memberships.iter().any(|m| &m.handle == handle)
    }

    /// Membership record for `handle`.
    pub fn membership(&self, handle: &InstanceHandle) -> Option<&ClusterMembership> {
        self.memberships.iter().find(|m| &m.handle == handle)
    }

    /// Add `handle` with `priority`. Returns `false` if it was already a member.
    pub fn add_membership(&mut self, handle: InstanceHandle, priority: i32) -> bool {
        if self.has_member(&handle) {
            return false;
        }
        self.memberships.push(ClusterMembership::new(handle, priority));
        true
    }

    /// Remove `handle`. Clearing the access instance also clears the backup.
    ///
    /// Returns `false` if it was not a member.
    pub fn remove_membership(&mut self, handle: &InstanceHandle) -> bool {
        let before = self.memberships.len();
        self.memberships.retain(|m| &m.handle != handle);
        if self.memberships.len() == before {
            return false;
        }
        if self.access_instance.as_ref() == Some(handle) {
            self.access_instance = None;
            self.backup_instance = None;
        }
        if self.backup_instance.as_ref() == Some(handle) {
            self.backup_instance = None;
        }
        true
    }

    /// Overwrite a member's priority and return the updated record.
    pub fn set_priority(
        &mut self,
        handle: &InstanceHandle,
        priority: i32,
    ) -> Result<&ClusterMembership, ClusterError> {
        let membership = self
            .memberships
            .iter_mut()
            .find(|m| &m.handle == handle)
            .ok_or_else(|| ClusterError::NotAMember(handle.clone()))?;
        membership.priority = priority;
        Ok(membership)
    }

    /// Worsen a member's priority by one. Returns the new priority.
    pub fn demote(&mut self, handle: &InstanceHandle) -> Option<i32> {
        let membership = self.memberships.iter_mut().find(|m| &m.handle == handle)?;
        membership.priority = membership.priority.saturating_add(1);
        Some(membership.priority)
    }

    /// Member currently receiving live traffic.
    pub fn access_instance(&self) -> Option<&InstanceHandle> {
        self.access_instance.as_ref()
    }

    /// Secondary member, optionally kept running.
    pub fn backup_instance(&self) -> Option<&InstanceHandle> {
        self.backup_instance.as_ref()
    }

    /// Replace access and backup together.
    pub fn set_selection(
        &mut self,
        access: Option<InstanceHandle>,
        backup: Option<InstanceHandle>,
    ) -> Result<(), ClusterError> {
        check_selection(&self.memberships, access.as_ref(), backup.as_ref())?;
        self.access_instance = access;
        self.backup_instance = backup;
        Ok(())
    }

    /// Check the selection invariants; used on records read from storage.
    pub fn validate(&self) -> Result<(), ClusterError> {
        check_selection(
            &self.memberships,
            self.access_instance.as_ref(),
            self.backup_instance.as_ref(),
        )
    }
}

fn check_selection(
    memberships: &[ClusterMembership],
    access: Option<&InstanceHandle>,
    backup: Option<&InstanceHandle>,
) -> Result<(), ClusterError> {
    for handle in access.into_iter().chain(backup) {
        if !memberships.iter().any(|m| &m.handle == handle) {
            return Err(ClusterError::NotAMember(handle.clone()));
        }
    }
    match (access, backup) {
        (None, Some(_)) => Err(ClusterError::BackupWithoutAccess),
        (Some(a), Some(b)) if a == b => Err(ClusterError::DuplicateSelection),
        _ => Ok(()),
    }
}

/// Parameters for creating a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Display name.
    pub name: String,
    /// Initial members; `None` priorities receive the configured default.
    #[serde(default)]
    pub members: Vec<(InstanceHandle, Option<i32>)>,
    /// Forwarding port.
    pub target_port: u16,
    /// Forwarding path prefix.
    #[serde(default)]
    pub target_path: String,
    /// See [`Cluster::enable_instance_state_management`].
    #[serde(default)]
    pub enable_instance_state_management: bool,
    /// See [`Cluster::enable_hot_backup`].
    #[serde(default)]
    pub enable_hot_backup: bool,
    /// See [`Cluster::enable_automatic_priority_adjustment`].
    #[serde(default)]
    pub enable_automatic_priority_adjustment: bool,
}

impl ClusterSpec {
    /// Spec with no members and every automation switched off.
    pub fn new(name: impl Into<String>, target_port: u16, target_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            target_port,
            target_path: target_path.into(),
            enable_instance_state_management: false,
            enable_hot_backup: false,
            enable_automatic_priority_adjustment: false,
        }
    }

    /// Add a member, optionally with an explicit priority.
    pub fn with_member(mut self, handle: InstanceHandle, priority: Option<i32>) -> Self {
        self.members.push((handle, priority));
        self
    }

    /// Switch on state management, hot backup and automatic priority adjustment.
    pub fn fully_managed(mut self) -> Self {
        self.enable_instance_state_management = true;
        self.enable_hot_backup = true;
        self.enable_automatic_priority_adjustment = true;
        self
    }
}

/// Partial update of a cluster; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterUpdate {
    /// New display name.
    pub name: Option<String>,
    /// Complete desired member list; missing members are removed, new ones added.
    pub instances: Option<Vec<InstanceHandle>>,
    /// Explicit access instance.
    pub access_instance: Option<InstanceHandle>,
    /// Explicit backup instance.
    pub backup_instance: Option<InstanceHandle>,
    /// New forwarding port.
    pub target_port: Option<u16>,
    /// New forwarding path.
    pub target_path: Option<String>,
    /// See [`Cluster::enable_instance_state_management`].
    pub enable_instance_state_management: Option<bool>,
    /// See [`Cluster::enable_hot_backup`].
    pub enable_hot_backup: Option<bool>,
    /// See [`Cluster::enable_automatic_priority_adjustment`].
    pub enable_automatic_priority_adjustment: Option<bool>,
}

impl ClusterUpdate {
    /// Whether the caller picked access or backup explicitly.
    pub fn selects_explicitly(&self) -> bool {
        self.access_instance.is_some() || self.backup_instance.is_some()
    }

    /// Whether the forwarding target changes.
    pub fn changes_target(&self) -> bool {
        self.target_port.is_some() || self.target_path.is_some()
    }
}
