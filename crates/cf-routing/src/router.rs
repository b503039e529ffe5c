//! ---
//! cf_section: "05-routing"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Publishes cluster routes against live instance state."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::sync::Arc;

use cf_cluster::{Cluster, ClusterId};
use cf_providers::{InstanceState, MultiProvider};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Result, RoutingError};
use crate::table::{RouteEntry, RoutingTable};

/// Derives forwarding targets from clusters and installs them in the table.
///
/// A published route always points at an instance that was `RUNNING` when the
/// route was written.
#[derive(Debug, Clone)]
pub struct DynamicRouter {
    providers: Arc<MultiProvider>,
    table: Arc<RoutingTable>,
    scheme: String,
}

impl DynamicRouter {
    pub fn new(
        providers: Arc<MultiProvider>,
        table: Arc<RoutingTable>,
        scheme: impl Into<String>,
    ) -> Self {
        Self {
            providers,
            table,
            scheme: scheme.into(),
        }
    }

    pub fn table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    /// Point the cluster's route at the live host of its access instance.
    pub async fn publish(&self, cluster: &Cluster) -> Result<RouteEntry> {
        let access = cluster
            .access_instance()
            .ok_or(RoutingError::NoAccessInstance(cluster.id))?;
        let live = self.providers.get(access).await?;
        if live.state != InstanceState::Running {
            return Err(RoutingError::NotRunning {
                handle: access.clone(),
                state: live.state,
            });
        }
        let target = self.target_url(&live.host, cluster.target_port, &cluster.target_path)?;
        let entry = self.table.entry_for(cluster.id, target);
        let replaced = self.table.install(entry.clone());
        info!(
            cluster = %cluster.id,
            target = %entry.target,
            replaced = replaced.is_some(),
            "route published"
        );
        Ok(entry)
    }

    /// Drop the cluster's route. Returns `false` if none was installed.
    pub fn unpublish(&self, cluster_id: ClusterId) -> bool {
        let removed = self.table.remove(cluster_id).is_some();
        if removed {
            info!(cluster = %cluster_id, "route removed");
        }
        removed
    }

    /// Republish every cluster, logging failures. Returns how many routes were installed.
    pub async fn rebuild(&self, clusters: &[Cluster]) -> usize {
        let mut published = 0;
        for cluster in clusters {
            if cluster.access_instance().is_none() {
                debug!(cluster = %cluster.id, "no access instance, skipping route");
                continue;
            }
            match self.publish(cluster).await {
                Ok(_) => published += 1,
                Err(err) => {
                    warn!(cluster = %cluster.id, error = %err, "route not rebuilt");
                }
            }
        }
        published
    }

    fn target_url(&self, host: &str, port: u16, path: &str) -> Result<Url> {
        let invalid = |target: String, reason: String| RoutingError::InvalidTarget { target, reason };
        if host.is_empty() {
            return Err(invalid(
                format!("{}://:{port}{path}", self.scheme),
                "access instance has no host".to_owned(),
            ));
        }
        let separator = if path.is_empty() || path.starts_with('/') {
            ""
        } else {
            "/"
        };
        let raw = format!("{}://{host}:{port}{separator}{path}", self.scheme);
        Url::parse(&raw).map_err(|err| invalid(raw.clone(), err.to_string()))
    }
}
