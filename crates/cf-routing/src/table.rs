//! ---
//! cf_section: "05-routing"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "In-process route table read by the proxy."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::collections::HashMap;

use cf_cluster::ClusterId;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use url::Url;

use crate::access_path;

/// One forwarding rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteEntry {
    pub cluster_id: ClusterId,
    /// Path pattern matched by the proxy, e.g. `/access/{id}/**`.
    pub pattern: String,
    pub target: Url,
    pub published_at: DateTime<Utc>,
}

/// Route entries keyed by cluster id.
#[derive(Debug)]
pub struct RoutingTable {
    access_prefix: String,
    routes: RwLock<HashMap<ClusterId, RouteEntry>>,
}

impl RoutingTable {
    pub fn new(access_prefix: impl Into<String>) -> Self {
        Self {
            access_prefix: access_prefix.into(),
            routes: RwLock::new(HashMap::new()),
        }
    }

    pub fn access_prefix(&self) -> &str {
        &self.access_prefix
    }

    /// Build an entry for `target` under this table's prefix.
    pub fn entry_for(&self, cluster_id: ClusterId, target: Url) -> RouteEntry {
        RouteEntry {
            cluster_id,
            pattern: access_path::pattern(&self.access_prefix, cluster_id),
            target,
            published_at: Utc::now(),
        }
    }

    /// Install or overwrite the route of `entry.cluster_id`. Returns the replaced entry.
    pub fn install(&self, entry: RouteEntry) -> Option<RouteEntry> {
        self.routes.write().insert(entry.cluster_id, entry)
    }

    pub fn remove(&self, cluster_id: ClusterId) -> Option<RouteEntry> {
        self.routes.write().remove(&cluster_id)
    }

    pub fn get(&self, cluster_id: ClusterId) -> Option<RouteEntry> {
        self.routes.read().get(&cluster_id).cloned()
    }

    pub fn entries(&self) -> Vec<RouteEntry> {
        let mut entries: Vec<RouteEntry> = self.routes.read().values().cloned().collect();
        entries.sort_by_key(|entry| entry.cluster_id);
        entries
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }

    /// Upstream URL for a proxied request path (query string included).
    pub fn resolve(&self, request_path: &str) -> Option<Url> {
        let (path, query) = match request_path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (request_path, None),
        };
        let (cluster_id, rest) = access_path::split(path, &self.access_prefix)?;
        let mut url = self.routes.read().get(&cluster_id)?.target.clone();
        let base = url.path().trim_end_matches('/').to_owned();
        let joined = match (base.is_empty(), rest.is_empty()) {
            (true, true) => "/".to_owned(),
            _ => format!("{base}{rest}"),
        };
        url.set_path(&joined);
        url.set_query(query);
        Some(url)
    }
}
