//! ---
//! cf_section: "03-persistence-logging"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "JSON file backed cluster repository."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{RepositoryError, Result};
use crate::model::{Cluster, ClusterId, ClusterState};
use crate::repository::ClusterRepository;

/// Current on-disk envelope version.
pub const CLUSTER_FILE_VERSION: u16 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ClusterEnvelope {
    version: u16,
    cluster: Cluster,
}

/// Stores each cluster as `<id>.json` inside one directory.
///
/// Writes go to a temporary file that is renamed over the target, so a reader
/// never observes a half-written record. Mutations are serialized by an
/// internal lock which also makes the state compare-and-set atomic.
#[derive(Debug)]
pub struct JsonFileClusterRepository {
    directory: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileClusterRepository {
    /// Open (and create if needed) the storage directory.
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).await?;
        debug!(directory = %directory.display(), "opened cluster store");
        Ok(Self {
            directory,
            write_lock: Mutex::new(()),
        })
    }

    /// Directory holding the cluster files.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, id: ClusterId) -> PathBuf {
        self.directory.join(format!("{id}.json"))
    }

    async fn read(&self, id: ClusterId) -> Result<Option<Cluster>> {
        read_file(&self.path_for(id)).await
    }

    async fn write(&self, cluster: &Cluster) -> Result<()> {
        let envelope = ClusterEnvelope {
            version: CLUSTER_FILE_VERSION,
            cluster: cluster.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&envelope)?;
        let target = self.path_for(cluster.id);
        let staging = self.directory.join(format!(".{}.json.tmp", cluster.id));
        fs::write(&staging, bytes).await?;
        fs::rename(&staging, &target).await?;
        Ok(())
    }
}

async fn read_file(path: &Path) -> Result<Option<Cluster>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let envelope: ClusterEnvelope = serde_json::from_slice(&bytes)?;
    if envelope.version != CLUSTER_FILE_VERSION {
        warn!(
            path = %path.display(),
            version = envelope.version,
            "cluster file written by a different format version"
        );
    }
    let cluster = envelope.cluster;
    cluster
        .validate()
        .map_err(|source| RepositoryError::Corrupt {
            id: cluster.id,
            source,
        })?;
    Ok(Some(cluster))
}

#[async_trait]
impl ClusterRepository for JsonFileClusterRepository {
    async fn load_all(&self) -> Result<Vec<Cluster>> {
        let mut entries = fs::read_dir(&self.directory).await?;
        let mut clusters = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_record = path.extension().and_then(|ext| ext.to_str()) == Some("json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_record {
                continue;
            }
            if let Some(cluster) = read_file(&path).await? {
                clusters.push(cluster);
            }
        }
        clusters.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(clusters)
    }

    async fn load(&self, id: ClusterId) -> Result<Cluster> {
        self.read(id).await?.ok_or(RepositoryError::NotFound(id))
    }

    async fn save(&self, cluster: &Cluster) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut record = cluster.clone();
        if let Some(stored) = self.read(cluster.id).await? {
            record.state = stored.state;
        }
        self.write(&record).await
    }

    async fn delete(&self, id: ClusterId) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn set_state(&self, id: ClusterId, state: ClusterState) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut stored = self.read(id).await?.ok_or(RepositoryError::NotFound(id))?;
        stored.state = state;
        self.write(&stored).await
    }

    async fn compare_and_set_state(
        &self,
        id: ClusterId,
        expected: ClusterState,
        new: ClusterState,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut stored = self.read(id).await?.ok_or(RepositoryError::NotFound(id))?;
        if stored.state != expected {
            return Ok(false);
        }
        stored.state = new;
        self.write(&stored).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_providers::{InstanceHandle, Provider};
    use tempfile::tempdir;

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        let mut cluster = Cluster::new("api");
        let handle = InstanceHandle::new("i-1", "us-east-1", Provider::Aws);
        cluster.add_membership(handle.clone(), 1);
        cluster.set_selection(Some(handle.clone()), None).unwrap();

        {
            let repo = JsonFileClusterRepository::open(dir.path()).await.unwrap();
            repo.save(&cluster).await.unwrap();
            repo.set_state(cluster.id, ClusterState::Operational)
                .await
                .unwrap();
        }

        let repo = JsonFileClusterRepository::open(dir.path()).await.unwrap();
        let loaded = repo.load(cluster.id).await.unwrap();
        assert_eq!(loaded.access_instance(), Some(&handle));
        assert_eq!(loaded.state, ClusterState::Operational);
        assert_eq!(repo.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_selection_on_disk_is_corrupt() {
        let dir = tempdir().unwrap();
        let repo = JsonFileClusterRepository::open(dir.path()).await.unwrap();
        let cluster = Cluster::new("api");
        repo.save(&cluster).await.unwrap();

        let path = dir.path().join(format!("{}.json", cluster.id));
        let mut raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        raw["cluster"]["accessInstance"] = serde_json::json!({
            "instanceId": "i-ghost",
            "region": "us-east-1",
            "provider": "AWS"
        });
        std::fs::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        assert!(matches!(
            repo.load(cluster.id).await,
            Err(RepositoryError::Corrupt { id, .. }) if id == cluster.id
        ));
    }

    #[tokio::test]
    async fn delete_removes_the_file() {
        let dir = tempdir().unwrap();
        let repo = JsonFileClusterRepository::open(dir.path()).await.unwrap();
        let cluster = Cluster::new("api");
        repo.save(&cluster).await.unwrap();
        assert!(repo.delete(cluster.id).await.unwrap());
        assert!(!repo.delete(cluster.id).await.unwrap());
        assert!(repo.load_all().await.unwrap().is_empty());
    }
}
