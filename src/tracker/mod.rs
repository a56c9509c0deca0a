//! Deployment tracker (C4): a durable JSON store plus the port allocator.
//!
//! The store is the sole owner of `DEPLOYMENTS_DB`. Reads are served from
//! an in-memory cache guarded by a `tokio::sync::RwLock`; writes go
//! through a single path that serializes the whole document and performs
//! a write-temp-then-rename to keep the file atomic at all times, per the
//! write-temp-then-rename pattern rivetr's store code already leans on
//! for its own durable files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::OrchestratorError;
use crate::model::{Deployment, DeploymentStatus, PortAllocation};

const APP_PORT_BASE: u16 = 8000;
const DB_PORT_BASE: u16 = 9000;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    deployments: HashMap<String, Deployment>,
    #[serde(default, rename = "portAllocations")]
    port_allocations: HashMap<String, PortAllocation>,
}

/// Durable, single-file deployment tracker.
pub struct Tracker {
    path: PathBuf,
    doc: RwLock<StoreDocument>,
}

impl Tracker {
    /// Load the store from disk, or start from an empty document if the
    /// file does not exist yet.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, OrchestratorError> {
        let path = path.into();
        let doc = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreDocument::default(),
            Err(e) => return Err(OrchestratorError::TrackerIo(e)),
        };
        Ok(Self {
            path,
            doc: RwLock::new(doc),
        })
    }

    async fn persist(&self, doc: &StoreDocument) -> Result<(), OrchestratorError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(doc).expect("store document is always serializable");
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    pub async fn get_deployment(&self, id: &str) -> Option<Deployment> {
        self.doc.read().await.deployments.get(id).cloned()
    }

    pub async fn get_all_deployments(&self) -> Vec<Deployment> {
        self.doc.read().await.deployments.values().cloned().collect()
    }

    pub async fn save_deployment(&self, deployment: Deployment) -> Result<(), OrchestratorError> {
        let mut doc = self.doc.write().await;
        doc.deployments.insert(deployment.deployment_id.clone(), deployment);
        self.persist(&doc).await
    }

    pub async fn delete_deployment(&self, id: &str) -> Result<(), OrchestratorError> {
        let mut doc = self.doc.write().await;
        doc.deployments.remove(id);
        doc.port_allocations.remove(id);
        self.persist(&doc).await
    }

    pub async fn update_deployment_status(
        &self,
        id: &str,
        status: DeploymentStatus,
    ) -> Result<(), OrchestratorError> {
        let mut doc = self.doc.write().await;
        if let Some(d) = doc.deployments.get_mut(id) {
            d.status = status;
            d.updated_at = chrono::Utc::now();
        }
        self.persist(&doc).await
    }

    pub async fn update_deployment_comment(
        &self,
        id: &str,
        comment_id: u64,
    ) -> Result<(), OrchestratorError> {
        let mut doc = self.doc.write().await;
        if let Some(d) = doc.deployments.get_mut(id) {
            d.comment_id = Some(comment_id);
        }
        self.persist(&doc).await
    }

    /// Update commit sha and bump `updatedAt`, used by the update path.
    pub async fn update_deployment_commit(
        &self,
        id: &str,
        commit_sha: &str,
    ) -> Result<(), OrchestratorError> {
        let mut doc = self.doc.write().await;
        if let Some(d) = doc.deployments.get_mut(id) {
            d.commit_sha = commit_sha.to_string();
            d.updated_at = chrono::Utc::now();
        }
        self.persist(&doc).await
    }

    pub async fn release_ports(&self, id: &str) -> Result<(), OrchestratorError> {
        let mut doc = self.doc.write().await;
        doc.port_allocations.remove(id);
        self.persist(&doc).await
    }

    /// Allocate host ports for a deployment id, idempotently: a second
    /// call for the same id returns the existing allocation unchanged.
    ///
    /// `exclude_ports` lets the caller keep the allocator away from host
    /// ports currently bound by containers the tracker doesn't know
    /// about (orphans from a previous failed deploy).
    pub async fn allocate_ports(
        &self,
        id: &str,
        exclude_ports: &[u16],
    ) -> Result<PortAllocation, OrchestratorError> {
        let mut doc = self.doc.write().await;

        if let Some(existing) = doc.port_allocations.get(id) {
            return Ok(*existing);
        }

        let used_app: std::collections::HashSet<u16> = doc
            .port_allocations
            .values()
            .map(|a| a.exposed_app_port)
            .chain(exclude_ports.iter().copied())
            .collect();
        let used_db: std::collections::HashSet<u16> = doc
            .port_allocations
            .values()
            .map(|a| a.exposed_db_port)
            .chain(exclude_ports.iter().copied())
            .collect();

        let exposed_app_port = next_free_port(APP_PORT_BASE, &used_app)?;
        let exposed_db_port = next_free_port(DB_PORT_BASE, &used_db)?;

        let allocation = PortAllocation {
            exposed_app_port,
            exposed_db_port,
        };
        doc.port_allocations.insert(id.to_string(), allocation);
        self.persist(&doc).await?;

        info!(id = %id, app_port = exposed_app_port, db_port = exposed_db_port, "allocated preview ports");
        Ok(allocation)
    }

    pub async fn get_deployment_age_days(&self, id: &str) -> Option<i64> {
        self.doc
            .read()
            .await
            .deployments
            .get(id)
            .map(|d| d.age_days(chrono::Utc::now()))
    }
}

fn next_free_port(
    base: u16,
    used: &std::collections::HashSet<u16>,
) -> Result<u16, OrchestratorError> {
    let mut candidate = base;
    loop {
        if !used.contains(&candidate) {
            return Ok(candidate);
        }
        match candidate.checked_add(1) {
            Some(next) => candidate = next,
            None => {
                warn!(base, "port pool exhausted");
                return Err(OrchestratorError::PortsExhausted);
            }
        }
    }
}

/// The filesystem location of the store, resolved once at startup.
pub fn default_store_path() -> PathBuf {
    Path::new("/opt/preview-deployer/deployments.json").to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Database, Framework};
    use tempfile::tempdir;

    fn sample_deployment(id: &str) -> Deployment {
        Deployment {
            pr_number: 1,
            repo_owner: "acme".into(),
            repo_name: "api".into(),
            project_slug: "acme-api".into(),
            deployment_id: id.into(),
            branch: "feature".into(),
            commit_sha: "abc123".into(),
            clone_url: "https://example.com/acme/api.git".into(),
            framework: Framework::Nestjs,
            db_type: Database::Postgres,
            app_port: 3000,
            exposed_app_port: 8000,
            exposed_db_port: 9000,
            status: DeploymentStatus::Running,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            url: Some("https://preview.example.com/acme-api/pr-1/".into()),
            comment_id: None,
        }
    }

    #[tokio::test]
    async fn missing_store_file_yields_empty_view() {
        let dir = tempdir().unwrap();
        let tracker = Tracker::load(dir.path().join("nope.json")).await.unwrap();
        assert!(tracker.get_all_deployments().await.is_empty());
    }

    #[tokio::test]
    async fn save_and_fetch_round_trips() {
        let dir = tempdir().unwrap();
        let tracker = Tracker::load(dir.path().join("store.json")).await.unwrap();
        tracker.save_deployment(sample_deployment("acme-api-1")).await.unwrap();
        let fetched = tracker.get_deployment("acme-api-1").await.unwrap();
        assert_eq!(fetched.commit_sha, "abc123");

        // reload from disk to exercise the persisted file, not just the cache
        let reloaded = Tracker::load(dir.path().join("store.json")).await.unwrap();
        assert!(reloaded.get_deployment("acme-api-1").await.is_some());
    }

    #[tokio::test]
    async fn delete_removes_deployment_and_ports() {
        let dir = tempdir().unwrap();
        let tracker = Tracker::load(dir.path().join("store.json")).await.unwrap();
        tracker.save_deployment(sample_deployment("acme-api-1")).await.unwrap();
        tracker.allocate_ports("acme-api-1", &[]).await.unwrap();
        tracker.delete_deployment("acme-api-1").await.unwrap();
        assert!(tracker.get_deployment("acme-api-1").await.is_none());
        assert!(tracker.allocate_ports("acme-api-1", &[]).await.unwrap().exposed_app_port == APP_PORT_BASE);
    }

    #[tokio::test]
    async fn allocate_ports_is_idempotent() {
        let dir = tempdir().unwrap();
        let tracker = Tracker::load(dir.path().join("store.json")).await.unwrap();
        let first = tracker.allocate_ports("a-1", &[]).await.unwrap();
        let second = tracker.allocate_ports("a-1", &[]).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn allocate_ports_skips_used_and_excluded() {
        let dir = tempdir().unwrap();
        let tracker = Tracker::load(dir.path().join("store.json")).await.unwrap();
        tracker.allocate_ports("a-1", &[]).await.unwrap(); // 8000, 9000
        tracker.allocate_ports("b-2", &[]).await.unwrap(); // 8001, 9001
        let third = tracker.allocate_ports("c-3", &[]).await.unwrap();
        assert_eq!(third.exposed_app_port, 8002);
        assert_eq!(third.exposed_db_port, 9002);
    }

    #[tokio::test]
    async fn concurrent_allocations_never_collide() {
        let dir = tempdir().unwrap();
        let tracker = std::sync::Arc::new(Tracker::load(dir.path().join("store.json")).await.unwrap());
        let mut handles = vec![];
        for i in 0..16 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                tracker.allocate_ports(&format!("id-{i}"), &[]).await.unwrap()
            }));
        }
        let mut app_ports = std::collections::HashSet::new();
        for h in handles {
            let alloc = h.await.unwrap();
            assert!(app_ports.insert(alloc.exposed_app_port), "duplicate app port allocated");
        }
    }
}
