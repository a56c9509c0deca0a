//! Reconciler / cleanup loop (C10): periodic sweep for TTL expiry and
//! upstream PR status, run on a `tokio::time::interval` the same way
//! rivetr's `spawn_cleanup_task` schedules its deployment sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::container::ContainerManager;
use crate::github::ForgeClient;
use crate::proxy::ProxyManager;
use crate::tracker::Tracker;
use crate::webhook::LockTable;

/// Summary of one sweep, useful for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepStats {
    pub examined: usize,
    pub reclaimed: usize,
}

pub struct Reconciler {
    tracker: Arc<Tracker>,
    container: Arc<ContainerManager>,
    proxy: Arc<ProxyManager>,
    forge: Arc<dyn ForgeClient>,
    locks: Arc<LockTable>,
    ttl_days: i64,
}

impl Reconciler {
    pub fn new(
        tracker: Arc<Tracker>,
        container: Arc<ContainerManager>,
        proxy: Arc<ProxyManager>,
        forge: Arc<dyn ForgeClient>,
        locks: Arc<LockTable>,
        ttl_days: i64,
    ) -> Self {
        Self {
            tracker,
            container,
            proxy,
            forge,
            locks,
            ttl_days,
        }
    }

    /// Run a single sweep: for each tracked deployment, ask the
    /// source-forge client whether its PR is still open (failures are
    /// treated as "assume open" and logged) and reclaim it if its TTL
    /// has elapsed or its PR is not open. Per-deployment errors are
    /// logged and never abort the sweep.
    pub async fn sweep(&self) -> SweepStats {
        let deployments = self.tracker.get_all_deployments().await;
        let mut stats = SweepStats {
            examined: deployments.len(),
            reclaimed: 0,
        };

        for deployment in deployments {
            let age_days = deployment.age_days(chrono::Utc::now());
            let pr_open = match self
                .forge
                .check_pr_status(&deployment.repo_owner, &deployment.repo_name, deployment.pr_number)
                .await
            {
                Ok(status) => status.open,
                Err(e) => {
                    warn!(error = %e, deployment_id = %deployment.deployment_id, "PR status check failed; assuming open");
                    true
                }
            };

            if age_days <= self.ttl_days && pr_open {
                continue;
            }

            let guard = self.locks.lock_for(&deployment.deployment_id);
            let _permit = guard.lock().await;

            if let Err(e) = self.container.cleanup_preview(&deployment.deployment_id).await {
                error!(error = %e, deployment_id = %deployment.deployment_id, "reconciler cleanup failed");
                continue;
            }
            if let Err(e) = self.proxy.remove_preview(&deployment.project_slug, deployment.pr_number).await {
                error!(error = %e, deployment_id = %deployment.deployment_id, "reconciler proxy cleanup failed");
                continue;
            }
            if let Err(e) = self.tracker.delete_deployment(&deployment.deployment_id).await {
                error!(error = %e, deployment_id = %deployment.deployment_id, "reconciler store cleanup failed");
                continue;
            }

            info!(deployment_id = %deployment.deployment_id, age_days, pr_open, "reconciler reclaimed stale deployment");
            stats.reclaimed += 1;
        }

        stats
    }

    /// Spawn the periodic sweep loop: runs one sweep immediately, then
    /// every `interval`. Stoppable via the returned `Notify` for
    /// graceful shutdown and tests.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> (tokio::task::JoinHandle<()>, Arc<Notify>) {
        let stop = Arc::new(Notify::new());
        let stop_for_task = stop.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = self.sweep().await;
                        info!(examined = stats.examined, reclaimed = stats.reclaimed, "reconciler sweep complete");
                    }
                    _ = stop_for_task.notified() => {
                        info!("reconciler stopping");
                        break;
                    }
                }
            }
        });
        (handle, stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerEngine, PreviewStatus};
    use crate::github::test_double::FakeForge;
    use crate::model::{Database, Deployment, DeploymentStatus, Framework};
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::tempdir;

    struct NullEngine;

    #[async_trait]
    impl ContainerEngine for NullEngine {
        async fn compose_up(&self, _: &str, _: &Path, _: &Path) -> Result<(), String> {
            Ok(())
        }
        async fn compose_down(&self, _: &str, _: &Path, _: &Path) -> Result<(), String> {
            Ok(())
        }
        async fn bound_host_ports(&self) -> Vec<u16> {
            Vec::new()
        }
        async fn container_status(&self, _: &str) -> PreviewStatus {
            PreviewStatus::Stopped
        }
    }

    fn sample(id: &str, created_at: chrono::DateTime<chrono::Utc>) -> Deployment {
        Deployment {
            pr_number: 1,
            repo_owner: "acme".into(),
            repo_name: "api".into(),
            project_slug: "acme-api".into(),
            deployment_id: id.into(),
            branch: "feature".into(),
            commit_sha: "abc".into(),
            clone_url: "https://example.com/acme/api.git".into(),
            framework: Framework::Nestjs,
            db_type: Database::Postgres,
            app_port: 3000,
            exposed_app_port: 8000,
            exposed_db_port: 9000,
            status: DeploymentStatus::Running,
            created_at,
            updated_at: created_at,
            url: Some("https://preview.example.com/acme-api/pr-1/".into()),
            comment_id: None,
        }
    }

    async fn setup() -> (Reconciler, Arc<Tracker>, Arc<FakeForge>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let tracker = Arc::new(Tracker::load(dir.path().join("store.json")).await.unwrap());
        let container = Arc::new(ContainerManager::new(
            tracker.clone(),
            Arc::new(NullEngine),
            dir.path().join("deployments"),
            "https://preview.example.com",
        ));
        let proxy = Arc::new(ProxyManager::new(
            dir.path().join("nginx"),
            Box::new(crate::proxy::NoopReloader),
        ));
        let forge = Arc::new(FakeForge::new());
        let locks = Arc::new(LockTable::new());
        let reconciler = Reconciler::new(tracker.clone(), container, proxy, forge.clone(), locks, 7);
        (reconciler, tracker, forge, dir)
    }

    #[tokio::test]
    async fn ttl_expired_deployment_is_reclaimed() {
        let (reconciler, tracker, forge, _dir) = setup().await;
        let old = chrono::Utc::now() - chrono::Duration::days(10);
        tracker.save_deployment(sample("acme-api-1", old)).await.unwrap();
        forge.set_pr_open("acme", "api", 1, true);

        let stats = reconciler.sweep().await;
        assert_eq!(stats.reclaimed, 1);
        assert!(tracker.get_deployment("acme-api-1").await.is_none());
    }

    #[tokio::test]
    async fn closed_pr_is_reclaimed_even_within_ttl() {
        let (reconciler, tracker, forge, _dir) = setup().await;
        tracker.save_deployment(sample("acme-api-1", chrono::Utc::now())).await.unwrap();
        forge.set_pr_open("acme", "api", 1, false);

        let stats = reconciler.sweep().await;
        assert_eq!(stats.reclaimed, 1);
    }

    #[tokio::test]
    async fn fresh_open_deployment_survives_sweep() {
        let (reconciler, tracker, forge, _dir) = setup().await;
        tracker.save_deployment(sample("acme-api-1", chrono::Utc::now())).await.unwrap();
        forge.set_pr_open("acme", "api", 1, true);

        let stats = reconciler.sweep().await;
        assert_eq!(stats.reclaimed, 0);
        assert!(tracker.get_deployment("acme-api-1").await.is_some());
    }

    #[tokio::test]
    async fn sweep_is_idempotent_with_no_new_events() {
        let (reconciler, tracker, forge, _dir) = setup().await;
        tracker.save_deployment(sample("acme-api-1", chrono::Utc::now())).await.unwrap();
        forge.set_pr_open("acme", "api", 1, true);

        reconciler.sweep().await;
        let after_first = tracker.get_all_deployments().await;
        reconciler.sweep().await;
        let after_second = tracker.get_all_deployments().await;
        assert_eq!(after_first.len(), after_second.len());
    }
}
