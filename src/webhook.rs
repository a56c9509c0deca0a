//! Webhook handler (C9): HMAC verification, repo allow-list, and
//! dispatch to the deploy/update/cleanup paths. Signature verification
//! follows the same `hmac::Hmac<Sha256>` + constant-time compare rivetr
//! uses in its own webhook receiver.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::container::{ContainerManager, PreviewRequest};
use crate::error::OrchestratorError;
use crate::github::{comment, ForgeClient};
use crate::model::{Database, Deployment, DeploymentStatus, Framework};
use crate::proxy::ProxyManager;
use crate::slug;
use crate::tracker::Tracker;

type HmacSha256 = Hmac<Sha256>;

/// Verify `X-Hub-Signature-256: sha256=<hex>` against the raw request
/// body using the shared webhook secret. Constant-time; an empty
/// signature is always rejected.
pub fn verify_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    let Some(hex_sig) = signature.strip_prefix("sha256=") else {
        return false;
    };
    if hex_sig.is_empty() {
        return false;
    }
    let Ok(expected_bytes) = hex::decode(hex_sig) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    if computed.len() != expected_bytes.len() {
        return false;
    }
    computed.ct_eq(&expected_bytes).into()
}

/// Minimal shape of a GitHub `pull_request` webhook payload.
#[derive(Debug, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: PullRequest,
    pub repository: Repository,
}

#[derive(Debug, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub head: PullRequestRef,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestRef {
    pub sha: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
}

#[derive(Debug, Deserialize)]
pub struct Repository {
    pub full_name: String,
    pub owner: RepositoryOwner,
    pub name: String,
    pub clone_url: String,
}

#[derive(Debug, Deserialize)]
pub struct RepositoryOwner {
    pub login: String,
}

/// Per-deployment-id mutual exclusion, acquired at the webhook-dispatch
/// and reconciler boundaries so a deploy never interleaves with a
/// cleanup for the same id.
#[derive(Default)]
pub struct LockTable {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(id.to_string()).or_default().clone()
    }
}

/// Wires together the tracker, container manager, proxy manager, and
/// source-forge client to implement the deploy/update/cleanup paths.
pub struct WebhookHandler {
    pub tracker: Arc<Tracker>,
    pub container: Arc<ContainerManager>,
    pub proxy: Arc<ProxyManager>,
    pub forge: Arc<dyn ForgeClient>,
    pub allowed_repos: HashSet<String>,
    pub locks: Arc<LockTable>,
}

impl WebhookHandler {
    pub fn is_allowed(&self, full_name: &str) -> bool {
        self.allowed_repos.contains(full_name)
    }

    pub async fn handle(&self, event: PullRequestEvent) -> Result<(), OrchestratorError> {
        if !self.is_allowed(&event.repository.full_name) {
            return Err(OrchestratorError::AllowlistRejected(event.repository.full_name));
        }

        match event.action.as_str() {
            "opened" | "reopened" => self.handle_deploy_or_update(&event).await,
            "synchronize" => self.handle_deploy_or_update(&event).await,
            "closed" => self.handle_cleanup(&event).await,
            other => {
                info!(action = other, "ignoring unhandled webhook action");
                Ok(())
            }
        }
    }

    async fn handle_deploy_or_update(&self, event: &PullRequestEvent) -> Result<(), OrchestratorError> {
        let project_slug = slug::to_project_slug(&event.repository.owner.login, &event.repository.name);
        let deployment_id = slug::to_deployment_id(&project_slug, event.pull_request.number);

        let guard = self.locks.lock_for(&deployment_id);
        let _permit = guard.lock().await;

        let existing = self.tracker.get_deployment(&deployment_id).await;
        let result = match existing {
            Some(deployment) => self.update_path(event, deployment).await,
            None => self.deploy_path(event, &project_slug, &deployment_id).await,
        };

        if let Err(e) = &result {
            if !e.is_best_effort() {
                self.post_failure_comment(event, &e.to_string()).await;
            }
        }
        result
    }

    async fn deploy_path(
        &self,
        event: &PullRequestEvent,
        project_slug: &str,
        deployment_id: &str,
    ) -> Result<(), OrchestratorError> {
        let owner = &event.repository.owner.login;
        let repo = &event.repository.name;
        let pr_number = event.pull_request.number;

        let comment_id = self
            .forge
            .post_comment(owner, repo, pr_number, &comment::building())
            .await
            .map_err(|e| {
                warn!(error = %e, "failed to post building comment; proceeding anyway");
                e
            })
            .ok();

        let request = PreviewRequest {
            pr_number,
            repo_owner: owner.clone(),
            repo_name: repo.clone(),
            branch: event.pull_request.head.git_ref.clone(),
            commit_sha: event.pull_request.head.sha.clone(),
            clone_url: event.repository.clone_url.clone(),
        };

        // Placeholder row so `GET /api/previews` reports `building` while
        // the clone/build/health-poll pipeline is in flight; overwritten
        // (or marked `failed`) once `deploy_preview` resolves.
        let now = chrono::Utc::now();
        self.tracker
            .save_deployment(Deployment {
                pr_number,
                repo_owner: owner.clone(),
                repo_name: repo.clone(),
                project_slug: project_slug.to_string(),
                deployment_id: deployment_id.to_string(),
                branch: event.pull_request.head.git_ref.clone(),
                commit_sha: event.pull_request.head.sha.clone(),
                clone_url: event.repository.clone_url.clone(),
                framework: Framework::Nestjs,
                db_type: Database::Postgres,
                app_port: 0,
                exposed_app_port: 0,
                exposed_db_port: 0,
                status: DeploymentStatus::Building,
                created_at: now,
                updated_at: now,
                url: None,
                comment_id,
            })
            .await?;

        let outcome = match self.container.deploy_preview(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.tracker
                    .update_deployment_status(deployment_id, DeploymentStatus::Failed)
                    .await?;
                return Err(e);
            }
        };

        self.proxy
            .add_preview(project_slug, pr_number, outcome.exposed_app_port)
            .await?;

        let deployment = Deployment {
            pr_number,
            repo_owner: owner.clone(),
            repo_name: repo.clone(),
            project_slug: project_slug.to_string(),
            deployment_id: deployment_id.to_string(),
            branch: event.pull_request.head.git_ref.clone(),
            commit_sha: event.pull_request.head.sha.clone(),
            clone_url: event.repository.clone_url.clone(),
            framework: outcome.framework,
            db_type: outcome.db_type,
            app_port: outcome.app_port,
            exposed_app_port: outcome.exposed_app_port,
            exposed_db_port: outcome.exposed_db_port,
            status: DeploymentStatus::Running,
            created_at: now,
            updated_at: chrono::Utc::now(),
            url: Some(outcome.url.clone()),
            comment_id,
        };
        self.tracker.save_deployment(deployment).await?;

        if let Some(comment_id) = comment_id {
            if let Err(e) = self.forge.update_comment(owner, repo, comment_id, &comment::success(&outcome.url)).await {
                warn!(error = %e, "failed to update PR comment with success status");
            }
        }

        info!(deployment_id = %deployment_id, url = %outcome.url, "deploy complete");
        Ok(())
    }

    async fn update_path(&self, event: &PullRequestEvent, deployment: Deployment) -> Result<(), OrchestratorError> {
        let owner = &event.repository.owner.login;
        let repo = &event.repository.name;

        if let Some(comment_id) = deployment.comment_id {
            if let Err(e) = self.forge.update_comment(owner, repo, comment_id, &comment::building()).await {
                warn!(error = %e, "failed to post building comment for update");
            }
        }

        self.tracker
            .update_deployment_status(&deployment.deployment_id, DeploymentStatus::Building)
            .await?;

        let new_sha = event.pull_request.head.sha.clone();
        let outcome = match self.container.update_preview(&deployment, &new_sha).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.tracker
                    .update_deployment_status(&deployment.deployment_id, DeploymentStatus::Failed)
                    .await?;
                return Err(e);
            }
        };

        self.tracker
            .update_deployment_commit(&deployment.deployment_id, &new_sha)
            .await?;
        self.tracker
            .update_deployment_status(&deployment.deployment_id, DeploymentStatus::Running)
            .await?;

        if let Some(comment_id) = deployment.comment_id {
            if let Err(e) = self.forge.update_comment(owner, repo, comment_id, &comment::success(&outcome.url)).await {
                warn!(error = %e, "failed to update PR comment with success status");
            }
        }

        info!(deployment_id = %deployment.deployment_id, "update complete");
        Ok(())
    }

    async fn handle_cleanup(&self, event: &PullRequestEvent) -> Result<(), OrchestratorError> {
        let project_slug = slug::to_project_slug(&event.repository.owner.login, &event.repository.name);
        let deployment_id = slug::to_deployment_id(&project_slug, event.pull_request.number);

        let guard = self.locks.lock_for(&deployment_id);
        let _permit = guard.lock().await;

        if self.tracker.get_deployment(&deployment_id).await.is_none() {
            info!(deployment_id = %deployment_id, "cleanup requested for unknown deployment; ignoring");
            return Ok(());
        }

        let result = self.run_cleanup(&deployment_id, &project_slug, event.pull_request.number).await;
        if let Err(e) = &result {
            if !e.is_best_effort() {
                self.post_failure_comment(event, &e.to_string()).await;
            }
        }
        result
    }

    async fn run_cleanup(
        &self,
        deployment_id: &str,
        project_slug: &str,
        pr_number: u64,
    ) -> Result<(), OrchestratorError> {
        self.container.cleanup_preview(deployment_id).await?;
        self.proxy.remove_preview(project_slug, pr_number).await?;
        self.tracker.delete_deployment(deployment_id).await?;

        info!(deployment_id = %deployment_id, "cleanup complete");
        Ok(())
    }

    async fn post_failure_comment(&self, event: &PullRequestEvent, reason: &str) {
        let owner = &event.repository.owner.login;
        let repo = &event.repository.name;
        let deployment_id = slug::to_deployment_id(
            &slug::to_project_slug(owner, &event.repository.name),
            event.pull_request.number,
        );
        let existing_comment_id = self
            .tracker
            .get_deployment(&deployment_id)
            .await
            .and_then(|d| d.comment_id);

        let body = comment::failure(reason);
        let result = match existing_comment_id {
            Some(comment_id) => self.forge.update_comment(owner, repo, comment_id, &body).await,
            None => self
                .forge
                .post_comment(owner, repo, event.pull_request.number, &body)
                .await
                .map(|_| ()),
        };
        if let Err(e) = result {
            error!(error = %e, "failed to post failure comment");
        }
    }
}
