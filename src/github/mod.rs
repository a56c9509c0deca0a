//! Source-forge client (C7): posts/updates PR comments and queries PR
//! status against the GitHub REST API. Expressed as a narrow trait so
//! tests can inject a double instead of making real network calls, the
//! same shape rivetr's `GitHubClient` takes for its installation-token
//! requests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// Whether a pull request is open, closed, or closed-and-merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrStatus {
    pub open: bool,
    pub closed: bool,
    pub merged: bool,
}

/// Narrow capability for commenting on and querying pull requests.
#[async_trait]
pub trait ForgeClient: Send + Sync {
    async fn post_comment(&self, owner: &str, repo: &str, pr_number: u64, body: &str) -> Result<u64, OrchestratorError>;
    async fn update_comment(&self, owner: &str, repo: &str, comment_id: u64, body: &str) -> Result<(), OrchestratorError>;
    async fn check_pr_status(&self, owner: &str, repo: &str, pr_number: u64) -> Result<PrStatus, OrchestratorError>;
}

/// Production client backed by GitHub's REST API v3.
pub struct GitHubClient {
    token: String,
    client: reqwest::Client,
}

impl GitHubClient {
    pub fn new(token: String) -> Self {
        Self {
            token,
            client: reqwest::Client::new(),
        }
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "preview-orchestrator")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }
}

#[derive(Serialize)]
struct CommentBody<'a> {
    body: &'a str,
}

#[derive(Deserialize)]
struct CommentResponse {
    id: u64,
}

#[derive(Deserialize)]
struct PullRequestResponse {
    state: String,
    merged: bool,
}

#[async_trait]
impl ForgeClient for GitHubClient {
    async fn post_comment(&self, owner: &str, repo: &str, pr_number: u64, body: &str) -> Result<u64, OrchestratorError> {
        let url = format!("https://api.github.com/repos/{owner}/{repo}/issues/{pr_number}/comments");
        let response = self
            .auth(self.client.post(&url))
            .json(&CommentBody { body })
            .send()
            .await
            .map_err(|e| OrchestratorError::ForgeApiFailure(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OrchestratorError::ForgeApiFailure(format!(
                "post_comment failed with status {}",
                response.status()
            )));
        }
        let parsed: CommentResponse = response
            .json()
            .await
            .map_err(|e| OrchestratorError::ForgeApiFailure(e.to_string()))?;
        Ok(parsed.id)
    }

    async fn update_comment(&self, owner: &str, repo: &str, comment_id: u64, body: &str) -> Result<(), OrchestratorError> {
        let url = format!("https://api.github.com/repos/{owner}/{repo}/issues/comments/{comment_id}");
        let response = self
            .auth(self.client.patch(&url))
            .json(&CommentBody { body })
            .send()
            .await
            .map_err(|e| OrchestratorError::ForgeApiFailure(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OrchestratorError::ForgeApiFailure(format!(
                "update_comment failed with status {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn check_pr_status(&self, owner: &str, repo: &str, pr_number: u64) -> Result<PrStatus, OrchestratorError> {
        let url = format!("https://api.github.com/repos/{owner}/{repo}/pulls/{pr_number}");
        let response = self
            .auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| OrchestratorError::ForgeApiFailure(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OrchestratorError::ForgeApiFailure(format!(
                "check_pr_status failed with status {}",
                response.status()
            )));
        }
        let parsed: PullRequestResponse = response
            .json()
            .await
            .map_err(|e| OrchestratorError::ForgeApiFailure(e.to_string()))?;

        Ok(PrStatus {
            open: parsed.state == "open",
            closed: parsed.state == "closed",
            merged: parsed.merged,
        })
    }
}

/// Formatted comment bodies for the three comment kinds the webhook
/// handler and reconciler post.
pub mod comment {
    pub fn building() -> String {
        "Building preview environment...".to_string()
    }

    pub fn success(url: &str) -> String {
        format!("Preview deployed: {url}")
    }

    pub fn failure(reason: &str) -> String {
        format!("Preview deployment failed: {reason}")
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_double {
    use super::*;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// In-memory double used by webhook/reconciler tests.
    #[derive(Default)]
    pub struct FakeForge {
        pub comments: DashMap<u64, String>,
        next_id: AtomicU64,
        pub pr_open: DashMap<(String, String, u64), bool>,
    }

    impl FakeForge {
        pub fn new() -> Self {
            Self {
                comments: DashMap::new(),
                next_id: AtomicU64::new(1),
                pr_open: DashMap::new(),
            }
        }

        pub fn set_pr_open(&self, owner: &str, repo: &str, pr_number: u64, open: bool) {
            self.pr_open
                .insert((owner.to_string(), repo.to_string(), pr_number), open);
        }
    }

    #[async_trait]
    impl ForgeClient for FakeForge {
        async fn post_comment(&self, _owner: &str, _repo: &str, _pr_number: u64, body: &str) -> Result<u64, OrchestratorError> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.comments.insert(id, body.to_string());
            Ok(id)
        }

        async fn update_comment(&self, _owner: &str, _repo: &str, comment_id: u64, body: &str) -> Result<(), OrchestratorError> {
            self.comments.insert(comment_id, body.to_string());
            Ok(())
        }

        async fn check_pr_status(&self, owner: &str, repo: &str, pr_number: u64) -> Result<PrStatus, OrchestratorError> {
            let open = self
                .pr_open
                .get(&(owner.to_string(), repo.to_string(), pr_number))
                .map(|v| *v)
                .unwrap_or(true);
            Ok(PrStatus {
                open,
                closed: !open,
                merged: false,
            })
        }
    }
}
