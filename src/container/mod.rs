//! Container manager (C8): clone, checkout, build commands, compose
//! up/down, and health polling. Shells out to `git` the same way
//! rivetr's preview engine does (`tokio::process::Command`), and treats
//! the container engine itself as an injected capability so tests never
//! need a real Docker daemon — mirroring rivetr's `ContainerRuntime`
//! trait boundary, but invoked through `docker compose` subprocesses
//! (rivetr's `service_templates::start_compose_service` pattern) rather
//! than the Docker Engine API, since the spec treats compose-file
//! invocation as the container engine's contract.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::compose::{self, MaterializeParams};
use crate::error::OrchestratorError;
use crate::framework;
use crate::model::{Database, Deployment, Framework};
use crate::repo_config;
use crate::slug;
use crate::tracker::Tracker;

/// Container status as reported by the engine for one preview's app
/// container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewStatus {
    Running,
    Stopped,
    Failed,
}

/// Narrow capability covering the parts of the container engine the
/// orchestrator needs: compose lifecycle, port discovery, and container
/// inspection.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn compose_up(&self, project: &str, compose_file: &Path, work_dir: &Path) -> Result<(), String>;
    async fn compose_down(&self, project: &str, compose_file: &Path, work_dir: &Path) -> Result<(), String>;
    /// Host ports currently bound by any running container on the host,
    /// used to keep the allocator clear of orphans.
    async fn bound_host_ports(&self) -> Vec<u16>;
    async fn container_status(&self, name: &str) -> PreviewStatus;
}

/// Production engine: shells out to the `docker compose` CLI.
pub struct DockerComposeEngine;

#[async_trait]
impl ContainerEngine for DockerComposeEngine {
    async fn compose_up(&self, project: &str, compose_file: &Path, work_dir: &Path) -> Result<(), String> {
        run_compose(project, compose_file, work_dir, &["up", "-d", "--build"]).await
    }

    async fn compose_down(&self, project: &str, compose_file: &Path, work_dir: &Path) -> Result<(), String> {
        run_compose(project, compose_file, work_dir, &["down", "-v"]).await
    }

    async fn bound_host_ports(&self) -> Vec<u16> {
        let output = Command::new("docker")
            .args(["ps", "--format", "{{.Ports}}"])
            .output()
            .await;
        let Ok(output) = output else {
            return Vec::new();
        };
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .flat_map(parse_bound_ports_line)
            .collect()
    }

    async fn container_status(&self, name: &str) -> PreviewStatus {
        let output = Command::new("docker")
            .args(["inspect", "--format", "{{.State.Status}}", name])
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => {
                match String::from_utf8_lossy(&out.stdout).trim() {
                    "running" => PreviewStatus::Running,
                    "exited" | "dead" => PreviewStatus::Stopped,
                    _ => PreviewStatus::Failed,
                }
            }
            _ => PreviewStatus::Stopped,
        }
    }
}

fn parse_bound_ports_line(line: &str) -> Vec<u16> {
    line.split(", ")
        .filter_map(|mapping| {
            let host_part = mapping.split("->").next()?;
            let port_str = host_part.rsplit(':').next()?;
            port_str.parse::<u16>().ok()
        })
        .collect()
}

async fn run_compose(project: &str, compose_file: &Path, work_dir: &Path, args: &[&str]) -> Result<(), String> {
    run_compose_inner(project, compose_file, work_dir, args)
        .await
        .map_err(|e| format!("{e:#}"))
}

async fn run_compose_inner(
    project: &str,
    compose_file: &Path,
    work_dir: &Path,
    args: &[&str],
) -> anyhow::Result<()> {
    let output = Command::new("docker")
        .arg("compose")
        .args(["-p", project, "-f"])
        .arg(compose_file)
        .args(args)
        .current_dir(work_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("Failed to execute docker compose")?;

    if !output.status.success() {
        anyhow::bail!("docker compose exited with failure: {}", String::from_utf8_lossy(&output.stderr));
    }
    Ok(())
}

/// Everything the webhook handler knows about a PR at the point it
/// decides to deploy or update.
#[derive(Debug, Clone)]
pub struct PreviewRequest {
    pub pr_number: u64,
    pub repo_owner: String,
    pub repo_name: String,
    pub branch: String,
    pub commit_sha: String,
    pub clone_url: String,
}

/// Result of a successful deploy or update.
pub struct DeployOutcome {
    pub url: String,
    pub app_port: u16,
    pub exposed_app_port: u16,
    pub exposed_db_port: u16,
    pub framework: Framework,
    pub db_type: Database,
}

const HEALTH_CHECK_ATTEMPTS: u32 = 15;
const HEALTH_CHECK_PER_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
const HEALTH_CHECK_INTER_ATTEMPT_DELAY: Duration = Duration::from_secs(5);

/// Orchestrates clone → build → compose up → health poll for one
/// deployment, and the corresponding teardown.
pub struct ContainerManager {
    tracker: Arc<Tracker>,
    engine: Arc<dyn ContainerEngine>,
    deployments_dir: PathBuf,
    preview_base_url: String,
    http: reqwest::Client,
}

impl ContainerManager {
    pub fn new(
        tracker: Arc<Tracker>,
        engine: Arc<dyn ContainerEngine>,
        deployments_dir: impl Into<PathBuf>,
        preview_base_url: impl Into<String>,
    ) -> Self {
        Self {
            tracker,
            engine,
            deployments_dir: deployments_dir.into(),
            preview_base_url: preview_base_url.into(),
            http: reqwest::Client::builder()
                .timeout(HEALTH_CHECK_PER_REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client builds with a fixed timeout"),
        }
    }

    pub fn work_dir(&self, project_slug: &str, pr_number: u64) -> PathBuf {
        self.deployments_dir.join(project_slug).join(format!("pr-{pr_number}"))
    }

    fn container_name(&self, project_slug: &str, pr_number: u64) -> String {
        format!("{project_slug}-pr-{pr_number}-app")
    }

    pub async fn deploy_preview(&self, req: PreviewRequest) -> Result<DeployOutcome, OrchestratorError> {
        let project_slug = slug::to_project_slug(&req.repo_owner, &req.repo_name);
        let deployment_id = slug::to_deployment_id(&project_slug, req.pr_number);
        let work_dir = self.work_dir(&project_slug, req.pr_number);

        match self.try_deploy(&req, &project_slug, &deployment_id, &work_dir).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Err(cleanup_err) = self.cleanup_preview(&deployment_id).await {
                    error!(error = %cleanup_err, deployment_id = %deployment_id, "cleanup after failed deploy also failed");
                }
                Err(e)
            }
        }
    }

    async fn try_deploy(
        &self,
        req: &PreviewRequest,
        project_slug: &str,
        deployment_id: &str,
        work_dir: &Path,
    ) -> Result<DeployOutcome, OrchestratorError> {
        if tokio::fs::metadata(work_dir).await.is_ok() {
            tokio::fs::remove_dir_all(work_dir).await?;
        }
        tokio::fs::create_dir_all(work_dir).await?;

        let bound_ports = self.engine.bound_host_ports().await;
        let ports = self.tracker.allocate_ports(deployment_id, &bound_ports).await?;

        clone_checkout(&req.clone_url, &req.branch, &req.commit_sha, work_dir).await?;

        let repo_config = repo_config::parse_repo_config(work_dir).await?;
        let fw = framework::resolve_framework(work_dir, &repo_config).await;

        run_build_commands(&repo_config.build_commands, work_dir).await?;

        let materialized = compose::materialize(MaterializeParams {
            work_dir,
            project_slug,
            pr_number: req.pr_number,
            exposed_app_port: ports.exposed_app_port,
            exposed_db_port: ports.exposed_db_port,
            framework: fw,
            repo_config: &repo_config,
        })
        .await?;

        self.engine
            .compose_up(deployment_id, &materialized.compose_file, work_dir)
            .await
            .map_err(OrchestratorError::ContainerUp)?;

        poll_health(&self.http, ports.exposed_app_port, &repo_config.health_check_path).await?;

        let url = format!("{}/{}/pr-{}/", self.preview_base_url.trim_end_matches('/'), project_slug, req.pr_number);

        Ok(DeployOutcome {
            url,
            app_port: repo_config.app_port,
            exposed_app_port: ports.exposed_app_port,
            exposed_db_port: ports.exposed_db_port,
            framework: fw,
            db_type: repo_config.database,
        })
    }

    pub async fn update_preview(&self, deployment: &Deployment, new_sha: &str) -> Result<DeployOutcome, OrchestratorError> {
        let work_dir = self.work_dir(&deployment.project_slug, deployment.pr_number);

        fetch_and_reset(&work_dir, new_sha).await?;

        let repo_config = repo_config::parse_repo_config(&work_dir).await?;
        let fw = framework::resolve_framework(&work_dir, &repo_config).await;

        let materialized = compose::materialize(MaterializeParams {
            work_dir: &work_dir,
            project_slug: &deployment.project_slug,
            pr_number: deployment.pr_number,
            exposed_app_port: deployment.exposed_app_port,
            exposed_db_port: deployment.exposed_db_port,
            framework: fw,
            repo_config: &repo_config,
        })
        .await?;

        self.engine
            .compose_up(&deployment.deployment_id, &materialized.compose_file, &work_dir)
            .await
            .map_err(OrchestratorError::ContainerUp)?;

        poll_health(&self.http, deployment.exposed_app_port, &repo_config.health_check_path).await?;

        let url = deployment.url.clone().unwrap_or_else(|| {
            format!(
                "{}/{}/pr-{}/",
                self.preview_base_url.trim_end_matches('/'),
                deployment.project_slug,
                deployment.pr_number
            )
        });

        Ok(DeployOutcome {
            url,
            app_port: repo_config.app_port,
            exposed_app_port: deployment.exposed_app_port,
            exposed_db_port: deployment.exposed_db_port,
            framework: fw,
            db_type: repo_config.database,
        })
    }

    pub async fn cleanup_preview(&self, deployment_id: &str) -> Result<(), OrchestratorError> {
        let Some(deployment) = self.tracker.get_deployment(deployment_id).await else {
            self.tracker.release_ports(deployment_id).await?;
            return Ok(());
        };

        let work_dir = self.work_dir(&deployment.project_slug, deployment.pr_number);
        let compose_file = work_dir.join("docker-compose.preview.generated.yml");

        if let Err(e) = self.engine.compose_down(deployment_id, &compose_file, &work_dir).await {
            warn!(error = %e, deployment_id = %deployment_id, "compose down reported an error; treating as benign");
        }

        if tokio::fs::metadata(&work_dir).await.is_ok() {
            tokio::fs::remove_dir_all(&work_dir).await?;
        }

        self.tracker.release_ports(deployment_id).await?;
        info!(deployment_id = %deployment_id, "cleaned up preview");
        Ok(())
    }

    pub async fn get_preview_status(&self, project_slug: &str, pr_number: u64) -> PreviewStatus {
        let name = self.container_name(project_slug, pr_number);
        self.engine.container_status(&name).await
    }
}

async fn clone_checkout(clone_url: &str, branch: &str, commit_sha: &str, work_dir: &Path) -> Result<(), OrchestratorError> {
    run_git(&["clone", clone_url, "."], work_dir).await?;
    run_git(&["checkout", branch], work_dir).await?;
    run_git(&["reset", "--hard", commit_sha], work_dir).await?;
    Ok(())
}

async fn fetch_and_reset(work_dir: &Path, new_sha: &str) -> Result<(), OrchestratorError> {
    run_git(&["fetch", "origin"], work_dir).await?;
    run_git(&["reset", "--hard", new_sha], work_dir).await?;
    Ok(())
}

async fn run_git(args: &[&str], work_dir: &Path) -> Result<(), OrchestratorError> {
    run_git_inner(args, work_dir)
        .await
        .map_err(|e| OrchestratorError::ContainerUp(format!("{e:#}")))
}

async fn run_git_inner(args: &[&str], work_dir: &Path) -> anyhow::Result<()> {
    let output = Command::new("git")
        .args(args)
        .current_dir(work_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("Failed to execute git {args:?}"))?;

    if !output.status.success() {
        anyhow::bail!("git {args:?} failed: {}", String::from_utf8_lossy(&output.stderr));
    }
    Ok(())
}

async fn run_build_commands(commands: &[String], work_dir: &Path) -> Result<(), OrchestratorError> {
    for (index, command) in commands.iter().enumerate() {
        run_build_command_inner(command, work_dir)
            .await
            .map_err(|e| OrchestratorError::BuildCommandFailed {
                index,
                command: format!("{command}: {e:#}"),
            })?;
    }
    Ok(())
}

async fn run_build_command_inner(command: &str, work_dir: &Path) -> anyhow::Result<()> {
    let output = Command::new("sh")
        .args(["-c", command])
        .current_dir(work_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("Failed to execute build command")?;

    if !output.status.success() {
        anyhow::bail!("exited with failure: {}", String::from_utf8_lossy(&output.stderr));
    }
    Ok(())
}

async fn poll_health(client: &reqwest::Client, port: u16, path: &str) -> Result<(), OrchestratorError> {
    let url = format!("http://localhost:{port}{path}");
    for attempt in 0..HEALTH_CHECK_ATTEMPTS {
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            _ => {}
        }
        if attempt + 1 < HEALTH_CHECK_ATTEMPTS {
            tokio::time::sleep(HEALTH_CHECK_INTER_ATTEMPT_DELAY).await;
        }
    }
    Err(OrchestratorError::HealthCheckTimeout {
        attempts: HEALTH_CHECK_ATTEMPTS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bound_ports_from_docker_ps_line() {
        let line = "0.0.0.0:8000->3000/tcp, :::8000->3000/tcp, 0.0.0.0:9000->5432/tcp";
        let ports = parse_bound_ports_line(line);
        assert!(ports.contains(&8000));
        assert!(ports.contains(&9000));
    }

    #[tokio::test]
    async fn container_name_matches_slug_pr_app_convention() {
        let tracker = Tracker::load(std::env::temp_dir().join("never-written.json"))
            .await
            .unwrap();
        let manager = ContainerManager::new(
            Arc::new(tracker),
            Arc::new(NullEngine),
            "/tmp/previews",
            "https://preview.example.com",
        );
        assert_eq!(manager.container_name("acme-api", 42), "acme-api-pr-42-app");
    }

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
}
