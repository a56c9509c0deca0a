//! Proxy-config manager (C6).
//!
//! Owns the route-config directory exclusively: writes and removes
//! per-deployment nginx route snippets and triggers a reload afterward.
//! The reload action is an injected capability (production: `nginx -t &&
//! nginx -s reload`; tests: a no-op) in the same spirit as rivetr's
//! `ContainerRuntime` trait abstracting over the container engine.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::OrchestratorError;

/// Capability for testing and reloading the reverse-proxy process.
#[async_trait]
pub trait ProxyReloader: Send + Sync {
    async fn reload(&self) -> Result<(), String>;
}

/// Production reloader: `nginx -t && nginx -s reload`.
pub struct NginxReloader;

#[async_trait]
impl ProxyReloader for NginxReloader {
    async fn reload(&self) -> Result<(), String> {
        let test = tokio::process::Command::new("nginx")
            .arg("-t")
            .output()
            .await
            .map_err(|e| format!("failed to run nginx -t: {e}"))?;
        if !test.status.success() {
            return Err(format!(
                "nginx config test failed: {}",
                String::from_utf8_lossy(&test.stderr)
            ));
        }

        let reload = tokio::process::Command::new("nginx")
            .args(["-s", "reload"])
            .output()
            .await
            .map_err(|e| format!("failed to run nginx -s reload: {e}"))?;
        if !reload.status.success() {
            return Err(format!(
                "nginx reload failed: {}",
                String::from_utf8_lossy(&reload.stderr)
            ));
        }
        Ok(())
    }
}

/// Test double: never touches the filesystem or a real process.
pub struct NoopReloader;

#[async_trait]
impl ProxyReloader for NoopReloader {
    async fn reload(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Writes and removes per-deployment nginx route snippets under
/// `NGINX_CONFIG_DIR`.
pub struct ProxyManager {
    config_dir: PathBuf,
    reloader: Box<dyn ProxyReloader>,
}

impl ProxyManager {
    pub fn new(config_dir: impl Into<PathBuf>, reloader: Box<dyn ProxyReloader>) -> Self {
        Self {
            config_dir: config_dir.into(),
            reloader,
        }
    }

    fn route_path(&self, slug: &str, pr_number: u64) -> PathBuf {
        self.config_dir.join(format!("{slug}-pr-{pr_number}.conf"))
    }

    /// Write `<slug>-pr-<N>.conf` with a path-based `location` block and
    /// reload the proxy.
    ///
    /// The file is designed to be `include`d inside a default server
    /// block, so it must not wrap itself in `server { ... }`.
    pub async fn add_preview(
        &self,
        slug: &str,
        pr_number: u64,
        app_port: u16,
    ) -> Result<(), OrchestratorError> {
        tokio::fs::create_dir_all(&self.config_dir).await?;
        let path = self.route_path(slug, pr_number);
        let contents = render_route(slug, pr_number, app_port);

        let tmp = path.with_extension("conf.tmp");
        tokio::fs::write(&tmp, &contents).await?;
        tokio::fs::rename(&tmp, &path).await?;
        set_mode_0644(&path).await?;

        info!(slug = %slug, pr = pr_number, path = %path.display(), "wrote proxy route");
        self.reload_or_error().await?;
        Ok(())
    }

    /// Unlink the route file (idempotent on absence) and reload.
    pub async fn remove_preview(&self, slug: &str, pr_number: u64) -> Result<(), OrchestratorError> {
        let path = self.route_path(slug, pr_number);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!(slug = %slug, pr = pr_number, "removed proxy route"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(OrchestratorError::TrackerIo(e)),
        }
        self.reload_or_error().await?;
        Ok(())
    }

    async fn reload_or_error(&self) -> Result<(), OrchestratorError> {
        self.reloader.reload().await.map_err(|e| {
            warn!(error = %e, "proxy reload failed");
            OrchestratorError::ProxyReload(e)
        })
    }
}

#[cfg(unix)]
async fn set_mode_0644(path: &Path) -> Result<(), OrchestratorError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o644);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode_0644(_path: &Path) -> Result<(), OrchestratorError> {
    Ok(())
}

fn render_route(slug: &str, pr_number: u64, app_port: u16) -> String {
    format!(
        "location /{slug}/pr-{pr_number}/ {{\n    proxy_pass http://localhost:{app_port}/;\n    proxy_set_header Host $host;\n    proxy_set_header X-Real-IP $remote_addr;\n    proxy_http_version 1.1;\n}}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn add_preview_writes_expected_location_block() {
        let dir = tempdir().unwrap();
        let manager = ProxyManager::new(dir.path(), Box::new(NoopReloader));
        manager.add_preview("acme-api", 42, 8000).await.unwrap();

        let contents = tokio::fs::read_to_string(dir.path().join("acme-api-pr-42.conf"))
            .await
            .unwrap();
        assert!(contents.contains("location /acme-api/pr-42/"));
        assert!(contents.contains("proxy_pass http://localhost:8000/"));
        assert!(!contents.contains("server {"));
    }

    #[tokio::test]
    async fn remove_preview_is_idempotent_on_absence() {
        let dir = tempdir().unwrap();
        let manager = ProxyManager::new(dir.path(), Box::new(NoopReloader));
        manager.remove_preview("ghost", 1).await.unwrap();
    }

    #[tokio::test]
    async fn remove_preview_deletes_existing_file() {
        let dir = tempdir().unwrap();
        let manager = ProxyManager::new(dir.path(), Box::new(NoopReloader));
        manager.add_preview("acme-api", 42, 8000).await.unwrap();
        manager.remove_preview("acme-api", 42).await.unwrap();
        assert!(tokio::fs::metadata(dir.path().join("acme-api-pr-42.conf")).await.is_err());
    }
}
