//! Composition-root configuration, loaded entirely from the process
//! environment. Keeps rivetr's per-field `Default` idiom even though the
//! source here is `std::env::var` rather than a TOML file — the spec is
//! explicit that this daemon takes no config file.

use std::path::PathBuf;

/// Daemon configuration, validated once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// GitHub installation/PAT token used for comments and PR status.
    pub github_token: String,
    /// Shared secret used to verify `X-Hub-Signature-256`.
    pub github_webhook_secret: String,
    /// `owner/repo` allow-list; webhooks for any other repo are rejected.
    pub allowed_repos: Vec<String>,
    /// Public base URL previews are published under.
    pub preview_base_url: String,

    pub deployments_dir: PathBuf,
    pub nginx_config_dir: PathBuf,
    pub deployments_db: PathBuf,
    pub cleanup_ttl_days: i64,
    pub orchestrator_port: u16,
    pub log_level: String,
}

/// Error raised when a required environment variable is absent; the
/// composition root logs this and exits non-zero.
#[derive(Debug, thiserror::Error)]
#[error("missing required environment variable: {0}")]
pub struct MissingEnvVar(pub &'static str);

impl Config {
    pub fn from_env() -> Result<Self, MissingEnvVar> {
        Ok(Self {
            github_token: require_env("GITHUB_TOKEN")?,
            github_webhook_secret: require_env("GITHUB_WEBHOOK_SECRET")?,
            allowed_repos: require_env("ALLOWED_REPOS")?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            preview_base_url: require_env("PREVIEW_BASE_URL")?,

            deployments_dir: PathBuf::from(
                std::env::var("DEPLOYMENTS_DIR").unwrap_or_else(|_| default_deployments_dir()),
            ),
            nginx_config_dir: PathBuf::from(
                std::env::var("NGINX_CONFIG_DIR").unwrap_or_else(|_| default_nginx_config_dir()),
            ),
            deployments_db: PathBuf::from(
                std::env::var("DEPLOYMENTS_DB").unwrap_or_else(|_| default_deployments_db()),
            ),
            cleanup_ttl_days: std::env::var("CLEANUP_TTL_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_cleanup_ttl_days),
            orchestrator_port: std::env::var("ORCHESTRATOR_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_orchestrator_port),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| default_log_level()),
        })
    }
}

fn require_env(key: &'static str) -> Result<String, MissingEnvVar> {
    std::env::var(key).map_err(|_| MissingEnvVar(key))
}

fn default_deployments_dir() -> String {
    "/opt/preview-deployments".to_string()
}

fn default_nginx_config_dir() -> String {
    "/etc/nginx/preview-configs".to_string()
}

fn default_deployments_db() -> String {
    "/opt/preview-deployer/deployments.json".to_string()
}

fn default_cleanup_ttl_days() -> i64 {
    7
}

fn default_orchestrator_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment mutation races across tests in the same process;
    // serialize with a lock rather than relying on cargo test's
    // per-process isolation (there is none within one binary).
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn missing_required_var_is_reported_by_name() {
        let _guard = ENV_LOCK.lock().unwrap();
        for key in ["GITHUB_TOKEN", "GITHUB_WEBHOOK_SECRET", "ALLOWED_REPOS", "PREVIEW_BASE_URL"] {
            std::env::remove_var(key);
        }
        let err = Config::from_env().unwrap_err();
        assert_eq!(err.0, "GITHUB_TOKEN");
    }

    #[test]
    fn defaults_apply_when_optional_vars_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("GITHUB_TOKEN", "t");
        std::env::set_var("GITHUB_WEBHOOK_SECRET", "s");
        std::env::set_var("ALLOWED_REPOS", "acme/api, acme/web");
        std::env::set_var("PREVIEW_BASE_URL", "https://preview.example.com");
        for key in ["DEPLOYMENTS_DIR", "NGINX_CONFIG_DIR", "DEPLOYMENTS_DB", "CLEANUP_TTL_DAYS", "ORCHESTRATOR_PORT", "LOG_LEVEL"] {
            std::env::remove_var(key);
        }

        let config = Config::from_env().unwrap();
        assert_eq!(config.cleanup_ttl_days, 7);
        assert_eq!(config.orchestrator_port, 3000);
        assert_eq!(config.allowed_repos, vec!["acme/api".to_string(), "acme/web".to_string()]);

        for key in ["GITHUB_TOKEN", "GITHUB_WEBHOOK_SECRET", "ALLOWED_REPOS", "PREVIEW_BASE_URL"] {
            std::env::remove_var(key);
        }
    }
}
