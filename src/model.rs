//! Core data model: deployments, port allocations, and the repo-owned
//! preview configuration schema.

use serde::{Deserialize, Serialize};

/// Supported application frameworks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Nestjs,
    Go,
    Laravel,
    Rust,
    Python,
}

impl std::fmt::Display for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Framework::Nestjs => "nestjs",
            Framework::Go => "go",
            Framework::Laravel => "laravel",
            Framework::Rust => "rust",
            Framework::Python => "python",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Framework {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nestjs" => Ok(Framework::Nestjs),
            "go" => Ok(Framework::Go),
            "laravel" => Ok(Framework::Laravel),
            "rust" => Ok(Framework::Rust),
            "python" => Ok(Framework::Python),
            other => Err(format!("unknown framework: {other}")),
        }
    }
}

/// Supported databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    Postgres,
    Mysql,
    Mongodb,
}

impl Database {
    /// The connection-string scheme used when injecting `DATABASE_URL`.
    pub fn scheme(&self) -> &'static str {
        match self {
            Database::Postgres => "postgres",
            Database::Mysql => "mysql",
            Database::Mongodb => "mongodb",
        }
    }

    /// The canonical service name the compose materializer emits.
    pub fn service_name(&self) -> &'static str {
        match self {
            Database::Postgres => "postgres",
            Database::Mysql => "mysql",
            Database::Mongodb => "mongodb",
        }
    }

    /// The in-container port the database image listens on.
    pub fn port(&self) -> u16 {
        match self {
            Database::Postgres => 5432,
            Database::Mysql => 3306,
            Database::Mongodb => 27017,
        }
    }
}

impl std::fmt::Display for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.scheme())
    }
}

impl std::str::FromStr for Database {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Database::Postgres),
            "mysql" => Ok(Database::Mysql),
            "mongodb" | "mongo" => Ok(Database::Mongodb),
            other => Err(format!("unknown database: {other}")),
        }
    }
}

/// Lifecycle status of a tracked deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Building,
    Running,
    Failed,
    Stopped,
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeploymentStatus::Building => "building",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Host ports allocated to one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortAllocation {
    pub exposed_app_port: u16,
    pub exposed_db_port: u16,
}

/// The authoritative record of one PR preview.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub pr_number: u64,
    pub repo_owner: String,
    pub repo_name: String,
    pub project_slug: String,
    pub deployment_id: String,
    pub branch: String,
    pub commit_sha: String,
    pub clone_url: String,
    pub framework: Framework,
    pub db_type: Database,
    /// In-container port the app listens on.
    pub app_port: u16,
    pub exposed_app_port: u16,
    pub exposed_db_port: u16,
    pub status: DeploymentStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub url: Option<String>,
    pub comment_id: Option<u64>,
}

impl Deployment {
    /// Days elapsed since this deployment was created, used by the
    /// reconciler's TTL check. Fractional days are floored.
    pub fn age_days(&self, now: chrono::DateTime<chrono::Utc>) -> i64 {
        (now - self.created_at).num_days()
    }
}

/// One extra service declared alongside the app (currently only redis;
/// databases are declared separately via `database`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtraService {
    Redis,
}

/// `preview-config.yml` parsed from the cloned repo's root.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRepoPreviewConfig {
    pub framework: Option<String>,
    pub database: String,
    pub health_check_path: String,
    pub app_port: u16,
    pub app_port_env: String,
    pub app_entrypoint: String,
    #[serde(default)]
    pub build_commands: Vec<String>,
    #[serde(default)]
    pub extra_services: Vec<ExtraService>,
    #[serde(default)]
    pub env: Vec<String>,
    pub env_file: Option<serde_yaml::Value>,
    #[serde(default)]
    pub startup_commands: Vec<String>,
    pub dockerfile: Option<String>,
}

/// Validated, normalized preview configuration.
#[derive(Debug, Clone)]
pub struct RepoPreviewConfig {
    pub framework: Option<Framework>,
    pub database: Database,
    pub health_check_path: String,
    pub app_port: u16,
    pub app_port_env: String,
    pub app_entrypoint: String,
    pub build_commands: Vec<String>,
    pub extra_services: Vec<ExtraService>,
    pub env: Vec<(String, String)>,
    pub env_file: Option<String>,
    pub startup_commands: Vec<String>,
    pub dockerfile: Option<String>,
}
