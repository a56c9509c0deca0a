//! Framework detector (C3): ordered heuristics over a cloned repo's
//! contents, with an explicit config override taking precedence.

use std::path::Path;

use crate::model::{Framework, RepoPreviewConfig};

/// Resolve the framework for a deployment: honor an explicit config
/// value first, otherwise run the ordered detectors and fall back to
/// `nestjs` if none match (source behavior; see DESIGN.md Open Question).
pub async fn resolve_framework(work_dir: &Path, repo_config: &RepoPreviewConfig) -> Framework {
    if let Some(f) = repo_config.framework {
        return f;
    }

    if detect_nestjs(work_dir).await {
        return Framework::Nestjs;
    }
    if detect_go(work_dir).await {
        return Framework::Go;
    }
    if detect_laravel(work_dir).await {
        return Framework::Laravel;
    }

    Framework::Nestjs
}

async fn detect_nestjs(work_dir: &Path) -> bool {
    if tokio::fs::metadata(work_dir.join("nest-cli.json")).await.is_ok() {
        return true;
    }
    let Ok(package_json) = tokio::fs::read_to_string(work_dir.join("package.json")).await else {
        return false;
    };
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&package_json) else {
        return false;
    };
    ["dependencies", "devDependencies"].iter().any(|section| {
        parsed
            .get(section)
            .and_then(|deps| deps.get("@nestjs/core"))
            .is_some()
    })
}

async fn detect_go(work_dir: &Path) -> bool {
    tokio::fs::metadata(work_dir.join("go.mod")).await.is_ok()
}

async fn detect_laravel(work_dir: &Path) -> bool {
    let Ok(composer_json) = tokio::fs::read_to_string(work_dir.join("composer.json")).await else {
        return false;
    };
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&composer_json) else {
        return false;
    };
    ["require", "require-dev"].iter().any(|section| {
        parsed
            .get(section)
            .and_then(|deps| deps.get("laravel/framework"))
            .is_some()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Database;
    use tempfile::TempDir;

    fn base_config() -> RepoPreviewConfig {
        RepoPreviewConfig {
            framework: None,
            database: Database::Postgres,
            health_check_path: "/health".into(),
            app_port: 3000,
            app_port_env: "PORT".into(),
            app_entrypoint: "main".into(),
            build_commands: vec![],
            extra_services: vec![],
            env: vec![],
            env_file: None,
            startup_commands: vec![],
            dockerfile: None,
        }
    }

    #[tokio::test]
    async fn config_override_wins() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("go.mod"), "module x\n").await.unwrap();
        let mut cfg = base_config();
        cfg.framework = Some(Framework::Rust);
        assert_eq!(resolve_framework(dir.path(), &cfg).await, Framework::Rust);
    }

    #[tokio::test]
    async fn detects_go_via_go_mod() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("go.mod"), "module x\n").await.unwrap();
        assert_eq!(resolve_framework(dir.path(), &base_config()).await, Framework::Go);
    }

    #[tokio::test]
    async fn detects_nestjs_via_nest_cli_json() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("nest-cli.json"), "{}").await.unwrap();
        assert_eq!(resolve_framework(dir.path(), &base_config()).await, Framework::Nestjs);
    }

    #[tokio::test]
    async fn detects_nestjs_via_package_json_dependency() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies": {"@nestjs/core": "^10.0.0"}}"#,
        )
        .await
        .unwrap();
        assert_eq!(resolve_framework(dir.path(), &base_config()).await, Framework::Nestjs);
    }

    #[tokio::test]
    async fn detects_laravel_via_composer_json() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(
            dir.path().join("composer.json"),
            r#"{"require": {"laravel/framework": "^11.0"}}"#,
        )
        .await
        .unwrap();
        assert_eq!(resolve_framework(dir.path(), &base_config()).await, Framework::Laravel);
    }

    #[tokio::test]
    async fn falls_back_to_nestjs_when_nothing_matches() {
        let dir = TempDir::new().unwrap();
        assert_eq!(resolve_framework(dir.path(), &base_config()).await, Framework::Nestjs);
    }
}
