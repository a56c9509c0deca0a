//! Repo-config parser (C2): reads and validates `preview-config.yml`.

use std::path::Path;
use std::str::FromStr;

use crate::error::OrchestratorError;
use crate::model::{Database, Framework, RawRepoPreviewConfig, RepoPreviewConfig};

/// Read and validate `preview-config.yml` at the root of a cloned repo.
pub async fn parse_repo_config(work_dir: &Path) -> Result<RepoPreviewConfig, OrchestratorError> {
    let path = work_dir.join("preview-config.yml");
    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(|_| OrchestratorError::ConfigMissing)?;
    parse_repo_config_str(&raw)
}

/// Parse and validate the raw YAML text of a preview config. Split out
/// from the filesystem read so it can be exercised directly in tests.
pub fn parse_repo_config_str(raw: &str) -> Result<RepoPreviewConfig, OrchestratorError> {
    let parsed: RawRepoPreviewConfig = serde_yaml::from_str(raw)
        .map_err(|e| OrchestratorError::ConfigInvalid(e.to_string()))?;

    if parsed.health_check_path.is_empty() {
        return Err(OrchestratorError::ConfigInvalid(
            "health_check_path must not be empty".into(),
        ));
    }
    if parsed.app_port == 0 {
        return Err(OrchestratorError::ConfigInvalid(
            "app_port must be a positive integer".into(),
        ));
    }
    if parsed.app_port_env.trim().is_empty() {
        return Err(OrchestratorError::ConfigInvalid(
            "app_port_env must not be empty".into(),
        ));
    }
    if parsed.app_entrypoint.trim().is_empty() {
        return Err(OrchestratorError::ConfigInvalid(
            "app_entrypoint must not be empty".into(),
        ));
    }

    let framework = match parsed.framework {
        Some(f) => Some(
            Framework::from_str(&f)
                .map_err(|e| OrchestratorError::ConfigInvalid(format!("framework: {e}")))?,
        ),
        None => None,
    };

    let database = Database::from_str(&parsed.database)
        .map_err(|e| OrchestratorError::ConfigInvalid(format!("database: {e}")))?;

    let health_check_path = if parsed.health_check_path.starts_with('/') {
        parsed.health_check_path
    } else {
        format!("/{}", parsed.health_check_path)
    };

    let env = parsed
        .env
        .iter()
        .map(|kv| match kv.split_once('=') {
            Some((k, v)) => Ok((k.to_string(), v.to_string())),
            None => Err(OrchestratorError::ConfigInvalid(format!(
                "env entry {kv:?} is not in KEY=VAL form"
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let env_file = match parsed.env_file {
        None => None,
        Some(serde_yaml::Value::String(s)) => Some(s),
        Some(_) => {
            return Err(OrchestratorError::ConfigInvalid(
                "env_file must be a single scalar path, not a sequence".into(),
            ))
        }
    };

    Ok(RepoPreviewConfig {
        framework,
        database,
        health_check_path,
        app_port: parsed.app_port,
        app_port_env: parsed.app_port_env,
        app_entrypoint: parsed.app_entrypoint,
        build_commands: parsed.build_commands,
        extra_services: parsed.extra_services,
        env,
        env_file,
        startup_commands: parsed.startup_commands,
        dockerfile: parsed.dockerfile,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> String {
        r#"
database: postgres
health_check_path: healthz
app_port: 3000
app_port_env: PORT
app_entrypoint: dist/main.js
"#
        .to_string()
    }

    #[test]
    fn normalizes_health_check_path_to_start_with_slash() {
        let cfg = parse_repo_config_str(&minimal_yaml()).unwrap();
        assert_eq!(cfg.health_check_path, "/healthz");
    }

    #[test]
    fn missing_required_field_is_config_invalid() {
        let yaml = "database: postgres\nhealth_check_path: /health\n";
        let err = parse_repo_config_str(yaml).unwrap_err();
        assert!(matches!(err, OrchestratorError::ConfigInvalid(_)));
    }

    #[test]
    fn rejects_unknown_database() {
        let yaml = minimal_yaml().replace("postgres", "oracle");
        let err = parse_repo_config_str(&yaml).unwrap_err();
        assert!(matches!(err, OrchestratorError::ConfigInvalid(_)));
    }

    #[test]
    fn env_file_sequence_is_rejected() {
        let mut yaml = minimal_yaml();
        yaml.push_str("env_file:\n  - .env\n  - .env.local\n");
        let err = parse_repo_config_str(&yaml).unwrap_err();
        match err {
            OrchestratorError::ConfigInvalid(msg) => assert!(msg.contains("scalar")),
            other => panic!("expected ConfigInvalid, got {other:?}"),
        }
    }

    #[test]
    fn env_entries_parse_into_pairs() {
        let mut yaml = minimal_yaml();
        yaml.push_str("env:\n  - FOO=bar\n  - BAZ=qux\n");
        let cfg = parse_repo_config_str(&yaml).unwrap();
        assert_eq!(
            cfg.env,
            vec![("FOO".to_string(), "bar".to_string()), ("BAZ".to_string(), "qux".to_string())]
        );
    }

    #[test]
    fn round_trips_required_fields() {
        let cfg = parse_repo_config_str(&minimal_yaml()).unwrap();
        assert_eq!(cfg.app_port, 3000);
        assert_eq!(cfg.app_port_env, "PORT");
        assert_eq!(cfg.app_entrypoint, "dist/main.js");
        assert_eq!(cfg.database, Database::Postgres);
    }
}
