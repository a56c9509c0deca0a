//! Compose/Dockerfile materializer (C5).
//!
//! Two modes: if the repo ships its own `docker-compose.preview.yml`,
//! normalize and inject into it; otherwise render a compose document from
//! per-framework/per-service templates. Both modes manipulate the compose
//! document as a generic `serde_yaml::Value` tree — the same technique
//! rivetr's service-template namespacing uses to rewrite `container_name`
//! fields without needing a typed compose schema.

pub mod templates;

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::info;

use crate::error::OrchestratorError;
use crate::model::{Database, ExtraService, Framework, RepoPreviewConfig};

/// Parameters needed to materialize the compose file and Dockerfile for
/// one deployment.
pub struct MaterializeParams<'a> {
    pub work_dir: &'a Path,
    pub project_slug: &'a str,
    pub pr_number: u64,
    pub exposed_app_port: u16,
    pub exposed_db_port: u16,
    pub framework: Framework,
    pub repo_config: &'a RepoPreviewConfig,
}

/// The compose file to invoke `compose -f` against, and the Dockerfile
/// backing the `app` service build.
pub struct Materialized {
    pub compose_file: PathBuf,
}

pub async fn materialize(params: MaterializeParams<'_>) -> Result<Materialized, OrchestratorError> {
    resolve_dockerfile(params.work_dir, params.framework, params.repo_config).await?;

    let repo_owned = find_repo_owned_compose(params.work_dir).await?;
    let mut doc = match repo_owned {
        Some(path) => load_yaml(&path).await?,
        None => build_template_compose(&params),
    };

    inject_app_port(&mut doc, params.exposed_app_port, params.repo_config.app_port)?;
    apply_repo_env(&mut doc, params.framework, params.repo_config)?;

    let out_path = params.work_dir.join("docker-compose.preview.generated.yml");
    write_yaml_atomic(&out_path, &doc).await?;

    info!(project_slug = %params.project_slug, pr = params.pr_number, path = %out_path.display(), "materialized compose file");

    Ok(Materialized { compose_file: out_path })
}

/// Locate a repo-owned `docker-compose.preview.yml[.yaml]`, normalizing
/// `.yaml` to `.yml` by renaming, per the exact-name contract.
async fn find_repo_owned_compose(work_dir: &Path) -> Result<Option<PathBuf>, OrchestratorError> {
    let yml = work_dir.join("docker-compose.preview.yml");
    if tokio::fs::metadata(&yml).await.is_ok() {
        return Ok(Some(yml));
    }
    let yaml = work_dir.join("docker-compose.preview.yaml");
    if tokio::fs::metadata(&yaml).await.is_ok() {
        tokio::fs::rename(&yaml, &yml).await?;
        return Ok(Some(yml));
    }
    Ok(None)
}

async fn load_yaml(path: &Path) -> Result<Value, OrchestratorError> {
    let raw = tokio::fs::read_to_string(path).await?;
    serde_yaml::from_str(&raw)
        .map_err(|e| OrchestratorError::ConfigInvalid(format!("invalid compose yaml: {e}")))
}

async fn write_yaml_atomic(path: &Path, doc: &Value) -> Result<(), OrchestratorError> {
    let rendered = serde_yaml::to_string(doc)
        .map_err(|e| OrchestratorError::ConfigInvalid(format!("failed to render compose yaml: {e}")))?;
    let tmp = path.with_extension("yml.tmp");
    tokio::fs::write(&tmp, rendered).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn services_mut(doc: &mut Value) -> &mut Mapping {
    let root = doc.as_mapping_mut().expect("compose document must be a mapping");
    root.entry(Value::String("services".into()))
        .or_insert_with(|| Value::Mapping(Mapping::new()))
        .as_mapping_mut()
        .expect("services must be a mapping")
}

fn service_mut<'a>(services: &'a mut Mapping, name: &str) -> &'a mut Mapping {
    services
        .entry(Value::String(name.into()))
        .or_insert_with(|| Value::Mapping(Mapping::new()))
        .as_mapping_mut()
        .expect("service entry must be a mapping")
}

/// Overwrite the `app` service's `ports` entry so the host is the sole
/// authority on host ports: `"<exposedAppPort>:<appPort>"`.
fn inject_app_port(doc: &mut Value, exposed_app_port: u16, app_port: u16) -> Result<(), OrchestratorError> {
    let services = services_mut(doc);
    let app = service_mut(services, "app");
    app.insert(
        Value::String("ports".into()),
        Value::Sequence(vec![Value::String(format!("{exposed_app_port}:{app_port}"))]),
    );
    Ok(())
}

/// Apply `repoConfig.env`, `env_file`, and `startup_commands` to the app
/// service, per §3/§4.5. When `startup_commands` are present, set a
/// shell entrypoint that runs them in sequence before `exec`ing the
/// framework's default process argv.
fn apply_repo_env(
    doc: &mut Value,
    framework: Framework,
    repo_config: &RepoPreviewConfig,
) -> Result<(), OrchestratorError> {
    let services = services_mut(doc);
    let app = service_mut(services, "app");

    {
        let environment = app
            .entry(Value::String("environment".into()))
            .or_insert_with(|| Value::Sequence(Vec::new()));
        let Value::Sequence(list) = environment else {
            return Err(OrchestratorError::ConfigInvalid(
                "app.environment must be a sequence".into(),
            ));
        };

        let mut set_env = |key: &str, value: &str| {
            list.retain(|entry| {
                !matches!(entry, Value::String(s) if s.starts_with(&format!("{key}=")))
            });
            list.push(Value::String(format!("{key}={value}")));
        };

        // The app's own listen port, per its configurable env var — the
        // whole reason `app_port_env` exists in `preview-config.yml`.
        set_env(&repo_config.app_port_env, &repo_config.app_port.to_string());

        for (key, value) in &repo_config.env {
            set_env(key, value);
        }
    }

    if let Some(env_file) = &repo_config.env_file {
        app.insert(Value::String("env_file".into()), Value::String(env_file.clone()));
    }

    if !repo_config.startup_commands.is_empty() {
        let chained = repo_config.startup_commands.join(" && ");
        app.insert(
            Value::String("entrypoint".into()),
            Value::Sequence(vec![
                Value::String("/bin/sh".into()),
                Value::String("-c".into()),
                Value::String(format!("{chained} && exec \"$@\"")),
                Value::String("--".into()),
            ]),
        );
        let argv = templates::default_process_argv(
            framework,
            &repo_config.app_entrypoint,
            repo_config.app_port,
        );
        app.insert(
            Value::String("command".into()),
            Value::Sequence(argv.into_iter().map(Value::String).collect()),
        );
    }

    Ok(())
}

/// Build a template-generated compose document for the app plus its
/// database and any extra services.
fn build_template_compose(params: &MaterializeParams<'_>) -> Value {
    let mut services = Mapping::new();

    let mut app = Mapping::new();
    app.insert(Value::String("build".into()), Value::String(".".into()));
    app.insert(
        Value::String("container_name".into()),
        Value::String(params.project_slug.to_string()
            + "-pr-"
            + &params.pr_number.to_string()
            + "-app"),
    );
    let mut depends_on = Mapping::new();

    let db = params.repo_config.database;
    let db_service = db.service_name();
    services.insert(
        Value::String(db_service.to_string()),
        Value::Mapping(build_database_service(db)),
    );
    let mut condition = Mapping::new();
    condition.insert(Value::String("condition".into()), Value::String("service_healthy".into()));
    depends_on.insert(Value::String(db_service.to_string()), Value::Mapping(condition));

    let db_url = format!(
        "{}://preview:preview@{}:{}/pr_{}",
        db.scheme(),
        db_service,
        db.port(),
        params.pr_number
    );
    let mut env = vec![Value::String(format!("DATABASE_URL={db_url}"))];

    for extra in &params.repo_config.extra_services {
        match extra {
            ExtraService::Redis => {
                services.insert(Value::String("redis".into()), Value::Mapping(build_redis_service()));
                let mut redis_condition = Mapping::new();
                redis_condition.insert(
                    Value::String("condition".into()),
                    Value::String("service_healthy".into()),
                );
                depends_on.insert(Value::String("redis".into()), Value::Mapping(redis_condition));
                env.push(Value::String("REDIS_URL=redis://redis:6379".into()));
            }
        }
    }

    app.insert(Value::String("environment".into()), Value::Sequence(env));
    app.insert(Value::String("depends_on".into()), Value::Mapping(depends_on));
    services.insert(Value::String("app".into()), Value::Mapping(app));

    let mut root = Mapping::new();
    root.insert(Value::String("services".into()), Value::Mapping(services));
    Value::Mapping(root)
}

fn build_database_service(db: Database) -> Mapping {
    let mut svc = Mapping::new();
    let (image, env) = match db {
        Database::Postgres => (
            "postgres:16-alpine",
            vec![
                ("POSTGRES_USER", "preview"),
                ("POSTGRES_PASSWORD", "preview"),
            ],
        ),
        Database::Mysql => (
            "mysql:8",
            vec![
                ("MYSQL_USER", "preview"),
                ("MYSQL_PASSWORD", "preview"),
                ("MYSQL_ROOT_PASSWORD", "preview"),
            ],
        ),
        Database::Mongodb => (
            "mongo:7",
            vec![
                ("MONGO_INITDB_ROOT_USERNAME", "preview"),
                ("MONGO_INITDB_ROOT_PASSWORD", "preview"),
            ],
        ),
    };
    svc.insert(Value::String("image".into()), Value::String(image.into()));
    svc.insert(
        Value::String("environment".into()),
        Value::Sequence(
            env.into_iter()
                .map(|(k, v)| Value::String(format!("{k}={v}")))
                .collect(),
        ),
    );
    svc.insert(
        Value::String("healthcheck".into()),
        Value::Mapping(health_check_for(db)),
    );
    svc
}

fn health_check_for(db: Database) -> Mapping {
    let test = match db {
        Database::Postgres => vec!["CMD-SHELL".to_string(), "pg_isready -U preview".to_string()],
        Database::Mysql => vec!["CMD".to_string(), "mysqladmin".to_string(), "ping".to_string()],
        Database::Mongodb => vec![
            "CMD".to_string(),
            "mongosh".to_string(),
            "--eval".to_string(),
            "db.adminCommand('ping')".to_string(),
        ],
    };
    let mut hc = Mapping::new();
    hc.insert(
        Value::String("test".into()),
        Value::Sequence(test.into_iter().map(Value::String).collect()),
    );
    hc.insert(Value::String("interval".into()), Value::String("5s".into()));
    hc.insert(Value::String("retries".into()), Value::Number(5.into()));
    hc
}

fn build_redis_service() -> Mapping {
    let mut svc = Mapping::new();
    svc.insert(Value::String("image".into()), Value::String("redis:7-alpine".into()));
    let mut hc = Mapping::new();
    hc.insert(
        Value::String("test".into()),
        Value::Sequence(vec![
            Value::String("CMD".into()),
            Value::String("redis-cli".into()),
            Value::String("ping".into()),
        ]),
    );
    hc.insert(Value::String("interval".into()), Value::String("5s".into()));
    hc.insert(Value::String("retries".into()), Value::Number(5.into()));
    svc.insert(Value::String("healthcheck".into()), Value::Mapping(hc));
    svc
}

/// Dockerfile resolution: use an existing `Dockerfile`, promote a
/// lowercase `dockerfile` on case-sensitive filesystems, or render the
/// framework default.
async fn resolve_dockerfile(
    work_dir: &Path,
    framework: Framework,
    repo_config: &RepoPreviewConfig,
) -> Result<(), OrchestratorError> {
    let canonical = work_dir.join("Dockerfile");
    if tokio::fs::metadata(&canonical).await.is_ok() {
        return Ok(());
    }

    if let Some(custom) = &repo_config.dockerfile {
        let custom_path = work_dir.join(custom);
        if tokio::fs::metadata(&custom_path).await.is_ok() {
            return Ok(());
        }
    }

    let lowercase = work_dir.join("dockerfile");
    if tokio::fs::metadata(&lowercase).await.is_ok() {
        tokio::fs::copy(&lowercase, &canonical).await?;
        return Ok(());
    }

    let rendered = templates::render_dockerfile(
        framework,
        repo_config.app_port,
        &repo_config.app_entrypoint,
        repo_config.database,
    );
    tokio::fs::write(&canonical, rendered).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn base_repo_config() -> RepoPreviewConfig {
        RepoPreviewConfig {
            framework: Some(Framework::Nestjs),
            database: Database::Postgres,
            health_check_path: "/health".into(),
            app_port: 3000,
            app_port_env: "PORT".into(),
            app_entrypoint: "dist/main.js".into(),
            build_commands: vec![],
            extra_services: vec![],
            env: vec![],
            env_file: None,
            startup_commands: vec![],
            dockerfile: None,
        }
    }

    #[tokio::test]
    async fn template_mode_renders_dockerfile_and_injects_port() {
        let dir = tempdir().unwrap();
        let repo_config = base_repo_config();
        let params = MaterializeParams {
            work_dir: dir.path(),
            project_slug: "acme-api",
            pr_number: 42,
            exposed_app_port: 8000,
            exposed_db_port: 9000,
            framework: Framework::Nestjs,
            repo_config: &repo_config,
        };
        let materialized = materialize(params).await.unwrap();
        assert!(tokio::fs::metadata(dir.path().join("Dockerfile")).await.is_ok());

        let doc = load_yaml(&materialized.compose_file).await.unwrap();
        let ports = doc["services"]["app"]["ports"].as_sequence().unwrap();
        assert_eq!(ports[0].as_str().unwrap(), "8000:3000");
        assert!(doc["services"]["postgres"].is_mapping());

        let environment = doc["services"]["app"]["environment"].as_sequence().unwrap();
        assert!(environment.iter().any(|v| v.as_str() == Some("PORT=3000")));
    }

    #[tokio::test]
    async fn repo_owned_yaml_extension_is_normalized() {
        let dir = tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("docker-compose.preview.yaml"),
            "services:\n  app:\n    image: scratch\n",
        )
        .await
        .unwrap();
        let repo_config = base_repo_config();
        let params = MaterializeParams {
            work_dir: dir.path(),
            project_slug: "acme-api",
            pr_number: 7,
            exposed_app_port: 8010,
            exposed_db_port: 9010,
            framework: Framework::Nestjs,
            repo_config: &repo_config,
        };
        let materialized = materialize(params).await.unwrap();
        assert!(tokio::fs::metadata(dir.path().join("docker-compose.preview.yml")).await.is_ok());

        let doc = load_yaml(&materialized.compose_file).await.unwrap();
        let environment = doc["services"]["app"]["environment"].as_sequence().unwrap();
        assert!(environment.iter().any(|v| v.as_str() == Some("PORT=3000")));
    }

    #[tokio::test]
    async fn startup_commands_install_shell_entrypoint() {
        let dir = tempdir().unwrap();
        let mut repo_config = base_repo_config();
        repo_config.startup_commands = vec!["npm run migrate".into()];
        let params = MaterializeParams {
            work_dir: dir.path(),
            project_slug: "acme-api",
            pr_number: 9,
            exposed_app_port: 8020,
            exposed_db_port: 9020,
            framework: Framework::Nestjs,
            repo_config: &repo_config,
        };
        let materialized = materialize(params).await.unwrap();
        let doc = load_yaml(&materialized.compose_file).await.unwrap();
        let entrypoint = doc["services"]["app"]["entrypoint"].as_sequence().unwrap();
        assert!(entrypoint[2].as_str().unwrap().contains("npm run migrate && exec"));
    }
}
