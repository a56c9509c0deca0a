//! Static per-framework templates: default Dockerfiles and default
//! container entrypoints. Rendered with plain `format!` — the templates
//! are small and fixed, so pulling in a templating engine would be
//! overhead for no benefit.

use crate::model::Framework;

/// The framework's default process argv, used as `command` when
/// `startup_commands` replace the entrypoint.
pub fn default_process_argv(framework: Framework, app_entrypoint: &str, app_port: u16) -> Vec<String> {
    match framework {
        Framework::Nestjs => vec!["node".to_string(), app_entrypoint.to_string()],
        Framework::Go | Framework::Rust => vec![format!("./{app_entrypoint}")],
        Framework::Python => vec![
            "uvicorn".to_string(),
            app_entrypoint.to_string(),
            "--host".to_string(),
            "0.0.0.0".to_string(),
            "--port".to_string(),
            app_port.to_string(),
        ],
        Framework::Laravel => vec![
            "php".to_string(),
            "artisan".to_string(),
            "serve".to_string(),
            "--host=0.0.0.0".to_string(),
            format!("--port={app_port}"),
        ],
    }
}

/// Render a default `Dockerfile.<framework>` for frameworks whose repo
/// carries no Dockerfile of its own.
pub fn render_dockerfile(framework: Framework, app_port: u16, app_entrypoint: &str, db: crate::model::Database) -> String {
    let _ = db; // the base images below are DB-agnostic; kept for signature symmetry with the other render_* helpers
    match framework {
        Framework::Nestjs => format!(
            "FROM node:20-slim\nWORKDIR /app\nCOPY package*.json ./\nRUN npm ci\nCOPY . .\nRUN npm run build\nEXPOSE {app_port}\nCMD [\"node\", \"{app_entrypoint}\"]\n"
        ),
        Framework::Go => format!(
            "FROM golang:1.22 AS build\nWORKDIR /app\nCOPY . .\nRUN go build -o {app_entrypoint} .\n\nFROM debian:bookworm-slim\nWORKDIR /app\nCOPY --from=build /app/{app_entrypoint} ./{app_entrypoint}\nEXPOSE {app_port}\nCMD [\"./{app_entrypoint}\"]\n"
        ),
        Framework::Rust => format!(
            "FROM rust:1.75 AS build\nWORKDIR /app\nCOPY . .\nRUN cargo build --release\n\nFROM debian:bookworm-slim\nWORKDIR /app\nCOPY --from=build /app/target/release/{app_entrypoint} ./{app_entrypoint}\nEXPOSE {app_port}\nCMD [\"./{app_entrypoint}\"]\n"
        ),
        Framework::Python => format!(
            "FROM python:3.12-slim\nWORKDIR /app\nCOPY requirements.txt .\nRUN pip install --no-cache-dir -r requirements.txt\nCOPY . .\nEXPOSE {app_port}\nCMD [\"uvicorn\", \"{app_entrypoint}\", \"--host\", \"0.0.0.0\", \"--port\", \"{app_port}\"]\n"
        ),
        Framework::Laravel => format!(
            "FROM php:8.3-cli\nWORKDIR /app\nCOPY . .\nRUN docker-php-ext-install pdo pdo_mysql pdo_pgsql\nEXPOSE {app_port}\nCMD [\"php\", \"artisan\", \"serve\", \"--host=0.0.0.0\", \"--port={app_port}\"]\n"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Database;

    #[test]
    fn nestjs_default_argv_runs_node_with_entrypoint() {
        assert_eq!(
            default_process_argv(Framework::Nestjs, "dist/main.js", 3000),
            vec!["node", "dist/main.js"]
        );
    }

    #[test]
    fn python_default_argv_is_uvicorn() {
        assert_eq!(
            default_process_argv(Framework::Python, "app.main:app", 8080),
            vec!["uvicorn", "app.main:app", "--host", "0.0.0.0", "--port", "8080"]
        );
    }

    #[test]
    fn dockerfile_exposes_configured_port() {
        let df = render_dockerfile(Framework::Go, 4000, "server", Database::Postgres);
        assert!(df.contains("EXPOSE 4000"));
    }
}
