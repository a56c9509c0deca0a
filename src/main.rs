//! Composition root (C12): loads configuration from the environment,
//! wires the components together, and runs the HTTP server and
//! reconciler until a shutdown signal arrives.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use preview_orchestrator::config::Config;
use preview_orchestrator::container::{ContainerManager, DockerComposeEngine};
use preview_orchestrator::github::GitHubClient;
use preview_orchestrator::proxy::{NginxReloader, ProxyManager};
use preview_orchestrator::reconciler::Reconciler;
use preview_orchestrator::tracker::Tracker;
use preview_orchestrator::webhook::{LockTable, WebhookHandler};
use preview_orchestrator::AppState;

#[derive(Parser, Debug)]
#[command(name = "preview-orchestrator")]
#[command(author, version, about = "Per-pull-request preview environment orchestrator", long_about = None)]
struct Cli {
    /// Override LOG_LEVEL
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let log_level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting preview-orchestrator v{}", env!("CARGO_PKG_VERSION"));

    let tracker = Arc::new(Tracker::load(&config.deployments_db).await?);
    let engine = Arc::new(DockerComposeEngine);
    let container = Arc::new(ContainerManager::new(
        tracker.clone(),
        engine,
        config.deployments_dir.clone(),
        config.preview_base_url.clone(),
    ));
    let proxy = Arc::new(ProxyManager::new(
        config.nginx_config_dir.clone(),
        Box::new(NginxReloader),
    ));
    let forge = Arc::new(GitHubClient::new(config.github_token.clone()));
    let locks = Arc::new(LockTable::new());

    let allowed_repos: HashSet<String> = config.allowed_repos.iter().cloned().collect();
    let webhook_handler = Arc::new(WebhookHandler {
        tracker: tracker.clone(),
        container: container.clone(),
        proxy: proxy.clone(),
        forge: forge.clone(),
        allowed_repos,
        locks: locks.clone(),
    });

    let reconciler = Arc::new(Reconciler::new(
        tracker.clone(),
        container.clone(),
        proxy.clone(),
        forge.clone(),
        locks.clone(),
        config.cleanup_ttl_days,
    ));
    let (reconciler_handle, reconciler_stop) = reconciler.spawn(Duration::from_secs(6 * 3600));

    let orchestrator_port = config.orchestrator_port;
    let state = Arc::new(AppState {
        config,
        tracker,
        container,
        proxy,
        webhook_handler,
        locks,
        started_at: Instant::now(),
    });

    let app = preview_orchestrator::api::create_router(state);

    let addr = format!("0.0.0.0:{orchestrator_port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(reconciler_stop.clone()))
        .await?;

    reconciler_handle.await?;

    tracing::info!("server stopped");
    Ok(())
}

/// Resolves once a shutdown signal arrives. Notifies the reconciler's stop
/// handle in the same instant, so the reconciler stops picking up new sweeps
/// while axum is still draining in-flight webhook requests, not after.
async fn shutdown_signal(reconciler_stop: Arc<tokio::sync::Notify>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
    reconciler_stop.notify_one();
}
