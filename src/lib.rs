pub mod api;
pub mod compose;
pub mod config;
pub mod container;
pub mod error;
pub mod framework;
pub mod github;
pub mod model;
pub mod proxy;
pub mod reconciler;
pub mod repo_config;
pub mod slug;
pub mod tracker;
pub mod webhook;

use std::sync::Arc;
use std::time::Instant;

use config::Config;
use container::ContainerManager;
use proxy::ProxyManager;
use tracker::Tracker;
use webhook::{LockTable, WebhookHandler};

/// Shared application state handed to every axum handler.
pub struct AppState {
    pub config: Config,
    pub tracker: Arc<Tracker>,
    pub container: Arc<ContainerManager>,
    pub proxy: Arc<ProxyManager>,
    pub webhook_handler: Arc<WebhookHandler>,
    pub locks: Arc<LockTable>,
    pub started_at: Instant,
}
