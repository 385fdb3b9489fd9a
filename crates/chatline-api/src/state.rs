//! Application state wiring the coordinator to its concrete adapters.
//!
//! `SessionCoordinator` is generic over store and broadcaster; AppState pins
//! it to the SQLite store and the in-process topic hub.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use chatline_core::broadcast::TopicHub;
use chatline_core::chat::SessionCoordinator;
use chatline_core::llm::CompletionStreamer;
use chatline_infra::config::database_url;
use chatline_infra::llm::build_provider;
use chatline_infra::sqlite::message::SqliteMessageStore;
use chatline_infra::sqlite::pool::DatabasePool;
use chatline_types::config::ChatlineConfig;

/// Coordinator pinned to the production adapters.
pub type Coordinator = SessionCoordinator<SqliteMessageStore, TopicHub>;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

impl AppState {
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
        }
    }

    /// Connect to the database, build the provider, and wire the coordinator.
    pub async fn init(config: &ChatlineConfig, data_dir: &Path) -> anyhow::Result<Self> {
        let store = open_store(config, data_dir).await?;
        let hub = TopicHub::new(config.broadcast.capacity);

        let provider = build_provider(&config.provider).context("LLM provider is not configured")?;
        let streamer = CompletionStreamer::new(provider, config.provider.model.clone())
            .with_max_tokens(config.provider.max_tokens)
            .with_temperature(config.provider.temperature)
            .with_idle_timeout(Duration::from_secs(config.generation.idle_timeout_secs));

        let mut coordinator = SessionCoordinator::new(Arc::new(store), Arc::new(hub), streamer)
            .with_policy(config.policy);
        if !config.generation.system_prompt.trim().is_empty() {
            coordinator = coordinator.with_system_prompt(config.generation.system_prompt.clone());
        }

        Ok(Self::new(coordinator))
    }

    pub fn hub(&self) -> &Arc<TopicHub> {
        self.coordinator.broadcaster()
    }
}

/// Open the message store, creating the data directory if needed.
pub async fn open_store(
    config: &ChatlineConfig,
    data_dir: &Path,
) -> anyhow::Result<SqliteMessageStore> {
    tokio::fs::create_dir_all(data_dir)
        .await
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let url = database_url(config, data_dir);
    let pool = DatabasePool::new(&url)
        .await
        .with_context(|| format!("failed to open database {url}"))?;
    Ok(SqliteMessageStore::new(pool))
}
