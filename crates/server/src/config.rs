use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use simmer_core::engine::{
    CallbackRegistry, DagEngine, ProcessClient, ProcessClientConfig, RecipeRunner,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub engine: EngineConfig,
}

/// The only tunables the core depends on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Completion-wait timeout for subscriber nodes, in milliseconds.
    #[serde(default = "default_callback_timeout_ms")]
    pub callback_timeout_ms: u64,

    /// Interval between job status polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Ceiling on the poll loop, in milliseconds. 0 polls until the job
    /// settles.
    #[serde(default)]
    pub max_poll_duration_ms: u64,
}

fn default_callback_timeout_ms() -> u64 {
    80_000
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            callback_timeout_ms: default_callback_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_duration_ms: 0,
        }
    }
}

impl EngineConfig {
    pub fn client_config(&self) -> ProcessClientConfig {
        ProcessClientConfig {
            callback_timeout: Duration::from_millis(self.callback_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_poll_duration: (self.max_poll_duration_ms > 0)
                .then(|| Duration::from_millis(self.max_poll_duration_ms)),
        }
    }
}

impl ServerConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")
        } else {
            tracing::info!("Configuration file not found, using defaults");
            Ok(Self::default())
        }
    }
}

/// Shared state handed to every request handler.
pub struct AppState {
    pub runner: RecipeRunner,
    pub registry: Arc<CallbackRegistry>,
    /// Client for dereferencing recipe documents supplied by URI.
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Self {
        let registry = Arc::new(CallbackRegistry::new());
        let client = ProcessClient::new(registry.clone(), config.engine.client_config());
        let runner = RecipeRunner::new(DagEngine::new(Arc::new(client)));

        Self {
            runner,
            registry,
            http: reqwest::Client::new(),
        }
    }
}
