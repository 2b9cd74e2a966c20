// Configuration Management for the Sportsbook Feed
// JSON file + environment overrides, validated before use

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, warn};

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

// ============================================================================
// Configuration Structures
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Operator id segment of every topic URI
    pub operator_id: String,
    pub language: String,
    /// Realtime endpoint handed to the embedding transport
    pub ws_url: String,
    pub live_matches_count: u32,
    pub markets_per_match: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            operator_id: "4093".to_string(),
            language: "en".to_string(),
            ws_url: "wss://sportsapi.example.com/v2".to_string(),
            live_matches_count: 10,
            markets_per_match: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Notify observers even when a batch changed nothing
    pub publish_empty_batches: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            publish_empty_batches: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub json_logs: bool,
    pub console_output: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            json_logs: false,
            console_output: true,
        }
    }
}

// ============================================================================
// Configuration Summary
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub operator_id: String,
    pub language: String,
    pub ws_url: String,
    pub log_level: String,
    pub json_logs: bool,
}

// ============================================================================
// Configuration Manager
// ============================================================================

pub struct ConfigManager {
    feed: Arc<RwLock<FeedConfig>>,
    store: Arc<RwLock<StoreConfig>>,
    monitoring: Arc<RwLock<MonitoringConfig>>,
}

impl ConfigManager {
    pub fn new(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut manager = Self {
            feed: Arc::new(RwLock::new(FeedConfig::default())),
            store: Arc::new(RwLock::new(StoreConfig::default())),
            monitoring: Arc::new(RwLock::new(MonitoringConfig::default())),
        };

        if let Some(path) = config_path {
            manager.load_from_file(path)?;
        }

        manager.load_from_env();

        info!("Configuration initialized");
        Ok(manager)
    }

    /// Load configuration from a JSON file with optional `feed`, `store`
    /// and `monitoring` sections. A missing file keeps the defaults.
    pub fn load_from_file(&mut self, config_path: &str) -> Result<(), ConfigError> {
        let path = Path::new(config_path);
        if !path.exists() {
            warn!(path = config_path, "Config file not found");
            return Ok(());
        }

        let content = fs::read_to_string(path)?;
        self.load_from_str(&content)?;

        info!(path = config_path, "Configuration loaded");
        Ok(())
    }

    pub fn load_from_str(&mut self, content: &str) -> Result<(), ConfigError> {
        let config_data: HashMap<String, serde_json::Value> = serde_json::from_str(content)?;

        if let Some(feed_data) = config_data.get("feed") {
            *self.feed.write() = serde_json::from_value(feed_data.clone())?;
        }
        if let Some(store_data) = config_data.get("store") {
            *self.store.write() = serde_json::from_value(store_data.clone())?;
        }
        if let Some(monitoring_data) = config_data.get("monitoring") {
            *self.monitoring.write() = serde_json::from_value(monitoring_data.clone())?;
        }
        Ok(())
    }

    /// Environment overrides for deployment-specific values
    pub fn load_from_env(&mut self) {
        if let Ok(operator_id) = std::env::var("FEED_OPERATOR_ID") {
            self.feed.write().operator_id = operator_id;
        }
        if let Ok(language) = std::env::var("FEED_LANGUAGE") {
            self.feed.write().language = language;
        }
        if let Ok(ws_url) = std::env::var("FEED_WS_URL") {
            self.feed.write().ws_url = ws_url;
        }
        if let Ok(level) = std::env::var("FEED_LOG_LEVEL") {
            self.monitoring.write().log_level = level;
        }
    }

    pub fn save_to_file(&self, config_path: &str) -> Result<(), ConfigError> {
        let mut config_map = HashMap::new();
        config_map.insert("feed", serde_json::to_value(&*self.feed.read())?);
        config_map.insert("store", serde_json::to_value(&*self.store.read())?);
        config_map.insert("monitoring", serde_json::to_value(&*self.monitoring.read())?);

        if let Some(parent) = Path::new(config_path).parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&config_map)?;
        fs::write(config_path, json)?;

        info!(path = config_path, "Configuration saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        let feed = self.feed.read();

        if feed.operator_id.trim().is_empty() {
            errors.push("operator_id must not be empty".to_string());
        }
        if feed.language.trim().is_empty() {
            errors.push("language must not be empty".to_string());
        }
        if !(feed.ws_url.starts_with("ws://") || feed.ws_url.starts_with("wss://")) {
            errors.push(format!("ws_url must be a websocket url, got '{}'", feed.ws_url));
        }

        if !errors.is_empty() {
            for error in &errors {
                warn!(error = %error, "Config validation error");
            }
            return Err(ConfigError::Validation(errors.join("; ")));
        }

        info!("Configuration validated successfully");
        Ok(())
    }

    pub fn get_summary(&self) -> ConfigSummary {
        let feed = self.feed.read();
        let monitoring = self.monitoring.read();

        ConfigSummary {
            operator_id: feed.operator_id.clone(),
            language: feed.language.clone(),
            ws_url: feed.ws_url.clone(),
            log_level: monitoring.log_level.clone(),
            json_logs: monitoring.json_logs,
        }
    }

    pub fn feed(&self) -> FeedConfig {
        self.feed.read().clone()
    }

    pub fn store(&self) -> StoreConfig {
        self.store.read().clone()
    }

    pub fn monitoring(&self) -> MonitoringConfig {
        self.monitoring.read().clone()
    }
}

static GLOBAL_CONFIG: OnceLock<Arc<RwLock<ConfigManager>>> = OnceLock::new();

/// Process-wide configuration (defaults + environment)
pub fn get_config() -> Arc<RwLock<ConfigManager>> {
    Arc::clone(GLOBAL_CONFIG.get_or_init(|| {
        let manager = ConfigManager::new(None).unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default configuration");
            ConfigManager {
                feed: Arc::new(RwLock::new(FeedConfig::default())),
                store: Arc::new(RwLock::new(StoreConfig::default())),
                monitoring: Arc::new(RwLock::new(MonitoringConfig::default())),
            }
        });
        Arc::new(RwLock::new(manager))
    }))
}
