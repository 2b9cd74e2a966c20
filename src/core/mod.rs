// Core Module - Domain entities, config, logging, store events

pub mod types;
pub mod config;
pub mod logger;
pub mod events;

// Re-export commonly used items for convenience
pub use types::*;
pub use config::{
    FeedConfig, StoreConfig, MonitoringConfig,
    ConfigManager, ConfigSummary, ConfigError, get_config,
};
pub use logger::{setup_logging, setup_logging_from, init_logging, feed_span};
pub use events::{ChangeKind, EntityChangeEvent, ContentSnapshot, SnapshotEntity, StoreNotification};
