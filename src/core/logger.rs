// Structured Logging for the Sportsbook Feed
// tracing + tracing-subscriber, initialized once per process

use tracing::Level;
use tracing_subscriber::EnvFilter;
use std::sync::Once;

use crate::core::config::{get_config, MonitoringConfig};

static INIT: Once = Once::new();

fn parse_level(log_level: &str) -> Level {
    match log_level.to_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "INFO" => Level::INFO,
        "WARN" | "WARNING" => Level::WARN,
        "ERROR" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Setup structured logging for the embedding application.
/// Later calls are ignored.
pub fn setup_logging(
    log_level: Option<&str>,
    json_format: Option<bool>,
    console_output: Option<bool>,
) {
    let log_level_str = log_level.unwrap_or("INFO");
    let json_format = json_format.unwrap_or(false);
    let console_output = console_output.unwrap_or(true);
    let level = parse_level(log_level_str);

    INIT.call_once(|| {
        let filter = EnvFilter::from_default_env().add_directive(level.into());

        // try_init: a host application may already own the global subscriber
        let result = if !console_output {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::sink)
                .try_init()
        } else if json_format {
            tracing_subscriber::fmt()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_env_filter(filter)
                .try_init()
        } else {
            tracing_subscriber::fmt()
                .with_target(true)
                .with_env_filter(filter)
                .try_init()
        };

        match result {
            Ok(()) => tracing::info!(
                log_level = %log_level_str,
                json = json_format,
                "Logging initialized"
            ),
            Err(e) => tracing::debug!(error = %e, "Global subscriber already set"),
        }
    });
}

/// Setup logging from a `monitoring` config section.
/// Returns the level that was requested.
pub fn setup_logging_from(monitoring: &MonitoringConfig) -> Level {
    setup_logging(
        Some(&monitoring.log_level),
        Some(monitoring.json_logs),
        Some(monitoring.console_output),
    );
    parse_level(&monitoring.log_level)
}

/// Setup logging from the process configuration (`FEED_LOG_LEVEL` applies)
pub fn init_logging() -> Level {
    let monitoring = get_config().read().monitoring();
    setup_logging_from(&monitoring)
}

/// Span wrapping everything one feed subscription does
pub fn feed_span(feed_id: &str) -> tracing::Span {
    tracing::info_span!(target: "sportsbook_feed", "feed", feed_id = %feed_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("WARNING"), Level::WARN);
        assert_eq!(parse_level("nonsense"), Level::INFO);
    }

    #[test]
    fn test_setup_from_monitoring_section() {
        let monitoring = MonitoringConfig {
            log_level: "warning".to_string(),
            json_logs: true,
            console_output: false,
        };
        assert_eq!(setup_logging_from(&monitoring), Level::WARN);

        let expected = parse_level(&get_config().read().monitoring().log_level);
        assert_eq!(init_logging(), expected);
    }

    #[test]
    fn test_setup_logging_is_idempotent() {
        setup_logging(Some("DEBUG"), Some(false), Some(true));
        setup_logging(Some("ERROR"), Some(true), Some(false));
        let span = feed_span("feed-1");
        let _enter = span.enter();
        tracing::debug!("inside feed span");
    }
}
