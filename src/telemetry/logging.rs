//! Logging setup.
//!
//! `RUST_LOG` overrides the config file, which overrides the defaults
//! (info level, pretty format).

use tracing_subscriber::EnvFilter;

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// `[log]` section of the config file.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// error, warn, info, debug, trace
    pub level: String,
    /// pretty, compact, json
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Install the global subscriber. Safe to call more than once; later
/// calls keep the subscriber already in place.
pub fn init_logging(config: Option<&LogConfig>) {
    let fallback = LogConfig::default();
    let cfg = config.unwrap_or(&fallback);

    let builder = tracing_subscriber::fmt().with_env_filter(filter_for(&cfg.level));
    let _ = match cfg.format.as_str() {
        "json" => builder.json().try_init(),
        "compact" => builder.compact().try_init(),
        _ => builder.try_init(),
    };
}

/// Environment-driven filter, falling back to the configured level.
fn filter_for(level: &str) -> EnvFilter {
    match std::env::var("RUST_LOG") {
        Ok(spec) => EnvFilter::new(spec),
        Err(_) => EnvFilter::new(level_directive(level)),
    }
}

/// Clamp a config string to a known level directive.
fn level_directive(level: &str) -> &'static str {
    let lower = level.to_lowercase();
    LEVELS
        .iter()
        .find(|known| **known == lower)
        .copied()
        .unwrap_or("info")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_directive_known() {
        for level in LEVELS {
            assert_eq!(level_directive(level), level);
        }
    }

    #[test]
    fn test_level_directive_case_and_fallback() {
        assert_eq!(level_directive("TRACE"), "trace");
        assert_eq!(level_directive("Warn"), "warn");
        assert_eq!(level_directive("verbose"), "info");
        assert_eq!(level_directive(""), "info");
    }

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, "pretty");
    }
}
