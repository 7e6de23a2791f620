//! Logging utilities for lookml-guard.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the application. [`setup::init_logging`] is provided for binaries and
//! CI wrappers that want a sensible default.

/// Truncates a remote message to `max_length` bytes for logging.
///
/// Truncation respects UTF-8 boundaries so the result is always valid.
pub fn truncate_message(value: &str, max_length: usize) -> String {
    if value.len() <= max_length {
        return value.to_string();
    }
    let mut end = max_length;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &value[..end])
}

/// Maximum length of a remote error message inside a log line.
pub const MAX_LOGGED_MESSAGE: usize = 256;

/// Utilities for setting up structured logging.
pub mod setup {
    use tracing::Level;

    /// Configuration for the logging setup.
    #[derive(Debug, Clone)]
    pub struct LoggingConfig {
        /// Log level for the application
        pub level: Level,
        /// Log level for lookml-guard components specifically
        pub guard_level: Level,
        /// Whether to use JSON output format
        pub json_format: bool,
        /// Environment filter override
        pub env_filter: Option<String>,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                level: Level::INFO,
                guard_level: Level::INFO,
                json_format: false,
                env_filter: None,
            }
        }
    }

    impl LoggingConfig {
        /// Creates a configuration for CI pipelines: JSON lines, warnings and up
        /// from dependencies.
        pub fn ci() -> Self {
            Self {
                level: Level::WARN,
                guard_level: Level::INFO,
                json_format: true,
                env_filter: None,
            }
        }

        /// Creates a configuration for local debugging.
        pub fn development() -> Self {
            Self {
                level: Level::DEBUG,
                guard_level: Level::DEBUG,
                json_format: false,
                env_filter: None,
            }
        }

        /// Sets the log level for the application.
        pub fn with_level(mut self, level: Level) -> Self {
            self.level = level;
            self
        }

        /// Sets the log level for lookml-guard components.
        pub fn with_guard_level(mut self, level: Level) -> Self {
            self.guard_level = level;
            self
        }

        /// Sets whether to use JSON output format.
        pub fn with_json_format(mut self, enabled: bool) -> Self {
            self.json_format = enabled;
            self
        }

        /// Sets a custom environment filter.
        pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
            self.env_filter = Some(filter.into());
            self
        }

        /// Builds the environment filter string.
        pub fn env_filter(&self) -> String {
            if let Some(ref filter) = self.env_filter {
                filter.clone()
            } else {
                format!(
                    "{},lookml_guard={}",
                    self.level.as_str().to_lowercase(),
                    self.guard_level.as_str().to_lowercase()
                )
            }
        }
    }

    /// Initializes a global `tracing` subscriber.
    ///
    /// `RUST_LOG` takes precedence over the configured filter when set.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use lookml_guard::logging::setup::{init_logging, LoggingConfig};
    ///
    /// init_logging(LoggingConfig::ci()).unwrap();
    /// ```
    pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.env_filter()));

        let fmt_layer = if config.json_format {
            tracing_subscriber::fmt::layer().json().boxed()
        } else {
            tracing_subscriber::fmt::layer().boxed()
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::setup::LoggingConfig;
    use super::*;
    use tracing::Level;

    #[test]
    fn test_truncate_message() {
        assert_eq!(truncate_message("hello", 10), "hello");
        assert_eq!(
            truncate_message("this is a very long text", 10),
            "this is a ...(truncated)"
        );
    }

    #[test]
    fn test_truncate_message_respects_char_boundaries() {
        // 'é' is two bytes; cutting at byte 2 would split it
        let truncated = truncate_message("aé-suffix", 2);
        assert_eq!(truncated, "a...(truncated)");
    }

    #[test]
    fn test_env_filter_defaults() {
        assert_eq!(LoggingConfig::default().env_filter(), "info,lookml_guard=info");
        assert_eq!(LoggingConfig::ci().env_filter(), "warn,lookml_guard=info");
        let custom = LoggingConfig::development()
            .with_level(Level::ERROR)
            .with_guard_level(Level::TRACE);
        assert_eq!(custom.env_filter(), "error,lookml_guard=trace");
    }

    #[test]
    fn test_env_filter_override() {
        let config = LoggingConfig::default()
            .with_json_format(true)
            .with_env_filter("lookml_guard::dispatch=debug");
        assert!(config.json_format);
        assert_eq!(config.env_filter(), "lookml_guard::dispatch=debug");
    }
}
