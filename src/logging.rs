use crate::config::LoggingConfig;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

/// Install a fmt subscriber filtered at the configured level; `RUST_LOG`
/// still overrides. Does nothing if a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) {
    let level_filter = config.level.parse::<LevelFilter>().unwrap_or_else(|_| {
        eprintln!(
            "Warning: Invalid log level '{}', using 'info'",
            config.level
        );
        LevelFilter::INFO
    });
    let filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(&LoggingConfig::default());
        init_logging(&LoggingConfig {
            level: "not-a-level".to_string(),
        });
    }
}
