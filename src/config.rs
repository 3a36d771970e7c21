//! TOML configuration for a cache manager and its named caches.

use crate::converter::ConverterKind;
use crate::error::{CacheError, Result};
use crate::persistence::TableName;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Logging section of the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Table-scoped store attached to one cache
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
    #[serde(default = "default_identifier_quote")]
    pub identifier_quote: String,
}

fn default_table_prefix() -> String {
    "ISPN_STRING_TABLE".to_string()
}

fn default_identifier_quote() -> String {
    "\"".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table_prefix: default_table_prefix(),
            identifier_quote: default_identifier_quote(),
        }
    }
}

/// Settings of one named cache
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Converter name: identity, utf8 or json
    #[serde(default = "default_converter")]
    pub converter: String,
    /// Deliver outcomes from a runtime task instead of the caller's thread
    #[serde(default)]
    pub async_completion: bool,
    #[serde(default = "default_statistics")]
    pub statistics: bool,
    #[serde(default)]
    pub store: Option<StoreConfig>,
}

fn default_converter() -> String {
    "identity".to_string()
}

fn default_statistics() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            converter: default_converter(),
            async_completion: false,
            statistics: default_statistics(),
            store: None,
        }
    }
}

impl CacheConfig {
    pub fn converter_kind(&self) -> Result<ConverterKind> {
        ConverterKind::parse(&self.converter)
            .ok_or_else(|| CacheError::Config(format!("unknown converter '{}'", self.converter)))
    }

    pub fn with_converter(mut self, kind: ConverterKind) -> Self {
        self.converter = match kind {
            ConverterKind::Identity => "identity",
            ConverterKind::Utf8 => "utf8",
            ConverterKind::Json => "json",
        }
        .to_string();
        self
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_async_completion(mut self, enabled: bool) -> Self {
        self.async_completion = enabled;
        self
    }

    fn validate(&self, name: &str) -> Result<()> {
        self.converter_kind()
            .map_err(|e| CacheError::Config(format!("cache '{}': {}", name, e)))?;
        if let Some(store) = &self.store {
            TableName::new(&store.identifier_quote, &store.table_prefix, name)
                .map_err(|e| CacheError::Config(format!("cache '{}': {}", name, e)))?;
        }
        Ok(())
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheManagerConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub caches: HashMap<String, CacheConfig>,
}

impl CacheManagerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: CacheManagerConfig = toml::from_str(content)?;
        for (name, cache) in &config.caches {
            cache.validate(name)?;
        }
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CacheError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Settings for `name`; caches not listed get the defaults
    pub fn cache(&self, name: &str) -> CacheConfig {
        self.caches.get(name).cloned().unwrap_or_default()
    }

    pub fn with_cache(mut self, name: impl Into<String>, cache: CacheConfig) -> Self {
        self.caches.insert(name.into(), cache);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_full_config() {
        let config = CacheManagerConfig::from_toml_str(
            r#"
            [logging]
            level = "debug"

            [caches.first]
            converter = "utf8"
            async_completion = true
            [caches.first.store]
            table_prefix = "STRINGS"

            [caches.second]
            statistics = false
            "#,
        )
        .unwrap();

        assert_eq!(config.logging.level, "debug");
        let first = config.cache("first");
        assert_eq!(first.converter_kind().unwrap(), ConverterKind::Utf8);
        assert!(first.async_completion);
        let store = first.store.unwrap();
        assert_eq!(store.table_prefix, "STRINGS");
        assert_eq!(store.identifier_quote, "\"");

        let second = config.cache("second");
        assert!(!second.statistics);
        assert!(second.store.is_none());
        assert_eq!(second.converter_kind().unwrap(), ConverterKind::Identity);
    }

    #[test]
    fn test_defaults() {
        let config = CacheManagerConfig::from_toml_str("").unwrap();
        assert_eq!(config.logging.level, "info");
        let unnamed = config.cache("anything");
        assert!(unnamed.statistics);
        assert!(!unnamed.async_completion);
    }

    #[test]
    fn test_invalid_values() {
        let unknown = CacheManagerConfig::from_toml_str("[caches.a]\nconverter = \"xml\"\n");
        assert!(matches!(unknown, Err(CacheError::Config(_))));

        let empty_prefix =
            CacheManagerConfig::from_toml_str("[caches.a.store]\ntable_prefix = \"\"\n");
        assert!(matches!(empty_prefix, Err(CacheError::Config(_))));

        for quote in ["", "_", "q"] {
            let toml = format!("[caches.a.store]\nidentifier_quote = \"{}\"\n", quote);
            assert!(matches!(
                CacheManagerConfig::from_toml_str(&toml),
                Err(CacheError::Config(_))
            ));
        }

        assert!(matches!(
            CacheManagerConfig::from_toml_str("[caches\n"),
            Err(CacheError::Config(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[caches.c]\nconverter = \"json\"").unwrap();
        let config = CacheManagerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cache("c").converter_kind().unwrap(), ConverterKind::Json);

        assert!(CacheManagerConfig::from_file("/nonexistent/cachepipe.toml").is_err());
    }
}
