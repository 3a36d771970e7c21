use super::Cache;
use crate::command::Flag;
use crate::config::{CacheConfig, CacheManagerConfig};
use crate::container::{
    DataContainer, DefaultEntryFactory, EntryFactory, NumericVersionGenerator, VersionGenerator,
};
use crate::converter::{ConverterRegistry, TypeConverter};
use crate::error::{CacheError, Result};
use crate::interceptor::{
    AsyncCompletionInterceptor, InterceptorChain, StatsInterceptor, TypeConverterInterceptor,
};
use crate::persistence::{SharedDatabase, TableName, TableStore};
use crate::topology::TopologyProvider;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Owns the collaborators shared by every cache and builds each named
/// cache once, on first use.
pub struct CacheManager {
    config: CacheManagerConfig,
    version_generator: Arc<dyn VersionGenerator>,
    entry_factory: Arc<dyn EntryFactory>,
    topology: Option<Arc<dyn TopologyProvider>>,
    database: Arc<SharedDatabase>,
    protocol_converters: Vec<(Flag, Arc<dyn TypeConverter>)>,
    caches: RwLock<HashMap<String, Arc<Cache>>>,
}

impl CacheManager {
    pub fn new(config: CacheManagerConfig) -> Self {
        Self {
            config,
            version_generator: Arc::new(NumericVersionGenerator::new()),
            entry_factory: Arc::new(DefaultEntryFactory),
            topology: None,
            database: Arc::new(SharedDatabase::new()),
            protocol_converters: Vec::new(),
            caches: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_topology(mut self, topology: Arc<dyn TopologyProvider>) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Share a table namespace with other managers, or one restored from a snapshot
    pub fn with_database(mut self, database: Arc<SharedDatabase>) -> Self {
        self.database = database;
        self
    }

    pub fn with_entry_factory(mut self, entry_factory: Arc<dyn EntryFactory>) -> Self {
        self.entry_factory = entry_factory;
        self
    }

    pub fn with_version_generator(mut self, version_generator: Arc<dyn VersionGenerator>) -> Self {
        self.version_generator = version_generator;
        self
    }

    /// Converter used instead of a cache's own when a command carries `flag`
    pub fn with_protocol_converter(mut self, flag: Flag, converter: Arc<dyn TypeConverter>) -> Self {
        self.protocol_converters.push((flag, converter));
        self
    }

    pub fn config(&self) -> &CacheManagerConfig {
        &self.config
    }

    pub fn database(&self) -> &Arc<SharedDatabase> {
        &self.database
    }

    /// Names of the caches built so far, sorted
    pub fn cache_names(&self) -> Result<Vec<String>> {
        let caches = self
            .caches
            .read()
            .map_err(|e| CacheError::Storage(format!("Lock error: {}", e)))?;
        let mut names: Vec<String> = caches.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// The cache called `name`, built from its configuration on first use
    pub fn get_cache(&self, name: &str) -> Result<Arc<Cache>> {
        {
            let caches = self
                .caches
                .read()
                .map_err(|e| CacheError::Storage(format!("Lock error: {}", e)))?;
            if let Some(cache) = caches.get(name) {
                return Ok(cache.clone());
            }
        }

        let mut caches = self
            .caches
            .write()
            .map_err(|e| CacheError::Storage(format!("Lock error: {}", e)))?;
        if let Some(cache) = caches.get(name) {
            return Ok(cache.clone());
        }
        let cache = Arc::new(self.build_cache(name, &self.config.cache(name))?);
        caches.insert(name.to_string(), cache.clone());
        Ok(cache)
    }

    fn build_cache(&self, name: &str, config: &CacheConfig) -> Result<Cache> {
        let converter = config.converter_kind()?.build();
        let registry = self
            .protocol_converters
            .iter()
            .fold(ConverterRegistry::new(converter.clone()), |r, (flag, c)| {
                r.with_flag_converter(*flag, c.clone())
            });

        let mut container = DataContainer::new(name, self.entry_factory.clone());
        if let Some(store) = &config.store {
            let table = TableName::new(
                store.identifier_quote.clone(),
                store.table_prefix.clone(),
                name,
            )?;
            container = container.with_store(Arc::new(TableStore::open(
                self.database.clone(),
                table,
            )?));
        }
        let container = Arc::new(container);

        let type_converter = TypeConverterInterceptor::builder()
            .registry(registry)
            .entry_factory(self.entry_factory.clone())
            .version_generator(self.version_generator.clone())
            .topology(self.topology.clone())
            .build()?;
        let mut builder = InterceptorChain::builder().type_converter(Arc::new(type_converter));

        let stats = if config.statistics {
            let stats = Arc::new(StatsInterceptor::new());
            builder = builder.add(stats.clone());
            Some(stats)
        } else {
            None
        };
        if config.async_completion {
            builder = builder.add(Arc::new(AsyncCompletionInterceptor::current()?));
        }
        let chain = builder.terminal(container.clone()).build()?;

        info!(
            "Created cache '{}' ({} converter, chain: {})",
            name,
            converter.name(),
            chain.names().join(" -> ")
        );
        Ok(Cache::new(name.to_string(), chain, container, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::converter::ConverterKind;

    #[test]
    fn test_caches_are_memoised() {
        let manager = CacheManager::new(CacheManagerConfig::default());
        let a = manager.get_cache("a").unwrap();
        let again = manager.get_cache("a").unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        manager.get_cache("b").unwrap();
        assert_eq!(manager.cache_names().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_chain_layout() {
        let config = CacheManagerConfig::default()
            .with_cache("plain", CacheConfig::default().with_converter(ConverterKind::Utf8));
        let manager = CacheManager::new(config);
        let cache = manager.get_cache("plain").unwrap();
        assert_eq!(cache.chain().names(), vec!["type_converter", "stats"]);
        assert!(cache.stats().is_some());
    }

    #[test]
    fn test_async_completion_needs_runtime() {
        let config = CacheManagerConfig::default()
            .with_cache("async", CacheConfig::default().with_async_completion(true));
        let manager = CacheManager::new(config);
        assert!(matches!(
            manager.get_cache("async"),
            Err(CacheError::MissingComponent(_))
        ));
        // a failed build is not memoised
        assert!(manager.cache_names().unwrap().is_empty());
    }

    #[test]
    fn test_store_needs_named_cache() {
        let config = CacheManagerConfig::default()
            .with_cache("", CacheConfig::default().with_store(StoreConfig::default()));
        let manager = CacheManager::new(config);
        assert!(matches!(manager.get_cache(""), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_store_rejects_ambiguous_quote() {
        let store = StoreConfig {
            identifier_quote: String::new(),
            ..StoreConfig::default()
        };
        let config = CacheManagerConfig::default()
            .with_cache("a", CacheConfig::default().with_store(store.clone()))
            .with_cache("ab", CacheConfig::default().with_store(store));
        let manager = CacheManager::new(config);
        assert!(matches!(manager.get_cache("a"), Err(CacheError::Config(_))));
        assert!(matches!(manager.get_cache("ab"), Err(CacheError::Config(_))));
        assert!(manager.database().table_identifiers().unwrap().is_empty());
    }
}
