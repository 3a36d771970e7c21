use crate::command::{Metadata, Value};
use std::time::Duration;

/// Immutable key/value pair with its metadata.
///
/// Transforming an entry always produces a new one; nothing hands out a
/// mutable reference into a stored entry.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    key: Value,
    value: Value,
    metadata: Metadata,
    lifespan: Option<Duration>,
    max_idle: Option<Duration>,
}

impl CacheEntry {
    pub fn key(&self) -> &Value {
        &self.key
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn lifespan(&self) -> Option<Duration> {
        self.lifespan
    }

    pub fn max_idle(&self) -> Option<Duration> {
        self.max_idle
    }

    /// Fresh entry with the same key and metadata but a different value
    pub fn with_value(&self, value: Value) -> CacheEntry {
        CacheEntry {
            value,
            ..self.clone()
        }
    }

    pub fn into_parts(self) -> (Value, Value, Metadata) {
        (self.key, self.value, self.metadata)
    }
}

/// Builds the entries handed back to callers
pub trait EntryFactory: Send + Sync {
    fn create(
        &self,
        key: Value,
        value: Value,
        metadata: Metadata,
        lifespan: Option<Duration>,
        max_idle: Option<Duration>,
    ) -> CacheEntry;

    /// Entry whose expiration settings come from `metadata`
    fn create_from_metadata(&self, key: Value, value: Value, metadata: Metadata) -> CacheEntry {
        let lifespan = metadata.lifespan();
        let max_idle = metadata.max_idle();
        self.create(key, value, metadata, lifespan, max_idle)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEntryFactory;

impl EntryFactory for DefaultEntryFactory {
    fn create(
        &self,
        key: Value,
        value: Value,
        metadata: Metadata,
        lifespan: Option<Duration>,
        max_idle: Option<Duration>,
    ) -> CacheEntry {
        CacheEntry {
            key,
            value,
            metadata,
            lifespan,
            max_idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_value_leaves_original_untouched() {
        let entry = DefaultEntryFactory.create_from_metadata(
            Value::from("k"),
            Value::from("v"),
            Metadata::new().with_lifespan(Duration::from_secs(1)),
        );
        let changed = entry.with_value(Value::from("other"));

        assert_eq!(entry.value(), &Value::from("v"));
        assert_eq!(changed.value(), &Value::from("other"));
        assert_eq!(changed.key(), entry.key());
        assert_eq!(changed.lifespan(), Some(Duration::from_secs(1)));
    }
}
