use super::table::{SharedDatabase, TableName};
use super::CacheStore;
use crate::command::{Metadata, Value};
use crate::container::CacheEntry;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Serialize, Deserialize)]
struct StoredRow {
    value: Value,
    metadata: Metadata,
}

/// Store confined to the table of one named cache
pub struct TableStore {
    database: Arc<SharedDatabase>,
    table: TableName,
}

impl TableStore {
    /// Open the store, creating its table if needed
    pub fn open(database: Arc<SharedDatabase>, table: TableName) -> Result<Self> {
        if database.create_table(&table)? {
            debug!("Table store created {}", table);
        }
        Ok(Self { database, table })
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    fn encode_key(key: &Value) -> Result<Vec<u8>> {
        Ok(bincode::serialize(key)?)
    }
}

impl CacheStore for TableStore {
    fn identifier(&self) -> String {
        self.table.identifier()
    }

    fn load(&self, key: &Value) -> Result<Option<(Value, Metadata)>> {
        let key = Self::encode_key(key)?;
        let row = self.database.read_table(&self.table, |t| t.get(&key).cloned())?;
        match row {
            Some(bytes) => {
                let row: StoredRow = bincode::deserialize(&bytes)?;
                Ok(Some((row.value, row.metadata)))
            }
            None => Ok(None),
        }
    }

    fn write(&self, entry: &CacheEntry) -> Result<()> {
        let key = Self::encode_key(entry.key())?;
        let row = bincode::serialize(&StoredRow {
            value: entry.value().clone(),
            metadata: entry.metadata().clone(),
        })?;
        self.database.write_table(&self.table, |t| {
            t.insert(key, row);
        })
    }

    fn delete(&self, key: &Value) -> Result<bool> {
        let key = Self::encode_key(key)?;
        self.database
            .write_table(&self.table, |t| t.remove(&key).is_some())
    }

    fn contains_key(&self, key: &Value) -> Result<bool> {
        let key = Self::encode_key(key)?;
        self.database.read_table(&self.table, |t| t.contains_key(&key))
    }

    fn size(&self) -> Result<usize> {
        self.database.read_table(&self.table, |t| t.len())
    }

    fn clear(&self) -> Result<()> {
        self.database.write_table(&self.table, |t| t.clear())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Version;
    use crate::container::{DefaultEntryFactory, EntryFactory};
    use std::time::Duration;

    fn store(db: &Arc<SharedDatabase>, name: &str) -> TableStore {
        TableStore::open(db.clone(), TableName::new("\"", "STRINGS", name).unwrap()).unwrap()
    }

    fn entry(key: &str, value: &str) -> CacheEntry {
        DefaultEntryFactory.create_from_metadata(
            Value::from(key),
            Value::from(value),
            Metadata::new()
                .with_version(Version(7))
                .with_lifespan(Duration::from_secs(60)),
        )
    }

    #[test]
    fn test_write_load_delete() {
        let db = Arc::new(SharedDatabase::new());
        let s = store(&db, "first");
        s.write(&entry("k", "v")).unwrap();

        let (value, metadata) = s.load(&Value::from("k")).unwrap().unwrap();
        assert_eq!(value, Value::from("v"));
        assert_eq!(metadata.version(), Some(Version(7)));
        assert_eq!(metadata.lifespan(), Some(Duration::from_secs(60)));
        assert!(s.contains_key(&Value::from("k")).unwrap());
        assert_eq!(s.size().unwrap(), 1);

        assert!(s.delete(&Value::from("k")).unwrap());
        assert!(!s.delete(&Value::from("k")).unwrap());
        assert!(s.load(&Value::from("k")).unwrap().is_none());
    }

    #[test]
    fn test_stores_are_isolated_by_table() {
        let db = Arc::new(SharedDatabase::new());
        let first = store(&db, "first");
        let second = store(&db, "second");
        assert_ne!(first.identifier(), second.identifier());

        first.write(&entry("k", "1")).unwrap();
        second.write(&entry("other", "2")).unwrap();

        assert!(first.contains_key(&Value::from("k")).unwrap());
        assert!(!second.contains_key(&Value::from("k")).unwrap());
        assert!(!first.contains_key(&Value::from("other")).unwrap());

        second.clear().unwrap();
        assert_eq!(second.size().unwrap(), 0);
        assert_eq!(first.size().unwrap(), 1);
    }

    #[test]
    fn test_reopen_sees_existing_rows() {
        let db = Arc::new(SharedDatabase::new());
        store(&db, "first").write(&entry("k", "v")).unwrap();
        assert_eq!(store(&db, "first").size().unwrap(), 1);
    }
}
