use crate::error::{CacheError, Result};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::RwLock;
use tracing::{debug, info};

/// Rows of one table, keyed by the encoded cache key
pub type TableData = BTreeMap<Vec<u8>, Vec<u8>>;

/// Backing table identifier of one named cache.
///
/// The identifier is `<quote><prefix>_<encoded cache name><quote>`. The
/// encoding keeps ASCII alphanumerics, doubles `_` and escapes everything
/// else as `_x` followed by six hex digits, so distinct cache names always
/// produce distinct identifiers. The closing quote keeps one identifier
/// from being a prefix of another, so it must be non-empty and contain no
/// character the encoding can emit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    quote: String,
    prefix: String,
    cache_name: String,
}

impl TableName {
    pub fn new(
        quote: impl Into<String>,
        prefix: impl Into<String>,
        cache_name: impl Into<String>,
    ) -> Result<Self> {
        let quote = quote.into();
        let prefix = prefix.into();
        let cache_name = cache_name.into();
        if quote.is_empty() {
            return Err(CacheError::Config("identifier quote must not be empty".to_string()));
        }
        if quote.chars().any(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(CacheError::Config(format!(
                "identifier quote '{}' must not contain alphanumerics or '_'",
                quote
            )));
        }
        if prefix.contains(quote.as_str()) {
            return Err(CacheError::Config(format!(
                "table prefix '{}' must not contain the identifier quote",
                prefix
            )));
        }
        if prefix.is_empty() {
            return Err(CacheError::Config("table prefix must not be empty".to_string()));
        }
        if cache_name.is_empty() {
            return Err(CacheError::Config(
                "cache name must not be empty for a table-scoped store".to_string(),
            ));
        }
        Ok(Self {
            quote,
            prefix,
            cache_name,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Fully quoted identifier used as the table key
    pub fn identifier(&self) -> String {
        format!(
            "{}{}_{}{}",
            self.quote,
            self.prefix,
            encode_name(&self.cache_name),
            self.quote
        )
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

fn encode_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            c if c.is_ascii_alphanumeric() => encoded.push(c),
            '_' => encoded.push_str("__"),
            c => encoded.push_str(&format!("_x{:06X}", c as u32)),
        }
    }
    encoded
}

/// Process-wide table namespace shared by every table-scoped store
#[derive(Debug, Default)]
pub struct SharedDatabase {
    tables: RwLock<HashMap<String, TableData>>,
}

impl SharedDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_tables(tables: HashMap<String, TableData>) -> Self {
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Create the table if missing; returns whether it was created
    pub fn create_table(&self, name: &TableName) -> Result<bool> {
        let identifier = name.identifier();
        let mut tables = self
            .tables
            .write()
            .map_err(|e| CacheError::Storage(format!("Lock error: {}", e)))?;
        if tables.contains_key(&identifier) {
            return Ok(false);
        }
        info!("Creating table {}", identifier);
        tables.insert(identifier, TableData::new());
        Ok(true)
    }

    pub fn table_exists(&self, name: &TableName) -> Result<bool> {
        let tables = self
            .tables
            .read()
            .map_err(|e| CacheError::Storage(format!("Lock error: {}", e)))?;
        Ok(tables.contains_key(&name.identifier()))
    }

    pub fn drop_table(&self, name: &TableName) -> Result<bool> {
        let mut tables = self
            .tables
            .write()
            .map_err(|e| CacheError::Storage(format!("Lock error: {}", e)))?;
        let dropped = tables.remove(&name.identifier()).is_some();
        if dropped {
            debug!("Dropped table {}", name);
        }
        Ok(dropped)
    }

    /// Identifiers of every table, sorted
    pub fn table_identifiers(&self) -> Result<Vec<String>> {
        let tables = self
            .tables
            .read()
            .map_err(|e| CacheError::Storage(format!("Lock error: {}", e)))?;
        let mut identifiers: Vec<String> = tables.keys().cloned().collect();
        identifiers.sort();
        Ok(identifiers)
    }

    pub(crate) fn read_table<R>(
        &self,
        name: &TableName,
        f: impl FnOnce(&TableData) -> R,
    ) -> Result<R> {
        let tables = self
            .tables
            .read()
            .map_err(|e| CacheError::Storage(format!("Lock error: {}", e)))?;
        let table = tables
            .get(&name.identifier())
            .ok_or_else(|| CacheError::Storage(format!("Table {} does not exist", name)))?;
        Ok(f(table))
    }

    pub(crate) fn write_table<R>(
        &self,
        name: &TableName,
        f: impl FnOnce(&mut TableData) -> R,
    ) -> Result<R> {
        let mut tables = self
            .tables
            .write()
            .map_err(|e| CacheError::Storage(format!("Lock error: {}", e)))?;
        let table = tables
            .get_mut(&name.identifier())
            .ok_or_else(|| CacheError::Storage(format!("Table {} does not exist", name)))?;
        Ok(f(table))
    }

    pub(crate) fn snapshot_tables(&self) -> Result<HashMap<String, TableData>> {
        let tables = self
            .tables
            .read()
            .map_err(|e| CacheError::Storage(format!("Lock error: {}", e)))?;
        Ok(tables.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str) -> TableName {
        TableName::new("\"", "ISPN_STRING_TABLE", name).unwrap()
    }

    #[test]
    fn test_identifier_format() {
        assert_eq!(table("first").identifier(), "\"ISPN_STRING_TABLE_first\"");
        assert_eq!(
            TableName::new("", "T", "a_b.c").unwrap().identifier(),
            "T_a__b_x00002Ec"
        );
    }

    #[test]
    fn test_distinct_names_never_collide() {
        let names = ["a_b", "a.b", "a__b", "a", "ab", "a_x00002Eb", "ü", "a b"];
        let mut identifiers: Vec<String> = names.iter().map(|n| table(n).identifier()).collect();
        identifiers.sort();
        identifiers.dedup();
        assert_eq!(identifiers.len(), names.len());

        // no identifier is a prefix of another, nor of the bare prefix
        let bare = "\"ISPN_STRING_TABLE\"";
        for a in &identifiers {
            assert!(!bare.starts_with(a.as_str()) && !a.starts_with(bare));
            for b in &identifiers {
                if a != b {
                    assert!(!b.starts_with(a.as_str()), "{} prefixes {}", a, b);
                }
            }
        }
    }

    #[test]
    fn test_rejects_quotes_the_encoding_can_emit() {
        for quote in ["", "_", "a", "Q", "7", "`_"] {
            assert!(
                matches!(TableName::new(quote, "ISPN", "a"), Err(CacheError::Config(_))),
                "quote {:?} accepted",
                quote
            );
        }
        assert!(matches!(
            TableName::new("`", "IS`PN", "a"),
            Err(CacheError::Config(_))
        ));

        for quote in ["\"", "`", "[]"] {
            let a = TableName::new(quote, "ISPN", "a").unwrap().identifier();
            let ab = TableName::new(quote, "ISPN", "ab").unwrap().identifier();
            let a_b = TableName::new(quote, "ISPN", "a_b").unwrap().identifier();
            assert!(!ab.starts_with(a.as_str()));
            assert!(!a_b.starts_with(a.as_str()));
        }
    }

    #[test]
    fn test_rejects_empty_parts() {
        assert!(matches!(TableName::new("\"", "P", ""), Err(CacheError::Config(_))));
        assert!(matches!(TableName::new("\"", "", "c"), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_table_lifecycle() {
        let db = SharedDatabase::new();
        let first = table("first");
        assert!(!db.table_exists(&first).unwrap());
        assert!(db.create_table(&first).unwrap());
        assert!(!db.create_table(&first).unwrap());
        assert!(db.table_exists(&first).unwrap());
        assert!(!db.table_exists(&table("second")).unwrap());

        assert!(db.drop_table(&first).unwrap());
        assert!(!db.drop_table(&first).unwrap());
        assert!(db.read_table(&first, |t| t.len()).is_err());
    }
}
