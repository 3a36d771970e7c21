//! Table-scoped persistent stores.
//!
//! Every named cache that attaches a store gets its own table in a shared
//! database; no two cache names map to the same table.

pub mod snapshot;
pub mod store;
pub mod table;

pub use snapshot::{load_snapshot, save_snapshot};
pub use store::TableStore;
pub use table::{SharedDatabase, TableData, TableName};

use crate::command::{Metadata, Value};
use crate::container::CacheEntry;
use crate::error::Result;

/// Write-through/read-through store behind a data container
pub trait CacheStore: Send + Sync {
    /// Backing storage identifier
    fn identifier(&self) -> String;

    fn load(&self, key: &Value) -> Result<Option<(Value, Metadata)>>;

    fn write(&self, entry: &CacheEntry) -> Result<()>;

    fn delete(&self, key: &Value) -> Result<bool>;

    fn contains_key(&self, key: &Value) -> Result<bool>;

    fn size(&self) -> Result<usize>;

    fn clear(&self) -> Result<()>;
}
