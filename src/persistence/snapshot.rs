use super::table::{SharedDatabase, TableData};
use crate::error::{CacheError, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::info;

/// Snapshot magic followed by a one-byte format version
const SNAPSHOT_MAGIC: &[u8] = b"CPSNAP";
const SNAPSHOT_VERSION: u8 = 1;

/// Persist every table of `database` to a single file
pub fn save_snapshot<P: AsRef<Path>>(path: P, database: &SharedDatabase) -> Result<()> {
    let tables = database.snapshot_tables()?;
    let file = File::create(path.as_ref())
        .map_err(|e| CacheError::Persistence(format!("Failed to create snapshot file: {}", e)))?;
    let mut writer = BufWriter::new(file);

    writer
        .write_all(SNAPSHOT_MAGIC)
        .map_err(|e| CacheError::Persistence(format!("Failed to write magic: {}", e)))?;
    writer
        .write_all(&[SNAPSHOT_VERSION])
        .map_err(|e| CacheError::Persistence(format!("Failed to write version: {}", e)))?;
    bincode::serialize_into(&mut writer, &tables)?;
    writer
        .flush()
        .map_err(|e| CacheError::Persistence(format!("Failed to flush: {}", e)))?;

    info!(
        "Saved snapshot of {} tables to {}",
        tables.len(),
        path.as_ref().display()
    );
    Ok(())
}

/// Rebuild a shared database from a snapshot file
pub fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<SharedDatabase> {
    let file = File::open(path.as_ref())
        .map_err(|e| CacheError::Persistence(format!("Failed to open snapshot file: {}", e)))?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 6];
    reader
        .read_exact(&mut magic)
        .map_err(|e| CacheError::Persistence(format!("Failed to read magic: {}", e)))?;
    if magic != SNAPSHOT_MAGIC {
        return Err(CacheError::Persistence("Invalid snapshot magic".to_string()));
    }

    let mut version = [0u8; 1];
    reader
        .read_exact(&mut version)
        .map_err(|e| CacheError::Persistence(format!("Failed to read version: {}", e)))?;
    if version[0] != SNAPSHOT_VERSION {
        return Err(CacheError::Persistence(format!(
            "Unsupported snapshot version: {}",
            version[0]
        )));
    }

    let tables: HashMap<String, TableData> = bincode::deserialize_from(&mut reader)?;
    info!(
        "Loaded snapshot of {} tables from {}",
        tables.len(),
        path.as_ref().display()
    );
    Ok(SharedDatabase::from_tables(tables))
}
