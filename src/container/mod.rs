//! In-memory data container: the executor at the tail of every chain.

pub mod entry;
pub mod version;

pub use entry::{CacheEntry, DefaultEntryFactory, EntryFactory};
pub use version::{NumericVersionGenerator, VersionGenerator};

use crate::command::{
    Command, Flag, Flags, GetAllCommand, Metadata, PutCommand, PutMapCommand, RemoveCommand,
    ReplaceCommand, Value,
};
use crate::error::{CacheError, Result};
use crate::interceptor::CommandExecutor;
use crate::invocation::{CommandResult, Invocation, InvocationContext, InvocationStage};
use crate::persistence::CacheStore;
use crate::view::{Characteristics, LazyView, RawTraversal, TraversalSource};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Get current time in milliseconds
fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// `from + after` in milliseconds, pinned at `u64::MAX`
fn deadline(from: u64, after: Duration) -> u64 {
    from.saturating_add(u64::try_from(after.as_millis()).unwrap_or(u64::MAX))
}

/// Value with its metadata and expiration bookkeeping
struct StoredValue {
    value: Value,
    metadata: Metadata,
    /// Expiration time in milliseconds since UNIX epoch
    expires_at: Option<u64>,
    last_access: AtomicU64,
}

impl StoredValue {
    fn new(value: Value, metadata: Metadata) -> Self {
        let now = current_time_ms();
        let expires_at = metadata.lifespan().map(|l| deadline(now, l));
        Self {
            value,
            metadata,
            expires_at,
            last_access: AtomicU64::new(now),
        }
    }

    fn is_expired(&self, now: u64) -> bool {
        if let Some(expires_at) = self.expires_at {
            if now >= expires_at {
                return true;
            }
        }
        match self.metadata.max_idle() {
            Some(idle) => now >= deadline(self.last_access.load(Ordering::Relaxed), idle),
            None => false,
        }
    }

    fn touch(&self, now: u64) {
        self.last_access.store(now, Ordering::Relaxed);
    }
}

type EntryMap = HashMap<Value, StoredValue>;

struct Shared {
    entries: RwLock<EntryMap>,
    entry_factory: Arc<dyn EntryFactory>,
    open_traversals: AtomicUsize,
}

impl Shared {
    fn read_entries(&self) -> Result<RwLockReadGuard<'_, EntryMap>> {
        self.entries
            .read()
            .map_err(|e| CacheError::Storage(format!("Lock error: {}", e)))
    }

    fn write_entries(&self) -> Result<RwLockWriteGuard<'_, EntryMap>> {
        self.entries
            .write()
            .map_err(|e| CacheError::Storage(format!("Lock error: {}", e)))
    }

    fn live_snapshot(&self) -> Result<Vec<CacheEntry>> {
        let now = current_time_ms();
        let entries = self.read_entries()?;
        Ok(entries
            .iter()
            .filter(|(_, stored)| !stored.is_expired(now))
            .map(|(k, stored)| {
                self.entry_factory.create_from_metadata(
                    k.clone(),
                    stored.value.clone(),
                    stored.metadata.clone(),
                )
            })
            .collect())
    }
}

/// Local key/value storage with expiration and an optional write-through
/// store. Executes every command kind directly and resolves synchronously.
pub struct DataContainer {
    name: String,
    shared: Arc<Shared>,
    store: Option<Arc<dyn CacheStore>>,
}

impl DataContainer {
    pub fn new(name: impl Into<String>, entry_factory: Arc<dyn EntryFactory>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                entries: RwLock::new(HashMap::new()),
                entry_factory,
                open_traversals: AtomicUsize::new(0),
            }),
            store: None,
        }
    }

    /// Write through to, and read through from, `store`
    pub fn with_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> Option<&Arc<dyn CacheStore>> {
        self.store.as_ref()
    }

    /// Number of live in-memory entries
    pub fn size(&self) -> Result<usize> {
        let now = current_time_ms();
        let entries = self.shared.read_entries()?;
        Ok(entries.values().filter(|s| !s.is_expired(now)).count())
    }

    /// Traversals opened over this container and not yet released
    pub fn open_traversals(&self) -> usize {
        self.shared.open_traversals.load(Ordering::SeqCst)
    }

    /// Drop expired entries
    pub fn purge_expired(&self) -> Result<usize> {
        let now = current_time_ms();
        let mut entries = self.shared.write_entries()?;
        let before = entries.len();
        entries.retain(|_, v| !v.is_expired(now));
        Ok(before - entries.len())
    }

    fn store_for(&self, flags: &Flags, skip: Flag) -> Option<&Arc<dyn CacheStore>> {
        if flags.contains(&skip) {
            None
        } else {
            self.store.as_ref()
        }
    }

    /// Live value and metadata, loading from the store on a miss
    fn lookup(&self, key: &Value, flags: &Flags) -> Result<Option<(Value, Metadata)>> {
        let now = current_time_ms();
        {
            let entries = self.shared.read_entries()?;
            if let Some(stored) = entries.get(key) {
                if !stored.is_expired(now) {
                    stored.touch(now);
                    return Ok(Some((stored.value.clone(), stored.metadata.clone())));
                }
            }
        }
        let mut entries = self.shared.write_entries()?;
        self.lookup_locked(&mut entries, key, flags, now)
    }

    /// Lookup under the write guard. A loaded value is only installed while
    /// the key is still absent, so a concurrent write is never overwritten.
    fn lookup_locked(
        &self,
        entries: &mut EntryMap,
        key: &Value,
        flags: &Flags,
        now: u64,
    ) -> Result<Option<(Value, Metadata)>> {
        let expired = match entries.get(key) {
            Some(stored) if !stored.is_expired(now) => {
                stored.touch(now);
                return Ok(Some((stored.value.clone(), stored.metadata.clone())));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }

        let store = match self.store_for(flags, Flag::SkipCacheLoad) {
            Some(store) => store,
            None => return Ok(None),
        };
        match store.load(key)? {
            Some((value, metadata)) => {
                let stored = StoredValue::new(value.clone(), metadata.clone());
                if stored.is_expired(now) {
                    return Ok(None);
                }
                debug!("Loaded {} from store {}", key, store.identifier());
                entries.insert(key.clone(), stored);
                Ok(Some((value, metadata)))
            }
            None => Ok(None),
        }
    }

    fn store_locked(
        &self,
        entries: &mut EntryMap,
        key: Value,
        value: Value,
        metadata: Metadata,
        flags: &Flags,
    ) -> Result<()> {
        if let Some(store) = self.store_for(flags, Flag::SkipCacheStore) {
            let entry = self.shared.entry_factory.create_from_metadata(
                key.clone(),
                value.clone(),
                metadata.clone(),
            );
            store.write(&entry)?;
        }
        entries.insert(key, StoredValue::new(value, metadata));
        Ok(())
    }

    fn delete_locked(&self, entries: &mut EntryMap, key: &Value, flags: &Flags) -> Result<()> {
        if let Some(store) = self.store_for(flags, Flag::SkipCacheStore) {
            store.delete(key)?;
        }
        entries.remove(key);
        Ok(())
    }

    fn put(&self, command: &PutCommand) -> Result<CommandResult> {
        let mut entries = self.shared.write_entries()?;
        let previous = if command.flags.contains(&Flag::IgnoreReturnValues) {
            None
        } else {
            self.lookup_locked(&mut entries, &command.key, &command.flags, current_time_ms())?
                .map(|(v, _)| v)
        };
        self.store_locked(
            &mut entries,
            command.key.clone(),
            command.value.clone(),
            command.metadata.clone(),
            &command.flags,
        )?;
        Ok(CommandResult::from_option(previous))
    }

    fn put_map(&self, command: &PutMapCommand) -> Result<CommandResult> {
        let mut entries = self.shared.write_entries()?;
        for (key, value) in &command.map {
            self.store_locked(
                &mut entries,
                key.clone(),
                value.clone(),
                command.metadata.clone(),
                &command.flags,
            )?;
        }
        Ok(CommandResult::Nothing)
    }

    fn entry(&self, key: Value, value: Value, metadata: Metadata) -> CacheEntry {
        self.shared
            .entry_factory
            .create_from_metadata(key, value, metadata)
    }

    fn get_all(&self, command: &GetAllCommand) -> Result<CommandResult> {
        if command.return_entries {
            let mut entries = Vec::with_capacity(command.keys.len());
            for key in &command.keys {
                let entry = self
                    .lookup(key, &command.flags)?
                    .map(|(v, m)| self.entry(key.clone(), v, m));
                entries.push((key.clone(), entry));
            }
            Ok(CommandResult::Entries(entries))
        } else {
            let mut values = Vec::with_capacity(command.keys.len());
            for key in &command.keys {
                let value = self.lookup(key, &command.flags)?.map(|(v, _)| v);
                values.push((key.clone(), value));
            }
            Ok(CommandResult::Values(values))
        }
    }

    fn replace(&self, command: &ReplaceCommand) -> Result<CommandResult> {
        let mut entries = self.shared.write_entries()?;
        let current = self
            .lookup_locked(&mut entries, &command.key, &command.flags, current_time_ms())?
            .map(|(v, _)| v);
        let result = match (&command.old_value, current) {
            (Some(expected), Some(current)) if *expected == current => CommandResult::Bool(true),
            (Some(_), _) => return Ok(CommandResult::Bool(false)),
            (None, Some(previous)) => CommandResult::Value(previous),
            (None, None) => return Ok(CommandResult::Nothing),
        };
        self.store_locked(
            &mut entries,
            command.key.clone(),
            command.new_value.clone(),
            command.metadata.clone(),
            &command.flags,
        )?;
        Ok(result)
    }

    fn remove(&self, command: &RemoveCommand) -> Result<CommandResult> {
        let mut entries = self.shared.write_entries()?;
        let current = self
            .lookup_locked(&mut entries, &command.key, &command.flags, current_time_ms())?
            .map(|(v, _)| v);
        let result = match (&command.value, current) {
            (Some(expected), Some(current)) if *expected == current => CommandResult::Bool(true),
            (Some(_), _) => return Ok(CommandResult::Bool(false)),
            (None, Some(previous)) => CommandResult::Value(previous),
            (None, None) => return Ok(CommandResult::Nothing),
        };
        self.delete_locked(&mut entries, &command.key, &command.flags)?;
        Ok(result)
    }

    fn perform(&self, command: &Command) -> Result<CommandResult> {
        match command {
            Command::Put(c) => self.put(c),
            Command::PutMap(c) => self.put_map(c),
            Command::Get(c) => Ok(CommandResult::from_option(
                self.lookup(&c.key, &c.flags)?.map(|(v, _)| v),
            )),
            Command::GetEntry(c) => Ok(match self.lookup(&c.key, &c.flags)? {
                Some((v, m)) => CommandResult::Entry(self.entry(c.key.clone(), v, m)),
                None => CommandResult::Nothing,
            }),
            Command::GetAll(c) => self.get_all(c),
            Command::Replace(c) => self.replace(c),
            Command::Remove(c) => self.remove(c),
            Command::KeySet(_) => Ok(CommandResult::KeySet(LazyView::raw(Arc::new(KeySource {
                shared: self.shared.clone(),
            })))),
            Command::EntrySet(_) => Ok(CommandResult::EntrySet(LazyView::raw(Arc::new(
                EntrySource {
                    shared: self.shared.clone(),
                },
            )))),
        }
    }
}

impl CommandExecutor for DataContainer {
    fn execute(&self, ctx: &Arc<InvocationContext>, command: Command) -> InvocationStage {
        let outcome = self.perform(&command);
        if let Err(e) = &outcome {
            warn!("{} on cache {} failed: {}", command.kind(), self.name, e);
        }
        InvocationStage::completed(Invocation::new(ctx.clone(), command), outcome)
    }
}

/// Releases one open-traversal slot exactly once
struct TraversalResource {
    shared: Arc<Shared>,
    released: AtomicBool,
}

impl TraversalResource {
    fn acquire(shared: Arc<Shared>) -> Arc<Self> {
        shared.open_traversals.fetch_add(1, Ordering::SeqCst);
        Arc::new(Self {
            shared,
            released: AtomicBool::new(false),
        })
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.shared.open_traversals.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Traversal over a snapshot taken at open time. Splits hand off the
/// other half of the remaining elements and share the root's resource.
struct SnapshotTraversal<T> {
    /// Remaining elements, in reverse so `pop` yields the next one
    items: Vec<T>,
    resource: Arc<TraversalResource>,
    root: bool,
}

impl<T: Send + 'static> RawTraversal<T> for SnapshotTraversal<T> {
    fn next_raw(&mut self) -> Option<T> {
        self.items.pop()
    }

    fn split(&mut self) -> Option<Box<dyn RawTraversal<T>>> {
        if self.items.len() < 2 {
            return None;
        }
        // the back half holds the elements this traversal would yield first
        let front = self.items.split_off(self.items.len() / 2);
        Some(Box::new(SnapshotTraversal {
            items: front,
            resource: self.resource.clone(),
            root: false,
        }))
    }

    fn estimate_size(&self) -> usize {
        self.items.len()
    }

    fn characteristics(&self) -> Characteristics {
        Characteristics::CONCURRENT
            | Characteristics::DISTINCT
            | Characteristics::NONNULL
            | Characteristics::SIZED
    }

    fn close(&mut self) {
        if self.root {
            self.resource.release();
        }
        self.items.clear();
    }
}

impl<T> Drop for SnapshotTraversal<T> {
    fn drop(&mut self) {
        if self.root {
            self.resource.release();
        }
    }
}

struct KeySource {
    shared: Arc<Shared>,
}

impl TraversalSource<Value> for KeySource {
    fn open(&self) -> Result<Box<dyn RawTraversal<Value>>> {
        let mut items: Vec<Value> = self
            .shared
            .live_snapshot()?
            .into_iter()
            .map(|e| e.key().clone())
            .collect();
        items.reverse();
        Ok(Box::new(SnapshotTraversal {
            items,
            resource: TraversalResource::acquire(self.shared.clone()),
            root: true,
        }))
    }
}

struct EntrySource {
    shared: Arc<Shared>,
}

impl TraversalSource<CacheEntry> for EntrySource {
    fn open(&self) -> Result<Box<dyn RawTraversal<CacheEntry>>> {
        let mut items = self.shared.live_snapshot()?;
        items.reverse();
        Ok(Box::new(SnapshotTraversal {
            items,
            resource: TraversalResource::acquire(self.shared.clone()),
            root: true,
        }))
    }
}
