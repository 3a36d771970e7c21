//! Caller-facing cache API on top of an interceptor chain.

pub mod manager;

pub use manager::CacheManager;

use crate::command::{Command, Flags, Metadata, Value};
use crate::container::{CacheEntry, DataContainer};
use crate::error::{CacheError, Result};
use crate::interceptor::{CacheStats, InterceptorChain, StatsInterceptor};
use crate::invocation::{CommandResult, InvocationContext, InvocationStage};
use crate::view::LazyView;
use std::sync::Arc;

fn unexpected(rv: CommandResult) -> CacheError {
    CacheError::InvalidCommand(format!("unexpected {} result", rv.variant_name()))
}

fn into_value(rv: CommandResult) -> Result<Option<Value>> {
    match rv {
        CommandResult::Nothing => Ok(None),
        CommandResult::Value(v) => Ok(Some(v)),
        other => Err(unexpected(other)),
    }
}

fn into_bool(rv: CommandResult) -> Result<bool> {
    match rv {
        CommandResult::Bool(b) => Ok(b),
        other => Err(unexpected(other)),
    }
}

/// One named cache. Every call runs through the cache's chain as a
/// locally originated invocation.
pub struct Cache {
    name: String,
    chain: InterceptorChain,
    container: Arc<DataContainer>,
    stats: Option<Arc<StatsInterceptor>>,
}

impl Cache {
    pub(crate) fn new(
        name: String,
        chain: InterceptorChain,
        container: Arc<DataContainer>,
        stats: Option<Arc<StatsInterceptor>>,
    ) -> Self {
        Self {
            name,
            chain,
            container,
            stats,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chain(&self) -> &InterceptorChain {
        &self.chain
    }

    /// The data container at the tail of this cache's chain
    pub fn container(&self) -> &Arc<DataContainer> {
        &self.container
    }

    /// Statistics, if enabled for this cache
    pub fn stats(&self) -> Option<CacheStats> {
        self.stats.as_ref().map(|s| s.stats())
    }

    /// Run an arbitrary command, e.g. one delivered by a remote member
    pub fn invoke(&self, ctx: InvocationContext, command: Command) -> InvocationStage {
        self.chain.invoke(ctx, command)
    }

    async fn local(&self, command: Command) -> Result<CommandResult> {
        self.chain.invoke(InvocationContext::local(), command).await
    }

    pub async fn put(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<Option<Value>> {
        into_value(self.local(Command::put(key, value)).await?)
    }

    pub async fn put_with(
        &self,
        key: impl Into<Value>,
        value: impl Into<Value>,
        metadata: Metadata,
        flags: Flags,
    ) -> Result<Option<Value>> {
        let mut command = Command::put(key, value).with_metadata(metadata);
        command.flags_mut().extend(flags);
        into_value(self.local(command).await?)
    }

    pub async fn put_all<I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (Value, Value)>,
    {
        self.local(Command::put_map(entries)).await.map(|_| ())
    }

    pub async fn get(&self, key: impl Into<Value>) -> Result<Option<Value>> {
        into_value(self.local(Command::get(key)).await?)
    }

    pub async fn get_entry(&self, key: impl Into<Value>) -> Result<Option<CacheEntry>> {
        match self.local(Command::get_entry(key)).await? {
            CommandResult::Nothing => Ok(None),
            CommandResult::Entry(entry) => Ok(Some(entry)),
            other => Err(unexpected(other)),
        }
    }

    /// Values for `keys` in request order, `None` for absent keys
    pub async fn get_all<I>(&self, keys: I) -> Result<Vec<(Value, Option<Value>)>>
    where
        I: IntoIterator<Item = Value>,
    {
        match self.local(Command::get_all(keys, false)).await? {
            CommandResult::Values(values) => Ok(values),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_all_entries<I>(&self, keys: I) -> Result<Vec<(Value, Option<CacheEntry>)>>
    where
        I: IntoIterator<Item = Value>,
    {
        match self.local(Command::get_all(keys, true)).await? {
            CommandResult::Entries(entries) => Ok(entries),
            other => Err(unexpected(other)),
        }
    }

    /// Replace an existing mapping; returns the previous value
    pub async fn replace(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<Option<Value>> {
        into_value(self.local(Command::replace(key, value)).await?)
    }

    pub async fn replace_if(
        &self,
        key: impl Into<Value>,
        expected: impl Into<Value>,
        value: impl Into<Value>,
    ) -> Result<bool> {
        into_bool(self.local(Command::replace_if(key, expected, value)).await?)
    }

    pub async fn remove(&self, key: impl Into<Value>) -> Result<Option<Value>> {
        into_value(self.local(Command::remove(key)).await?)
    }

    pub async fn remove_if(&self, key: impl Into<Value>, expected: impl Into<Value>) -> Result<bool> {
        into_bool(self.local(Command::remove_if(key, expected)).await?)
    }

    pub async fn key_set(&self) -> Result<LazyView<Value>> {
        match self.local(Command::key_set()).await? {
            CommandResult::KeySet(view) => Ok(view),
            other => Err(unexpected(other)),
        }
    }

    pub async fn entry_set(&self) -> Result<LazyView<CacheEntry>> {
        match self.local(Command::entry_set()).await? {
            CommandResult::EntrySet(view) => Ok(view),
            other => Err(unexpected(other)),
        }
    }
}
