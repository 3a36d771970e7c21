//! Commands describing a single cache operation.
//!
//! A command is owned by exactly one invocation. Interceptors receive it by
//! value, may rewrite it, and pass it on; once the terminal executor takes
//! it, it is frozen behind an `Arc` and only read by continuations.

pub mod metadata;
pub mod value;

pub use metadata::{Metadata, Version};
pub use value::Value;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// Per-invocation behaviour flags
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Flag {
    /// The caller does not need the previous value back
    IgnoreReturnValues,
    /// Do not read through to the persistent store on a miss
    SkipCacheLoad,
    /// Do not write through to the persistent store
    SkipCacheStore,
    /// Do not record hit/miss/store statistics
    SkipStatistics,
    /// Operation issued by the REST endpoint
    OperationRest,
    /// Operation issued by the memcached endpoint
    OperationMemcached,
    /// Operation issued by the Hot Rod endpoint
    OperationHotRod,
}

/// Ordered flag set; iteration order is the declaration order of `Flag`
pub type Flags = BTreeSet<Flag>;

/// Discriminator used by the chain to dispatch a command
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Put,
    PutMap,
    Get,
    GetEntry,
    GetAll,
    Replace,
    Remove,
    KeySet,
    EntrySet,
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Put => "put",
            CommandKind::PutMap => "put_map",
            CommandKind::Get => "get",
            CommandKind::GetEntry => "get_entry",
            CommandKind::GetAll => "get_all",
            CommandKind::Replace => "replace",
            CommandKind::Remove => "remove",
            CommandKind::KeySet => "key_set",
            CommandKind::EntrySet => "entry_set",
        }
    }

    /// Whether the command writes to the cache
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            CommandKind::Put | CommandKind::PutMap | CommandKind::Replace | CommandKind::Remove
        )
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PutCommand {
    pub key: Value,
    pub value: Value,
    pub metadata: Metadata,
    pub flags: Flags,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PutMapCommand {
    pub map: Vec<(Value, Value)>,
    pub metadata: Metadata,
    pub flags: Flags,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GetCommand {
    pub key: Value,
    pub flags: Flags,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GetEntryCommand {
    pub key: Value,
    pub flags: Flags,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GetAllCommand {
    /// Requested keys in request order, without duplicates
    pub keys: Vec<Value>,
    /// Return whole entries instead of bare values
    pub return_entries: bool,
    /// Keys whose entries were fetched from a remote owner during this
    /// invocation. Filled in by the distribution layer on the way down.
    pub remotely_fetched: HashSet<Value>,
    pub flags: Flags,
}

impl GetAllCommand {
    pub fn new<I>(keys: I, return_entries: bool) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let mut seen = HashSet::new();
        let keys = keys.into_iter().filter(|k| seen.insert(k.clone())).collect();
        Self {
            keys,
            return_entries,
            remotely_fetched: HashSet::new(),
            flags: Flags::new(),
        }
    }

    pub fn is_remotely_fetched(&self, key: &Value) -> bool {
        self.remotely_fetched.contains(key)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReplaceCommand {
    pub key: Value,
    /// Expected current value for a conditional replace
    pub old_value: Option<Value>,
    pub new_value: Value,
    pub metadata: Metadata,
    pub flags: Flags,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RemoveCommand {
    pub key: Value,
    /// Expected current value for a conditional remove
    pub value: Option<Value>,
    pub flags: Flags,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeySetCommand {
    pub flags: Flags,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntrySetCommand {
    pub flags: Flags,
}

/// A cache operation, tagged by kind
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Put(PutCommand),
    PutMap(PutMapCommand),
    Get(GetCommand),
    GetEntry(GetEntryCommand),
    GetAll(GetAllCommand),
    Replace(ReplaceCommand),
    Remove(RemoveCommand),
    KeySet(KeySetCommand),
    EntrySet(EntrySetCommand),
}

impl Command {
    pub fn put(key: impl Into<Value>, value: impl Into<Value>) -> Self {
        Command::Put(PutCommand {
            key: key.into(),
            value: value.into(),
            metadata: Metadata::default(),
            flags: Flags::new(),
        })
    }

    pub fn put_map<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Value, Value)>,
    {
        Command::PutMap(PutMapCommand {
            map: entries.into_iter().collect(),
            metadata: Metadata::default(),
            flags: Flags::new(),
        })
    }

    pub fn get(key: impl Into<Value>) -> Self {
        Command::Get(GetCommand {
            key: key.into(),
            flags: Flags::new(),
        })
    }

    pub fn get_entry(key: impl Into<Value>) -> Self {
        Command::GetEntry(GetEntryCommand {
            key: key.into(),
            flags: Flags::new(),
        })
    }

    pub fn get_all<I>(keys: I, return_entries: bool) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        Command::GetAll(GetAllCommand::new(keys, return_entries))
    }

    pub fn replace(key: impl Into<Value>, new_value: impl Into<Value>) -> Self {
        Command::Replace(ReplaceCommand {
            key: key.into(),
            old_value: None,
            new_value: new_value.into(),
            metadata: Metadata::default(),
            flags: Flags::new(),
        })
    }

    pub fn replace_if(
        key: impl Into<Value>,
        old_value: impl Into<Value>,
        new_value: impl Into<Value>,
    ) -> Self {
        Command::Replace(ReplaceCommand {
            key: key.into(),
            old_value: Some(old_value.into()),
            new_value: new_value.into(),
            metadata: Metadata::default(),
            flags: Flags::new(),
        })
    }

    pub fn remove(key: impl Into<Value>) -> Self {
        Command::Remove(RemoveCommand {
            key: key.into(),
            value: None,
            flags: Flags::new(),
        })
    }

    pub fn remove_if(key: impl Into<Value>, value: impl Into<Value>) -> Self {
        Command::Remove(RemoveCommand {
            key: key.into(),
            value: Some(value.into()),
            flags: Flags::new(),
        })
    }

    pub fn key_set() -> Self {
        Command::KeySet(KeySetCommand::default())
    }

    pub fn entry_set() -> Self {
        Command::EntrySet(EntrySetCommand::default())
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Put(_) => CommandKind::Put,
            Command::PutMap(_) => CommandKind::PutMap,
            Command::Get(_) => CommandKind::Get,
            Command::GetEntry(_) => CommandKind::GetEntry,
            Command::GetAll(_) => CommandKind::GetAll,
            Command::Replace(_) => CommandKind::Replace,
            Command::Remove(_) => CommandKind::Remove,
            Command::KeySet(_) => CommandKind::KeySet,
            Command::EntrySet(_) => CommandKind::EntrySet,
        }
    }

    pub fn flags(&self) -> &Flags {
        match self {
            Command::Put(c) => &c.flags,
            Command::PutMap(c) => &c.flags,
            Command::Get(c) => &c.flags,
            Command::GetEntry(c) => &c.flags,
            Command::GetAll(c) => &c.flags,
            Command::Replace(c) => &c.flags,
            Command::Remove(c) => &c.flags,
            Command::KeySet(c) => &c.flags,
            Command::EntrySet(c) => &c.flags,
        }
    }

    pub fn flags_mut(&mut self) -> &mut Flags {
        match self {
            Command::Put(c) => &mut c.flags,
            Command::PutMap(c) => &mut c.flags,
            Command::Get(c) => &mut c.flags,
            Command::GetEntry(c) => &mut c.flags,
            Command::GetAll(c) => &mut c.flags,
            Command::Replace(c) => &mut c.flags,
            Command::Remove(c) => &mut c.flags,
            Command::KeySet(c) => &mut c.flags,
            Command::EntrySet(c) => &mut c.flags,
        }
    }

    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flags().contains(&flag)
    }

    /// Builder-style flag addition
    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.flags_mut().insert(flag);
        self
    }

    /// Builder-style metadata replacement; ignored by kinds without metadata
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        match &mut self {
            Command::Put(c) => c.metadata = metadata,
            Command::PutMap(c) => c.metadata = metadata,
            Command::Replace(c) => c.metadata = metadata,
            _ => {}
        }
        self
    }
}

macro_rules! impl_from_command {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Command {
                fn from(c: $ty) -> Self {
                    Command::$variant(c)
                }
            }
        )*
    };
}

impl_from_command!(
    Put(PutCommand),
    PutMap(PutMapCommand),
    Get(GetCommand),
    GetEntry(GetEntryCommand),
    GetAll(GetAllCommand),
    Replace(ReplaceCommand),
    Remove(RemoveCommand),
    KeySet(KeySetCommand),
    EntrySet(EntrySetCommand),
);
