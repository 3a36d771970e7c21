//! Per-call state and result types shared by every interceptor.

pub mod stage;

pub use stage::{InvocationStage, Outcome, StageCompleter};

use crate::command::{Command, Flag, Flags, Value};
use crate::container::CacheEntry;
use crate::view::LazyView;
use std::sync::Arc;

/// Immutable per-invocation context.
///
/// `origin_local` is false when the command was forwarded by another
/// cluster member; such commands already carry stored-representation data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvocationContext {
    origin_local: bool,
    origin: Option<String>,
    flags: Flags,
}

impl InvocationContext {
    /// Context for a call issued on this node
    pub fn local() -> Self {
        Self {
            origin_local: true,
            origin: None,
            flags: Flags::new(),
        }
    }

    /// Context for a command received from cluster member `origin`
    pub fn remote(origin: impl Into<String>) -> Self {
        Self {
            origin_local: false,
            origin: Some(origin.into()),
            flags: Flags::new(),
        }
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn is_origin_local(&self) -> bool {
        self.origin_local
    }

    /// Address of the member that sent the command, if remote
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }
}

/// A context paired with the command frozen at the terminal executor
#[derive(Debug)]
pub struct Invocation {
    context: Arc<InvocationContext>,
    command: Arc<Command>,
}

impl Invocation {
    pub fn new(context: Arc<InvocationContext>, command: Command) -> Arc<Self> {
        Arc::new(Self {
            context,
            command: Arc::new(command),
        })
    }

    pub fn context(&self) -> &InvocationContext {
        &self.context
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

/// What a command resolves to
#[derive(Clone, Debug)]
pub enum CommandResult {
    /// No value: absent key, ignored return value, or a bulk write
    Nothing,
    Value(Value),
    /// Success flag of a conditional write
    Bool(bool),
    Entry(CacheEntry),
    /// `GetAll` in value mode, in request order; `None` for absent keys
    Values(Vec<(Value, Option<Value>)>),
    /// `GetAll` in entry mode, in request order; `None` for absent keys
    Entries(Vec<(Value, Option<CacheEntry>)>),
    KeySet(LazyView<Value>),
    EntrySet(LazyView<CacheEntry>),
}

impl CommandResult {
    pub fn from_option(value: Option<Value>) -> Self {
        value.map_or(CommandResult::Nothing, CommandResult::Value)
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, CommandResult::Nothing)
    }

    /// Variant name for log and error messages
    pub fn variant_name(&self) -> &'static str {
        match self {
            CommandResult::Nothing => "nothing",
            CommandResult::Value(_) => "value",
            CommandResult::Bool(_) => "bool",
            CommandResult::Entry(_) => "entry",
            CommandResult::Values(_) => "values",
            CommandResult::Entries(_) => "entries",
            CommandResult::KeySet(_) => "key_set",
            CommandResult::EntrySet(_) => "entry_set",
        }
    }
}
