//! Ordered interceptor chain every cache command travels through.
//!
//! Each interceptor gets the command by value, may rewrite it, forwards it
//! with `Next::invoke` and may attach a continuation to the stage that
//! comes back. Continuations therefore unwind in the reverse order of
//! forwarding. Every `visit_*` method defaults to forwarding unchanged.

pub mod async_completion;
pub mod stats;
pub mod type_converter;

pub use async_completion::AsyncCompletionInterceptor;
pub use stats::{CacheStats, StatsInterceptor};
pub use type_converter::TypeConverterInterceptor;

use crate::command::{
    Command, EntrySetCommand, GetAllCommand, GetCommand, GetEntryCommand, KeySetCommand,
    PutCommand, PutMapCommand, RemoveCommand, ReplaceCommand,
};
use crate::error::{CacheError, Result};
use crate::invocation::{Invocation, InvocationContext, InvocationStage};
use std::sync::Arc;
use tracing::trace;

/// Whatever executes a command below a given point of the chain
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, ctx: &Arc<InvocationContext>, command: Command) -> InvocationStage;
}

/// Stage that failed before the command could be forwarded
pub fn fail(ctx: &Arc<InvocationContext>, command: Command, error: CacheError) -> InvocationStage {
    InvocationStage::failed(Invocation::new(ctx.clone(), command), error)
}

pub trait Interceptor: Send + Sync {
    fn name(&self) -> &'static str;

    fn visit_put(
        &self,
        ctx: &Arc<InvocationContext>,
        command: PutCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        next.invoke(ctx, command.into())
    }

    fn visit_put_map(
        &self,
        ctx: &Arc<InvocationContext>,
        command: PutMapCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        next.invoke(ctx, command.into())
    }

    fn visit_get(
        &self,
        ctx: &Arc<InvocationContext>,
        command: GetCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        next.invoke(ctx, command.into())
    }

    fn visit_get_entry(
        &self,
        ctx: &Arc<InvocationContext>,
        command: GetEntryCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        next.invoke(ctx, command.into())
    }

    fn visit_get_all(
        &self,
        ctx: &Arc<InvocationContext>,
        command: GetAllCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        next.invoke(ctx, command.into())
    }

    fn visit_replace(
        &self,
        ctx: &Arc<InvocationContext>,
        command: ReplaceCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        next.invoke(ctx, command.into())
    }

    fn visit_remove(
        &self,
        ctx: &Arc<InvocationContext>,
        command: RemoveCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        next.invoke(ctx, command.into())
    }

    fn visit_key_set(
        &self,
        ctx: &Arc<InvocationContext>,
        command: KeySetCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        next.invoke(ctx, command.into())
    }

    fn visit_entry_set(
        &self,
        ctx: &Arc<InvocationContext>,
        command: EntrySetCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        next.invoke(ctx, command.into())
    }
}

/// Route a command to the `visit_*` method for its kind
pub fn dispatch(
    interceptor: &dyn Interceptor,
    ctx: &Arc<InvocationContext>,
    command: Command,
    next: Next<'_>,
) -> InvocationStage {
    match command {
        Command::Put(c) => interceptor.visit_put(ctx, c, next),
        Command::PutMap(c) => interceptor.visit_put_map(ctx, c, next),
        Command::Get(c) => interceptor.visit_get(ctx, c, next),
        Command::GetEntry(c) => interceptor.visit_get_entry(ctx, c, next),
        Command::GetAll(c) => interceptor.visit_get_all(ctx, c, next),
        Command::Replace(c) => interceptor.visit_replace(ctx, c, next),
        Command::Remove(c) => interceptor.visit_remove(ctx, c, next),
        Command::KeySet(c) => interceptor.visit_key_set(ctx, c, next),
        Command::EntrySet(c) => interceptor.visit_entry_set(ctx, c, next),
    }
}

/// The rest of the chain below the current interceptor
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [Arc<dyn Interceptor>],
    terminal: &'a dyn CommandExecutor,
}

impl<'a> Next<'a> {
    pub fn new(rest: &'a [Arc<dyn Interceptor>], terminal: &'a dyn CommandExecutor) -> Self {
        Self { rest, terminal }
    }

    pub fn invoke(self, ctx: &Arc<InvocationContext>, command: Command) -> InvocationStage {
        match self.rest.split_first() {
            Some((head, rest)) => {
                trace!("{} -> {}", command.kind(), head.name());
                dispatch(head.as_ref(), ctx, command, Next::new(rest, self.terminal))
            }
            None => {
                trace!("{} -> executor", command.kind());
                self.terminal.execute(ctx, command)
            }
        }
    }
}

/// Interceptors in forwarding order plus the executor at the tail
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
    terminal: Arc<dyn CommandExecutor>,
}

impl InterceptorChain {
    pub fn builder() -> ChainBuilder {
        ChainBuilder::default()
    }

    pub fn invoke(&self, ctx: InvocationContext, command: Command) -> InvocationStage {
        self.execute(&Arc::new(ctx), command)
    }

    /// Interceptor names, head first
    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

impl CommandExecutor for InterceptorChain {
    fn execute(&self, ctx: &Arc<InvocationContext>, command: Command) -> InvocationStage {
        Next::new(&self.interceptors, self.terminal.as_ref()).invoke(ctx, command)
    }
}

#[derive(Default)]
pub struct ChainBuilder {
    type_converter: Option<Arc<dyn Interceptor>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    terminal: Option<Arc<dyn CommandExecutor>>,
}

impl ChainBuilder {
    /// The conversion interceptor always sits at the head, nearest the caller
    pub fn type_converter(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.type_converter = Some(interceptor);
        self
    }

    pub fn add(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn terminal(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.terminal = Some(executor);
        self
    }

    pub fn build(self) -> Result<InterceptorChain> {
        let terminal = self
            .terminal
            .ok_or_else(|| CacheError::MissingComponent("chain terminal executor".to_string()))?;
        let mut interceptors = Vec::with_capacity(self.interceptors.len() + 1);
        interceptors.extend(self.type_converter);
        interceptors.extend(self.interceptors);
        Ok(InterceptorChain {
            interceptors,
            terminal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandKind, Value};
    use crate::invocation::CommandResult;
    use std::sync::Mutex;

    /// Records every command reaching the tail and echoes its kind back
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Command>>,
    }

    impl CommandExecutor for Recorder {
        fn execute(&self, ctx: &Arc<InvocationContext>, command: Command) -> InvocationStage {
            self.seen.lock().unwrap().push(command.clone());
            let kind = command.kind().name().to_string();
            InvocationStage::ok(
                Invocation::new(ctx.clone(), command),
                CommandResult::Value(Value::from(kind)),
            )
        }
    }

    /// Appends its tag to put keys on the way down and to results on the way up
    struct Tagger {
        tag: &'static str,
    }

    impl Interceptor for Tagger {
        fn name(&self) -> &'static str {
            self.tag
        }

        fn visit_put(
            &self,
            ctx: &Arc<InvocationContext>,
            mut command: PutCommand,
            next: Next<'_>,
        ) -> InvocationStage {
            let tag = self.tag;
            if let Value::Str(k) = &mut command.key {
                k.push_str(tag);
            }
            next.invoke(ctx, command.into()).then_apply(move |_, _, rv| match rv {
                CommandResult::Value(Value::Str(mut s)) => {
                    s.push_str(tag);
                    Ok(CommandResult::Value(Value::Str(s)))
                }
                other => Ok(other),
            })
        }
    }

    #[test]
    fn test_forward_and_unwind_order() {
        let recorder = Arc::new(Recorder::default());
        let chain = InterceptorChain::builder()
            .add(Arc::new(Tagger { tag: "-b" }))
            .type_converter(Arc::new(Tagger { tag: "-a" }))
            .add(Arc::new(Tagger { tag: "-c" }))
            .terminal(recorder.clone())
            .build()
            .unwrap();
        assert_eq!(chain.names(), vec!["-a", "-b", "-c"]);

        let stage = chain.invoke(InvocationContext::local(), Command::put("k", "v"));
        match stage.try_outcome().unwrap().unwrap() {
            CommandResult::Value(v) => assert_eq!(v, Value::from("put-c-b-a")),
            other => panic!("unexpected result {:?}", other),
        }
        match &recorder.seen.lock().unwrap()[0] {
            Command::Put(c) => assert_eq!(c.key, Value::from("k-a-b-c")),
            other => panic!("unexpected command {:?}", other),
        };
    }

    #[test]
    fn test_default_arms_forward_unchanged() {
        let recorder = Arc::new(Recorder::default());
        let chain = InterceptorChain::builder()
            .add(Arc::new(Tagger { tag: "-x" }))
            .terminal(recorder.clone())
            .build()
            .unwrap();

        let commands = vec![
            Command::put_map(vec![(Value::from("a"), Value::from("1"))]),
            Command::get("k"),
            Command::get_entry("k"),
            Command::get_all(vec![Value::from("k")], false),
            Command::replace_if("k", "old", "new"),
            Command::remove("k"),
            Command::key_set(),
            Command::entry_set(),
        ];
        for command in commands.clone() {
            let kind = command.kind();
            let stage = chain.invoke(InvocationContext::local(), command);
            match stage.try_outcome().unwrap().unwrap() {
                CommandResult::Value(v) => assert_eq!(v, Value::from(kind.name())),
                other => panic!("unexpected result {:?}", other),
            }
        }
        assert_eq!(*recorder.seen.lock().unwrap(), commands);
        assert_ne!(commands[0].kind(), CommandKind::Put);
    }

    #[test]
    fn test_missing_terminal() {
        let err = InterceptorChain::builder().build().err().unwrap();
        assert!(matches!(err, CacheError::MissingComponent(_)));
    }

    #[test]
    fn test_empty_chain_goes_straight_to_executor() {
        let chain = InterceptorChain::builder()
            .terminal(Arc::new(Recorder::default()))
            .build()
            .unwrap();
        assert!(chain.is_empty());
        let stage = chain.invoke(InvocationContext::local(), Command::key_set());
        assert!(stage.try_outcome().unwrap().is_ok());
    }
}
