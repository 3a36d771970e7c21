//! Re-delivers downstream outcomes from a runtime task, the way a network
//! or I/O completion would arrive on a thread other than the caller's.

use super::{Interceptor, Next};
use crate::command::{
    Command, EntrySetCommand, GetAllCommand, GetCommand, GetEntryCommand, KeySetCommand,
    PutCommand, PutMapCommand, RemoveCommand, ReplaceCommand,
};
use crate::error::{CacheError, Result};
use crate::invocation::{InvocationContext, InvocationStage};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::trace;

pub struct AsyncCompletionInterceptor {
    handle: Handle,
}

impl AsyncCompletionInterceptor {
    /// Bind to the runtime the caller is running on
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| {
            CacheError::MissingComponent(format!("async completion needs a tokio runtime: {}", e))
        })?;
        Ok(Self { handle })
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self { handle }
    }

    fn defer(&self, ctx: &Arc<InvocationContext>, command: Command, next: Next<'_>) -> InvocationStage {
        let handle = self.handle.clone();
        next.invoke(ctx, command).then_compose(move |invocation, outcome| {
            let (completer, stage) = InvocationStage::pending(invocation.clone());
            trace!("deferring {} completion", invocation.command().kind());
            handle.spawn(async move {
                completer.complete(outcome);
            });
            stage
        })
    }
}

impl Interceptor for AsyncCompletionInterceptor {
    fn name(&self) -> &'static str {
        "async_completion"
    }

    fn visit_put(&self, ctx: &Arc<InvocationContext>, command: PutCommand, next: Next<'_>) -> InvocationStage {
        self.defer(ctx, command.into(), next)
    }

    fn visit_put_map(
        &self,
        ctx: &Arc<InvocationContext>,
        command: PutMapCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        self.defer(ctx, command.into(), next)
    }

    fn visit_get(&self, ctx: &Arc<InvocationContext>, command: GetCommand, next: Next<'_>) -> InvocationStage {
        self.defer(ctx, command.into(), next)
    }

    fn visit_get_entry(
        &self,
        ctx: &Arc<InvocationContext>,
        command: GetEntryCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        self.defer(ctx, command.into(), next)
    }

    fn visit_get_all(
        &self,
        ctx: &Arc<InvocationContext>,
        command: GetAllCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        self.defer(ctx, command.into(), next)
    }

    fn visit_replace(
        &self,
        ctx: &Arc<InvocationContext>,
        command: ReplaceCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        self.defer(ctx, command.into(), next)
    }

    fn visit_remove(
        &self,
        ctx: &Arc<InvocationContext>,
        command: RemoveCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        self.defer(ctx, command.into(), next)
    }

    fn visit_key_set(
        &self,
        ctx: &Arc<InvocationContext>,
        command: KeySetCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        self.defer(ctx, command.into(), next)
    }

    fn visit_entry_set(
        &self,
        ctx: &Arc<InvocationContext>,
        command: EntrySetCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        self.defer(ctx, command.into(), next)
    }
}
