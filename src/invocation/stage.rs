//! Single-assignment, continuation-composable result handle.
//!
//! A stage resolves exactly once. Continuations registered while it is
//! pending run, in registration order, on whichever thread resolves it;
//! continuations registered afterwards run immediately on the registering
//! thread. Nothing here blocks or spawns: a pending stage is represented,
//! never waited upon. Awaiting a stage through its `Future` impl is the
//! caller's choice.

use super::{CommandResult, Invocation, InvocationContext};
use crate::command::Command;
use crate::error::{CacheError, Result};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};
use tracing::error;

pub type Outcome = Result<CommandResult>;

struct Resolution {
    invocation: Arc<Invocation>,
    outcome: Outcome,
}

type Callback = Box<dyn FnOnce(&Arc<Resolution>) + Send>;

enum State {
    Pending {
        callbacks: Vec<Callback>,
        wakers: Vec<Waker>,
    },
    Resolved(Arc<Resolution>),
}

type Shared = Arc<Mutex<State>>;

fn lock(shared: &Shared) -> MutexGuard<'_, State> {
    // No callback runs under the lock, so a poisoned state is still consistent
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn settle(shared: &Shared, resolution: Arc<Resolution>) {
    let (callbacks, wakers) = {
        let mut state = lock(shared);
        match &mut *state {
            State::Resolved(_) => {
                error!(
                    "invocation stage for {} resolved twice; second outcome dropped",
                    resolution.invocation.command().kind()
                );
                debug_assert!(false, "invocation stage resolved twice");
                return;
            }
            State::Pending { callbacks, wakers } => {
                let taken = (std::mem::take(callbacks), std::mem::take(wakers));
                *state = State::Resolved(resolution.clone());
                taken
            }
        }
    };

    for callback in callbacks {
        callback(&resolution);
    }
    for waker in wakers {
        waker.wake();
    }
}

/// Handle to the eventual outcome of one invocation
pub struct InvocationStage {
    shared: Shared,
}

impl InvocationStage {
    fn unresolved() -> Self {
        Self {
            shared: Arc::new(Mutex::new(State::Pending {
                callbacks: Vec::new(),
                wakers: Vec::new(),
            })),
        }
    }

    /// Stage that is already resolved
    pub fn completed(invocation: Arc<Invocation>, outcome: Outcome) -> Self {
        Self {
            shared: Arc::new(Mutex::new(State::Resolved(Arc::new(Resolution {
                invocation,
                outcome,
            })))),
        }
    }

    pub fn ok(invocation: Arc<Invocation>, result: CommandResult) -> Self {
        Self::completed(invocation, Ok(result))
    }

    pub fn failed(invocation: Arc<Invocation>, error: CacheError) -> Self {
        Self::completed(invocation, Err(error))
    }

    /// Pending stage plus the one-shot handle that resolves it.
    ///
    /// Dropping the completer without completing resolves the stage to
    /// `CacheError::Abandoned`.
    pub fn pending(invocation: Arc<Invocation>) -> (StageCompleter, InvocationStage) {
        let stage = Self::unresolved();
        let completer = StageCompleter {
            shared: Some(stage.shared.clone()),
            invocation,
        };
        (completer, stage)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(&*lock(&self.shared), State::Resolved(_))
    }

    /// Outcome if already resolved; never waits
    pub fn try_outcome(&self) -> Option<Outcome> {
        match &*lock(&self.shared) {
            State::Resolved(resolution) => Some(resolution.outcome.clone()),
            State::Pending { .. } => None,
        }
    }

    fn register(&self, callback: Callback) {
        let resolved = {
            let mut state = lock(&self.shared);
            match &mut *state {
                State::Pending { callbacks, .. } => {
                    callbacks.push(callback);
                    return;
                }
                State::Resolved(resolution) => resolution.clone(),
            }
        };
        callback(&resolved);
    }

    /// Observe the outcome without transforming it
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(&InvocationContext, &Command, &Outcome) + Send + 'static,
    {
        self.register(Box::new(move |resolution| {
            let invocation = &resolution.invocation;
            f(invocation.context(), invocation.command(), &resolution.outcome)
        }));
    }

    /// Transform a successful result; errors pass through untouched
    pub fn then_apply<F>(self, f: F) -> InvocationStage
    where
        F: FnOnce(&InvocationContext, &Command, CommandResult) -> Result<CommandResult>
            + Send
            + 'static,
    {
        self.handle(move |ctx, command, outcome| outcome.and_then(|rv| f(ctx, command, rv)))
    }

    /// Transform either branch of the outcome, allowing recovery from errors
    pub fn handle<F>(self, f: F) -> InvocationStage
    where
        F: FnOnce(&InvocationContext, &Command, Outcome) -> Outcome + Send + 'static,
    {
        let derived = Self::unresolved();
        let target = derived.shared.clone();
        self.register(Box::new(move |resolution| {
            let invocation = resolution.invocation.clone();
            let outcome = f(
                invocation.context(),
                invocation.command(),
                resolution.outcome.clone(),
            );
            settle(
                &target,
                Arc::new(Resolution {
                    invocation,
                    outcome,
                }),
            );
        }));
        derived
    }

    /// Continue with another stage produced from this one's outcome
    pub fn then_compose<F>(self, f: F) -> InvocationStage
    where
        F: FnOnce(&Arc<Invocation>, Outcome) -> InvocationStage + Send + 'static,
    {
        let derived = Self::unresolved();
        let target = derived.shared.clone();
        self.register(Box::new(move |resolution| {
            let next = f(&resolution.invocation, resolution.outcome.clone());
            next.register(Box::new(move |inner| settle(&target, inner.clone())));
        }));
        derived
    }
}

impl fmt::Debug for InvocationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationStage")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl Future for InvocationStage {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = lock(&self.shared);
        match &mut *state {
            State::Resolved(resolution) => Poll::Ready(resolution.outcome.clone()),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

/// One-shot resolver for a pending stage
pub struct StageCompleter {
    shared: Option<Shared>,
    invocation: Arc<Invocation>,
}

impl StageCompleter {
    pub fn invocation(&self) -> &Arc<Invocation> {
        &self.invocation
    }

    pub fn complete(mut self, outcome: Outcome) {
        if let Some(shared) = self.shared.take() {
            settle(
                &shared,
                Arc::new(Resolution {
                    invocation: self.invocation.clone(),
                    outcome,
                }),
            );
        }
    }
}

impl Drop for StageCompleter {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            settle(
                &shared,
                Arc::new(Resolution {
                    invocation: self.invocation.clone(),
                    outcome: Err(CacheError::Abandoned),
                }),
            );
        }
    }
}
