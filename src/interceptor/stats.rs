//! Hit/miss/store statistics, recorded as outcomes come back up the chain.

use super::{Interceptor, Next};
use crate::command::{
    Command, Flag, GetAllCommand, GetCommand, GetEntryCommand, PutCommand, PutMapCommand,
    RemoveCommand, ReplaceCommand,
};
use crate::invocation::{CommandResult, InvocationContext, InvocationStage, Outcome};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Atomic counter
#[derive(Debug, Default)]
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct Counters {
    stores: Counter,
    hits: Counter,
    misses: Counter,
    remove_hits: Counter,
    remove_misses: Counter,
    failures: Counter,
}

impl Counters {
    fn record(&self, command: &Command, outcome: &Outcome) {
        let rv = match outcome {
            Ok(rv) => rv,
            Err(_) => {
                self.failures.inc();
                return;
            }
        };
        match (command, rv) {
            (Command::Put(_), _) => self.stores.inc(),
            (Command::PutMap(c), _) => self.stores.inc_by(c.map.len() as u64),
            (Command::Get(_) | Command::GetEntry(_), CommandResult::Nothing) => self.misses.inc(),
            (Command::Get(_) | Command::GetEntry(_), _) => self.hits.inc(),
            (Command::GetAll(_), CommandResult::Values(values)) => {
                for (_, value) in values {
                    self.hit_or_miss(value.is_some());
                }
            }
            (Command::GetAll(_), CommandResult::Entries(entries)) => {
                for (_, entry) in entries {
                    self.hit_or_miss(entry.is_some());
                }
            }
            (Command::Replace(_), CommandResult::Bool(true) | CommandResult::Value(_)) => {
                self.stores.inc()
            }
            (Command::Remove(_), CommandResult::Bool(true) | CommandResult::Value(_)) => {
                self.remove_hits.inc()
            }
            (Command::Remove(_), _) => self.remove_misses.inc(),
            _ => {}
        }
    }

    fn hit_or_miss(&self, hit: bool) {
        if hit {
            self.hits.inc();
        } else {
            self.misses.inc();
        }
    }
}

/// Point-in-time copy of a cache's statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub stores: u64,
    pub hits: u64,
    pub misses: u64,
    pub remove_hits: u64,
    pub remove_misses: u64,
    /// Invocations that resolved to an error
    pub failures: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let reads = self.hits + self.misses;
        if reads == 0 {
            0.0
        } else {
            self.hits as f64 / reads as f64
        }
    }
}

/// Counts reads, writes and removals unless the command carries
/// `Flag::SkipStatistics`
#[derive(Debug, Default)]
pub struct StatsInterceptor {
    counters: Arc<Counters>,
}

impl StatsInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            stores: c.stores.get(),
            hits: c.hits.get(),
            misses: c.misses.get(),
            remove_hits: c.remove_hits.get(),
            remove_misses: c.remove_misses.get(),
            failures: c.failures.get(),
        }
    }

    pub fn reset(&self) {
        let c = &self.counters;
        for counter in [
            &c.stores,
            &c.hits,
            &c.misses,
            &c.remove_hits,
            &c.remove_misses,
            &c.failures,
        ] {
            counter.reset();
        }
    }

    fn observe(&self, ctx: &Arc<InvocationContext>, command: Command, next: Next<'_>) -> InvocationStage {
        if command.has_flag(Flag::SkipStatistics) {
            return next.invoke(ctx, command);
        }
        let counters = self.counters.clone();
        let stage = next.invoke(ctx, command);
        stage.on_complete(move |_, command, outcome| counters.record(command, outcome));
        stage
    }
}

impl Interceptor for StatsInterceptor {
    fn name(&self) -> &'static str {
        "stats"
    }

    fn visit_put(&self, ctx: &Arc<InvocationContext>, command: PutCommand, next: Next<'_>) -> InvocationStage {
        self.observe(ctx, command.into(), next)
    }

    fn visit_put_map(
        &self,
        ctx: &Arc<InvocationContext>,
        command: PutMapCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        self.observe(ctx, command.into(), next)
    }

    fn visit_get(&self, ctx: &Arc<InvocationContext>, command: GetCommand, next: Next<'_>) -> InvocationStage {
        self.observe(ctx, command.into(), next)
    }

    fn visit_get_entry(
        &self,
        ctx: &Arc<InvocationContext>,
        command: GetEntryCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        self.observe(ctx, command.into(), next)
    }

    fn visit_get_all(
        &self,
        ctx: &Arc<InvocationContext>,
        command: GetAllCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        self.observe(ctx, command.into(), next)
    }

    fn visit_replace(
        &self,
        ctx: &Arc<InvocationContext>,
        command: ReplaceCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        self.observe(ctx, command.into(), next)
    }

    fn visit_remove(
        &self,
        ctx: &Arc<InvocationContext>,
        command: RemoveCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        self.observe(ctx, command.into(), next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Value;
    use crate::container::{DataContainer, DefaultEntryFactory};
    use crate::interceptor::InterceptorChain;

    fn setup() -> (Arc<StatsInterceptor>, InterceptorChain) {
        let stats = Arc::new(StatsInterceptor::new());
        let chain = InterceptorChain::builder()
            .add(stats.clone())
            .terminal(Arc::new(DataContainer::new("stats", Arc::new(DefaultEntryFactory))))
            .build()
            .unwrap();
        (stats, chain)
    }

    fn run(chain: &InterceptorChain, command: Command) {
        chain
            .invoke(InvocationContext::local(), command)
            .try_outcome()
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_counts() {
        let (stats, chain) = setup();
        run(&chain, Command::put("a", "1"));
        run(&chain, Command::put_map(vec![
            (Value::from("b"), Value::from("2")),
            (Value::from("c"), Value::from("3")),
        ]));
        run(&chain, Command::get("a"));
        run(&chain, Command::get_entry("missing"));
        run(&chain, Command::get_all(vec![Value::from("b"), Value::from("x")], false));
        run(&chain, Command::replace_if("a", "1", "10"));
        run(&chain, Command::remove_if("b", "nope"));
        run(&chain, Command::remove("c"));

        assert_eq!(
            stats.stats(),
            CacheStats {
                stores: 4,
                hits: 2,
                misses: 2,
                remove_hits: 1,
                remove_misses: 1,
                failures: 0,
            }
        );
        assert_eq!(stats.stats().hit_ratio(), 0.5);

        stats.reset();
        assert_eq!(stats.stats(), CacheStats::default());
    }

    #[test]
    fn test_skip_statistics() {
        let (stats, chain) = setup();
        run(&chain, Command::put("a", "1").with_flag(Flag::SkipStatistics));
        run(&chain, Command::get("a").with_flag(Flag::SkipStatistics));
        assert_eq!(stats.stats(), CacheStats::default());
    }
}
