use super::{Characteristics, RawTraversal, ViewElement};
use crate::container::EntryFactory;
use crate::converter::TypeConverter;
use crate::error::Result;
use crate::topology::TopologyProvider;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

type CloseHook = Box<dyn FnOnce() + Send>;

/// Runs its hooks exactly once, whichever thread closes first
struct CloseOnce {
    closed: AtomicBool,
    hooks: Mutex<Vec<CloseHook>>,
}

impl CloseOnce {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn add(&self, hook: CloseHook) {
        {
            let mut hooks = self
                .hooks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !self.is_closed() {
                hooks.push(hook);
                return;
            }
        }
        hook();
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let hooks = std::mem::take(
            &mut *self
                .hooks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for hook in hooks {
            hook();
        }
    }
}

/// Number of partitions a parallel stream is cut into: one per member of
/// the current topology (capped by its segment count), or one per CPU when
/// the cache is not distributed.
pub(crate) fn target_parallelism(topology: Option<&dyn TopologyProvider>) -> usize {
    match topology.and_then(|t| t.current_topology()) {
        Some(ch) => ch.members().len().clamp(1, ch.num_segments()),
        None => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    }
}

type SharedRaw<T> = Arc<Mutex<Box<dyn RawTraversal<T>>>>;

fn lock_raw<T>(raw: &SharedRaw<T>) -> MutexGuard<'_, Box<dyn RawTraversal<T>>> {
    raw.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Lazily converting stream over a raw traversal.
///
/// Closing the stream (explicitly, through a `StreamCloser`, or by drop)
/// closes the raw traversal exactly once.
pub struct CacheStream<T> {
    root: SharedRaw<T>,
    converter: Arc<dyn TypeConverter>,
    entry_factory: Arc<dyn EntryFactory>,
    parallel: bool,
    parallelism: usize,
    closer: Arc<CloseOnce>,
}

impl<T: ViewElement> CacheStream<T> {
    pub(crate) fn new(
        raw: Box<dyn RawTraversal<T>>,
        converter: Arc<dyn TypeConverter>,
        entry_factory: Arc<dyn EntryFactory>,
        parallel: bool,
        parallelism: usize,
    ) -> Self {
        let root: SharedRaw<T> = Arc::new(Mutex::new(raw));
        let closer = Arc::new(CloseOnce {
            closed: AtomicBool::new(false),
            hooks: Mutex::new(Vec::new()),
        });
        let raw_for_close = root.clone();
        closer.add(Box::new(move || {
            trace!("closing raw traversal");
            lock_raw(&raw_for_close).close();
        }));
        Self {
            root,
            converter,
            entry_factory,
            parallel,
            parallelism: parallelism.max(1),
            closer,
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn parallelism(&self) -> usize {
        if self.parallel {
            self.parallelism
        } else {
            1
        }
    }

    pub fn estimate_size(&self) -> usize {
        lock_raw(&self.root).estimate_size()
    }

    pub fn characteristics(&self) -> Characteristics {
        lock_raw(&self.root).characteristics()
    }

    /// Run `hook` when the stream closes; runs now if already closed
    pub fn on_close<F>(self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.closer.add(Box::new(hook));
        self
    }

    /// Handle that can close this stream from any thread
    pub fn closer(&self) -> StreamCloser {
        StreamCloser {
            inner: self.closer.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    pub fn close(&self) {
        self.closer.close();
    }

    /// Cut disjoint partitions off the raw traversal for parallel consumers.
    ///
    /// The stream itself keeps the remainder, so the partitions plus the
    /// stream cover every element exactly once. A sequential stream is
    /// never partitioned.
    pub fn partitions(&mut self) -> Vec<StreamPartition<T>> {
        if !self.parallel || self.closer.is_closed() {
            return Vec::new();
        }

        let mut root = lock_raw(&self.root);
        let mut parts: Vec<Box<dyn RawTraversal<T>>> = Vec::new();
        // breadth-first so partitions end up roughly even
        loop {
            let mut progressed = false;
            if parts.len() + 1 < self.parallelism {
                if let Some(part) = root.split() {
                    parts.push(part);
                    progressed = true;
                }
            }
            let mut i = 0;
            while i < parts.len() && parts.len() + 1 < self.parallelism {
                if let Some(part) = parts[i].split() {
                    parts.push(part);
                    progressed = true;
                }
                i += 1;
            }
            if !progressed || parts.len() + 1 >= self.parallelism {
                break;
            }
        }
        debug!(
            "split stream into {} partitions (target {})",
            parts.len() + 1,
            self.parallelism
        );

        parts
            .into_iter()
            .map(|raw| StreamPartition {
                raw,
                converter: self.converter.clone(),
                entry_factory: self.entry_factory.clone(),
                closer: self.closer.clone(),
            })
            .collect()
    }
}

impl<T: ViewElement> Iterator for CacheStream<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closer.is_closed() {
            return None;
        }
        let element = lock_raw(&self.root).next_raw()?;
        Some(element.convert(self.converter.as_ref(), self.entry_factory.as_ref()))
    }
}

impl<T> Drop for CacheStream<T> {
    fn drop(&mut self) {
        self.closer.close();
    }
}

/// Disjoint piece of a parallel stream, consumable on another thread.
/// Stops yielding once the owning stream is closed.
pub struct StreamPartition<T> {
    raw: Box<dyn RawTraversal<T>>,
    converter: Arc<dyn TypeConverter>,
    entry_factory: Arc<dyn EntryFactory>,
    closer: Arc<CloseOnce>,
}

impl<T: ViewElement> StreamPartition<T> {
    pub fn estimate_size(&self) -> usize {
        self.raw.estimate_size()
    }
}

impl<T: ViewElement> Iterator for StreamPartition<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closer.is_closed() {
            return None;
        }
        let element = self.raw.next_raw()?;
        Some(element.convert(self.converter.as_ref(), self.entry_factory.as_ref()))
    }
}

/// Cloneable close handle for a `CacheStream`
#[derive(Clone)]
pub struct StreamCloser {
    inner: Arc<CloseOnce>,
}

impl StreamCloser {
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
