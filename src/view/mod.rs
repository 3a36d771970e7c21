//! Lazy, converting views over bulk cache contents.
//!
//! A view never holds elements itself. Each traversal opens a fresh raw
//! traversal from the underlying source and converts elements one by one
//! as they are pulled. Splitting always operates on the raw traversal, so
//! conversion never consumes anything ahead of the consumer.

pub mod stream;

pub use stream::{CacheStream, StreamCloser, StreamPartition};

use crate::command::Value;
use crate::container::{CacheEntry, DefaultEntryFactory, EntryFactory};
use crate::converter::{IdentityConverter, TypeConverter};
use crate::error::{CacheError, Result};
use crate::topology::TopologyProvider;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

/// Traversal traits, mirrored from the raw traversal unchanged
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Characteristics(u8);

impl Characteristics {
    pub const NONE: Characteristics = Characteristics(0);
    /// Safe to traverse while the source is concurrently modified
    pub const CONCURRENT: Characteristics = Characteristics(1);
    /// No element appears twice
    pub const DISTINCT: Characteristics = Characteristics(1 << 1);
    /// No element is absent/null
    pub const NONNULL: Characteristics = Characteristics(1 << 2);
    /// `estimate_size` is exact
    pub const SIZED: Characteristics = Characteristics(1 << 3);

    pub fn contains(self, other: Characteristics) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Characteristics {
    type Output = Characteristics;

    fn bitor(self, rhs: Self) -> Self::Output {
        Characteristics(self.0 | rhs.0)
    }
}

/// Splittable, single-consumer traversal over stored elements.
///
/// Splits hand off disjoint ranges and share the resource of the traversal
/// they were split from; closing the root releases that resource.
pub trait RawTraversal<T>: Send {
    fn next_raw(&mut self) -> Option<T>;

    /// Split off a disjoint part of the remaining elements, if worthwhile
    fn split(&mut self) -> Option<Box<dyn RawTraversal<T>>>;

    fn estimate_size(&self) -> usize;

    fn characteristics(&self) -> Characteristics;

    fn close(&mut self);
}

/// Opens raw traversals over a bulk read result
pub trait TraversalSource<T>: Send + Sync {
    fn open(&self) -> Result<Box<dyn RawTraversal<T>>>;
}

/// Element types a view can convert to the caller representation
pub trait ViewElement: Sized + Send + 'static {
    fn convert(self, converter: &dyn TypeConverter, factory: &dyn EntryFactory) -> Result<Self>;
}

impl ViewElement for Value {
    fn convert(self, converter: &dyn TypeConverter, _factory: &dyn EntryFactory) -> Result<Self> {
        converter.unbox_key(self)
    }
}

impl ViewElement for CacheEntry {
    fn convert(self, converter: &dyn TypeConverter, factory: &dyn EntryFactory) -> Result<Self> {
        let key = converter.unbox_key(self.key().clone())?;
        let value = converter.unbox_value(self.value().clone())?;
        if &key == self.key() && &value == self.value() {
            return Ok(self);
        }
        let lifespan = self.lifespan();
        let max_idle = self.max_idle();
        let (_, _, metadata) = self.into_parts();
        Ok(factory.create(key, value, metadata, lifespan, max_idle))
    }
}

/// Converting view over a key set or entry set
pub struct LazyView<T> {
    source: Arc<dyn TraversalSource<T>>,
    converter: Arc<dyn TypeConverter>,
    entry_factory: Arc<dyn EntryFactory>,
    topology: Option<Arc<dyn TopologyProvider>>,
}

impl<T> Clone for LazyView<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            converter: self.converter.clone(),
            entry_factory: self.entry_factory.clone(),
            topology: self.topology.clone(),
        }
    }
}

impl<T> fmt::Debug for LazyView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyView")
            .field("converter", &self.converter.name())
            .field("distributed", &self.topology.is_some())
            .finish()
    }
}

impl<T: ViewElement> LazyView<T> {
    /// Unconverted view, as produced by the storage layer
    pub fn raw(source: Arc<dyn TraversalSource<T>>) -> Self {
        Self {
            source,
            converter: Arc::new(IdentityConverter),
            entry_factory: Arc::new(DefaultEntryFactory),
            topology: None,
        }
    }

    pub fn builder(source: Arc<dyn TraversalSource<T>>) -> LazyViewBuilder<T> {
        LazyViewBuilder {
            source,
            converter: None,
            entry_factory: None,
            topology: None,
        }
    }

    /// The unconverted source this view reads from
    pub fn source(&self) -> Arc<dyn TraversalSource<T>> {
        self.source.clone()
    }

    pub fn converter(&self) -> &Arc<dyn TypeConverter> {
        &self.converter
    }

    pub fn topology(&self) -> Option<&Arc<dyn TopologyProvider>> {
        self.topology.as_ref()
    }

    /// Sequential traversal yielding converted elements
    pub fn iter(&self) -> Result<ViewIter<T>> {
        Ok(ViewIter {
            raw: Some(self.source.open()?),
            converter: self.converter.clone(),
            entry_factory: self.entry_factory.clone(),
        })
    }

    /// Splittable traversal; size and characteristics are those of the raw
    /// traversal since conversion keeps cardinality and uniqueness
    pub fn split_traversal(&self) -> Result<ConvertingSplit<T>> {
        Ok(ConvertingSplit {
            raw: self.source.open()?,
            converter: self.converter.clone(),
            entry_factory: self.entry_factory.clone(),
            root: true,
            closed: false,
        })
    }

    /// Streaming traversal over the raw traversal, converting lazily
    pub fn stream(&self, parallel: bool) -> Result<CacheStream<T>> {
        let raw = self.source.open()?;
        let parallelism = stream::target_parallelism(self.topology.as_deref());
        Ok(CacheStream::new(
            raw,
            self.converter.clone(),
            self.entry_factory.clone(),
            parallel,
            parallelism,
        ))
    }

    /// Drain a sequential traversal into a vector
    pub fn to_vec(&self) -> Result<Vec<T>> {
        self.iter()?.collect()
    }
}

pub struct LazyViewBuilder<T> {
    source: Arc<dyn TraversalSource<T>>,
    converter: Option<Arc<dyn TypeConverter>>,
    entry_factory: Option<Arc<dyn EntryFactory>>,
    topology: Option<Arc<dyn TopologyProvider>>,
}

impl<T: ViewElement> LazyViewBuilder<T> {
    pub fn converter(mut self, converter: Arc<dyn TypeConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn entry_factory(mut self, entry_factory: Arc<dyn EntryFactory>) -> Self {
        self.entry_factory = Some(entry_factory);
        self
    }

    /// Absent for caches that are not distributed
    pub fn topology(mut self, topology: Option<Arc<dyn TopologyProvider>>) -> Self {
        self.topology = topology;
        self
    }

    pub fn build(self) -> Result<LazyView<T>> {
        let converter = self
            .converter
            .ok_or_else(|| CacheError::MissingComponent("view converter".to_string()))?;
        let entry_factory = self
            .entry_factory
            .ok_or_else(|| CacheError::MissingComponent("view entry factory".to_string()))?;
        Ok(LazyView {
            source: self.source,
            converter,
            entry_factory,
            topology: self.topology,
        })
    }
}

/// Sequential converting iterator; closes its raw traversal once, on
/// `close` or drop
pub struct ViewIter<T> {
    raw: Option<Box<dyn RawTraversal<T>>>,
    converter: Arc<dyn TypeConverter>,
    entry_factory: Arc<dyn EntryFactory>,
}

impl<T> ViewIter<T> {
    pub fn close(&mut self) {
        if let Some(mut raw) = self.raw.take() {
            raw.close();
        }
    }
}

impl<T: ViewElement> Iterator for ViewIter<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let element = self.raw.as_mut()?.next_raw()?;
        Some(element.convert(self.converter.as_ref(), self.entry_factory.as_ref()))
    }
}

impl<T> Drop for ViewIter<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Converting wrapper around a raw splittable traversal
pub struct ConvertingSplit<T> {
    raw: Box<dyn RawTraversal<T>>,
    converter: Arc<dyn TypeConverter>,
    entry_factory: Arc<dyn EntryFactory>,
    root: bool,
    closed: bool,
}

impl<T: ViewElement> ConvertingSplit<T> {
    pub fn try_advance(&mut self) -> Option<Result<T>> {
        if self.closed {
            return None;
        }
        let element = self.raw.next_raw()?;
        Some(element.convert(self.converter.as_ref(), self.entry_factory.as_ref()))
    }

    /// Split off a disjoint part; the part shares this traversal's resource
    pub fn split(&mut self) -> Option<ConvertingSplit<T>> {
        if self.closed {
            return None;
        }
        let raw = self.raw.split()?;
        Some(ConvertingSplit {
            raw,
            converter: self.converter.clone(),
            entry_factory: self.entry_factory.clone(),
            root: false,
            closed: false,
        })
    }

    pub fn estimate_size(&self) -> usize {
        self.raw.estimate_size()
    }

    pub fn characteristics(&self) -> Characteristics {
        self.raw.characteristics()
    }

    /// Closing the root releases the shared resource; closing a split only
    /// stops it
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.root {
            self.raw.close();
        }
    }
}

impl<T: ViewElement> Iterator for ConvertingSplit<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.try_advance()
    }
}

impl<T> Drop for ConvertingSplit<T> {
    fn drop(&mut self) {
        if !self.closed && self.root {
            self.closed = true;
            self.raw.close();
        }
    }
}
