//! Boxes caller data into the stored representation on the way down and
//! unboxes results on the way back up.
//!
//! Only locally originated invocations are converted: a command forwarded
//! by another member already carries stored-representation data, and its
//! result goes back to that member in the same representation.

use super::{fail, Interceptor, Next};
use crate::command::{
    Command, EntrySetCommand, GetAllCommand, GetCommand, GetEntryCommand, KeySetCommand,
    PutCommand, PutMapCommand, RemoveCommand, ReplaceCommand,
};
use crate::container::{CacheEntry, EntryFactory, VersionGenerator};
use crate::converter::{ConverterRegistry, TypeConverter};
use crate::error::{CacheError, Result};
use crate::invocation::{CommandResult, InvocationContext, InvocationStage};
use crate::topology::TopologyProvider;
use crate::view::LazyView;
use std::sync::Arc;
use tracing::trace;

/// Evaluate a boxing step, or fail the invocation with the untouched command
macro_rules! box_or_fail {
    ($ctx:expr, $command:expr, $boxed:expr) => {
        match $boxed {
            Ok(value) => value,
            Err(e) => return fail($ctx, $command.into(), e),
        }
    };
}

/// Unbox a single-value result. Only a value or nothing is expected here.
fn unbox_value_result(converter: &dyn TypeConverter, rv: CommandResult) -> Result<CommandResult> {
    match rv {
        CommandResult::Value(v) => Ok(CommandResult::Value(converter.unbox_value(v)?)),
        CommandResult::Nothing => Ok(CommandResult::Nothing),
        other => Err(CacheError::Conversion(format!(
            "cannot unbox {} result",
            other.variant_name()
        ))),
    }
}

pub struct TypeConverterInterceptor {
    registry: ConverterRegistry,
    entry_factory: Arc<dyn EntryFactory>,
    version_generator: Arc<dyn VersionGenerator>,
    topology: Option<Arc<dyn TopologyProvider>>,
}

impl TypeConverterInterceptor {
    pub fn builder() -> TypeConverterInterceptorBuilder {
        TypeConverterInterceptorBuilder::default()
    }

    fn converter_for(&self, command_flags: &crate::command::Flags) -> Arc<dyn TypeConverter> {
        self.registry.select(command_flags)
    }

    fn rebuild_entry(
        factory: &dyn EntryFactory,
        converter: &dyn TypeConverter,
        entry: CacheEntry,
    ) -> Result<CacheEntry> {
        let key = converter.unbox_key(entry.key().clone())?;
        let value = converter.unbox_value(entry.value().clone())?;
        Ok(factory.create(
            key,
            value,
            entry.metadata().clone(),
            entry.lifespan(),
            entry.max_idle(),
        ))
    }
}

impl Interceptor for TypeConverterInterceptor {
    fn name(&self) -> &'static str {
        "type_converter"
    }

    fn visit_put(
        &self,
        ctx: &Arc<InvocationContext>,
        mut command: PutCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        if !ctx.is_origin_local() {
            return next.invoke(ctx, command.into());
        }
        let converter = self.converter_for(&command.flags);
        trace!("boxing put with {} converter", converter.name());
        let key = box_or_fail!(ctx, command, converter.box_key(command.key.clone()));
        let value = box_or_fail!(ctx, command, converter.box_value(command.value.clone()));
        command.key = key;
        command.value = value;

        next.invoke(ctx, command.into())
            .then_apply(move |_, _, rv| unbox_value_result(converter.as_ref(), rv))
    }

    fn visit_put_map(
        &self,
        ctx: &Arc<InvocationContext>,
        mut command: PutMapCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        if ctx.is_origin_local() {
            let converter = self.converter_for(&command.flags);
            let boxed: Result<Vec<_>> = command
                .map
                .iter()
                .map(|(k, v)| Ok((converter.box_key(k.clone())?, converter.box_value(v.clone())?)))
                .collect();
            command.map = box_or_fail!(ctx, command, boxed);
        }
        // bulk writes return nothing to convert
        next.invoke(ctx, command.into())
    }

    fn visit_get(
        &self,
        ctx: &Arc<InvocationContext>,
        mut command: GetCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        if !ctx.is_origin_local() {
            return next.invoke(ctx, command.into());
        }
        let converter = self.converter_for(&command.flags);
        command.key = box_or_fail!(ctx, command, converter.box_key(command.key.clone()));

        next.invoke(ctx, command.into())
            .then_apply(move |_, _, rv| unbox_value_result(converter.as_ref(), rv))
    }

    fn visit_get_entry(
        &self,
        ctx: &Arc<InvocationContext>,
        mut command: GetEntryCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        if !ctx.is_origin_local() {
            return next.invoke(ctx, command.into());
        }
        let converter = self.converter_for(&command.flags);
        command.key = box_or_fail!(ctx, command, converter.box_key(command.key.clone()));

        let factory = self.entry_factory.clone();
        next.invoke(ctx, command.into())
            .then_apply(move |_, _, rv| match rv {
                // never hand out the entry the lower layer returned
                CommandResult::Entry(entry) => Ok(CommandResult::Entry(Self::rebuild_entry(
                    factory.as_ref(),
                    converter.as_ref(),
                    entry,
                )?)),
                other => Ok(other),
            })
    }

    fn visit_get_all(
        &self,
        ctx: &Arc<InvocationContext>,
        mut command: GetAllCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        if !ctx.is_origin_local() {
            return next.invoke(ctx, command.into());
        }
        let converter = self.converter_for(&command.flags);
        let boxed: Result<Vec<_>> = command
            .keys
            .iter()
            .map(|k| converter.box_key(k.clone()))
            .collect();
        command.keys = box_or_fail!(ctx, command, boxed);

        let factory = self.entry_factory.clone();
        next.invoke(ctx, command.into())
            .then_apply(move |_, command, rv| match rv {
                CommandResult::Entries(entries) => {
                    let remotely_fetched = match command {
                        Command::GetAll(c) => &c.remotely_fetched,
                        other => {
                            return Err(CacheError::InvalidCommand(format!(
                                "get_all result for {} command",
                                other.kind()
                            )))
                        }
                    };
                    let mut unboxed = Vec::with_capacity(entries.len());
                    for (key, entry) in entries {
                        let entry = match entry {
                            None => None,
                            // already in caller representation
                            Some(entry) if remotely_fetched.contains(&key) => Some(entry),
                            Some(entry) => Some(Self::rebuild_entry(
                                factory.as_ref(),
                                converter.as_ref(),
                                entry,
                            )?),
                        };
                        unboxed.push((converter.unbox_key(key)?, entry));
                    }
                    Ok(CommandResult::Entries(unboxed))
                }
                CommandResult::Values(values) => {
                    let mut unboxed = Vec::with_capacity(values.len());
                    for (key, value) in values {
                        let value = value.map(|v| converter.unbox_value(v)).transpose()?;
                        unboxed.push((converter.unbox_key(key)?, value));
                    }
                    Ok(CommandResult::Values(unboxed))
                }
                other => Ok(other),
            })
    }

    fn visit_replace(
        &self,
        ctx: &Arc<InvocationContext>,
        mut command: ReplaceCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        if !ctx.is_origin_local() {
            return next.invoke(ctx, command.into());
        }
        let converter = self.converter_for(&command.flags);
        let conditional = command.old_value.is_some();
        let key = box_or_fail!(ctx, command, converter.box_key(command.key.clone()));
        let old_value = box_or_fail!(
            ctx,
            command,
            command
                .old_value
                .clone()
                .map(|v| converter.box_value(v))
                .transpose()
        );
        let new_value = box_or_fail!(ctx, command, converter.box_value(command.new_value.clone()));
        command.key = key;
        command.old_value = old_value;
        command.new_value = new_value;
        if command.metadata.version().is_none() {
            command.metadata = command.metadata.with_version(self.version_generator.next());
        }

        next.invoke(ctx, command.into())
            .then_apply(move |_, _, rv| match rv {
                // a conditional replace answers with success, not a stored value
                CommandResult::Bool(_) if conditional => Ok(rv),
                rv => unbox_value_result(converter.as_ref(), rv),
            })
    }

    fn visit_remove(
        &self,
        ctx: &Arc<InvocationContext>,
        mut command: RemoveCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        if !ctx.is_origin_local() {
            return next.invoke(ctx, command.into());
        }
        let converter = self.converter_for(&command.flags);
        let conditional = command.value.is_some();
        let key = box_or_fail!(ctx, command, converter.box_key(command.key.clone()));
        let value = box_or_fail!(
            ctx,
            command,
            command
                .value
                .clone()
                .map(|v| converter.box_value(v))
                .transpose()
        );
        command.key = key;
        command.value = value;

        next.invoke(ctx, command.into())
            .then_apply(move |_, _, rv| match rv {
                CommandResult::Bool(_) if conditional => Ok(rv),
                rv => unbox_value_result(converter.as_ref(), rv),
            })
    }

    fn visit_key_set(
        &self,
        ctx: &Arc<InvocationContext>,
        command: KeySetCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        if !ctx.is_origin_local() {
            return next.invoke(ctx, command.into());
        }
        let converter = self.converter_for(&command.flags);
        let factory = self.entry_factory.clone();
        let topology = self.topology.clone();
        next.invoke(ctx, command.into())
            .then_apply(move |_, _, rv| match rv {
                CommandResult::KeySet(raw) => Ok(CommandResult::KeySet(
                    LazyView::builder(raw.source())
                        .converter(converter)
                        .entry_factory(factory)
                        .topology(topology)
                        .build()?,
                )),
                other => Ok(other),
            })
    }

    fn visit_entry_set(
        &self,
        ctx: &Arc<InvocationContext>,
        command: EntrySetCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        if !ctx.is_origin_local() {
            return next.invoke(ctx, command.into());
        }
        let registry = self.registry.clone();
        let factory = self.entry_factory.clone();
        let topology = self.topology.clone();
        next.invoke(ctx, command.into())
            .then_apply(move |_, command, rv| match rv {
                CommandResult::EntrySet(raw) => Ok(CommandResult::EntrySet(
                    LazyView::builder(raw.source())
                        .converter(registry.select(command.flags()))
                        .entry_factory(factory)
                        .topology(topology)
                        .build()?,
                )),
                other => Ok(other),
            })
    }
}

#[derive(Default)]
pub struct TypeConverterInterceptorBuilder {
    registry: Option<ConverterRegistry>,
    entry_factory: Option<Arc<dyn EntryFactory>>,
    version_generator: Option<Arc<dyn VersionGenerator>>,
    topology: Option<Arc<dyn TopologyProvider>>,
}

impl TypeConverterInterceptorBuilder {
    pub fn registry(mut self, registry: ConverterRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Shorthand for a registry with a single default converter
    pub fn converter(self, converter: Arc<dyn TypeConverter>) -> Self {
        self.registry(ConverterRegistry::new(converter))
    }

    pub fn entry_factory(mut self, entry_factory: Arc<dyn EntryFactory>) -> Self {
        self.entry_factory = Some(entry_factory);
        self
    }

    pub fn version_generator(mut self, version_generator: Arc<dyn VersionGenerator>) -> Self {
        self.version_generator = Some(version_generator);
        self
    }

    pub fn topology(mut self, topology: Option<Arc<dyn TopologyProvider>>) -> Self {
        self.topology = topology;
        self
    }

    pub fn build(self) -> Result<TypeConverterInterceptor> {
        let entry_factory = self
            .entry_factory
            .ok_or_else(|| CacheError::MissingComponent("entry factory".to_string()))?;
        let version_generator = self
            .version_generator
            .ok_or_else(|| CacheError::MissingComponent("version generator".to_string()))?;
        Ok(TypeConverterInterceptor {
            registry: self.registry.unwrap_or_default(),
            entry_factory,
            version_generator,
            topology: self.topology,
        })
    }
}
