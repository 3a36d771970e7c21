//! End-to-end tests of the invocation pipeline: conversion at the
//! local-origin boundary, conditional results, bulk reads and lazy views.

use cachepipe::command::{GetAllCommand, Metadata};
use cachepipe::config::CacheConfig;
use cachepipe::container::{DefaultEntryFactory, EntryFactory, NumericVersionGenerator};
use cachepipe::converter::{ConverterKind, TypeConverter, Utf8Converter};
use cachepipe::interceptor::{CommandExecutor, Interceptor, Next, TypeConverterInterceptor};
use cachepipe::invocation::{CommandResult, InvocationContext, InvocationStage};
use cachepipe::{
    CacheError, CacheManager, CacheManagerConfig, Command, DataContainer, InterceptorChain, Value,
};
use std::sync::Arc;

fn bytes(s: &str) -> Value {
    Value::from(s.as_bytes().to_vec())
}

fn utf8_manager() -> CacheManager {
    let config = CacheManagerConfig::default()
        .with_cache("text", CacheConfig::default().with_converter(ConverterKind::Utf8));
    CacheManager::new(config)
}

#[tokio::test]
async fn test_independent_caches() {
    let manager = CacheManager::new(CacheManagerConfig::default());
    let a = manager.get_cache("a").unwrap();
    let b = manager.get_cache("b").unwrap();

    assert_eq!(a.put("k", "v").await.unwrap(), None);
    assert_eq!(a.get("k").await.unwrap(), Some(Value::from("v")));
    assert_eq!(b.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_conditional_replace_returns_boolean() {
    let manager = utf8_manager();
    let cache = manager.get_cache("text").unwrap();
    cache.put("k", "old").await.unwrap();

    assert!(cache.replace_if("k", "old", "new").await.unwrap());
    assert!(!cache.replace_if("k", "old", "newer").await.unwrap());
    assert_eq!(cache.get("k").await.unwrap(), Some(Value::from("new")));

    assert_eq!(cache.replace("k", "plain").await.unwrap(), Some(Value::from("new")));
    assert!(!cache.remove_if("k", "new").await.unwrap());
    assert!(cache.remove_if("k", "plain").await.unwrap());
    assert_eq!(cache.remove("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_values_are_stored_boxed() {
    let manager = utf8_manager();
    let cache = manager.get_cache("text").unwrap();
    cache.put("k", "v").await.unwrap();

    // the container below the converter only ever sees the stored form
    let raw = cache
        .container()
        .execute(&Arc::new(InvocationContext::local()), Command::key_set())
        .await
        .unwrap();
    match raw {
        CommandResult::KeySet(view) => assert_eq!(view.to_vec().unwrap(), vec![bytes("k")]),
        other => panic!("unexpected result {:?}", other),
    }

    let err = cache.put(1i64, "v").await.unwrap_err();
    assert!(matches!(err, CacheError::Conversion(_)));
}

#[tokio::test]
async fn test_remote_origin_is_not_converted() {
    let manager = utf8_manager();
    let cache = manager.get_cache("text").unwrap();

    // a peer forwards data that is already in stored form
    let stage = cache.invoke(
        InvocationContext::remote("node-2"),
        Command::put(bytes("k"), bytes("v")),
    );
    assert!(stage.await.unwrap().is_nothing());
    assert_eq!(cache.get("k").await.unwrap(), Some(Value::from("v")));

    match cache
        .invoke(InvocationContext::remote("node-2"), Command::get(bytes("k")))
        .await
        .unwrap()
    {
        CommandResult::Value(v) => assert_eq!(v, bytes("v")),
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn test_get_entry_does_not_alias_storage() {
    let manager = utf8_manager();
    let cache = manager.get_cache("text").unwrap();
    cache.put("k", "v").await.unwrap();

    let entry = cache.get_entry("k").await.unwrap().unwrap();
    assert_eq!(entry.key(), &Value::from("k"));
    assert_eq!(entry.value(), &Value::from("v"));
    let _changed = entry.with_value(Value::from("changed"));

    let again = cache.get_entry("k").await.unwrap().unwrap();
    assert_eq!(again.value(), &Value::from("v"));
}

#[tokio::test]
async fn test_get_all_in_request_order() {
    let manager = utf8_manager();
    let cache = manager.get_cache("text").unwrap();
    cache
        .put_all(vec![
            (Value::from("a"), Value::from("1")),
            (Value::from("b"), Value::from("2")),
        ])
        .await
        .unwrap();

    let values = cache
        .get_all(vec![Value::from("b"), Value::from("missing"), Value::from("a")])
        .await
        .unwrap();
    assert_eq!(
        values,
        vec![
            (Value::from("b"), Some(Value::from("2"))),
            (Value::from("missing"), None),
            (Value::from("a"), Some(Value::from("1"))),
        ]
    );

    let entries = cache
        .get_all_entries(vec![Value::from("a")])
        .await
        .unwrap();
    assert_eq!(entries[0].1.as_ref().unwrap().value(), &Value::from("1"));
}

/// Stands in for the distribution layer: claims `k2` was fetched from a
/// peer and answers it with an entry already in caller form
struct RemoteFetch;

impl Interceptor for RemoteFetch {
    fn name(&self) -> &'static str {
        "remote_fetch"
    }

    fn visit_get_all(
        &self,
        ctx: &Arc<InvocationContext>,
        mut command: GetAllCommand,
        next: Next<'_>,
    ) -> InvocationStage {
        command.remotely_fetched.insert(bytes("k2"));
        next.invoke(ctx, command.into()).then_apply(|_, _, rv| match rv {
            CommandResult::Entries(entries) => Ok(CommandResult::Entries(
                entries
                    .into_iter()
                    .map(|(key, entry)| {
                        if key == bytes("k2") {
                            let remote = DefaultEntryFactory.create_from_metadata(
                                Value::from("k2"),
                                Value::from("from-peer"),
                                Metadata::new(),
                            );
                            (key, Some(remote))
                        } else {
                            (key, entry)
                        }
                    })
                    .collect(),
            )),
            other => Ok(other),
        })
    }
}

#[test]
fn test_get_all_remote_fetched_entries_pass_through() {
    let converter = TypeConverterInterceptor::builder()
        .converter(Arc::new(Utf8Converter))
        .entry_factory(Arc::new(DefaultEntryFactory))
        .version_generator(Arc::new(NumericVersionGenerator::new()))
        .build()
        .unwrap();
    let container = Arc::new(DataContainer::new("mixed", Arc::new(DefaultEntryFactory)));
    let chain = InterceptorChain::builder()
        .type_converter(Arc::new(converter))
        .add(Arc::new(RemoteFetch))
        .terminal(container)
        .build()
        .unwrap();

    chain
        .invoke(InvocationContext::local(), Command::put("k1", "local"))
        .try_outcome()
        .unwrap()
        .unwrap();

    let rv = chain
        .invoke(
            InvocationContext::local(),
            Command::get_all(vec![Value::from("k1"), Value::from("k2")], true),
        )
        .try_outcome()
        .unwrap()
        .unwrap();
    let entries = match rv {
        CommandResult::Entries(entries) => entries,
        other => panic!("unexpected result {:?}", other),
    };

    assert_eq!(entries[0].0, Value::from("k1"));
    let local = entries[0].1.as_ref().unwrap();
    assert_eq!(local.key(), &Value::from("k1"));
    assert_eq!(local.value(), &Value::from("local"));

    // returned exactly as received; unboxing it would have failed on a string
    assert_eq!(entries[1].0, Value::from("k2"));
    let remote = entries[1].1.as_ref().unwrap();
    assert_eq!(remote.value(), &Value::from("from-peer"));
    assert!(Utf8Converter.unbox_value(remote.value().clone()).is_err());
}

#[tokio::test]
async fn test_key_and_entry_views_are_unboxed() {
    let manager = utf8_manager();
    let cache = manager.get_cache("text").unwrap();
    for k in ["a", "b", "c"] {
        cache.put(k, format!("v-{}", k)).await.unwrap();
    }

    let mut keys = cache.key_set().await.unwrap().to_vec().unwrap();
    keys.sort();
    assert_eq!(keys, vec![Value::from("a"), Value::from("b"), Value::from("c")]);

    let entries = cache.entry_set().await.unwrap().to_vec().unwrap();
    assert_eq!(entries.len(), 3);
    for entry in entries {
        let key = entry.key().as_str().unwrap().to_string();
        assert_eq!(entry.value(), &Value::from(format!("v-{}", key)));
    }
    assert_eq!(cache.container().open_traversals(), 0);
}

#[tokio::test]
async fn test_stream_close_releases_resource_once() {
    let manager = utf8_manager();
    let cache = manager.get_cache("text").unwrap();
    for i in 0..10 {
        cache.put(format!("k{}", i), "v").await.unwrap();
    }

    let view = cache.key_set().await.unwrap();
    let mut stream = view.stream(true).unwrap();
    assert_eq!(cache.container().open_traversals(), 1);

    let first = stream.next().unwrap().unwrap();
    assert!(first.as_str().unwrap().starts_with('k'));

    let closer = stream.closer();
    std::thread::scope(|s| {
        for _ in 0..4 {
            let closer = closer.clone();
            s.spawn(move || closer.close());
        }
    });
    stream.close();
    assert_eq!(cache.container().open_traversals(), 0);
    assert!(stream.next().is_none());
    drop(stream);
    assert_eq!(cache.container().open_traversals(), 0);
}

#[tokio::test]
async fn test_stats_see_boxed_traffic() {
    let manager = utf8_manager();
    let cache = manager.get_cache("text").unwrap();
    cache.put("k", "v").await.unwrap();
    cache.get("k").await.unwrap();
    cache.get("nope").await.unwrap();
    let _ = cache.put(3i64, "v").await;

    let stats = cache.stats().unwrap();
    assert_eq!(stats.stores, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    // the failed put never got past the converter
    assert_eq!(stats.failures, 0);
}
