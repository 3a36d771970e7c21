//! Caches attaching a table-scoped store never share or alias a table.

use cachepipe::config::{CacheConfig, StoreConfig};
use cachepipe::persistence::{load_snapshot, save_snapshot, TableName};
use cachepipe::{CacheManager, CacheManagerConfig, Value};
use std::sync::Arc;
use tempfile::NamedTempFile;

const PREFIX: &str = "ISPN_STRING_TABLE";

fn store_config() -> CacheConfig {
    CacheConfig::default().with_store(StoreConfig {
        table_prefix: PREFIX.to_string(),
        identifier_quote: "\"".to_string(),
    })
}

fn manager() -> CacheManager {
    let config = CacheManagerConfig::default()
        .with_cache("first", store_config())
        .with_cache("second", store_config());
    CacheManager::new(config)
}

#[tokio::test]
async fn test_named_caches_use_separate_tables() {
    let manager = manager();
    let first = manager.get_cache("first").unwrap();
    let second = manager.get_cache("second").unwrap();

    first.put("k", "1").await.unwrap();
    second.put("other", "2").await.unwrap();

    let first_store = first.container().store().unwrap().clone();
    let second_store = second.container().store().unwrap().clone();
    assert!(first_store.contains_key(&Value::from("k")).unwrap());
    assert!(!first_store.contains_key(&Value::from("other")).unwrap());
    assert!(second_store.contains_key(&Value::from("other")).unwrap());
    assert!(!second_store.contains_key(&Value::from("k")).unwrap());

    assert_eq!(second.get("k").await.unwrap(), None);
    assert_eq!(first.get("other").await.unwrap(), None);

    let first_id = first_store.identifier();
    let second_id = second_store.identifier();
    let bare = format!("\"{}\"", PREFIX);
    assert_ne!(first_id, second_id);
    assert!(!second_id.starts_with(&first_id));
    assert!(!first_id.starts_with(&second_id));
    assert_ne!(first_id, bare);
    assert!(!bare.starts_with(&first_id));

    assert_eq!(
        manager.database().table_identifiers().unwrap(),
        vec![first_id, second_id]
    );
}

#[tokio::test]
async fn test_similar_names_do_not_collide() {
    let config = ["a_b", "a.b", "a__b", "a"]
        .iter()
        .fold(CacheManagerConfig::default(), |c, name| {
            c.with_cache(*name, store_config())
        });
    let manager = CacheManager::new(config);
    for name in ["a_b", "a.b", "a__b", "a"] {
        manager.get_cache(name).unwrap().put("owner", name).await.unwrap();
    }
    for name in ["a_b", "a.b", "a__b", "a"] {
        let cache = manager.get_cache(name).unwrap();
        assert_eq!(cache.container().store().unwrap().size().unwrap(), 1);
        assert_eq!(cache.get("owner").await.unwrap(), Some(Value::from(name)));
    }
    assert_eq!(manager.database().table_identifiers().unwrap().len(), 4);
}

#[tokio::test]
async fn test_store_survives_snapshot_restore() {
    let temp_file = NamedTempFile::new().unwrap();
    {
        let manager = manager();
        manager.get_cache("first").unwrap().put("k", "v").await.unwrap();
        manager.get_cache("second").unwrap();
        save_snapshot(temp_file.path(), manager.database()).unwrap();
    }

    let restored = Arc::new(load_snapshot(temp_file.path()).unwrap());
    assert!(restored
        .table_exists(&TableName::new("\"", PREFIX, "first").unwrap())
        .unwrap());
    let manager = manager().with_database(restored);

    // memory is empty; the value is read through from the restored table
    let first = manager.get_cache("first").unwrap();
    assert_eq!(first.container().size().unwrap(), 0);
    assert_eq!(first.get("k").await.unwrap(), Some(Value::from("v")));
    assert_eq!(manager.get_cache("second").unwrap().get("k").await.unwrap(), None);
}
