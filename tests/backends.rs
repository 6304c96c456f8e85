use hilcat::store::discrete_files::{DiscreteFileStore, FileFormat};
use hilcat::store::memory::MemoryStore;
use hilcat::store::relational::sqlite::SqliteExecutor;
use hilcat::store::relational::RelationalStore;
use hilcat::store::tiered::TieredStore;
use hilcat::{CacheError, CacheStoreStrategy, ManagedCache, ScopeConfig};
use proptest::prelude::*;
use serde_json::{json, Value};

fn generic_caches(dir: &tempfile::TempDir) -> Vec<ManagedCache> {
    let json_files = DiscreteFileStore::new(dir.path().join("json"), FileFormat::Json).unwrap();
    let bincode_files = DiscreteFileStore::new(dir.path().join("bin"), FileFormat::Bincode)
        .unwrap()
        .with_suffix(".bin");
    vec![
        ManagedCache::new(Box::new(MemoryStore::new())),
        ManagedCache::new(Box::new(json_files)),
        ManagedCache::new(Box::new(bincode_files)),
    ]
}

#[test]
fn memory_cache_scenario() {
    let cache = ManagedCache::from_descriptor("memory://").unwrap();
    cache.set("one", json!(1), None).unwrap();

    assert_eq!(cache.fetch("one", None).unwrap(), Some(json!(1)));
    assert_eq!(cache.fetch_or("two", json!(0), None).unwrap(), json!(0));
}

#[test]
fn absent_keys_behave_alike_on_every_backend() {
    let dir = tempfile::tempdir().unwrap();
    for cache in generic_caches(&dir) {
        assert!(!cache.exists("missing", Some("s")).unwrap(), "{}", cache.kind());
        assert_eq!(cache.fetch_or("missing", json!("D"), Some("s")).unwrap(), json!("D"));
        assert_eq!(cache.pop("missing", Some("s")).unwrap(), None);
    }
}

#[test]
fn scopes_partition_every_backend() {
    let dir = tempfile::tempdir().unwrap();
    for cache in generic_caches(&dir) {
        cache.set("k", json!({"in": "a"}), Some("a")).unwrap();
        cache.set("k", json!({"in": "b"}), Some("b")).unwrap();

        assert_eq!(cache.fetch("k", Some("a")).unwrap(), Some(json!({"in": "a"})));
        assert_eq!(cache.keys(Some("b")).unwrap(), vec!["k".to_string()]);
        let mut scopes = cache.scopes().unwrap();
        scopes.sort();
        assert_eq!(scopes, vec!["a".to_string(), "b".to_string()], "{}", cache.kind());
    }
}

#[test]
fn sqlite_coerces_declared_columns() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let config = ScopeConfig::new("a", "id", ["id", "name", "count"])
        .unwrap()
        .with_column_type("count", hilcat::ColumnType::Integer)
        .unwrap();

    let store = RelationalStore::new(Box::new(SqliteExecutor::open(&path).unwrap()), vec![config.clone()]).unwrap();
    let cache = ManagedCache::new(Box::new(store));
    cache
        .set("a", json!({"id": "a", "name": "x", "count": "5"}), Some("a"))
        .unwrap();
    assert_eq!(cache.fetch("a", Some("a")).unwrap().unwrap()["count"], json!(5));
    assert!(matches!(cache.keys(Some("z")), Err(CacheError::UnknownScope(_))));
    cache.close().unwrap();

    // Reopening the same file finds the row again.
    let reopened = RelationalStore::new(Box::new(SqliteExecutor::open(&path).unwrap()), vec![config]).unwrap();
    assert_eq!(
        reopened.fetch("a", Some("a")).unwrap(),
        Some(json!({"id": "a", "name": "x", "count": 5}))
    );
}

#[test]
fn sqlite_get_inserts_computed_row() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = format!("sqlite://{}", dir.path().join("get.db").display());
    let options = hilcat::ResolverOptions::default()
        .with_scope(ScopeConfig::new("users", "id", ["id", "name"]).unwrap());
    let cache = ManagedCache::from_descriptor_with(&descriptor, &options).unwrap();

    let computed = cache
        .get("u1", || json!({"name": "ann"}), Some("users"))
        .unwrap();
    assert_eq!(computed, json!({"id": "u1", "name": "ann"}));
    assert_eq!(cache.keys(Some("users")).unwrap(), vec!["u1".to_string()]);
}

#[test]
fn tiered_load_then_backup_is_idempotent_over_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiered.db");
    let configs = vec![
        ScopeConfig::new("a", "id", ["id", "v"]).unwrap(),
        ScopeConfig::new("b", "id", ["id", "v"]).unwrap(),
    ];
    let persistent = RelationalStore::new(Box::new(SqliteExecutor::open(&path).unwrap()), configs).unwrap();
    persistent.set("1", json!({"v": "x"}), Some("a")).unwrap();
    persistent.set("2", json!({"v": "y"}), Some("b")).unwrap();
    let before = persistent.bulk_read(None).unwrap();

    let cache = ManagedCache::new(Box::new(TieredStore::new(Box::new(persistent))));
    cache.load(None).unwrap();
    assert_eq!(cache.fetch("2", Some("b")).unwrap(), Some(json!({"id": "2", "v": "y"})));
    cache.backup(None).unwrap();
    cache.close().unwrap();

    let reopened = RelationalStore::new(
        Box::new(SqliteExecutor::open(&path).unwrap()),
        vec![
            ScopeConfig::new("a", "id", ["id", "v"]).unwrap(),
            ScopeConfig::new("b", "id", ["id", "v"]).unwrap(),
        ],
    )
    .unwrap();
    assert_eq!(reopened.bulk_read(None).unwrap(), before);
}

#[test]
fn backup_persists_working_set_writes() {
    let dir = tempfile::tempdir().unwrap();
    let files = DiscreteFileStore::new(dir.path(), FileFormat::Json).unwrap();
    let cache = ManagedCache::new(Box::new(TieredStore::new(Box::new(files))));

    cache.set("k", json!([1, 2, 3]), Some("s")).unwrap();
    cache.backup(Some(&["s"])).unwrap();

    let contents = std::fs::read_to_string(dir.path().join("s").join("k")).unwrap();
    assert_eq!(serde_json::from_str::<Value>(&contents).unwrap(), json!([1, 2, 3]));
}

#[test]
fn failed_backup_keeps_earlier_file_writes() {
    let dir = tempfile::tempdir().unwrap();
    let files = DiscreteFileStore::new(dir.path(), FileFormat::Text).unwrap();
    let tiered = TieredStore::new(Box::new(files));

    tiered.set("ok", json!("written"), Some("a")).unwrap();
    tiered.set("bad", json!(42), Some("b")).unwrap();

    assert!(matches!(
        tiered.backup(Some(&["a", "b"])),
        Err(CacheError::InvalidValue(_))
    ));
    assert_eq!(tiered.persistent().fetch("ok", Some("a")).unwrap(), Some(json!("written")));
    assert!(!tiered.persistent().exists("bad", Some("b")).unwrap());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a").join("ok")).unwrap(),
        "written"
    );
}

fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z0-9 ]{0,12}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn repeated_set_keeps_last_value(key in "[a-z][a-z0-9_]{0,15}", value in json_value()) {
        let dir = tempfile::tempdir().unwrap();
        for cache in generic_caches(&dir) {
            cache.set(&key, value.clone(), None).unwrap();
            cache.set(&key, value.clone(), None).unwrap();
            prop_assert_eq!(cache.fetch(&key, None).unwrap(), Some(value.clone()));
        }
    }
}
