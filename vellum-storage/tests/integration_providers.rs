//! Provider Contracts Across Backends
//!
//! Every backend runs the same checks: idempotent add, version
//! monotonicity, concurrent writers and adders, trims racing appends,
//! remove/get consistency, historical trimming, key listing, payload
//! round-trip and partitioned indexing.
//!
//! The relational suite runs only when `TEST_POSTGRES_URL` is set.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;
use vellum_storage::config::{
    DocumentSettings, PostgresSettings, RetryPolicy, RetrySettings, StorageConfig,
};
use vellum_storage::registry::{BackendKind, BackendSet, ProviderRegistry};
use vellum_storage::{
    Audit, HistoricalStorageProvider, KeyRecord, PartitionedStorageProvider, StorageError,
    StorageProvider, ValueRecord,
};

const WRITERS_COUNT: usize = 8;
const APPENDERS_COUNT: usize = 4;
const APPENDS_PER_WRITER_COUNT: usize = 25;
const TRIMMERS_COUNT: usize = 2;

// =============================================================================
// Backends
// =============================================================================

fn config() -> StorageConfig {
    StorageConfig::default().with_retry(RetrySettings {
        policy: RetryPolicy::Constant,
        max_attempts: 100,
        interval_ms: 1,
        ..RetrySettings::default()
    })
}

fn registry(backends: &BackendSet, kind: BackendKind) -> ProviderRegistry {
    ProviderRegistry::builder()
        .any_plain(kind)
        .any_historical(kind)
        .any_partitioned(kind)
        .build(backends)
        .expect("registry")
}

async fn connect_local() -> Option<ProviderRegistry> {
    let backends = BackendSet::local(&config()).expect("local backend");
    Some(registry(&backends, BackendKind::Local))
}

async fn connect_document() -> Option<ProviderRegistry> {
    let backends = BackendSet::connect(&config().with_document(DocumentSettings::memory()))
        .await
        .expect("document backend");
    Some(registry(&backends, BackendKind::Document))
}

async fn connect_relational() -> Option<ProviderRegistry> {
    let Ok(url) = std::env::var("TEST_POSTGRES_URL") else {
        eprintln!("Skipping test: TEST_POSTGRES_URL not set");
        return None;
    };
    let backends = BackendSet::connect(&config().with_postgres(PostgresSettings::new(url)))
        .await
        .expect("relational backend");
    Some(registry(&backends, BackendKind::Relational))
}

// =============================================================================
// Fixture: isolated value type per test
// =============================================================================

struct Fixture {
    value_type: String,
    plain: Arc<dyn StorageProvider>,
    historical: Arc<dyn HistoricalStorageProvider>,
    partitioned: Arc<dyn PartitionedStorageProvider>,
}

impl Fixture {
    fn new(registry: &ProviderRegistry) -> Self {
        let value_type = format!("Fixture-{}", uuid::Uuid::new_v4());
        Self {
            plain: registry.plain_provider(&value_type).expect("plain"),
            historical: registry.historical_provider(&value_type).expect("historical"),
            partitioned: registry.partitioned_provider(&value_type).expect("partitioned"),
            value_type,
        }
    }

    fn key(&self, id: &str) -> KeyRecord {
        KeyRecord::new(id, "FixtureKey", id.as_bytes().to_vec(), self.value_type.clone())
    }

    fn value(&self, content: &[u8]) -> ValueRecord {
        ValueRecord::new(self.value_type.clone(), content.to_vec(), Audit::new(Utc::now()))
    }
}

// =============================================================================
// Checks
// =============================================================================

async fn check_idempotent_add(registry: ProviderRegistry) {
    let fixture = Fixture::new(&registry);
    let cancel = CancellationToken::new();
    let key = fixture.key("k");

    let first = fixture
        .plain
        .add_or_get(&key, &|_: &KeyRecord| Ok(fixture.value(b"v1")), &cancel)
        .await
        .unwrap();
    let second = fixture
        .plain
        .add_or_get(&key, &|_: &KeyRecord| Ok(fixture.value(b"v2")), &cancel)
        .await
        .unwrap();

    assert_eq!(first.content, b"v1");
    assert_eq!(second.content, b"v1");
    assert_eq!(second.version(), 1);

    let historical = fixture
        .historical
        .add_or_get(&key, &|_: &KeyRecord| Ok(fixture.value(b"h1")), &cancel)
        .await
        .unwrap();
    let again = fixture
        .historical
        .add_or_get(&key, &|_: &KeyRecord| Ok(fixture.value(b"h2")), &cancel)
        .await
        .unwrap();
    assert_eq!(historical, again);
}

async fn check_version_monotonicity(registry: ProviderRegistry) {
    let fixture = Fixture::new(&registry);
    let cancel = CancellationToken::new();
    let key = fixture.key("k");

    let first = fixture
        .plain
        .add_or_update(
            &key,
            &|_: &KeyRecord| Ok(fixture.value(b"v1")),
            &|_: &KeyRecord, _: &ValueRecord| Ok(fixture.value(b"unused")),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!((first.version(), first.content.as_slice()), (1, &b"v1"[..]));

    let second = fixture
        .plain
        .add_or_update(
            &key,
            &|_: &KeyRecord| Ok(fixture.value(b"ignored")),
            &|_: &KeyRecord, _: &ValueRecord| Ok(fixture.value(b"v2")),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!((second.version(), second.content.as_slice()), (2, &b"v2"[..]));

    for expected in 3..=5u64 {
        let next = fixture
            .plain
            .add_or_update(
                &key,
                &|_: &KeyRecord| Ok(fixture.value(b"x")),
                &|_: &KeyRecord, _: &ValueRecord| Ok(fixture.value(b"x")),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(next.version(), expected);
        assert_eq!(next.audit.created, first.audit.created);
    }
}

async fn check_concurrent_updates(registry: ProviderRegistry) {
    let fixture = Fixture::new(&registry);
    let key = fixture.key("contended");

    let mut handles = Vec::with_capacity(WRITERS_COUNT);
    for writer in 0..WRITERS_COUNT {
        let plain = Arc::clone(&fixture.plain);
        let historical = Arc::clone(&fixture.historical);
        let key = key.clone();
        let value = fixture.value(format!("writer-{writer}").as_bytes());

        handles.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let add = |_: &KeyRecord| Ok::<_, StorageError>(value.clone());
            let update = |_: &KeyRecord, _: &ValueRecord| Ok::<_, StorageError>(value.clone());

            let plain = plain.add_or_update(&key, &add, &update, &cancel).await.unwrap();
            let historical = historical
                .add_or_update(&key, &add, &update, &cancel)
                .await
                .unwrap();
            (plain, historical)
        }));
    }

    let mut plain_versions = BTreeSet::new();
    let mut historical_versions = BTreeSet::new();
    for handle in handles {
        let (plain, historical) = handle.await.unwrap();
        assert!(plain_versions.insert(plain.version()), "plain version accepted twice");
        assert!(
            historical_versions.insert(historical.version()),
            "historical version accepted twice"
        );
    }

    let expected: BTreeSet<u64> = (1..=WRITERS_COUNT as u64).collect();
    assert_eq!(plain_versions, expected);
    assert_eq!(historical_versions, expected);

    let cancel = CancellationToken::new();
    let latest = fixture.plain.try_get(&key, &cancel).await.unwrap().unwrap();
    assert_eq!(latest.version(), WRITERS_COUNT as u64);

    // Each writer's payload appears in exactly one version.
    let mut payloads = BTreeSet::new();
    for version in 1..=WRITERS_COUNT as u64 {
        let record = fixture
            .historical
            .try_get_version(&key, version, &cancel)
            .await
            .unwrap()
            .unwrap();
        assert!(payloads.insert(record.content));
    }
    assert_eq!(payloads.len(), WRITERS_COUNT);
}

async fn check_concurrent_add_or_get(registry: ProviderRegistry) {
    let fixture = Fixture::new(&registry);
    let key = fixture.key("first-wins");

    let mut handles = Vec::with_capacity(WRITERS_COUNT);
    for writer in 0..WRITERS_COUNT {
        let plain = Arc::clone(&fixture.plain);
        let historical = Arc::clone(&fixture.historical);
        let key = key.clone();
        let value = fixture.value(format!("adder-{writer}").as_bytes());

        handles.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let add = |_: &KeyRecord| Ok::<_, StorageError>(value.clone());

            let plain = plain.add_or_get(&key, &add, &cancel).await.unwrap();
            let historical = historical.add_or_get(&key, &add, &cancel).await.unwrap();
            (plain, historical)
        }));
    }

    let mut plain_seen = Vec::with_capacity(WRITERS_COUNT);
    let mut historical_seen = Vec::with_capacity(WRITERS_COUNT);
    for handle in handles {
        let (plain, historical) = handle.await.unwrap();
        plain_seen.push(plain);
        historical_seen.push(historical);
    }

    // One adder wins; every other caller observes the winner's value.
    let cancel = CancellationToken::new();
    let plain_winner = fixture.plain.try_get(&key, &cancel).await.unwrap().unwrap();
    let historical_winner = fixture.historical.try_get(&key, &cancel).await.unwrap().unwrap();
    assert_eq!(plain_winner.version(), 1);
    assert_eq!(historical_winner.version(), 1);
    assert!(plain_seen.iter().all(|seen| *seen == plain_winner));
    assert!(historical_seen.iter().all(|seen| *seen == historical_winner));
    assert!(fixture
        .historical
        .try_get_version(&key, 2, &cancel)
        .await
        .unwrap()
        .is_none());
}

async fn check_trim_concurrent_with_appends(registry: ProviderRegistry) {
    let fixture = Fixture::new(&registry);
    let key = fixture.key("trimmed-while-growing");
    let appending = CancellationToken::new();

    let mut appenders = Vec::with_capacity(APPENDERS_COUNT);
    for writer in 0..APPENDERS_COUNT {
        let historical = Arc::clone(&fixture.historical);
        let key = key.clone();
        let value_type = fixture.value_type.clone();

        appenders.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let mut accepted = Vec::with_capacity(APPENDS_PER_WRITER_COUNT);
            for append in 0..APPENDS_PER_WRITER_COUNT {
                let content = format!("writer-{writer}-append-{append}").into_bytes();
                let value = ValueRecord::new(value_type.clone(), content, Audit::new(Utc::now()));
                let add = |_: &KeyRecord| Ok::<_, StorageError>(value.clone());
                let update = |_: &KeyRecord, _: &ValueRecord| Ok::<_, StorageError>(value.clone());

                let stored = historical.add_or_update(&key, &add, &update, &cancel).await.unwrap();
                accepted.push((stored.version(), stored.content));
            }
            accepted
        }));
    }

    let mut trimmers = Vec::with_capacity(TRIMMERS_COUNT);
    for _ in 0..TRIMMERS_COUNT {
        let historical = Arc::clone(&fixture.historical);
        let key = key.clone();
        let appending = appending.clone();

        trimmers.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let mut trimmed_through = 0u64;
            while !appending.is_cancelled() {
                let latest = historical.try_get(&key, &cancel).await.unwrap();
                if let Some(latest) = latest.filter(|latest| latest.version() > 1) {
                    let through = latest.version() - 1;
                    historical.try_remove_through(&key, through, &cancel).await.unwrap();
                    trimmed_through = trimmed_through.max(through);
                }
                tokio::task::yield_now().await;
            }
            trimmed_through
        }));
    }

    let mut accepted = Vec::with_capacity(APPENDERS_COUNT * APPENDS_PER_WRITER_COUNT);
    for appender in appenders {
        accepted.extend(appender.await.unwrap());
    }
    appending.cancel();
    let mut trimmed_through = 0u64;
    for trimmer in trimmers {
        trimmed_through = trimmed_through.max(trimmer.await.unwrap());
    }

    let total = (APPENDERS_COUNT * APPENDS_PER_WRITER_COUNT) as u64;
    let versions: BTreeSet<u64> = accepted.iter().map(|(version, _)| *version).collect();
    assert_eq!(versions, (1..=total).collect::<BTreeSet<u64>>());

    // Every accepted version above the highest trim point survives intact.
    let cancel = CancellationToken::new();
    for (version, content) in &accepted {
        let stored = fixture.historical.try_get_version(&key, *version, &cancel).await.unwrap();
        if *version > trimmed_through {
            assert_eq!(stored.map(|v| v.content).as_ref(), Some(content), "version {version} lost");
        } else {
            assert!(stored.is_none(), "version {version} survived its trim");
        }
    }
    let latest = fixture.historical.try_get(&key, &cancel).await.unwrap().unwrap();
    assert_eq!(latest.version(), total);
}

async fn check_remove_then_get(registry: ProviderRegistry) {
    let fixture = Fixture::new(&registry);
    let cancel = CancellationToken::new();
    let key = fixture.key("k");

    assert!(fixture.plain.try_remove(&key, &cancel).await.unwrap().is_none());

    fixture
        .plain
        .add_or_get(&key, &|_: &KeyRecord| Ok(fixture.value(b"v")), &cancel)
        .await
        .unwrap();
    let removed = fixture.plain.try_remove(&key, &cancel).await.unwrap().unwrap();
    assert_eq!(removed.content, b"v");
    assert!(fixture.plain.try_get(&key, &cancel).await.unwrap().is_none());

    for _ in 0..3 {
        fixture
            .historical
            .add_or_update(
                &key,
                &|_: &KeyRecord| Ok(fixture.value(b"h")),
                &|_: &KeyRecord, _: &ValueRecord| Ok(fixture.value(b"h")),
                &cancel,
            )
            .await
            .unwrap();
    }
    let latest = fixture.historical.try_remove(&key, &cancel).await.unwrap().unwrap();
    assert_eq!(latest.version(), 3);
    assert!(fixture.historical.try_get(&key, &cancel).await.unwrap().is_none());
    assert!(fixture.historical.try_remove(&key, &cancel).await.unwrap().is_none());
}

async fn check_historical_trim(registry: ProviderRegistry) {
    let fixture = Fixture::new(&registry);
    let cancel = CancellationToken::new();
    let key = fixture.key("k");

    for version in 1..=5u64 {
        let content = format!("v{version}");
        let appended = fixture
            .historical
            .add_or_update(
                &key,
                &|_: &KeyRecord| Ok(fixture.value(content.as_bytes())),
                &|_: &KeyRecord, _: &ValueRecord| Ok(fixture.value(content.as_bytes())),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(appended.version(), version);
    }

    assert_eq!(fixture.historical.try_remove_through(&key, 4, &cancel).await.unwrap(), 4);
    for version in 1..=4 {
        assert!(fixture
            .historical
            .try_get_version(&key, version, &cancel)
            .await
            .unwrap()
            .is_none());
    }
    let fifth = fixture.historical.try_get_version(&key, 5, &cancel).await.unwrap().unwrap();
    assert_eq!(fifth.content, b"v5");

    // Trimming again through an already-removed prefix removes nothing.
    assert_eq!(fixture.historical.try_remove_through(&key, 3, &cancel).await.unwrap(), 0);

    assert!(matches!(
        fixture.historical.try_get_version(&key, 0, &cancel).await,
        Err(StorageError::InvalidArgument { .. })
    ));
    assert!(matches!(
        fixture.historical.try_remove_through(&key, 0, &cancel).await,
        Err(StorageError::InvalidArgument { .. })
    ));
}

async fn check_key_listing(registry: ProviderRegistry) {
    let fixture = Fixture::new(&registry);
    let cancel = CancellationToken::new();

    for id in ["a", "b", "c"] {
        let key = fixture.key(id);
        fixture
            .plain
            .add_or_get(&key, &|_: &KeyRecord| Ok(fixture.value(b"p")), &cancel)
            .await
            .unwrap();
        for _ in 0..2 {
            fixture
                .historical
                .add_or_update(
                    &key,
                    &|_: &KeyRecord| Ok(fixture.value(b"h")),
                    &|_: &KeyRecord, _: &ValueRecord| Ok(fixture.value(b"h")),
                    &cancel,
                )
                .await
                .unwrap();
        }
    }

    fixture.plain.try_remove(&fixture.key("b"), &cancel).await.unwrap();
    fixture
        .historical
        .try_remove_through(&fixture.key("a"), 2, &cancel)
        .await
        .unwrap();
    fixture
        .historical
        .try_remove_through(&fixture.key("c"), 1, &cancel)
        .await
        .unwrap();

    let plain: Vec<String> = fixture
        .plain
        .get_keys(&fixture.value_type)
        .map_ok(|k| k.id)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(plain, vec!["a", "c"]);

    let historical: Vec<KeyRecord> = fixture
        .historical
        .get_keys(&fixture.value_type)
        .try_collect()
        .await
        .unwrap();
    let ids: Vec<&str> = historical.iter().map(|k| k.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "c"]);
    assert_eq!(historical[0].content, b"b");
    assert_eq!(historical[0].key_type, "FixtureKey");
}

async fn check_round_trip(registry: ProviderRegistry) {
    let fixture = Fixture::new(&registry);
    let cancel = CancellationToken::new();
    let key = fixture.key("bytes");
    let payload: Vec<u8> = (0..=255u8).collect();

    let audit = Audit::new(Utc::now())
        .with_user("ops")
        .with_correlation_id("corr-1")
        .with_detail("Region", "eu-west");
    let record = ValueRecord::new(fixture.value_type.clone(), payload.clone(), audit);

    fixture
        .plain
        .add_or_get(&key, &|_: &KeyRecord| Ok(record.clone()), &cancel)
        .await
        .unwrap();
    let read = fixture.plain.try_get(&key, &cancel).await.unwrap().unwrap();

    assert_eq!(read.content, payload);
    assert_eq!(read.value_type, fixture.value_type);
    assert_eq!(read.audit.user.as_deref(), Some("ops"));
    assert_eq!(read.audit.correlation_id.as_deref(), Some("corr-1"));
    assert_eq!(read.audit.extra.get("Region").map(String::as_str), Some("eu-west"));
}

async fn check_partitioned_log(registry: ProviderRegistry) {
    let fixture = Fixture::new(&registry);
    let cancel = CancellationToken::new();
    let key = fixture.key("log");

    assert!(fixture.partitioned.try_get_latest(&key, &cancel).await.unwrap().is_none());
    assert!(fixture.partitioned.try_get(&key, 1, &cancel).await.unwrap().is_none());

    for index in 1..=3u64 {
        let entry = format!("entry-{index}");
        let appended = fixture
            .partitioned
            .add(&key, &|_: &KeyRecord| Ok(fixture.value(entry.as_bytes())), &cancel)
            .await
            .unwrap();
        assert_eq!(appended.version(), index);
    }

    let second = fixture.partitioned.try_get(&key, 2, &cancel).await.unwrap().unwrap();
    assert_eq!(second.content, b"entry-2");
    assert_eq!(fixture.partitioned.try_remove(&key, 2, &cancel).await.unwrap(), 2);
    assert_eq!(
        fixture.partitioned.try_get_latest(&key, &cancel).await.unwrap().unwrap().content,
        b"entry-3"
    );
    assert!(matches!(
        fixture.partitioned.try_get(&key, 0, &cancel).await,
        Err(StorageError::InvalidArgument { .. })
    ));
}

async fn check_missing_reads_empty(registry: ProviderRegistry) {
    let fixture = Fixture::new(&registry);
    let cancel = CancellationToken::new();
    let key = fixture.key("never-written");

    assert!(fixture.plain.try_get(&key, &cancel).await.unwrap().is_none());
    assert!(fixture.historical.try_get(&key, &cancel).await.unwrap().is_none());
    assert!(fixture.historical.try_get_version(&key, 1, &cancel).await.unwrap().is_none());
    assert!(fixture.partitioned.try_get_latest(&key, &cancel).await.unwrap().is_none());
    assert_eq!(fixture.historical.try_remove_through(&key, 9, &cancel).await.unwrap(), 0);
}

async fn check_cancelled_writes_nothing(registry: ProviderRegistry) {
    let fixture = Fixture::new(&registry);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let key = fixture.key("k");

    let result = fixture
        .plain
        .add_or_get(&key, &|_: &KeyRecord| Ok(fixture.value(b"v")), &cancel)
        .await;
    assert!(matches!(result, Err(StorageError::Cancelled { .. })));

    let live = CancellationToken::new();
    assert!(fixture.plain.try_get(&key, &live).await.unwrap().is_none());
}

// =============================================================================
// Suites
// =============================================================================

macro_rules! backend_suite {
    ($suite:ident, $connect:ident) => {
        mod $suite {
            use super::*;

            #[tokio::test]
            async fn idempotent_add() {
                if let Some(registry) = $connect().await {
                    check_idempotent_add(registry).await;
                }
            }

            #[tokio::test]
            async fn version_monotonicity() {
                if let Some(registry) = $connect().await {
                    check_version_monotonicity(registry).await;
                }
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn concurrent_updates() {
                if let Some(registry) = $connect().await {
                    check_concurrent_updates(registry).await;
                }
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn concurrent_add_or_get() {
                if let Some(registry) = $connect().await {
                    check_concurrent_add_or_get(registry).await;
                }
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn trim_concurrent_with_appends() {
                if let Some(registry) = $connect().await {
                    check_trim_concurrent_with_appends(registry).await;
                }
            }

            #[tokio::test]
            async fn remove_then_get() {
                if let Some(registry) = $connect().await {
                    check_remove_then_get(registry).await;
                }
            }

            #[tokio::test]
            async fn historical_trim() {
                if let Some(registry) = $connect().await {
                    check_historical_trim(registry).await;
                }
            }

            #[tokio::test]
            async fn key_listing() {
                if let Some(registry) = $connect().await {
                    check_key_listing(registry).await;
                }
            }

            #[tokio::test]
            async fn round_trip() {
                if let Some(registry) = $connect().await {
                    check_round_trip(registry).await;
                }
            }

            #[tokio::test]
            async fn partitioned_log() {
                if let Some(registry) = $connect().await {
                    check_partitioned_log(registry).await;
                }
            }

            #[tokio::test]
            async fn missing_reads_empty() {
                if let Some(registry) = $connect().await {
                    check_missing_reads_empty(registry).await;
                }
            }

            #[tokio::test]
            async fn cancelled_writes_nothing() {
                if let Some(registry) = $connect().await {
                    check_cancelled_writes_nothing(registry).await;
                }
            }
        }
    };
}

backend_suite!(local, connect_local);
backend_suite!(document, connect_document);
backend_suite!(relational, connect_relational);
