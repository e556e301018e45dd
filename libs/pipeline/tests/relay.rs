mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pipeline::{
    PipelineCoordinator, Route, RouteStatus, Transform, TransformError, TransformFuture,
    TransformStrategy, WorkerPool,
};
use relay_api::{Envelope, OffsetStore, Provider, StoreError, StreamBroker};
use stream_engine::MemoryBroker;

use common::*;

fn coordinator(
    broker: Arc<dyn StreamBroker>,
    store: Arc<dyn OffsetStore>,
    routes: Vec<Route>,
) -> PipelineCoordinator {
    PipelineCoordinator::new(broker, store, WorkerPool::new(4), routes).unwrap()
}

fn orders_route() -> Route {
    Route::new("orders-relay", "orders", "orders-out")
}

// ═══════════════════════════════════════════════════════════════
//  Recovery
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn resumes_after_stored_checkpoint() {
    let broker = Arc::new(MemoryBroker::new());
    seed(&broker, "orders", "CRYPTO_SCOUT", 50);
    broker.declare("orders-out");
    let store = Arc::new(RecordingStore::with_checkpoint("orders", 41));

    let mut coord = coordinator(broker.clone(), store.clone(), vec![orders_route()]);
    coord.start().await.unwrap();
    wait_until("checkpoint 49", || (*store).checkpoint("orders") == Some(49)).await;

    assert_eq!(store.upserts("orders"), (42..50).collect::<Vec<_>>());
    assert_eq!(published_seqs(&broker, "orders-out"), (42..50).collect::<Vec<_>>());
    assert_eq!(coord.route("orders-relay").unwrap().stats().delivered, 8);

    coord.stop().await.unwrap();
}

#[tokio::test]
async fn without_checkpoint_starts_at_first_available_record() {
    let broker = Arc::new(MemoryBroker::new());
    seed(&broker, "orders", "CRYPTO_SCOUT", 10);
    broker.stream("orders").unwrap().truncate_before(5);
    broker.declare("orders-out");
    let store = Arc::new(RecordingStore::new());

    let mut coord = coordinator(broker.clone(), store.clone(), vec![orders_route()]);
    coord.start().await.unwrap();
    wait_until("checkpoint 9", || (*store).checkpoint("orders") == Some(9)).await;

    assert_eq!(store.upserts("orders"), vec![5, 6, 7, 8, 9]);
    coord.stop().await.unwrap();
}

#[tokio::test]
async fn failing_checkpoint_lookup_starts_from_first() {
    let broker = Arc::new(MemoryBroker::new());
    seed(&broker, "orders", "CRYPTO_SCOUT", 5);
    broker.declare("orders-out");
    let store = Arc::new(RecordingStore::failing_get());

    let mut coord = coordinator(broker.clone(), store.clone(), vec![orders_route()]);
    coord.start().await.unwrap();
    wait_until("checkpoint 4", || (*store).checkpoint("orders") == Some(4)).await;

    assert_eq!(store.upserts("orders"), vec![0, 1, 2, 3, 4]);
    assert_eq!(coord.route("orders-relay").unwrap().status(), RouteStatus::Running);
    coord.stop().await.unwrap();
}

#[tokio::test]
async fn restart_resumes_from_persisted_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offsets.db");

    {
        let broker = Arc::new(MemoryBroker::new());
        seed(&broker, "orders", "CRYPTO_SCOUT", 10);
        broker.declare("orders-out");
        let store: Arc<dyn OffsetStore> = Arc::new(offset_store::SqliteOffsetStore::open(&path).unwrap());

        let mut coord = coordinator(broker.clone(), store.clone(), vec![orders_route()]);
        coord.start().await.unwrap();
        wait_until("first run", || store.get("orders").unwrap() == Some(9)).await;
        coord.stop().await.unwrap();
    }

    // Stream пополнился, процесс перезапущен.
    let broker = Arc::new(MemoryBroker::new());
    seed(&broker, "orders", "CRYPTO_SCOUT", 15);
    broker.declare("orders-out");
    let store: Arc<dyn OffsetStore> = Arc::new(offset_store::SqliteOffsetStore::open(&path).unwrap());

    let mut coord = coordinator(broker.clone(), store.clone(), vec![orders_route()]);
    coord.start().await.unwrap();
    wait_until("second run", || store.get("orders").unwrap() == Some(14)).await;

    assert_eq!(published_seqs(&broker, "orders-out"), vec![10, 11, 12, 13, 14]);
    coord.stop().await.unwrap();
}

// ═══════════════════════════════════════════════════════════════
//  Publish faults
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn rejected_publish_faults_route_without_commit() {
    let memory = Arc::new(MemoryBroker::new());
    seed(&memory, "orders", "CRYPTO_SCOUT", 120);
    memory.declare("orders-out");
    let broker = Arc::new(ScriptedBroker::new(memory.clone()).script("orders-out", ProducerScript::reject(100)));
    let store = Arc::new(RecordingStore::new());

    let mut coord = coordinator(broker, store.clone(), vec![orders_route()]);
    coord.start().await.unwrap();

    let mut status = coord.route("orders-relay").unwrap().watch_status();
    tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| s.is_faulted()))
        .await
        .expect("route did not fault")
        .unwrap();

    let upserts = store.upserts("orders");
    assert_eq!(upserts, (0..100).collect::<Vec<_>>());
    assert!(!upserts.contains(&100));

    // После fault'а записи в route больше не доставляются.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let route = coord.route("orders-relay").unwrap();
    assert_eq!(route.stats().delivered, 101);
    assert_eq!(route.stats().published, 100);
    assert_eq!(store.upserts("orders").len(), 100);

    coord.stop().await.unwrap();
    assert!(coord.route("orders-relay").unwrap().status().is_faulted());
}

// ═══════════════════════════════════════════════════════════════
//  Skip-but-commit
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn malformed_record_is_committed_but_not_published() {
    let broker = Arc::new(MemoryBroker::new());
    let orders = broker.declare("orders");
    for seq in 0..10 {
        let body = if seq == 7 { b"\xff\xfegarbage".to_vec() } else { envelope_bytes("CRYPTO_SCOUT", seq) };
        orders.append(body).unwrap();
    }
    broker.declare("orders-out");
    let store = Arc::new(RecordingStore::new());

    let mut coord = coordinator(broker.clone(), store.clone(), vec![orders_route()]);
    coord.start().await.unwrap();
    wait_until("checkpoint 9", || (*store).checkpoint("orders") == Some(9)).await;

    let upserts = store.upserts("orders");
    assert_eq!(upserts.iter().filter(|o| **o == 7).count(), 1);
    assert_eq!(published_seqs(&broker, "orders-out"), vec![0, 1, 2, 3, 4, 5, 6, 8, 9]);

    let stats = coord.route("orders-relay").unwrap().stats();
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.published, 9);
    coord.stop().await.unwrap();
}

#[tokio::test]
async fn filter_relabel_publishes_only_accepted_provider() {
    let broker = Arc::new(MemoryBroker::new());
    let bybit = broker.declare("bybit");
    for seq in 0..10 {
        let provider = if seq % 2 == 0 { "BYBIT" } else { "CRYPTO_SCOUT" };
        bybit.append(envelope_bytes(provider, seq)).unwrap();
    }
    broker.declare("bybit-ta");
    let store = Arc::new(RecordingStore::new());

    let route = Route::new("bybit-analysis", "bybit", "bybit-ta").with_strategy(
        TransformStrategy::FilterRelabel { accept: Provider::Bybit, relabel: Provider::BybitTa },
    );
    let mut coord = coordinator(broker.clone(), store.clone(), vec![route]);
    coord.start().await.unwrap();
    wait_until("checkpoint 9", || (*store).checkpoint("bybit") == Some(9)).await;

    assert_eq!(store.upserts("bybit"), (0..10).collect::<Vec<_>>());
    assert_eq!(published_seqs(&broker, "bybit-ta"), vec![0, 2, 4, 6, 8]);
    for record in broker.records("bybit-ta").unwrap() {
        assert_eq!(provider_of(&record.body), "BYBIT_TA");
    }
    coord.stop().await.unwrap();
}

struct PanicOnSeq(u64);

impl Transform for PanicOnSeq {
    fn apply(&self, envelope: Envelope) -> TransformFuture {
        let hit = envelope.data.get("seq").and_then(|v| v.as_u64()) == Some(self.0);
        Box::pin(async move {
            if hit {
                panic!("transform bug");
            }
            Ok::<_, TransformError>(Some(envelope))
        })
    }
}

#[tokio::test]
async fn panicking_transform_skips_record() {
    let broker = Arc::new(MemoryBroker::new());
    seed(&broker, "orders", "CRYPTO_SCOUT", 5);
    broker.declare("orders-out");
    let store = Arc::new(RecordingStore::new());

    let route = orders_route().with_strategy(TransformStrategy::custom(PanicOnSeq(2)));
    let mut coord = coordinator(broker.clone(), store.clone(), vec![route]);
    coord.start().await.unwrap();
    wait_until("checkpoint 4", || (*store).checkpoint("orders") == Some(4)).await;

    assert_eq!(store.upserts("orders"), vec![0, 1, 2, 3, 4]);
    assert_eq!(published_seqs(&broker, "orders-out"), vec![0, 1, 3, 4]);
    coord.stop().await.unwrap();
}

// ═══════════════════════════════════════════════════════════════
//  Checkpoint write failures
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn failing_checkpoint_write_keeps_route_running() {
    let broker = Arc::new(MemoryBroker::new());
    seed(&broker, "orders", "CRYPTO_SCOUT", 10);
    broker.declare("orders-out");
    let store = Arc::new(RecordingStore::failing_upsert());

    let mut coord = coordinator(broker.clone(), store.clone(), vec![orders_route()]);
    coord.start().await.unwrap();
    wait_until("all published", || published_seqs(&broker, "orders-out").len() == 10).await;
    wait_until("all commit attempts", || store.upserts("orders").len() == 10).await;

    let route = coord.route("orders-relay").unwrap();
    assert_eq!(route.status(), RouteStatus::Running);
    assert_eq!(route.stats().commit_failures, 10);
    assert_eq!((*store).checkpoint("orders"), None);
    coord.stop().await.unwrap();
}

// ═══════════════════════════════════════════════════════════════
//  Ingest-level failures
// ═══════════════════════════════════════════════════════════════

/// Сбой доставки на уровне подписки: запись теряется без commit'а.
/// Это расходится с skip-but-commit для сбоев декодирования.
#[tokio::test]
async fn delivery_failure_drops_record_without_commit() {
    let broker = Arc::new(MemoryBroker::new());
    seed(&broker, "orders", "CRYPTO_SCOUT", 6);
    broker.stream("orders").unwrap().fail_delivery(3);
    broker.declare("orders-out");
    let store = Arc::new(RecordingStore::new());

    let mut coord = coordinator(broker.clone(), store.clone(), vec![orders_route()]);
    coord.start().await.unwrap();
    wait_until("checkpoint 5", || (*store).checkpoint("orders") == Some(5)).await;

    assert_eq!(store.upserts("orders"), vec![0, 1, 2, 4, 5]);
    assert_eq!(published_seqs(&broker, "orders-out"), vec![0, 1, 2, 4, 5]);
    assert_eq!(coord.route("orders-relay").unwrap().stats().ingest_drops, 1);
    coord.stop().await.unwrap();
}

// ═══════════════════════════════════════════════════════════════
//  Ordering & concurrency
// ═══════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_publish_in_flight_and_commits_in_order() {
    let memory = Arc::new(MemoryBroker::new());
    seed(&memory, "orders", "CRYPTO_SCOUT", 30);
    memory.declare("orders-out");
    let script = ProducerScript::delayed(Duration::from_millis(2));
    let broker = Arc::new(ScriptedBroker::new(memory.clone()).script("orders-out", script.clone()));
    let store = Arc::new(RecordingStore::new());

    let mut coord = coordinator(broker, store.clone(), vec![orders_route()]);
    coord.start().await.unwrap();
    wait_until("checkpoint 29", || (*store).checkpoint("orders") == Some(29)).await;

    assert_eq!(script.peak(), 1);
    assert_eq!(store.upserts("orders"), (0..30).collect::<Vec<_>>());
    assert_eq!(published_seqs(&memory, "orders-out"), (0..30).collect::<Vec<_>>());
    coord.stop().await.unwrap();
}

/// Общий журнал: `('t', seq)` при старте transform'а, `('c', offset)` после записи checkpoint'а.
type Journal = Arc<Mutex<Vec<(char, u64)>>>;

struct SlowStore {
    inner: RecordingStore,
    journal: Journal,
}

impl OffsetStore for SlowStore {
    fn get(&self, stream: &str) -> Result<Option<u64>, StoreError> {
        self.inner.get(stream)
    }

    fn upsert(&self, stream: &str, offset: u64) -> Result<(), StoreError> {
        std::thread::sleep(Duration::from_millis(10));
        self.inner.upsert(stream, offset)?;
        self.journal.lock().unwrap().push(('c', offset));
        Ok(())
    }
}

struct MarkStart(Journal);

impl Transform for MarkStart {
    fn apply(&self, envelope: Envelope) -> TransformFuture {
        if let Some(seq) = envelope.data.get("seq").and_then(|v| v.as_u64()) {
            self.0.lock().unwrap().push(('t', seq));
        }
        Box::pin(async move { Ok::<_, TransformError>(Some(envelope)) })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_checkpoint_write_blocks_next_record() {
    let broker = Arc::new(MemoryBroker::new());
    seed(&broker, "orders", "CRYPTO_SCOUT", 5);
    broker.declare("orders-out");
    let journal = Journal::default();
    let store = Arc::new(SlowStore { inner: RecordingStore::new(), journal: journal.clone() });

    let route = orders_route().with_strategy(TransformStrategy::custom(MarkStart(journal.clone())));
    let mut coord = coordinator(broker.clone(), store.clone(), vec![route]);
    coord.start().await.unwrap();
    wait_until("checkpoint 4", || store.inner.checkpoint("orders") == Some(4)).await;
    coord.stop().await.unwrap();

    let expected: Vec<(char, u64)> = (0..5).flat_map(|o| [('t', o), ('c', o)]).collect();
    assert_eq!(*journal.lock().unwrap(), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn routes_progress_independently() {
    let memory = Arc::new(MemoryBroker::new());
    seed(&memory, "bybit", "BYBIT", 20);
    seed(&memory, "scout", "CRYPTO_SCOUT", 20);
    memory.declare("bybit-ta");
    memory.declare("scout-out");

    let (held, gate) = ProducerScript::gated();
    let broker = Arc::new(ScriptedBroker::new(memory.clone()).script("bybit-ta", held.clone()));
    let store = Arc::new(RecordingStore::new());

    let routes = vec![
        Route::new("bybit-analysis", "bybit", "bybit-ta").with_strategy(TransformStrategy::FilterRelabel {
            accept: Provider::Bybit,
            relabel: Provider::BybitTa,
        }),
        Route::new("scout-processing", "scout", "scout-out"),
    ];
    let mut coord = coordinator(broker, store.clone(), routes);
    coord.start().await.unwrap();

    // bybit-analysis держит первое подтверждение, scout-processing идёт дальше.
    wait_until("scout checkpoint 19", || (*store).checkpoint("scout") == Some(19)).await;
    wait_until("bybit publish in flight", || held.in_flight() == 1).await;
    assert!(store.upserts("bybit").is_empty());
    assert_eq!(coord.route("bybit-analysis").unwrap().status(), RouteStatus::Running);

    gate.add_permits(20);
    wait_until("bybit checkpoint 19", || (*store).checkpoint("bybit") == Some(19)).await;
    assert_eq!(held.peak(), 1);
    assert_eq!(store.upserts("bybit"), (0..20).collect::<Vec<_>>());
    coord.stop().await.unwrap();
}

// ═══════════════════════════════════════════════════════════════
//  Shutdown
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn stop_waits_for_in_flight_publish() {
    let memory = Arc::new(MemoryBroker::new());
    seed(&memory, "orders", "CRYPTO_SCOUT", 5);
    memory.declare("orders-out");
    let (held, gate) = ProducerScript::gated();
    let broker = Arc::new(ScriptedBroker::new(memory.clone()).script("orders-out", held.clone()));
    let store = Arc::new(RecordingStore::new());

    let mut coord = coordinator(broker, store.clone(), vec![orders_route()]);
    coord.start().await.unwrap();
    wait_until("publish in flight", || held.in_flight() == 1).await;

    let stopping = tokio::spawn(async move {
        coord.stop().await.unwrap();
        coord
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!stopping.is_finished());

    gate.add_permits(1);
    let coord = stopping.await.unwrap();

    assert_eq!(store.upserts("orders"), vec![0]);
    assert_eq!(coord.route("orders-relay").unwrap().status(), RouteStatus::Stopped);
    assert!(memory.is_closed());
}

#[tokio::test]
async fn unknown_destination_fails_start() {
    let broker = Arc::new(MemoryBroker::new());
    seed(&broker, "orders", "CRYPTO_SCOUT", 1);
    let store = Arc::new(RecordingStore::new());

    let mut coord = coordinator(broker.clone(), store.clone(), vec![orders_route()]);
    let err = coord.start().await.unwrap_err();
    assert!(err.to_string().contains("orders-out"));
    assert!(store.upserts("orders").is_empty());
}

#[test]
fn duplicate_source_is_rejected() {
    let broker: Arc<dyn StreamBroker> = Arc::new(MemoryBroker::new());
    let store: Arc<dyn OffsetStore> = Arc::new(RecordingStore::new());
    let routes = vec![
        Route::new("a", "orders", "out-a"),
        Route::new("b", "orders", "out-b"),
    ];
    assert!(PipelineCoordinator::new(broker, store, WorkerPool::new(1), routes).is_err());
}
