//! End-to-end pipeline scenarios against the in-memory store.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use sluice_core::config::{LoaderConfig, RetryConfig};
use sluice_core::{Event, EventId, EventSource, SourceError};
use sluice_loader::{EventLoader, InboxRetryWorker, Stores};
use sluice_store::{
    CursorStore, EventInbox, EventStorage, InboxDrain, InboxRow, InboxTransaction, LeaseManager, MemoryStore,
    RequestLog, RequestStatus, StoreError,
};
use sluice_stream::{InMemoryStreamClient, StreamError, StreamEventSource, StreamMessage};

/// Replays scripted responses and records every `after_id` it was asked for.
struct ScriptedSource {
    name: String,
    responses: Mutex<VecDeque<Result<Vec<Event>, SourceError>>>,
    calls: Mutex<Vec<EventId>>,
}

impl ScriptedSource {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn respond(&self, response: Result<Vec<Event>, SourceError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    fn calls(&self) -> Vec<EventId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_events(&self, after_id: EventId, _limit: usize) -> Result<Vec<Event>, SourceError> {
        self.calls.lock().unwrap().push(after_id);
        self.responses.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
    }
}

fn event(id: EventId) -> Event {
    Event::new(id, json!({ "id": id }).as_object().cloned().unwrap())
}

fn events(ids: &[EventId]) -> Vec<Event> {
    ids.iter().copied().map(event).collect()
}

fn loader_for(store: &MemoryStore, sources: Vec<Arc<dyn EventSource>>) -> EventLoader {
    EventLoader::new(sources, &Stores::from_backend(store.clone()), LoaderConfig::default())
}

/// Wait out the per-source minimum request interval.
async fn next_slot() {
    tokio::time::sleep(LoaderConfig::MIN_INTERVAL + Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_happy_path_then_retry_drain() {
    let store = MemoryStore::new();
    let source = ScriptedSource::new("s");
    source.respond(Ok(events(&[10, 11])));
    let loader = loader_for(&store, vec![source.clone() as Arc<dyn EventSource>]);

    assert!(loader.process_source(&*source).await);

    assert_eq!(source.calls(), vec![0]);
    assert_eq!(store.last_requested_id("s").await.unwrap(), 11);
    assert_eq!(store.last_stored_id("s").await.unwrap(), 11);
    assert_eq!(store.inbox_ids("s"), vec![10, 11]);
    assert_eq!(store.stored_ids("s"), vec![10, 11]);
    let entry = store.find("s", 0).await.unwrap().unwrap();
    assert_eq!(entry.status, RequestStatus::Succeeded);
    assert_eq!(entry.max_id, Some(11));

    let worker = InboxRetryWorker::new(&Stores::from_backend(store.clone()), RetryConfig::default());
    assert!(worker.run_once().await);
    assert_eq!(store.inbox_len(), 0);
    assert_eq!(store.stored_ids("s"), vec![10, 11]);
    assert_eq!(store.last_stored_id("s").await.unwrap(), 11);
}

#[tokio::test]
async fn test_next_pass_continues_from_cursor() {
    let store = MemoryStore::new();
    let source = ScriptedSource::new("s");
    source.respond(Ok(events(&[10, 11])));
    source.respond(Ok(events(&[12])));
    let loader = loader_for(&store, vec![source.clone() as Arc<dyn EventSource>]);

    assert!(loader.run_pass().await);
    next_slot().await;
    assert!(loader.run_pass().await);

    assert_eq!(source.calls(), vec![0, 11]);
    assert_eq!(store.last_requested_id("s").await.unwrap(), 12);
    assert_eq!(
        store.find("s", 11).await.unwrap().unwrap().status,
        RequestStatus::Succeeded
    );
}

#[tokio::test]
async fn test_unavailable_source_fails_reservation_until_cleared() {
    let store = MemoryStore::new();
    let source = ScriptedSource::new("s");
    source.respond(Err(SourceError::unavailable("s", "connection refused")));
    let loader = loader_for(&store, vec![source.clone() as Arc<dyn EventSource>]);

    assert!(!loader.process_source(&*source).await);

    let entry = store.find("s", 0).await.unwrap().unwrap();
    assert_eq!(entry.status, RequestStatus::Failed);
    assert!(entry.error.unwrap().contains("connection refused"));
    assert_eq!(store.last_requested_id("s").await.unwrap(), 0);
    assert_eq!(store.last_stored_id("s").await.unwrap(), 0);

    // Blocked: the failed row still holds (s, 0).
    next_slot().await;
    assert!(!loader.process_source(&*source).await);
    assert_eq!(source.calls(), vec![0]);

    assert_eq!(store.clear_failed("s", Some(0)).await.unwrap(), 1);
    source.respond(Ok(events(&[1])));
    next_slot().await;
    assert!(loader.process_source(&*source).await);
    assert_eq!(source.calls(), vec![0, 0]);
    assert_eq!(store.last_stored_id("s").await.unwrap(), 1);
}

#[tokio::test]
async fn test_unexpected_error_also_fails_reservation() {
    let store = MemoryStore::new();
    let source = ScriptedSource::new("s");
    source.respond(Err(SourceError::Decode("payload is not an object".into())));
    let loader = loader_for(&store, vec![source.clone() as Arc<dyn EventSource>]);

    assert!(!loader.process_source(&*source).await);

    let entry = store.find("s", 0).await.unwrap().unwrap();
    assert_eq!(entry.status, RequestStatus::Failed);
    assert!(entry.error.unwrap().contains("not an object"));
}

#[tokio::test]
async fn test_existing_reservation_prevents_fetch() {
    let store = MemoryStore::new();
    store.reserve("s", 0, 1000).await.unwrap().unwrap();
    let source = ScriptedSource::new("s");
    source.respond(Ok(events(&[1])));
    let loader = loader_for(&store, vec![source.clone() as Arc<dyn EventSource>]);

    assert!(!loader.process_source(&*source).await);
    assert!(source.calls().is_empty());
}

#[tokio::test]
async fn test_unsorted_batch_fails_without_writes() {
    let store = MemoryStore::new();
    let source = ScriptedSource::new("s");
    source.respond(Ok(events(&[5, 4])));
    let loader = loader_for(&store, vec![source.clone() as Arc<dyn EventSource>]);

    assert!(!loader.process_source(&*source).await);

    let entry = store.find("s", 0).await.unwrap().unwrap();
    assert_eq!(entry.status, RequestStatus::Failed);
    assert_eq!(store.inbox_len(), 0);
    assert!(store.stored_ids("s").is_empty());
    assert_eq!(store.last_requested_id("s").await.unwrap(), 0);
}

#[tokio::test]
async fn test_empty_fetch_releases_reservation() {
    let store = MemoryStore::new();
    let source = ScriptedSource::new("s");
    let loader = loader_for(&store, vec![source.clone() as Arc<dyn EventSource>]);

    assert!(!loader.process_source(&*source).await);

    assert_eq!(source.calls(), vec![0]);
    assert!(store.find("s", 0).await.unwrap().is_none());
    assert!(store.reserve("s", 0, 10).await.unwrap().is_some());
}

#[tokio::test]
async fn test_held_lease_skips_source() {
    let store = MemoryStore::new();
    let source = ScriptedSource::new("s");
    source.respond(Ok(events(&[1])));
    let loader = loader_for(&store, vec![source.clone() as Arc<dyn EventSource>]);

    let lease = store.acquire("s", Duration::from_secs(30)).await.unwrap().unwrap();
    assert!(!loader.process_source(&*source).await);
    assert!(source.calls().is_empty());
    lease.release().await.unwrap();

    assert!(loader.process_source(&*source).await);
}

#[tokio::test]
async fn test_lease_is_released_after_each_source() {
    let store = MemoryStore::new();
    let source = ScriptedSource::new("s");
    source.respond(Err(SourceError::unavailable("s", "down")));
    let loader = loader_for(&store, vec![source.clone() as Arc<dyn EventSource>]);

    loader.process_source(&*source).await;

    assert!(store.acquire("s", Duration::from_secs(30)).await.unwrap().is_some());
}

#[tokio::test]
async fn test_rate_limit_skips_back_to_back_requests() {
    let store = MemoryStore::new();
    let source = ScriptedSource::new("s");
    source.respond(Ok(events(&[1])));
    source.respond(Ok(events(&[2])));
    let loader = loader_for(&store, vec![source.clone() as Arc<dyn EventSource>]);

    assert!(loader.process_source(&*source).await);
    assert!(!loader.process_source(&*source).await);
    assert_eq!(source.calls(), vec![0]);
}

#[tokio::test]
async fn test_one_failing_source_does_not_stop_the_pass() {
    let store = MemoryStore::new();
    let broken = ScriptedSource::new("broken");
    broken.respond(Err(SourceError::Other("boom".into())));
    let healthy = ScriptedSource::new("healthy");
    healthy.respond(Ok(events(&[1, 2])));
    let loader = loader_for(&store, vec![broken.clone() as Arc<dyn EventSource>, healthy.clone()]);

    assert!(loader.run_pass().await);

    assert_eq!(
        store.find("broken", 0).await.unwrap().unwrap().status,
        RequestStatus::Failed
    );
    assert_eq!(store.last_stored_id("healthy").await.unwrap(), 2);
}

#[tokio::test]
async fn test_stop_ends_run_loop() {
    let store = MemoryStore::new();
    let source = ScriptedSource::new("s");
    let loader = Arc::new(loader_for(&store, vec![source.clone() as Arc<dyn EventSource>]));

    let running = tokio::spawn({
        let loader = loader.clone();
        async move { loader.run().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    loader.stop();

    tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .expect("loader stopped")
        .unwrap();
    assert!(!source.calls().is_empty());
}

#[tokio::test]
async fn test_loader_clamps_config() {
    let store = MemoryStore::new();
    let loader = EventLoader::new(
        Vec::new(),
        &Stores::from_backend(store),
        LoaderConfig {
            batch_size: 0,
            min_interval: Duration::ZERO,
            lease_ttl: Duration::ZERO,
            idle_sleep: Duration::ZERO,
        },
    );

    assert_eq!(loader.config().batch_size, 1);
    assert_eq!(loader.config().min_interval, LoaderConfig::MIN_INTERVAL);
    assert_eq!(loader.config().lease_ttl, LoaderConfig::MIN_LEASE_TTL);
    assert_eq!(loader.config().idle_sleep, LoaderConfig::MIN_IDLE_SLEEP);
    assert!(!loader.run_pass().await);
}

#[tokio::test]
async fn test_retry_worker_second_pass_is_noop() {
    let store = MemoryStore::new();
    store.store_inbox("s", &events(&[1, 2, 3])).await.unwrap();
    let worker = InboxRetryWorker::new(&Stores::from_backend(store.clone()), RetryConfig::default());

    assert!(worker.run_once().await);
    let stored = store.stored_ids("s");
    assert_eq!(stored, vec![1, 2, 3]);
    assert_eq!(store.last_stored_id("s").await.unwrap(), 3);

    assert!(!worker.run_once().await);
    assert_eq!(store.stored_ids("s"), stored);
}

#[tokio::test]
async fn test_retry_worker_respects_batch_size() {
    let store = MemoryStore::new();
    store.store_inbox("a", &events(&[1, 2])).await.unwrap();
    store.store_inbox("b", &events(&[7])).await.unwrap();
    let config = RetryConfig {
        batch_size: 2,
        idle_sleep: Duration::from_millis(1),
    };
    let worker = InboxRetryWorker::new(&Stores::from_backend(store.clone()), config);

    assert!(worker.run_once().await);
    assert_eq!(store.inbox_ids("b"), vec![7]);
    assert_eq!(store.last_stored_id("a").await.unwrap(), 2);

    assert!(worker.run_once().await);
    assert_eq!(store.inbox_len(), 0);
    assert_eq!(store.last_stored_id("b").await.unwrap(), 7);
}

#[tokio::test]
async fn test_parallel_drain_skips_locked_rows() {
    let store = MemoryStore::new();
    store.store_inbox("p", &events(&[1, 2])).await.unwrap();
    let worker_b = InboxRetryWorker::new(&Stores::from_backend(store.clone()), RetryConfig::default());

    let mut worker_a = store.begin().await.unwrap();
    assert_eq!(worker_a.claim_inbox_rows(10).await.unwrap().len(), 2);

    assert!(!worker_b.run_once().await);
    assert!(store.stored_ids("p").is_empty());

    worker_a.rollback().await.unwrap();

    assert!(worker_b.run_once().await);
    assert_eq!(store.stored_ids("p"), vec![1, 2]);
    assert_eq!(store.inbox_len(), 0);
    assert_eq!(store.last_stored_id("p").await.unwrap(), 2);
}

#[tokio::test]
async fn test_retry_worker_stop_ends_run_loop() {
    let store = MemoryStore::new();
    let worker = Arc::new(InboxRetryWorker::new(
        &Stores::from_backend(store),
        RetryConfig::default(),
    ));

    let running = tokio::spawn({
        let worker = worker.clone();
        async move { worker.run().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    worker.cancellation_token().cancel();

    tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .expect("worker stopped")
        .unwrap();
}

#[tokio::test]
async fn test_stream_source_feeds_pipeline() {
    let store = MemoryStore::new();
    let client = Arc::new(InMemoryStreamClient::new());
    client.publish("orders-stream", StreamMessage::new(1, r#"{"payload":{"sku":"a"}}"#));
    client.publish("orders-stream", StreamMessage::new(2, r#"{"sku":"b"}"#));
    let source: Arc<dyn EventSource> = Arc::new(StreamEventSource::new(
        client.clone(),
        "orders-stream",
        "orders",
    ));
    let loader = loader_for(&store, vec![source.clone() as Arc<dyn EventSource>]);

    assert!(loader.process_source(&*source).await);

    assert_eq!(store.stored_ids("orders"), vec![1, 2]);
    assert_eq!(store.stored_payload("orders", 1).unwrap()["sku"], json!("a"));
    assert_eq!(store.stored_payload("orders", 2).unwrap()["sku"], json!("b"));
    assert_eq!(store.last_requested_id("orders").await.unwrap(), 2);
}

#[tokio::test]
async fn test_stream_outage_is_reported_unavailable() {
    let store = MemoryStore::new();
    let client = Arc::new(InMemoryStreamClient::new());
    client.fail_next_read(StreamError::Timeout(500));
    let source: Arc<dyn EventSource> =
        Arc::new(StreamEventSource::new(client.clone(), "orders-stream", "orders"));
    let loader = loader_for(&store, vec![source.clone() as Arc<dyn EventSource>]);

    assert!(!loader.process_source(&*source).await);

    let entry = store.find("orders", 0).await.unwrap().unwrap();
    assert_eq!(entry.status, RequestStatus::Failed);
    assert!(entry.error.unwrap().contains("unavailable"));
}

/// Final storage that is down.
struct DownStorage;

#[async_trait]
impl EventStorage for DownStorage {
    async fn store(&self, _source_name: &str, _events: &[Event]) -> Result<(), StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }
}

#[tokio::test]
async fn test_storage_outage_is_finished_by_retry_worker() {
    let store = MemoryStore::new();
    let source = ScriptedSource::new("s");
    source.respond(Ok(events(&[10, 11])));
    let mut stores = Stores::from_backend(store.clone());
    stores.storage = Arc::new(DownStorage);
    let loader = EventLoader::new(
        vec![source.clone() as Arc<dyn EventSource>],
        &stores,
        LoaderConfig::default(),
    );

    assert!(!loader.process_source(&*source).await);

    let entry = store.find("s", 0).await.unwrap().unwrap();
    assert_eq!(entry.status, RequestStatus::Failed);
    assert_eq!(store.last_requested_id("s").await.unwrap(), 11);
    assert_eq!(store.last_stored_id("s").await.unwrap(), 0);
    assert_eq!(store.inbox_ids("s"), vec![10, 11]);
    assert!(store.stored_ids("s").is_empty());

    let worker = InboxRetryWorker::new(&Stores::from_backend(store.clone()), RetryConfig::default());
    assert!(worker.run_once().await);
    assert_eq!(store.stored_ids("s"), vec![10, 11]);
    assert_eq!(store.last_stored_id("s").await.unwrap(), 11);
    assert_eq!(store.inbox_len(), 0);
}

/// Which step of a drain transaction breaks.
#[derive(Clone, Copy)]
enum BreakAt {
    Cursor,
    Delete,
    Commit,
}

/// Drain over a real store whose transactions fail at one step.
struct BrokenDrain {
    store: MemoryStore,
    at: BreakAt,
}

#[async_trait]
impl InboxDrain for BrokenDrain {
    async fn begin(&self) -> Result<Box<dyn InboxTransaction>, StoreError> {
        Ok(Box::new(BrokenTransaction {
            inner: self.store.begin().await?,
            at: self.at,
        }))
    }
}

struct BrokenTransaction {
    inner: Box<dyn InboxTransaction>,
    at: BreakAt,
}

fn broken() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl InboxTransaction for BrokenTransaction {
    async fn claim_inbox_rows(&mut self, limit: usize) -> Result<Vec<InboxRow>, StoreError> {
        self.inner.claim_inbox_rows(limit).await
    }

    async fn insert_event(&mut self, row: &InboxRow) -> Result<(), StoreError> {
        self.inner.insert_event(row).await
    }

    async fn advance_last_stored_id(&mut self, source_name: &str, id: EventId) -> Result<(), StoreError> {
        if let BreakAt::Cursor = self.at {
            return Err(broken());
        }
        self.inner.advance_last_stored_id(source_name, id).await
    }

    async fn delete_inbox_rows(&mut self, source_name: &str, event_ids: &[EventId]) -> Result<(), StoreError> {
        if let BreakAt::Delete = self.at {
            return Err(broken());
        }
        self.inner.delete_inbox_rows(source_name, event_ids).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if let BreakAt::Commit = self.at {
            // The inner transaction is dropped, which discards it.
            return Err(broken());
        }
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

async fn assert_failed_drain_leaves_inbox_intact(at: BreakAt) {
    let store = MemoryStore::new();
    store.store_inbox("s", &events(&[1, 2])).await.unwrap();
    let mut stores = Stores::from_backend(store.clone());
    stores.drain = Arc::new(BrokenDrain {
        store: store.clone(),
        at,
    });
    let failing = InboxRetryWorker::new(&stores, RetryConfig::default());

    assert!(!failing.run_once().await);

    assert!(store.stored_ids("s").is_empty());
    assert_eq!(store.last_stored_id("s").await.unwrap(), 0);
    assert_eq!(store.inbox_ids("s"), vec![1, 2]);

    // Nothing stays claimed: a healthy worker picks the rows up.
    let worker = InboxRetryWorker::new(&Stores::from_backend(store.clone()), RetryConfig::default());
    assert!(worker.run_once().await);
    assert_eq!(store.stored_ids("s"), vec![1, 2]);
    assert_eq!(store.last_stored_id("s").await.unwrap(), 2);
    assert_eq!(store.inbox_len(), 0);
}

#[tokio::test]
async fn test_drain_cursor_failure_rolls_back() {
    assert_failed_drain_leaves_inbox_intact(BreakAt::Cursor).await;
}

#[tokio::test]
async fn test_drain_delete_failure_rolls_back() {
    assert_failed_drain_leaves_inbox_intact(BreakAt::Delete).await;
}

#[tokio::test]
async fn test_drain_commit_failure_rolls_back() {
    assert_failed_drain_leaves_inbox_intact(BreakAt::Commit).await;
}

#[tokio::test]
async fn test_stopped_loader_skips_pass() {
    let store = MemoryStore::new();
    let source = ScriptedSource::new("s");
    source.respond(Ok(events(&[1])));
    let loader = loader_for(&store, vec![source.clone() as Arc<dyn EventSource>]);

    loader.stop();

    assert!(!loader.run_pass().await);
    assert!(source.calls().is_empty());
}
