#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::Semaphore;

use offset_store::MemoryOffsetStore;
use relay_api::{
    BrokerError, Confirmation, OffsetSpec, OffsetStore, PendingConfirm, StoreError, StreamBroker,
    StreamProducer, StreamSubscription,
};
use stream_engine::MemoryBroker;

// ═══════════════════════════════════════════════════════════════
//  Payloads
// ═══════════════════════════════════════════════════════════════

pub fn envelope_bytes(provider: &str, seq: u64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "provider": provider,
        "source": "kline.1m",
        "data": { "seq": seq, "symbol": "BTCUSDT" }
    }))
    .unwrap()
}

/// `data.seq` опубликованного envelope'а.
pub fn seq_of(body: &[u8]) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value["data"]["seq"].as_u64()
}

pub fn provider_of(body: &[u8]) -> String {
    let value: serde_json::Value = serde_json::from_slice(body).unwrap();
    value["provider"].as_str().unwrap().to_string()
}

/// Объявить stream и записать `count` envelope'ов с `seq == offset`.
pub fn seed(broker: &MemoryBroker, stream: &str, provider: &str, count: u64) {
    let s = broker.declare(stream);
    for seq in 0..count {
        assert_eq!(s.append(envelope_bytes(provider, seq)).unwrap(), seq);
    }
}

pub fn published_seqs(broker: &MemoryBroker, stream: &str) -> Vec<u64> {
    broker
        .records(stream)
        .unwrap()
        .iter()
        .filter_map(|r| seq_of(&r.body))
        .collect()
}

pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ═══════════════════════════════════════════════════════════════
//  Recording offset store
// ═══════════════════════════════════════════════════════════════

/// In-memory store, запоминающий каждый вызов `upsert`.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryOffsetStore,
    upserts: Mutex<Vec<(String, u64)>>,
    fail_get: bool,
    fail_upsert: bool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoint(stream: &str, offset: u64) -> Self {
        Self { inner: MemoryOffsetStore::with_offsets([(stream.to_string(), offset)]), ..Self::default() }
    }

    pub fn failing_get() -> Self {
        Self { fail_get: true, ..Self::default() }
    }

    pub fn failing_upsert() -> Self {
        Self { fail_upsert: true, ..Self::default() }
    }

    pub fn upserts(&self, stream: &str) -> Vec<u64> {
        self.upserts
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == stream)
            .map(|(_, o)| *o)
            .collect()
    }

    pub fn checkpoint(&self, stream: &str) -> Option<u64> {
        self.inner.get(stream).unwrap()
    }
}

impl OffsetStore for RecordingStore {
    fn get(&self, stream: &str) -> Result<Option<u64>, StoreError> {
        if self.fail_get {
            return Err(StoreError::Backend("connection refused".into()));
        }
        self.inner.get(stream)
    }

    fn upsert(&self, stream: &str, offset: u64) -> Result<(), StoreError> {
        self.upserts.lock().unwrap().push((stream.to_string(), offset));
        if self.fail_upsert {
            return Err(StoreError::Backend("could not serialize access".into()));
        }
        self.inner.upsert(stream, offset)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scripted broker: MemoryBroker с управляемыми producer'ами
// ═══════════════════════════════════════════════════════════════

/// Поведение producer'а destination stream'а.
#[derive(Clone, Default)]
pub struct ProducerScript {
    /// Отклонить публикацию envelope'а с этим `data.seq`.
    pub reject_seq: Option<u64>,
    /// Подтверждение ждёт permit'а (0 permit'ов: держать до release).
    pub gate: Option<Arc<Semaphore>>,
    pub delay: Option<Duration>,
    pub in_flight: Arc<AtomicUsize>,
    pub peak_in_flight: Arc<AtomicUsize>,
}

impl ProducerScript {
    pub fn reject(seq: u64) -> Self {
        Self { reject_seq: Some(seq), ..Self::default() }
    }

    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (Self { gate: Some(gate.clone()), ..Self::default() }, gate)
    }

    pub fn delayed(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

struct ScriptedProducer {
    inner: Box<dyn StreamProducer>,
    script: ProducerScript,
}

impl StreamProducer for ScriptedProducer {
    fn stream(&self) -> &str {
        self.inner.stream()
    }

    fn send(&self, payload: Vec<u8>) -> Result<PendingConfirm, BrokerError> {
        let seq = seq_of(&payload);
        if seq.is_some() && seq == self.script.reject_seq {
            return Ok(Box::pin(async { Confirmation::Rejected("stream quota exceeded".into()) }));
        }

        let now = self.script.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.script.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let pending = self.inner.send(payload)?;
        let gate = self.script.gate.clone();
        let delay = self.script.delay;
        let in_flight = self.script.in_flight.clone();
        Ok(Box::pin(async move {
            if let Some(gate) = gate
                && let Ok(permit) = gate.acquire().await
            {
                permit.forget();
            }
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let confirmation = pending.await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            confirmation
        }))
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        self.inner.close()
    }
}

pub struct ScriptedBroker {
    pub inner: Arc<MemoryBroker>,
    scripts: HashMap<String, ProducerScript>,
}

impl ScriptedBroker {
    pub fn new(inner: Arc<MemoryBroker>) -> Self {
        Self { inner, scripts: HashMap::new() }
    }

    pub fn script(mut self, stream: &str, script: ProducerScript) -> Self {
        self.scripts.insert(stream.to_string(), script);
        self
    }
}

impl StreamBroker for ScriptedBroker {
    fn subscribe(
        &self,
        stream: &str,
        start: OffsetSpec,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn StreamSubscription>, BrokerError>> + Send + '_>> {
        self.inner.subscribe(stream, start)
    }

    fn create_producer(
        &self,
        stream: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn StreamProducer>, BrokerError>> + Send + '_>> {
        let script = self.scripts.get(stream).cloned();
        let inner = self.inner.create_producer(stream);
        Box::pin(async move {
            let producer = inner.await?;
            Ok(match script {
                Some(script) => Box::new(ScriptedProducer { inner: producer, script }) as Box<dyn StreamProducer>,
                None => producer,
            })
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        self.inner.close()
    }
}
