pub mod error;

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::sync::{oneshot, watch};

use relay_api::{
    BrokerError, Confirmation, OffsetSpec, PendingConfirm, StreamBroker,
    StreamProducer, StreamRecord, StreamSubscription,
};

pub use error::StreamError;

fn lock<'a, T>(m: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!(lock = %what, "mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Confirm Mode
// ═══════════════════════════════════════════════════════════════

/// Как stream отвечает на публикации.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfirmMode {
    /// Записать и подтвердить.
    #[default]
    Confirm,
    /// Не записывать, ответить nack (имитация отказа broker'а).
    Reject,
}

// ═══════════════════════════════════════════════════════════════
//  Stream
// ═══════════════════════════════════════════════════════════════

struct StreamLog {
    /// Offset первой доступной записи (растёт при retention).
    head: u64,
    entries: VecDeque<Vec<u8>>,
}

impl StreamLog {
    fn tail(&self) -> u64 {
        self.head + self.entries.len() as u64
    }

    fn get(&self, offset: u64) -> Option<&Vec<u8>> {
        let idx = offset.checked_sub(self.head)?;
        self.entries.get(usize::try_from(idx).ok()?)
    }
}

/// Append-only лог с offset-адресацией.
///
/// Offset присваивается при append и никогда не переиспользуется,
/// в том числе после truncate.
pub struct Stream {
    pub name: String,
    log: Mutex<StreamLog>,
    /// Текущий tail (следующий offset). Будит ожидающие подписки.
    tail_tx: watch::Sender<u64>,
    confirm_mode: Mutex<ConfirmMode>,
    delivery_faults: Mutex<HashSet<u64>>,
    closed: AtomicBool,
}

impl Stream {
    pub fn new(name: String) -> Self {
        let (tail_tx, _) = watch::channel(0);
        Self {
            name,
            log: Mutex::new(StreamLog { head: 0, entries: VecDeque::new() }),
            tail_tx,
            confirm_mode: Mutex::new(ConfirmMode::default()),
            delivery_faults: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Дописать запись, вернуть присвоенный offset.
    pub fn append(&self, body: Vec<u8>) -> Result<u64, StreamError> {
        if self.is_closed() {
            return Err(StreamError::Closed(self.name.clone()));
        }
        let mut log = lock(&self.log, &self.name);
        let offset = log.tail();
        log.entries.push_back(body);
        self.tail_tx.send_replace(offset + 1);
        Ok(offset)
    }

    /// Offset первой доступной записи.
    pub fn head(&self) -> u64 {
        lock(&self.log, &self.name).head
    }

    /// Offset, который получит следующая запись.
    pub fn tail(&self) -> u64 {
        lock(&self.log, &self.name).tail()
    }

    /// Retention: удалить записи с offset'ом меньше `offset`.
    pub fn truncate_before(&self, offset: u64) {
        let mut log = lock(&self.log, &self.name);
        while log.head < offset && log.entries.pop_front().is_some() {
            log.head += 1;
        }
        tracing::debug!(stream = %self.name, head = log.head, "stream truncated");
    }

    /// Снимок всех доступных записей.
    pub fn records(&self) -> Vec<StreamRecord> {
        let log = lock(&self.log, &self.name);
        log.entries
            .iter()
            .enumerate()
            .map(|(i, body)| StreamRecord {
                stream: self.name.clone(),
                offset: log.head + i as u64,
                body: body.clone(),
            })
            .collect()
    }

    pub fn set_confirm_mode(&self, mode: ConfirmMode) {
        *lock(&self.confirm_mode, &self.name) = mode;
    }

    pub fn confirm_mode(&self) -> ConfirmMode {
        *lock(&self.confirm_mode, &self.name)
    }

    /// Следующая доставка записи `offset` завершится ошибкой
    /// (сбой на стороне broker'а / клиента).
    pub fn fail_delivery(&self, offset: u64) {
        lock(&self.delivery_faults, &self.name).insert(offset);
    }

    fn take_delivery_fault(&self, offset: u64) -> bool {
        lock(&self.delivery_faults, &self.name).remove(&offset)
    }

    fn read(&self, offset: u64) -> Option<Vec<u8>> {
        lock(&self.log, &self.name).get(offset).cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // Разбудить подписки, чтобы они увидели закрытие.
        self.tail_tx.send_modify(|_| {});
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemorySubscription
// ═══════════════════════════════════════════════════════════════

/// Подписка с credit = 1: новая запись не выдаётся, пока не подтверждена
/// предыдущая.
pub struct MemorySubscription {
    stream: Arc<Stream>,
    next: u64,
    tail_rx: watch::Receiver<u64>,
    unacked: Option<u64>,
    closed: bool,
}

impl MemorySubscription {
    fn new(stream: Arc<Stream>, start: OffsetSpec) -> Self {
        let next = match start {
            OffsetSpec::First => stream.head(),
            OffsetSpec::Offset(o) => o,
        };
        let tail_rx = stream.tail_tx.subscribe();
        Self { stream, next, tail_rx, unacked: None, closed: false }
    }
}

impl StreamSubscription for MemorySubscription {
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<Result<StreamRecord, BrokerError>>> + Send + '_>> {
        Box::pin(async move {
            loop {
                if self.closed || self.stream.is_closed() {
                    return None;
                }
                if let Some(offset) = self.unacked {
                    return Some(Err(BrokerError::new(format!(
                        "stream '{}': offset {offset} delivered but not acknowledged",
                        self.stream.name
                    ))));
                }

                {
                    let _seen = self.tail_rx.borrow_and_update();
                }

                let head = self.stream.head();
                if self.next < head {
                    tracing::warn!(
                        stream = %self.stream.name,
                        position = self.next,
                        head,
                        "position removed by retention, skipping to head"
                    );
                    self.next = head;
                }

                if let Some(body) = self.stream.read(self.next) {
                    let offset = self.next;
                    self.next += 1;
                    if self.stream.take_delivery_fault(offset) {
                        return Some(Err(BrokerError::format_err(format!(
                            "stream '{}': delivery of offset {offset} failed",
                            self.stream.name
                        ))));
                    }
                    self.unacked = Some(offset);
                    return Some(Ok(StreamRecord {
                        stream: self.stream.name.clone(),
                        offset,
                        body,
                    }));
                }

                if self.tail_rx.changed().await.is_err() {
                    return None;
                }
            }
        })
    }

    fn ack(&mut self, offset: u64) {
        match self.unacked {
            Some(pending) if pending == offset => self.unacked = None,
            pending => {
                tracing::warn!(
                    stream = %self.stream.name,
                    offset,
                    pending = ?pending,
                    "ack does not match pending delivery"
                );
            }
        }
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        self.closed = true;
        Box::pin(async { Ok(()) })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryProducer
// ═══════════════════════════════════════════════════════════════

pub struct MemoryProducer {
    stream: Arc<Stream>,
    closed: AtomicBool,
}

impl StreamProducer for MemoryProducer {
    fn stream(&self) -> &str {
        &self.stream.name
    }

    fn send(&self, payload: Vec<u8>) -> Result<PendingConfirm, BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::new(format!("producer [{}] is closed", self.stream.name)));
        }

        let status = match self.stream.confirm_mode() {
            ConfirmMode::Confirm => match self.stream.append(payload) {
                Ok(offset) => {
                    tracing::trace!(stream = %self.stream.name, offset, "appended");
                    Confirmation::Confirmed
                }
                Err(e) => Confirmation::Rejected(e.to_string()),
            },
            ConfirmMode::Reject => Confirmation::Rejected(format!(
                "stream '{}' rejected the publish",
                self.stream.name
            )),
        };

        // Подтверждение приходит асинхронно, с другой задачи: как от сети.
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            let _ = tx.send(status);
        });
        Ok(Box::pin(async move {
            rx.await
                .unwrap_or_else(|_| Confirmation::Rejected("confirmation channel closed".into()))
        }))
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        self.closed.store(true, Ordering::Release);
        Box::pin(async { Ok(()) })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryBroker
// ═══════════════════════════════════════════════════════════════

/// In-process broker: реестр stream'ов. Реализует StreamBroker.
///
/// Stream'ы объявляются заранее (`declare`), как в настоящем broker'е:
/// подписка или producer на необъявленный stream это ошибка конфигурации.
#[derive(Default)]
pub struct MemoryBroker {
    streams: RwLock<HashMap<String, Arc<Stream>>>,
    closed: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Объявить stream (идемпотентно).
    pub fn declare(&self, name: &str) -> Arc<Stream> {
        let mut guard = match self.streams.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("stream registry write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Stream::new(name.to_string())))
            .clone()
    }

    pub fn stream(&self, name: &str) -> Option<Arc<Stream>> {
        let guard = match self.streams.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("stream registry read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.get(name).cloned()
    }

    /// Дописать запись напрямую (seed / внешний producer).
    pub fn publish(&self, stream: &str, body: Vec<u8>) -> Result<u64, StreamError> {
        self.get(stream)?.append(body)
    }

    /// Снимок записей stream'а.
    pub fn records(&self, stream: &str) -> Result<Vec<StreamRecord>, StreamError> {
        Ok(self.get(stream)?.records())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn get(&self, name: &str) -> Result<Arc<Stream>, StreamError> {
        self.stream(name).ok_or_else(|| StreamError::NotFound(name.to_string()))
    }

    fn open(&self, name: &str) -> Result<Arc<Stream>, StreamError> {
        if self.is_closed() {
            return Err(StreamError::SessionClosed);
        }
        self.get(name)
    }
}

impl StreamBroker for MemoryBroker {
    fn subscribe(
        &self,
        stream: &str,
        start: OffsetSpec,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn StreamSubscription>, BrokerError>> + Send + '_>> {
        let result = self.open(stream);
        Box::pin(async move {
            let s = result.map_err(StreamError::into_broker_error)?;
            tracing::debug!(stream = %s.name, %start, "subscription opened");
            Ok(Box::new(MemorySubscription::new(s, start)) as Box<dyn StreamSubscription>)
        })
    }

    fn create_producer(
        &self,
        stream: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn StreamProducer>, BrokerError>> + Send + '_>> {
        let result = self.open(stream);
        Box::pin(async move {
            let s = result.map_err(StreamError::into_broker_error)?;
            Ok(Box::new(MemoryProducer { stream: s, closed: AtomicBool::new(false) })
                as Box<dyn StreamProducer>)
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Release);
            let streams: Vec<Arc<Stream>> = match self.streams.read() {
                Ok(g) => g.values().cloned().collect(),
                Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
            };
            for s in streams {
                s.close();
            }
            tracing::info!("broker session closed");
            Ok(())
        })
    }
}
