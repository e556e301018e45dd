use std::future::Future;
use std::pin::Pin;

use crate::{BrokerError, OffsetSpec, StreamRecord};

// ════════════════════════════════════════════════════════════════
//  Stream Broker Traits
// ════════════════════════════════════════════════════════════════

/// Результат подтверждения публикации от broker'а.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    /// Broker отклонил запись (nack). Причина: для логирования.
    Rejected(String),
}

impl Confirmation {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Confirmation::Confirmed)
    }
}

/// Ожидание подтверждения, коррелированное с конкретным вызовом `send`.
pub type PendingConfirm = Pin<Box<dyn Future<Output = Confirmation> + Send>>;

/// Подписка на source stream.
///
/// Доставка pull-based: следующая запись выдаётся только по вызову `recv`,
/// а broker не выдаёт новую запись, пока предыдущая не подтверждена `ack`
/// (credit = 1). Так скорость чтения равна скорости pipeline.
pub trait StreamSubscription: Send {
    /// Следующая запись в порядке stream'а.
    ///
    /// - `None`: подписка закрыта / broker остановлен.
    /// - `Some(Err(_))`: сбой доставки одной записи; запись потеряна
    ///   для этой подписки, следующий `recv` продолжит со следующей.
    #[allow(clippy::type_complexity)]
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<Result<StreamRecord, BrokerError>>> + Send + '_>>;

    /// Потребитель обработал запись `offset`: вернуть credit broker'у.
    fn ack(&mut self, offset: u64);

    /// Закрыть подписку.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;
}

/// Producer destination stream'а.
pub trait StreamProducer: Send + Sync {
    /// Имя destination stream'а.
    fn stream(&self) -> &str;

    /// Отправить payload. Ошибка здесь = сбой построения/отправки запроса;
    /// иначе возвращается future подтверждения именно этой записи.
    fn send(&self, payload: Vec<u8>) -> Result<PendingConfirm, BrokerError>;

    /// Закрыть producer. Уже выданные подтверждения остаются валидными.
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;
}

/// Сессия с broker'ом: фабрика подписок и producer'ов.
pub trait StreamBroker: Send + Sync {
    /// Открыть подписку на `stream` начиная с `start`.
    #[allow(clippy::type_complexity)]
    fn subscribe(
        &self,
        stream: &str,
        start: OffsetSpec,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn StreamSubscription>, BrokerError>> + Send + '_>>;

    /// Создать producer для `stream`.
    #[allow(clippy::type_complexity)]
    fn create_producer(
        &self,
        stream: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn StreamProducer>, BrokerError>> + Send + '_>>;

    /// Закрыть сессию. Вызывается последним при shutdown.
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;
}
