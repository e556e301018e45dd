use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════
//  Offsets
// ════════════════════════════════════════════════════════════════

/// Позиция старта подписки на stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetSpec {
    /// Первая доступная запись stream'а (с учётом retention).
    First,
    /// Явный offset (inclusive).
    Offset(u64),
}

impl OffsetSpec {
    /// Позиция возобновления после checkpoint'а: `checkpoint + 1`,
    /// либо начало stream'а если checkpoint'а нет.
    pub fn resume_after(checkpoint: Option<u64>) -> Self {
        match checkpoint {
            Some(offset) => OffsetSpec::Offset(offset.saturating_add(1)),
            None => OffsetSpec::First,
        }
    }
}

impl std::fmt::Display for OffsetSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OffsetSpec::First => f.write_str("first"),
            OffsetSpec::Offset(o) => write!(f, "{o}"),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  StreamRecord
// ════════════════════════════════════════════════════════════════

/// Сырая запись, доставленная подпиской. Существует только в транзите.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamRecord {
    /// Имя source stream'а.
    pub stream: String,
    /// Broker-assigned offset, монотонно растёт в пределах stream'а.
    pub offset: u64,
    /// Payload в wire-формате.
    pub body: Vec<u8>,
}

// ════════════════════════════════════════════════════════════════
//  Envelope
// ════════════════════════════════════════════════════════════════

/// Поставщик данных, которым помечен envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provider {
    Bybit,
    /// Результат анализа bybit-потока.
    BybitTa,
    CryptoScout,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Bybit => f.write_str("BYBIT"),
            Provider::BybitTa => f.write_str("BYBIT_TA"),
            Provider::CryptoScout => f.write_str("CRYPTO_SCOUT"),
        }
    }
}

/// Декодированный бизнес-payload: `{provider, source, data}`.
///
/// Принадлежит только текущей стадии pipeline: передаётся по значению,
/// между route'ами не разделяется.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub provider: Provider,
    pub source: String,
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl Envelope {
    pub fn new(
        provider: Provider,
        source: impl Into<String>,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self { provider, source: source.into(), data }
    }

    /// Распарсить envelope из JSON-байтов.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Сериализовать envelope в JSON-байты для публикации.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Тот же payload с другим provider'ом.
    pub fn relabel(self, provider: Provider) -> Self {
        Self { provider, ..self }
    }
}

// ════════════════════════════════════════════════════════════════
//  PipelineRecord
// ════════════════════════════════════════════════════════════════

/// Единица передачи между Decoder / Transformer / Sink.
///
/// `envelope == None` означает «закоммитить offset, ничего не публиковать»:
/// так offset продвигается для нерелевантных и сбойных записей.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineRecord {
    pub stream: String,
    pub offset: u64,
    pub envelope: Option<Envelope>,
}

impl PipelineRecord {
    pub fn new(stream: impl Into<String>, offset: u64, envelope: Envelope) -> Self {
        Self { stream: stream.into(), offset, envelope: Some(envelope) }
    }

    /// Запись без payload'а: только commit offset'а.
    pub fn skip(stream: impl Into<String>, offset: u64) -> Self {
        Self { stream: stream.into(), offset, envelope: None }
    }

    pub fn is_skip(&self) -> bool {
        self.envelope.is_none()
    }
}

// ════════════════════════════════════════════════════════════════
//  Checkpoint
// ════════════════════════════════════════════════════════════════

/// Последний закоммиченный offset stream'а. Единственная persistent сущность.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stream: String,
    pub offset: u64,
}
