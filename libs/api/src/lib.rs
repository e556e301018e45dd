pub mod broker;
pub mod error;
pub mod store;
pub mod types;

pub use broker::{Confirmation, PendingConfirm, StreamBroker, StreamProducer, StreamSubscription};
pub use error::{BrokerError, ErrorKind, StoreError};
pub use store::OffsetStore;
pub use types::{Checkpoint, Envelope, OffsetSpec, PipelineRecord, Provider, StreamRecord};
