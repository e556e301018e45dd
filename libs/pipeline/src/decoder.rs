use relay_api::{Envelope, PipelineRecord, StreamRecord};

use crate::error::DecodeError;

/// Разбор wire-байтов в [`PipelineRecord`]. Provider-специфичной логики нет.
pub fn try_decode(body: &[u8]) -> Result<Envelope, DecodeError> {
    Ok(Envelope::from_slice(body)?)
}

/// Декодировать запись; при сбое: skip-запись с тем же offset'ом, чтобы
/// sink всё равно закоммитил её и stream не застрял на плохих байтах.
pub fn decode(route: &str, record: StreamRecord) -> PipelineRecord {
    let StreamRecord { stream, offset, body } = record;
    match try_decode(&body) {
        Ok(envelope) => PipelineRecord::new(stream, offset, envelope),
        Err(e) => {
            tracing::error!(
                route = %route,
                stream = %stream,
                offset,
                bytes = body.len(),
                error = %e,
                "decode failed, skipping record"
            );
            PipelineRecord::skip(stream, offset)
        }
    }
}
