use relay_api::{Checkpoint, OffsetStore, StoreError};

use crate::config::{OffsetGetArgs, OffsetSetArgs, ServerConfig};
use crate::error::ServerError;

/// `offsets get`: напечатать checkpoint stream'а (`-` если его нет).
pub async fn get(args: OffsetGetArgs, config: ServerConfig) -> Result<(), ServerError> {
    let store_config = config.offsets;
    let stream = args.stream.clone();
    let checkpoint = tokio::task::spawn_blocking(move || -> Result<Option<Checkpoint>, StoreError> {
        let store = offset_store::open(&store_config)?;
        store.checkpoint(&stream)
    })
    .await??;

    match checkpoint {
        Some(Checkpoint { stream, offset }) => println!("{stream}\t{offset}"),
        None => println!("{}\t-", args.stream),
    }
    Ok(())
}

/// `offsets set`: перезаписать checkpoint. Route подхватит его при старте.
pub async fn set(args: OffsetSetArgs, config: ServerConfig) -> Result<(), ServerError> {
    let store_config = config.offsets;
    let stream = args.stream.clone();
    let offset = args.offset;
    let backend = store_config.backend_name();
    tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
        let store = offset_store::open(&store_config)?;
        store.upsert(&stream, offset)
    })
    .await??;

    tracing::info!(stream = %args.stream, offset, backend, "checkpoint overwritten");
    Ok(())
}
