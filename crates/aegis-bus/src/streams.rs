//! Ensures the `EVENTS` and `COMMANDS` JetStream streams exist (spec §4.1,
//! §6 "KV buckets" / Subject space).

use async_nats::jetstream::stream::Config as StreamConfig;
use async_nats::jetstream::Context as JetStreamContext;
use tracing::{debug, info};

use crate::error::BusError;

pub const EVENTS_STREAM: &str = "EVENTS";
pub const COMMANDS_STREAM: &str = "COMMANDS";

pub async fn ensure_core_streams(js: &JetStreamContext) -> Result<(), BusError> {
    ensure_stream(js, EVENTS_STREAM, vec!["events.>".to_string()]).await?;
    ensure_stream(js, COMMANDS_STREAM, vec!["commands.>".to_string()]).await?;
    Ok(())
}

async fn ensure_stream(js: &JetStreamContext, name: &str, subjects: Vec<String>) -> Result<(), BusError> {
    let config = StreamConfig {
        name: name.to_string(),
        subjects,
        ..Default::default()
    };

    match js.get_stream(name).await {
        Ok(_) => {
            debug!(stream = name, "jetstream stream already present");
            Ok(())
        }
        Err(_) => {
            info!(stream = name, "creating jetstream stream");
            js.create_stream(config).await?;
            Ok(())
        }
    }
}
