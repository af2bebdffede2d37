use crate::handler::FaultPointHandler;
use async_trait::async_trait;
use itops_core::model::RawEvent;
use itops_core::{Error, Result};
use itops_ingestion::{Message, MessageHandler, Standardizer};
use itops_storage::repo::RawEventRepository;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Standardizes, persists and forwards each raw-events message
#[derive(Debug)]
pub struct IngestStage {
    standardizer: Arc<dyn Standardizer>,
    raw_events: Arc<dyn RawEventRepository>,
    fault_points: Arc<dyn FaultPointHandler>,
}

impl IngestStage {
    pub fn new(
        standardizer: Arc<dyn Standardizer>,
        raw_events: Arc<dyn RawEventRepository>,
        fault_points: Arc<dyn FaultPointHandler>,
    ) -> Self {
        Self {
            standardizer,
            raw_events,
            fault_points,
        }
    }

    /// Run one payload through the pipeline
    #[instrument(skip(self, payload), fields(service = "ingest", source = self.standardizer.source()))]
    pub async fn ingest(&self, payload: &[u8]) -> Result<RawEvent> {
        let started = Instant::now();
        let event = self.standardizer.standardize(payload).await?;
        self.raw_events.upsert(&event).await?;
        metrics::counter!(
            "itops_events_ingested_total",
            "source" => self.standardizer.source().to_string()
        )
        .increment(1);

        self.fault_points.handle_event(&event).await?;
        debug!(
            event_id = event.event_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Event ingested"
        );
        Ok(event)
    }
}

#[async_trait]
impl MessageHandler for IngestStage {
    async fn handle(&self, message: &Message) -> Result<()> {
        match self.ingest(&message.payload).await {
            Ok(_) => Ok(()),
            // Bad payloads are discarded; the offset is committed regardless.
            Err(e @ (Error::Validation(_) | Error::NotFound(_))) => {
                warn!(
                    offset = message.offset,
                    key = %message.key_str(),
                    error = %e,
                    "Discarding unprocessable event"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
