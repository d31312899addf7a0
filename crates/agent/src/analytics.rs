use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use parley_core::domain::analytics::{AnalyticsDetail, AnalyticsEvent};
use parley_db::repositories::{ActivityRepository, RepositoryError};

use crate::collaborators::AnalyticsSink;

/// Analytics sink backed by the record store.
///
/// `record` only enqueues; a single writer task drains the queue so store
/// latency never reaches the pipeline. A full queue drops the event.
#[derive(Clone)]
pub struct StoreAnalyticsSink {
    queue: mpsc::Sender<AnalyticsEvent>,
}

impl StoreAnalyticsSink {
    pub fn spawn(
        store: Arc<dyn ActivityRepository>,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (queue, receiver) = mpsc::channel(capacity.max(1));
        let writer = tokio::spawn(run_writer(store, receiver, shutdown));
        (Self { queue }, writer)
    }
}

impl AnalyticsSink for StoreAnalyticsSink {
    fn record(&self, event: AnalyticsEvent) {
        match self.queue.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => warn!(
                event_name = "engine.analytics.dropped",
                kind = event.kind(),
                chat_id = event.chat_id.0,
                "analytics queue full; event dropped"
            ),
            Err(TrySendError::Closed(event)) => debug!(
                event_name = "engine.analytics.closed",
                kind = event.kind(),
                "analytics writer stopped; event dropped"
            ),
        }
    }
}

async fn run_writer(
    store: Arc<dyn ActivityRepository>,
    mut receiver: mpsc::Receiver<AnalyticsEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            maybe_event = receiver.recv() => match maybe_event {
                Some(event) => write_with_retry(store.as_ref(), &event).await,
                None => break,
            },
            _ = shutdown.cancelled() => {
                receiver.close();
                while let Some(event) = receiver.recv().await {
                    write_with_retry(store.as_ref(), &event).await;
                }
                break;
            }
        }
    }
    debug!(event_name = "engine.analytics.writer_stopped", "analytics writer stopped");
}

async fn write(store: &dyn ActivityRepository, event: &AnalyticsEvent) -> Result<(), RepositoryError> {
    match &event.detail {
        AnalyticsDetail::Message { context } => store.record_message(context).await,
        _ => store.record_action(event).await,
    }
}

/// Store writes are retried once; a second failure is logged and dropped.
pub async fn write_with_retry(store: &dyn ActivityRepository, event: &AnalyticsEvent) {
    let Err(first) = write(store, event).await else {
        return;
    };
    warn!(
        event_name = "engine.analytics.write_retry",
        kind = event.kind(),
        chat_id = event.chat_id.0,
        error = %first,
        "analytics write failed; retrying once"
    );

    if let Err(second) = write(store, event).await {
        warn!(
            event_name = "engine.analytics.write_failed",
            kind = event.kind(),
            chat_id = event.chat_id.0,
            error = %second,
            "analytics write failed twice; event dropped"
        );
    }
}
