//! Bounded ingestion worker pool.
//!
//! A fixed set of workers drains a bounded queue of document ids; each
//! id is one full pipeline run. Backpressure is caller-runs: when the
//! queue is full the submitting task executes the ingestion itself
//! instead of the request being dropped or rejected. Per-document
//! serialization is not this pool's job — the CAS at every state
//! transition guarantees a single writer even if the same id is queued
//! twice.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::pipeline::Pipeline;

#[derive(Clone)]
pub struct IngestQueue {
    tx: mpsc::Sender<String>,
    pipeline: Arc<Pipeline>,
}

/// How a submission was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    Queued,
    /// Queue was full; the caller ran the pipeline inline.
    RanInline,
}

impl IngestQueue {
    /// Spawn `workers` drain tasks over a queue of `capacity` ids.
    pub fn start(pipeline: Arc<Pipeline>, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<String>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        for worker_id in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                loop {
                    let next = { rx.lock().await.recv().await };
                    let Some(document_id) = next else {
                        tracing::debug!(worker_id, "ingest queue closed, worker exiting");
                        break;
                    };
                    tracing::debug!(worker_id, document_id, "worker picked up document");
                    if let Err(e) = pipeline.ingest(&document_id).await {
                        tracing::error!(worker_id, document_id, error = %e, "ingest run errored");
                    }
                }
            });
        }

        Self { tx, pipeline }
    }

    /// Submit a document for ingestion. Runs inline when the backlog is
    /// full, so upload latency degrades under load instead of work being
    /// lost.
    pub async fn submit(&self, document_id: String) -> anyhow::Result<Scheduled> {
        match self.tx.try_send(document_id) {
            Ok(()) => Ok(Scheduled::Queued),
            Err(mpsc::error::TrySendError::Full(document_id)) => {
                tracing::warn!(document_id, "ingest queue full, running on caller");
                self.pipeline.ingest(&document_id).await?;
                Ok(Scheduled::RanInline)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                anyhow::bail!("ingest queue is shut down")
            }
        }
    }
}
