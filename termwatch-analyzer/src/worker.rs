//! Background analysis worker: claims eligible changes in batches and
//! processes each with per-item isolation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::pipeline::AnalyzerContext;
use crate::processor::ChangeProcessor;

/// Maximum changes claimed per cycle.
pub const BATCH_SIZE: usize = 10;
/// Pause when a cycle finds no eligible work.
pub const IDLE_WAIT: Duration = Duration::from_secs(30);
/// Throttling pause between batches.
pub const BATCH_PAUSE: Duration = Duration::from_secs(5);
/// Backoff after a systemic failure of the selection step.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(60);

/// Outcome of one worker cycle, deciding the pause before the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    IdleWait,
    BatchProcessing,
    ErrorBackoff,
}

impl WorkerPhase {
    /// Sleep the loop observes after a cycle in this phase.
    pub const fn pause(self) -> Duration {
        match self {
            Self::IdleWait => IDLE_WAIT,
            Self::BatchProcessing => BATCH_PAUSE,
            Self::ErrorBackoff => ERROR_BACKOFF,
        }
    }
}

/// Perpetual analysis loop.
///
/// Runs until [`AnalysisWorker::stop`] is called; the inter-cycle sleep
/// is interrupted immediately on shutdown.
pub struct AnalysisWorker {
    context: Arc<AnalyzerContext>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl AnalysisWorker {
    pub fn new(context: Arc<AnalyzerContext>) -> Self {
        Self {
            context,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Start the worker loop.
    pub async fn start(&mut self) -> Result<()> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let processor = ChangeProcessor::new(Arc::clone(&self.context));
        let handle = tokio::spawn(async move {
            tracing::info!("Analysis worker started");
            loop {
                let phase = run_cycle(&processor).await;
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Analysis worker shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(phase.pause()) => {}
                }
            }
        });
        self.handle = Some(handle);

        Ok(())
    }

    /// Stop the worker and wait for the loop to exit.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

/// One claim-and-process cycle.
///
/// Per-item failures are isolated: the item's claim is released so it
/// stays eligible, and its siblings still complete. A failure of the
/// claim step itself aborts the cycle into error backoff.
async fn run_cycle(processor: &ChangeProcessor) -> WorkerPhase {
    let store = processor.context().store();

    let batch = match store.claim_batch(BATCH_SIZE) {
        Ok(batch) => batch,
        Err(e) => {
            tracing::error!(error = %e, "Analysis worker cycle failed");
            return WorkerPhase::ErrorBackoff;
        }
    };

    if batch.is_empty() {
        return WorkerPhase::IdleWait;
    }

    tracing::info!(count = batch.len(), "Found changes to analyze");

    for change in &batch {
        if let Err(e) = processor.process_change(change).await {
            tracing::error!(change_id = %change.id, error = %e, "Failed to analyze change");
            if let Err(release_err) = store.release_claim(&change.id) {
                tracing::error!(
                    change_id = %change.id,
                    error = %release_err,
                    "Failed to release claim"
                );
            }
        }
    }

    WorkerPhase::BatchProcessing
}
