// Background batch worker: runs the orchestrator off the presentation thread

use anyhow::Result;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use uuid::Uuid;

use super::batch::{BatchEvent, BatchOptions, BatchReport, run_batch};
use super::core::{BackendId, ConversionRequest, HdrMode, ProgressEvent};
use super::fallback::{ConversionEvent, ConversionOutcome};
use super::hardware::CapabilityTable;
use super::monitor::{AttemptRunner, AttemptStatus, CancelToken};

/// Message from the worker to the presentation thread
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    FileStarted {
        request_id: Uuid,
        index: usize,
        total: usize,
        input: std::path::PathBuf,
    },

    AttemptStarted {
        request_id: Uuid,
        number: usize,
        backend: BackendId,
        hdr_mode: HdrMode,
        encoder: &'static str,
    },

    /// Progress update during encoding
    Progress {
        request_id: Uuid,
        backend: BackendId,
        hdr_mode: HdrMode,
        progress: ProgressEvent,
    },

    AttemptFinished {
        request_id: Uuid,
        number: usize,
        status: AttemptStatus,
    },

    FileFinished {
        index: usize,
        outcome: Box<ConversionOutcome>,
    },

    /// Last message on the channel
    BatchFinished(BatchReport),
}

impl From<BatchEvent> for WorkerMessage {
    fn from(event: BatchEvent) -> Self {
        match event {
            BatchEvent::FileStarted {
                index,
                total,
                request_id,
                input,
            } => Self::FileStarted {
                request_id,
                index,
                total,
                input,
            },
            BatchEvent::Conversion { request_id, event } => match event {
                ConversionEvent::AttemptStarted {
                    number,
                    backend,
                    hdr_mode,
                    encoder,
                } => Self::AttemptStarted {
                    request_id,
                    number,
                    backend,
                    hdr_mode,
                    encoder,
                },
                ConversionEvent::Progress {
                    backend,
                    hdr_mode,
                    progress,
                } => Self::Progress {
                    request_id,
                    backend,
                    hdr_mode,
                    progress,
                },
                ConversionEvent::AttemptFinished { number, status } => Self::AttemptFinished {
                    request_id,
                    number,
                    status,
                },
            },
            BatchEvent::FileFinished { index, outcome } => Self::FileFinished { index, outcome },
        }
    }
}

/// Handle to a batch running on its own thread
pub struct BatchWorker {
    rx: Receiver<WorkerMessage>,
    handle: JoinHandle<()>,
    cancel: CancelToken,
}

impl BatchWorker {
    /// Start the batch. Messages arrive on [`BatchWorker::receiver`] and end
    /// with [`WorkerMessage::BatchFinished`].
    pub fn spawn<R>(
        requests: Vec<ConversionRequest>,
        table: CapabilityTable,
        options: BatchOptions,
        mut runner: R,
        cancel: CancelToken,
    ) -> Self
    where
        R: AttemptRunner + Send + 'static,
    {
        let (tx, rx): (Sender<WorkerMessage>, Receiver<WorkerMessage>) = mpsc::channel();
        let worker_cancel = cancel.clone();

        let handle = thread::spawn(move || {
            let tx_events = tx.clone();
            let report = run_batch(
                &requests,
                &table,
                &options,
                &mut runner,
                &mut |event| {
                    // Receiver gone means nobody is listening; keep encoding anyway
                    let _ = tx_events.send(event.into());
                },
                &worker_cancel,
            );
            let _ = tx.send(WorkerMessage::BatchFinished(report));
        });

        Self { rx, handle, cancel }
    }

    /// Get the receiver for worker messages
    pub fn receiver(&self) -> &Receiver<WorkerMessage> {
        &self.rx
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wait for the worker thread to exit
    pub fn join(self) -> Result<()> {
        self.handle
            .join()
            .map_err(|_| anyhow::anyhow!("batch worker thread panicked"))
    }
}
