//! Batch orchestration
//!
//! Sequential, one engine process at a time. Each request gets its own chain
//! and state machine; a failed file never stops the batch.

use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::core::ConversionRequest;
use crate::engine::fallback::{
    ConversionEvent, ConversionOutcome, FallbackChain, FallbackMachine, MachineSettings, OutcomeKind,
};
use crate::engine::hardware::CapabilityTable;
use crate::engine::monitor::{AttemptRunner, CancelToken};

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Report chains without launching anything
    pub dry_run: bool,
    /// Convert even when the output already exists
    pub overwrite: bool,
    pub disable_hardware: bool,
    pub machine: MachineSettings,
}

/// Notifications for the presentation layer
#[derive(Debug, Clone)]
pub enum BatchEvent {
    FileStarted {
        index: usize,
        total: usize,
        request_id: Uuid,
        input: PathBuf,
    },
    Conversion {
        request_id: Uuid,
        event: ConversionEvent,
    },
    FileFinished {
        index: usize,
        outcome: Box<ConversionOutcome>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub skipped: usize,
    pub planned: usize,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[ConversionOutcome]) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome.kind {
                OutcomeKind::Succeeded { .. } => summary.succeeded += 1,
                OutcomeKind::ExhaustedFailed => summary.failed += 1,
                OutcomeKind::Cancelled => summary.cancelled += 1,
                OutcomeKind::Skipped => summary.skipped += 1,
                OutcomeKind::DryRun { .. } => summary.planned += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<ConversionOutcome>,
    pub summary: BatchSummary,
}

/// Process one request to a terminal outcome
pub fn convert_one(
    request: &ConversionRequest,
    table: &CapabilityTable,
    options: &BatchOptions,
    runner: &mut dyn AttemptRunner,
    on_event: &mut dyn FnMut(ConversionEvent),
    cancel: &CancelToken,
) -> ConversionOutcome {
    if cancel.is_cancelled() {
        return ConversionOutcome::cancelled_before_start(request);
    }

    if !options.overwrite && request.resolved_output_path().exists() {
        info!(output = %request.resolved_output_path().display(), "output exists, skipping");
        return ConversionOutcome::skipped(request);
    }

    let chain = FallbackChain::build(table, request, options.disable_hardware);

    if options.dry_run {
        return ConversionOutcome::dry_run(request, &chain);
    }

    FallbackMachine::new(request, table, chain, &options.machine).drive(runner, on_event, cancel)
}

/// Run every request in order and aggregate the outcomes
pub fn run_batch(
    requests: &[ConversionRequest],
    table: &CapabilityTable,
    options: &BatchOptions,
    runner: &mut dyn AttemptRunner,
    on_event: &mut dyn FnMut(BatchEvent),
    cancel: &CancelToken,
) -> BatchReport {
    let total = requests.len();
    let mut outcomes = Vec::with_capacity(total);

    for (index, request) in requests.iter().enumerate() {
        on_event(BatchEvent::FileStarted {
            index,
            total,
            request_id: request.id,
            input: request.input_path.clone(),
        });

        let request_id = request.id;
        let outcome = convert_one(
            request,
            table,
            options,
            runner,
            &mut |event| on_event(BatchEvent::Conversion { request_id, event }),
            cancel,
        );

        match outcome.kind {
            OutcomeKind::ExhaustedFailed => {
                warn!(input = %request.input_path.display(), reason = %outcome.reason, "conversion failed")
            }
            _ => info!(input = %request.input_path.display(), reason = %outcome.reason, "file done"),
        }

        on_event(BatchEvent::FileFinished {
            index,
            outcome: Box::new(outcome.clone()),
        });
        outcomes.push(outcome);
    }

    let summary = BatchSummary::from_outcomes(&outcomes);
    info!(
        total = summary.total,
        succeeded = summary.succeeded,
        failed = summary.failed,
        cancelled = summary.cancelled,
        skipped = summary.skipped,
        "batch finished"
    );
    BatchReport { outcomes, summary }
}
