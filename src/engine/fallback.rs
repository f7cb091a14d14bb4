//! Fallback chain and state machine
//!
//! A [`FallbackChain`] is the fixed, ordered list of (backend, HDR mode)
//! candidates for one request. [`FallbackMachine`] walks it one attempt at a
//! time, advancing on recoverable failures and stopping on success, fatal
//! failure, exhaustion or cancellation. Every failure ends up as a terminal
//! [`ConversionOutcome`]; nothing escapes as an error.

use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::classify::RecoverableReason;
use crate::engine::core::{BackendId, BuildOptions, ConversionRequest, HdrMode, HdrTier, ProgressEvent, build_plan};
use crate::engine::hardware::CapabilityTable;
use crate::engine::monitor::{AttemptResult, AttemptRunner, AttemptStatus, CancelToken};

/// One (backend, HDR mode) entry of a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Candidate {
    pub backend: BackendId,
    pub hdr_mode: HdrMode,
}

impl Candidate {
    pub fn new(backend: BackendId, hdr_mode: HdrMode) -> Self {
        Self { backend, hdr_mode }
    }

    pub fn label(&self) -> String {
        format!("{}/{}", self.backend, self.hdr_mode)
    }
}

/// Ordered candidates for one request. Never empty, no duplicates, and the
/// last entry is always software with HDR disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackChain {
    candidates: Vec<Candidate>,
}

impl FallbackChain {
    /// Compute the chain from the capability table and the request.
    ///
    /// HDR requests try GPU explicit values, then software copy-metadata,
    /// then GPU without HDR, then software without HDR. SDR requests try each
    /// GPU then software.
    pub fn build(table: &CapabilityTable, request: &ConversionRequest, disable_hardware: bool) -> Self {
        let codec = request.output_codec;
        let gpus: Vec<_> = if disable_hardware {
            Vec::new()
        } else {
            table.hardware_for(codec).collect()
        };
        let software_tier = table
            .software()
            .map(|b| b.hdr_tier)
            .unwrap_or(HdrTier::None);

        let mut chain = Self {
            candidates: Vec::new(),
        };

        if request.effective_hdr_intent() {
            for gpu in gpus.iter().filter(|b| b.hdr_tier >= HdrTier::Basic) {
                chain.push(Candidate::new(gpu.id, HdrMode::ExplicitValues));
            }
            if software_tier == HdrTier::Full {
                chain.push(Candidate::new(BackendId::Software, HdrMode::CopyMetadata));
            }
        }
        for gpu in &gpus {
            chain.push(Candidate::new(gpu.id, HdrMode::Disabled));
        }
        chain.push(Candidate::new(BackendId::Software, HdrMode::Disabled));

        chain
    }

    fn push(&mut self, candidate: Candidate) {
        if !self.candidates.contains(&candidate) {
            self.candidates.push(candidate);
        }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn get(&self, index: usize) -> Option<Candidate> {
        self.candidates.get(index).copied()
    }

    pub fn first(&self) -> Option<Candidate> {
        self.get(0)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FallbackState {
    Pending { index: usize },
    Running { index: usize },
    Succeeded { index: usize },
    ExhaustedFailed,
    Cancelled,
}

impl FallbackState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::ExhaustedFailed | Self::Cancelled
        )
    }
}

/// A state change and why it happened
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub from: FallbackState,
    pub to: FallbackState,
    pub reason: String,
}

/// One executed candidate
#[derive(Debug, Clone, Serialize)]
pub struct Attempt {
    /// 1-based
    pub number: usize,
    pub candidate: Candidate,
    pub encoder: &'static str,
    /// Mode actually planned; the builder may downgrade the candidate's mode
    pub hdr_mode: HdrMode,
    pub args: Vec<String>,
    pub warnings: Vec<String>,
    pub policy_notes: Vec<String>,
    pub result: AttemptResult,
}

/// Presentation-facing notifications while a request is processed
#[derive(Debug, Clone)]
pub enum ConversionEvent {
    AttemptStarted {
        number: usize,
        backend: BackendId,
        hdr_mode: HdrMode,
        encoder: &'static str,
    },
    Progress {
        backend: BackendId,
        hdr_mode: HdrMode,
        progress: ProgressEvent,
    },
    AttemptFinished {
        number: usize,
        status: AttemptStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OutcomeKind {
    Succeeded {
        attempt: usize,
        backend: BackendId,
        hdr_mode: HdrMode,
    },
    ExhaustedFailed,
    Cancelled,
    /// Output already existed and overwriting was off
    Skipped,
    /// Preview only; nothing was launched
    DryRun {
        first: Option<Candidate>,
        chain: Vec<Candidate>,
    },
}

/// Final per-file record
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutcome {
    pub request_id: Uuid,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub kind: OutcomeKind,
    pub attempts: Vec<Attempt>,
    pub transitions: Vec<Transition>,
    /// Human-readable summary of how the request ended
    pub reason: String,
    pub warnings: Vec<String>,
    pub input_size: Option<u64>,
    pub output_size: Option<u64>,
}

impl ConversionOutcome {
    fn bare(request: &ConversionRequest, kind: OutcomeKind, reason: impl Into<String>) -> Self {
        Self {
            request_id: request.id,
            input_path: request.input_path.clone(),
            output_path: request.resolved_output_path(),
            kind,
            attempts: Vec::new(),
            transitions: Vec::new(),
            reason: reason.into(),
            warnings: Vec::new(),
            input_size: fs::metadata(&request.input_path).ok().map(|m| m.len()),
            output_size: None,
        }
    }

    pub fn skipped(request: &ConversionRequest) -> Self {
        Self::bare(request, OutcomeKind::Skipped, "output already exists")
    }

    pub fn dry_run(request: &ConversionRequest, chain: &FallbackChain) -> Self {
        let reason = match chain.first() {
            Some(first) => format!("would start with {} ({} candidates)", first.label(), chain.len()),
            None => "no candidates".to_string(),
        };
        Self::bare(
            request,
            OutcomeKind::DryRun {
                first: chain.first(),
                chain: chain.candidates().to_vec(),
            },
            reason,
        )
    }

    pub fn cancelled_before_start(request: &ConversionRequest) -> Self {
        Self::bare(request, OutcomeKind::Cancelled, "cancelled before start")
    }

    pub fn is_success(&self) -> bool {
        matches!(self.kind, OutcomeKind::Succeeded { .. })
    }

    /// Output size relative to input, in percent (negative means smaller)
    pub fn size_change_pct(&self) -> Option<f64> {
        match (self.input_size, self.output_size) {
            (Some(input), Some(output)) if input > 0 => {
                Some((output as f64 - input as f64) / input as f64 * 100.0)
            }
            _ => None,
        }
    }
}

/// Machine-wide knobs
#[derive(Debug, Clone)]
pub struct MachineSettings {
    pub build: BuildOptions,
    /// Outputs smaller than this after exit 0 count as empty
    pub min_output_bytes: u64,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            build: BuildOptions::default(),
            min_output_bytes: 1024,
        }
    }
}

/// Drives one request through its chain
pub struct FallbackMachine<'a> {
    request: &'a ConversionRequest,
    table: &'a CapabilityTable,
    chain: FallbackChain,
    settings: &'a MachineSettings,
    state: FallbackState,
    attempts: Vec<Attempt>,
    transitions: Vec<Transition>,
    warnings: Vec<String>,
    /// Description of the failure that ended or advanced the chain most recently
    last_failure: Option<String>,
    first_recoverable: Option<RecoverableReason>,
}

impl<'a> FallbackMachine<'a> {
    pub fn new(
        request: &'a ConversionRequest,
        table: &'a CapabilityTable,
        chain: FallbackChain,
        settings: &'a MachineSettings,
    ) -> Self {
        let state = if chain.is_empty() {
            FallbackState::ExhaustedFailed
        } else {
            FallbackState::Pending { index: 0 }
        };
        Self {
            request,
            table,
            chain,
            settings,
            state,
            attempts: Vec::new(),
            transitions: Vec::new(),
            warnings: Vec::new(),
            last_failure: None,
            first_recoverable: None,
        }
    }

    pub fn state(&self) -> FallbackState {
        self.state
    }

    pub fn chain(&self) -> &FallbackChain {
        &self.chain
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    fn transition(&mut self, to: FallbackState, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(from = ?self.state, to = ?to, reason = %reason, "fallback transition");
        self.transitions.push(Transition {
            from: self.state,
            to,
            reason,
        });
        self.state = to;
    }

    /// Run the pending candidate (if any) and advance the state.
    /// Terminal states are left untouched.
    pub fn step(
        &mut self,
        runner: &mut dyn AttemptRunner,
        on_event: &mut dyn FnMut(ConversionEvent),
        cancel: &CancelToken,
    ) -> FallbackState {
        let index = match self.state {
            FallbackState::Pending { index } => index,
            _ => return self.state,
        };

        if cancel.is_cancelled() {
            self.transition(FallbackState::Cancelled, "cancelled before attempt");
            return self.state;
        }

        let Some(candidate) = self.chain.get(index) else {
            self.transition(FallbackState::ExhaustedFailed, "fallback chain exhausted");
            return self.state;
        };

        let plan = match self.table.backend(candidate.backend) {
            Some(backend) => build_plan(self.request, backend, candidate.hdr_mode, &self.settings.build),
            None => Err(crate::engine::core::BuildError::UnsupportedPair {
                backend: candidate.backend,
                codec: self.request.output_codec,
            }),
        };
        let plan = match plan {
            Ok(plan) => plan,
            Err(e) => {
                error!(candidate = %candidate.label(), error = %e, "chain produced an unbuildable candidate");
                self.last_failure = Some(e.to_string());
                self.transition(FallbackState::ExhaustedFailed, e.to_string());
                return self.state;
            }
        };

        for w in plan.warnings.iter().chain(plan.policy_notes.iter()) {
            if !self.warnings.contains(w) {
                warn!(input = %self.request.input_path.display(), "{}", w);
                self.warnings.push(w.clone());
            }
        }

        if let Some(parent) = plan.output_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    let reason = format!("failed to create output directory {}: {}", parent.display(), e);
                    self.last_failure = Some(reason.clone());
                    self.transition(FallbackState::ExhaustedFailed, reason);
                    return self.state;
                }
            }
        }

        let number = self.attempts.len() + 1;
        self.transition(
            FallbackState::Running { index },
            format!("attempt {} with {}", number, plan.label()),
        );
        info!(
            input = %self.request.input_path.display(),
            attempt = number,
            backend = %plan.backend,
            hdr_mode = %plan.hdr_mode,
            "launching attempt"
        );
        on_event(ConversionEvent::AttemptStarted {
            number,
            backend: plan.backend,
            hdr_mode: plan.hdr_mode,
            encoder: plan.encoder,
        });

        let (backend, hdr_mode) = (plan.backend, plan.hdr_mode);
        let mut forward = |progress: &ProgressEvent| {
            on_event(ConversionEvent::Progress {
                backend,
                hdr_mode,
                progress: progress.clone(),
            })
        };
        let mut result = runner.run(&plan, &mut forward, cancel);

        if result.status == AttemptStatus::Succeeded {
            let size = fs::metadata(&plan.output_path).map(|m| m.len()).unwrap_or(0);
            if size < self.settings.min_output_bytes {
                warn!(output = %plan.output_path.display(), size, "engine exited cleanly but output is missing or tiny");
                result.status = AttemptStatus::Recoverable(RecoverableReason::EmptyOutput);
            }
        }

        if result.status != AttemptStatus::Succeeded {
            remove_partial(&plan.output_path);
        }

        on_event(ConversionEvent::AttemptFinished {
            number,
            status: result.status.clone(),
        });

        let status = result.status.clone();
        let label = plan.label();
        self.attempts.push(Attempt {
            number,
            candidate,
            encoder: plan.encoder,
            hdr_mode: plan.hdr_mode,
            args: plan.args,
            warnings: plan.warnings,
            policy_notes: plan.policy_notes,
            result,
        });

        match status {
            AttemptStatus::Succeeded => {
                self.transition(FallbackState::Succeeded { index }, format!("{} succeeded", label));
            }
            AttemptStatus::Cancelled => {
                self.transition(FallbackState::Cancelled, format!("{} cancelled", label));
            }
            AttemptStatus::Fatal(reason) => {
                let text = format!("{}: {}", label, reason);
                self.last_failure = Some(text.clone());
                self.transition(FallbackState::ExhaustedFailed, text);
            }
            AttemptStatus::Recoverable(reason) => {
                let text = format!("{}: {}", label, reason);
                self.last_failure = Some(text.clone());
                if self.first_recoverable.is_none() {
                    self.first_recoverable = Some(reason);
                }
                if index + 1 < self.chain.len() {
                    self.transition(FallbackState::Pending { index: index + 1 }, text);
                } else {
                    self.transition(FallbackState::ExhaustedFailed, format!("{} (last candidate)", text));
                }
            }
        }

        self.state
    }

    /// Step until terminal and produce the outcome
    pub fn drive(
        mut self,
        runner: &mut dyn AttemptRunner,
        on_event: &mut dyn FnMut(ConversionEvent),
        cancel: &CancelToken,
    ) -> ConversionOutcome {
        while !self.state.is_terminal() {
            self.step(runner, on_event, cancel);
        }
        self.into_outcome()
    }

    fn success_reason(&self, index: usize) -> String {
        let Some(candidate) = self.chain.get(index) else {
            return "converted".to_string();
        };
        let target = match candidate.backend {
            BackendId::Software => "software encoder".to_string(),
            other => format!("{} encoder", other),
        };
        let hdr = match candidate.hdr_mode {
            HdrMode::Disabled if self.request.effective_hdr_intent() => " with HDR disabled",
            _ => "",
        };
        match (&self.first_recoverable, self.attempts.len()) {
            (Some(reason), n) if n > 1 => format!("fell back to {}{} after {}", target, hdr, reason),
            _ => format!("converted with {}{}", target, hdr),
        }
    }

    fn into_outcome(self) -> ConversionOutcome {
        let (kind, reason) = match self.state {
            FallbackState::Succeeded { index } => {
                let reason = self.success_reason(index);
                let last = self.attempts.last();
                (
                    OutcomeKind::Succeeded {
                        attempt: self.attempts.len(),
                        backend: last.map(|a| a.candidate.backend).unwrap_or(BackendId::Software),
                        hdr_mode: last.map(|a| a.hdr_mode).unwrap_or(HdrMode::Disabled),
                    },
                    reason,
                )
            }
            FallbackState::Cancelled => (OutcomeKind::Cancelled, "cancelled by user".to_string()),
            _ => {
                let detail = self
                    .last_failure
                    .clone()
                    .unwrap_or_else(|| "no candidate could run".to_string());
                let reason = if self.attempts.len() > 1 {
                    format!("all {} attempts failed; last: {}", self.attempts.len(), detail)
                } else {
                    format!("failed: {}", detail)
                };
                (OutcomeKind::ExhaustedFailed, reason)
            }
        };

        let mut outcome = ConversionOutcome::bare(self.request, kind, reason);
        if outcome.is_success() {
            outcome.output_size = fs::metadata(&outcome.output_path).ok().map(|m| m.len());
        }
        outcome.attempts = self.attempts;
        outcome.transitions = self.transitions;
        outcome.warnings = self.warnings;
        outcome
    }
}

fn remove_partial(path: &std::path::Path) {
    if path.exists() {
        match fs::remove_file(path) {
            Ok(()) => debug!(output = %path.display(), "removed partial output"),
            Err(e) => warn!(output = %path.display(), error = %e, "could not remove partial output"),
        }
    }
}
