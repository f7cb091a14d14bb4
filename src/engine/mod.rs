// Core conversion engine - independent of the CLI

pub mod batch;
pub mod classify;
pub mod core;
pub mod fallback;
pub mod hardware;
pub mod monitor;
pub mod probe;
pub mod worker;

pub use batch::{BatchEvent, BatchOptions, BatchReport, BatchSummary, convert_one, run_batch};
pub use classify::{ClassificationRules, ExitClass, FatalReason, RecoverableReason, classify_exit};
pub use core::*;
pub use fallback::{
    Attempt, Candidate, ConversionEvent, ConversionOutcome, FallbackChain, FallbackMachine,
    FallbackState, MachineSettings, OutcomeKind, Transition,
};
pub use hardware::{CapabilityTable, EncoderBackend, detect};
pub use monitor::{
    AttemptResult, AttemptRunner, AttemptStatus, CancelToken, FfmpegRunner, MonitorSettings,
};
pub use worker::{BatchWorker, WorkerMessage};
