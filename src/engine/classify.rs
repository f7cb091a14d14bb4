//! Exit classification
//!
//! Turns an engine exit (code, terminating signal, stderr tail) into
//! success, interruption, recoverable failure or fatal failure. Pure and
//! table driven; the tables can be extended from configuration because the
//! engine's error wording is not a stable interface.

use serde::Serialize;
use std::fmt;

/// Why an attempt failed in a way another candidate may fix
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RecoverableReason {
    /// Encoder refused HDR / colorimetry parameters
    HdrRejected,
    /// Hardware encoder or device not usable on this machine
    EncoderUnavailable,
    /// Encoder failed to open for another reason
    EncoderInit,
    /// No diagnostic output for longer than the silence threshold
    Stall,
    /// Exit 0 but the output is missing or too small
    EmptyOutput,
    /// Matched a configured recoverable pattern
    Custom(String),
    /// Nothing matched and the rules treat that as recoverable
    Unrecognized,
}

/// Why an attempt failed in a way no other candidate can fix
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FatalReason {
    MissingInput,
    CorruptInput,
    UnsupportedInput,
    DiskFull,
    PermissionDenied,
    /// The engine binary could not be started
    LaunchFailed(String),
    /// Matched a configured fatal pattern
    Custom(String),
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "class", content = "reason", rename_all = "snake_case")]
pub enum ExitClass {
    Success,
    /// Stopped by a signal; handled as user cancellation
    Interrupted,
    Recoverable(RecoverableReason),
    Fatal(FatalReason),
}

impl RecoverableReason {
    pub fn description(&self) -> String {
        match self {
            Self::HdrRejected => "hardware rejected HDR parameters".to_string(),
            Self::EncoderUnavailable => "encoder unavailable on this system".to_string(),
            Self::EncoderInit => "encoder failed to initialize".to_string(),
            Self::Stall => "engine stopped producing output".to_string(),
            Self::EmptyOutput => "empty output".to_string(),
            Self::Custom(p) => format!("matched recoverable pattern '{}'", p),
            Self::Unrecognized => "unrecognized failure".to_string(),
        }
    }
}

impl FatalReason {
    pub fn description(&self) -> String {
        match self {
            Self::MissingInput => "input file not found".to_string(),
            Self::CorruptInput => "input is corrupt or unreadable".to_string(),
            Self::UnsupportedInput => "input stream is not supported".to_string(),
            Self::DiskFull => "no space left on device".to_string(),
            Self::PermissionDenied => "permission denied".to_string(),
            Self::LaunchFailed(e) => format!("could not start engine: {}", e),
            Self::Custom(p) => format!("matched fatal pattern '{}'", p),
            Self::Unrecognized => "unrecognized failure".to_string(),
        }
    }
}

impl fmt::Display for RecoverableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// A diagnostic fragment. `*` matches any run of characters within one line;
/// matching ignores ASCII case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern(String);

impl Pattern {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, text: &str) -> bool {
        let needle = self.0.to_ascii_lowercase();
        text.lines()
            .any(|line| fragments_in_order(&line.to_ascii_lowercase(), &needle))
    }
}

fn fragments_in_order(line: &str, pattern: &str) -> bool {
    let mut rest = line;
    for fragment in pattern.split('*').filter(|f| !f.is_empty()) {
        match rest.find(fragment) {
            Some(pos) => rest = &rest[pos + fragment.len()..],
            None => return false,
        }
    }
    true
}

/// Pattern tables consulted by [`classify_exit`]
#[derive(Debug, Clone)]
pub struct ClassificationRules {
    /// GPU device and driver failures. Checked before `fatal`, whose generic
    /// wording (`No such file or directory`) also shows up for device nodes.
    pub device: Vec<Pattern>,
    pub fatal: Vec<(Pattern, FatalReason)>,
    pub recoverable: Vec<(Pattern, RecoverableReason)>,
    pub unrecognized_is_recoverable: bool,
}

impl Default for ClassificationRules {
    fn default() -> Self {
        let fatal = [
            ("No such file or directory", FatalReason::MissingInput),
            ("Invalid data found when processing input", FatalReason::CorruptInput),
            ("moov atom not found", FatalReason::CorruptInput),
            ("Decoder * not found", FatalReason::UnsupportedInput),
            ("Could not find codec parameters", FatalReason::UnsupportedInput),
            ("Unsupported codec", FatalReason::UnsupportedInput),
            ("No space left on device", FatalReason::DiskFull),
            ("Permission denied", FatalReason::PermissionDenied),
        ];
        let device = [
            "No NVENC capable devices found",
            "Cannot load libcuda",
            "OpenEncodeSessionEx failed",
            "Error creating a MFX session",
            "Failed to initialise AMF",
            "Device creation failed",
            "Failed to open /dev/",
        ];
        let recoverable = [
            ("Invalid argument", RecoverableReason::HdrRejected),
            ("error code: -22", RecoverableReason::HdrRejected),
            ("Error setting option color", RecoverableReason::HdrRejected),
            ("Invalid color", RecoverableReason::HdrRejected),
            ("Error while opening encoder", RecoverableReason::EncoderInit),
            ("Error initializing output stream", RecoverableReason::EncoderInit),
        ];
        Self {
            device: device.into_iter().map(Pattern::new).collect(),
            fatal: fatal.into_iter().map(|(p, r)| (Pattern::new(p), r)).collect(),
            recoverable: recoverable
                .into_iter()
                .map(|(p, r)| (Pattern::new(p), r))
                .collect(),
            unrecognized_is_recoverable: false,
        }
    }
}

impl ClassificationRules {
    /// Append configured patterns; extra patterns are checked after the built-ins
    pub fn extend(mut self, extra_fatal: &[String], extra_recoverable: &[String]) -> Self {
        for p in extra_fatal.iter().filter(|p| !p.trim().is_empty()) {
            self.fatal.push((Pattern::new(p.clone()), FatalReason::Custom(p.clone())));
        }
        for p in extra_recoverable.iter().filter(|p| !p.trim().is_empty()) {
            self.recoverable
                .push((Pattern::new(p.clone()), RecoverableReason::Custom(p.clone())));
        }
        self
    }

    pub fn with_unrecognized_recoverable(mut self, recoverable: bool) -> Self {
        self.unrecognized_is_recoverable = recoverable;
        self
    }
}

/// Signals that mean someone asked the engine to stop
const INTERRUPT_SIGNALS: [i32; 3] = [2, 3, 15];

fn reported_interrupt(tail: &str) -> bool {
    INTERRUPT_SIGNALS
        .iter()
        .any(|sig| tail.contains(&format!("received signal {}", sig)))
}

/// Classify a finished engine process.
///
/// `signal` is the signal that terminated the process, if any. Evaluation
/// order: exit 0, interruption, device patterns, fatal patterns, recoverable
/// patterns, then the unrecognized fallback.
pub fn classify_exit(
    exit_code: Option<i32>,
    signal: Option<i32>,
    tail: &str,
    rules: &ClassificationRules,
) -> ExitClass {
    if exit_code == Some(0) {
        return ExitClass::Success;
    }

    if reported_interrupt(tail) || signal.is_some_and(|s| INTERRUPT_SIGNALS.contains(&s)) {
        return ExitClass::Interrupted;
    }

    if rules.device.iter().any(|p| p.matches(tail)) {
        return ExitClass::Recoverable(RecoverableReason::EncoderUnavailable);
    }

    if let Some((_, reason)) = rules.fatal.iter().find(|(p, _)| p.matches(tail)) {
        return ExitClass::Fatal(reason.clone());
    }

    if let Some((_, reason)) = rules.recoverable.iter().find(|(p, _)| p.matches(tail)) {
        return ExitClass::Recoverable(reason.clone());
    }

    if rules.unrecognized_is_recoverable {
        ExitClass::Recoverable(RecoverableReason::Unrecognized)
    } else {
        ExitClass::Fatal(FatalReason::Unrecognized)
    }
}
