//! Execution and progress monitoring
//!
//! Runs one [`EncodePlan`] as an FFmpeg subprocess. A reader thread forwards
//! stderr lines over a channel; the calling thread turns them into progress
//! events, watches for silence, observes cancellation and finally classifies
//! the exit.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::engine::classify::{ClassificationRules, ExitClass, FatalReason, RecoverableReason, classify_exit};
use crate::engine::core::{EncodePlan, EtaSmoother, ProgressEvent, ProgressParser};

/// Cooperative cancellation flag shared between the presentation layer and
/// the running batch
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Terminal status of one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum AttemptStatus {
    Succeeded,
    Recoverable(RecoverableReason),
    Fatal(FatalReason),
    Cancelled,
}

impl From<ExitClass> for AttemptStatus {
    fn from(class: ExitClass) -> Self {
        match class {
            ExitClass::Success => Self::Succeeded,
            ExitClass::Interrupted => Self::Cancelled,
            ExitClass::Recoverable(r) => Self::Recoverable(r),
            ExitClass::Fatal(f) => Self::Fatal(f),
        }
    }
}

/// Record of one finished (or killed) attempt
#[derive(Debug, Clone, Serialize)]
pub struct AttemptResult {
    pub status: AttemptStatus,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    /// Last lines of the diagnostic stream
    pub tail: Vec<String>,
    pub last_progress: Option<ProgressEvent>,
    pub started_at: DateTime<Local>,
    pub last_output_at: Option<DateTime<Local>>,
    pub elapsed: Duration,
}

impl AttemptResult {
    /// Result for an attempt whose process never started
    pub fn launch_failed(error: impl ToString, started_at: DateTime<Local>) -> Self {
        Self {
            status: AttemptStatus::Fatal(FatalReason::LaunchFailed(error.to_string())),
            exit_code: None,
            signal: None,
            tail: Vec::new(),
            last_progress: None,
            started_at,
            last_output_at: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn tail_text(&self) -> String {
        self.tail.join("\n")
    }
}

/// Anything that can execute a plan. The FFmpeg runner is the real one; tests
/// drive the state machine with scripted runners.
pub trait AttemptRunner {
    fn run(
        &mut self,
        plan: &EncodePlan,
        on_progress: &mut dyn FnMut(&ProgressEvent),
        cancel: &CancelToken,
    ) -> AttemptResult;
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub program: PathBuf,
    /// No output for this long means the engine hung
    pub silence_threshold: Duration,
    /// Watchdog and cancellation check interval
    pub poll_interval: Duration,
    pub tail_lines: usize,
    pub rules: ClassificationRules,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            silence_threshold: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            tail_lines: 20,
            rules: ClassificationRules::default(),
        }
    }
}

/// Runs plans with a real FFmpeg binary
#[derive(Debug, Clone, Default)]
pub struct FfmpegRunner {
    pub settings: MonitorSettings,
}

impl FfmpegRunner {
    pub fn new(settings: MonitorSettings) -> Self {
        Self { settings }
    }
}

/// Forward stderr to the channel one line at a time. FFmpeg ends its
/// interactive stats lines with '\r', so both terminators split.
fn forward_lines(mut stream: impl Read, tx: Sender<String>) {
    let mut buf = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &byte in &buf[..n] {
            if byte == b'\n' || byte == b'\r' {
                if !pending.is_empty() {
                    let line = String::from_utf8_lossy(&pending).to_string();
                    pending.clear();
                    if tx.send(line).is_err() {
                        return;
                    }
                }
            } else {
                pending.push(byte);
            }
        }
    }
    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).to_string());
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

fn kill_child(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!(error = %e, "kill failed, process probably already exited");
    }
    let _ = child.wait();
}

/// Per-attempt bookkeeping while lines stream in
struct StreamState {
    parser: ProgressParser,
    eta: EtaSmoother,
    tail: VecDeque<String>,
    tail_lines: usize,
    started: Instant,
    last_output: Instant,
    last_output_at: Option<DateTime<Local>>,
    last_event: Option<ProgressEvent>,
    duration_s: Option<f64>,
}

impl StreamState {
    fn new(tail_lines: usize, duration_s: Option<f64>) -> Self {
        let now = Instant::now();
        Self {
            parser: ProgressParser::new(),
            eta: EtaSmoother::default(),
            tail: VecDeque::with_capacity(tail_lines),
            tail_lines,
            started: now,
            last_output: now,
            last_output_at: None,
            last_event: None,
            duration_s,
        }
    }

    fn handle_line(&mut self, line: String, on_progress: &mut dyn FnMut(&ProgressEvent)) {
        self.last_output = Instant::now();
        self.last_output_at = Some(Local::now());

        if self.parser.parse_line(&line) {
            let elapsed_media_s = self.parser.out_time_s();
            let wall = self.started.elapsed().as_secs_f64();
            let speed = self
                .parser
                .speed
                .or_else(|| (wall > 0.0).then(|| elapsed_media_s / wall));
            let eta = speed.and_then(|s| self.eta.update(s, elapsed_media_s, self.duration_s));
            let event = ProgressEvent {
                elapsed_media_s,
                total_duration_s: self.duration_s,
                fraction: self.parser.fraction(self.duration_s),
                frame: self.parser.frame,
                fps: self.parser.fps,
                speed,
                eta,
            };
            on_progress(&event);
            self.last_event = Some(event);
        }

        // progress key=value records would crowd out the real errors
        if !is_progress_record(&line) {
            if self.tail.len() == self.tail_lines {
                self.tail.pop_front();
            }
            if self.tail_lines > 0 {
                self.tail.push_back(line);
            }
        }
    }

    fn silent_for(&self) -> Duration {
        self.last_output.elapsed()
    }
}

const PROGRESS_KEYS: &[&str] = &[
    "frame", "fps", "stream_0_0_q", "bitrate", "total_size", "out_time_us", "out_time_ms",
    "out_time", "dup_frames", "drop_frames", "speed", "progress",
];

fn is_progress_record(line: &str) -> bool {
    line.split_once('=')
        .is_some_and(|(k, _)| PROGRESS_KEYS.contains(&k.trim()) && !line.contains(' '))
}

impl AttemptRunner for FfmpegRunner {
    fn run(
        &mut self,
        plan: &EncodePlan,
        on_progress: &mut dyn FnMut(&ProgressEvent),
        cancel: &CancelToken,
    ) -> AttemptResult {
        let settings = &self.settings;
        let started_at = Local::now();
        info!(
            backend = %plan.backend,
            hdr_mode = %plan.hdr_mode,
            command = %plan.command_line(&settings.program),
            "starting attempt"
        );

        let mut child = match Command::new(&settings.program)
            .args(&plan.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %settings.program.display(), error = %e, "failed to launch engine");
                return AttemptResult::launch_failed(e, started_at);
            }
        };

        let Some(stderr) = child.stderr.take() else {
            kill_child(&mut child);
            return AttemptResult::launch_failed("stderr was not captured", started_at);
        };

        let (tx, rx) = mpsc::channel();
        // Detached: after a kill, grandchildren may hold the pipe open
        thread::spawn(move || forward_lines(stderr, tx));

        let mut state = StreamState::new(settings.tail_lines, plan.duration_s);
        let mut stream_open = true;
        let mut forced: Option<AttemptStatus> = None;
        let mut exit: Option<ExitStatus> = None;

        loop {
            if cancel.is_cancelled() {
                info!(input = %plan.input_path.display(), "cancellation observed, killing engine");
                kill_child(&mut child);
                forced = Some(AttemptStatus::Cancelled);
                break;
            }

            if stream_open {
                match rx.recv_timeout(settings.poll_interval) {
                    Ok(line) => {
                        state.handle_line(line, on_progress);
                        continue;
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => stream_open = false,
                }
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    exit = Some(status);
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "failed to poll engine process");
                    kill_child(&mut child);
                    forced = Some(AttemptStatus::Fatal(FatalReason::LaunchFailed(e.to_string())));
                    break;
                }
            }

            if state.silent_for() >= settings.silence_threshold {
                warn!(
                    input = %plan.input_path.display(),
                    silent_secs = state.silent_for().as_secs(),
                    "no engine output, treating attempt as stalled"
                );
                kill_child(&mut child);
                forced = Some(AttemptStatus::Recoverable(RecoverableReason::Stall));
                break;
            }

            if !stream_open {
                thread::sleep(settings.poll_interval);
            }
        }

        // Pick up whatever the reader still has buffered after a normal exit
        if exit.is_some() {
            while let Ok(line) = rx.recv_timeout(settings.poll_interval) {
                state.handle_line(line, on_progress);
            }
        }
        drop(rx);

        let tail: Vec<String> = state.tail.iter().cloned().collect();
        let exit_code = exit.as_ref().and_then(|s| s.code());
        let signal = exit.as_ref().and_then(exit_signal);
        let status = match forced {
            Some(status) => status,
            None => classify_exit(exit_code, signal, &tail.join("\n"), &settings.rules).into(),
        };

        let result = AttemptResult {
            status,
            exit_code,
            signal,
            tail,
            last_progress: state.last_event,
            started_at,
            last_output_at: state.last_output_at,
            elapsed: state.started.elapsed(),
        };

        if !matches!(result.status, AttemptStatus::Succeeded | AttemptStatus::Cancelled) {
            warn!(
                backend = %plan.backend,
                hdr_mode = %plan.hdr_mode,
                status = ?result.status,
                tail = %result.tail_text(),
                "attempt failed"
            );
        }
        result
    }
}
