// Subprocess supervision against shell scripts standing in for ffmpeg
#![cfg(unix)]

use ffswitch::engine::{
    AttemptRunner, AttemptStatus, BackendId, CancelToken, ClassificationRules, Container,
    EncodePlan, FatalReason, FfmpegRunner, HdrMode, MonitorSettings, ProgressEvent,
    RecoverableReason,
};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

fn settings(silence: Duration) -> MonitorSettings {
    MonitorSettings {
        program: PathBuf::from("/bin/sh"),
        silence_threshold: silence,
        poll_interval: Duration::from_millis(20),
        tail_lines: 5,
        rules: ClassificationRules::default(),
    }
}

/// A plan whose arguments run `script` under sh
fn script_plan(script: &str, duration_s: Option<f64>) -> EncodePlan {
    EncodePlan {
        input_path: PathBuf::from("/media/in.mkv"),
        output_path: PathBuf::from("/media/out.mkv"),
        backend: BackendId::Software,
        encoder: "libx265",
        hdr_mode: HdrMode::Disabled,
        container: Container::Mkv,
        quality: 23,
        duration_s,
        args: vec!["-c".to_string(), script.to_string()],
        warnings: Vec::new(),
        policy_notes: Vec::new(),
    }
}

fn run(
    script: &str,
    duration_s: Option<f64>,
    silence: Duration,
    cancel: &CancelToken,
) -> (ffswitch::engine::AttemptResult, Vec<ProgressEvent>) {
    let mut runner = FfmpegRunner::new(settings(silence));
    let mut events = Vec::new();
    let result = runner.run(
        &script_plan(script, duration_s),
        &mut |p| events.push(p.clone()),
        cancel,
    );
    (result, events)
}

#[test]
fn test_progress_is_parsed_from_stderr() {
    let script = "printf 'frame=100\\nout_time_us=5000000\\nspeed=2.0x\\nprogress=continue\\n' >&2; \
                  printf 'frame=200\\nout_time_us=10000000\\nspeed=2.0x\\nprogress=end\\n' >&2; exit 0";
    let (result, events) = run(script, Some(10.0), Duration::from_secs(10), &CancelToken::new());

    assert_eq!(result.status, AttemptStatus::Succeeded);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].fraction, Some(0.5));
    assert_eq!(events[1].fraction, Some(1.0));
    assert_eq!(events[1].frame, Some(200));
    let last = result.last_progress.expect("last progress kept");
    assert_eq!(last.elapsed_media_s, 10.0);
    // progress records stay out of the diagnostic tail
    assert!(result.tail.is_empty(), "tail: {:?}", result.tail);
}

#[test]
fn test_full_progress_record_is_one_event() {
    let script = "printf 'frame=120\\nfps=24.00\\nstream_0_0_q=28.0\\nbitrate=1699.4kbits/s\\n' >&2; \
                  printf 'total_size=1048576\\nout_time_us=5000000\\nout_time_ms=5000000\\n' >&2; \
                  printf 'out_time=00:00:05.000000\\ndup_frames=0\\ndrop_frames=0\\n' >&2; \
                  printf 'speed=2.5x\\nprogress=continue\\n' >&2; exit 0";
    let (result, events) = run(script, Some(10.0), Duration::from_secs(10), &CancelToken::new());

    assert_eq!(result.status, AttemptStatus::Succeeded);
    assert_eq!(events.len(), 1, "events: {:?}", events);
    assert_eq!(events[0].fraction, Some(0.5));
    assert_eq!(events[0].speed, Some(2.5));
    assert_eq!(events[0].frame, Some(120));
}

#[test]
fn test_fatal_pattern_in_tail() {
    let script = "echo 'Input #0, matroska' >&2; echo '/media/in.mkv: No such file or directory' >&2; exit 1";
    let (result, _) = run(script, None, Duration::from_secs(10), &CancelToken::new());

    assert_eq!(result.status, AttemptStatus::Fatal(FatalReason::MissingInput));
    assert_eq!(result.exit_code, Some(1));
    assert_eq!(result.tail.len(), 2);
}

#[test]
fn test_hdr_rejection_is_recoverable() {
    let script = "echo '[hevc_nvenc @ 0x1] InitializeEncoder failed: invalid param (8): Invalid argument' >&2; exit 187";
    let (result, _) = run(script, None, Duration::from_secs(10), &CancelToken::new());
    assert_eq!(
        result.status,
        AttemptStatus::Recoverable(RecoverableReason::HdrRejected)
    );
}

#[test]
fn test_unmatched_failure_is_fatal_by_default() {
    let script = "echo 'something odd happened' >&2; exit 3";
    let (result, _) = run(script, None, Duration::from_secs(10), &CancelToken::new());
    assert_eq!(result.status, AttemptStatus::Fatal(FatalReason::Unrecognized));
}

#[test]
fn test_tail_keeps_only_last_lines() {
    let script = "for i in 1 2 3 4 5 6 7 8; do echo \"line $i\" >&2; done; exit 3";
    let (result, _) = run(script, None, Duration::from_secs(10), &CancelToken::new());
    assert_eq!(
        result.tail,
        vec!["line 4", "line 5", "line 6", "line 7", "line 8"]
    );
}

#[test]
fn test_silent_engine_is_killed_as_stall() {
    let started = Instant::now();
    let script = "echo 'starting' >&2; exec sleep 30";
    let (result, _) = run(script, None, Duration::from_millis(300), &CancelToken::new());

    assert_eq!(result.status, AttemptStatus::Recoverable(RecoverableReason::Stall));
    assert!(started.elapsed() < Duration::from_secs(10), "watchdog should fire quickly");
}

#[test]
fn test_cancel_kills_running_engine() {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        trigger.cancel();
    });

    let started = Instant::now();
    let (result, _) = run("exec sleep 30", None, Duration::from_secs(60), &cancel);
    handle.join().unwrap();

    assert_eq!(result.status, AttemptStatus::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_terminated_by_signal_is_cancellation() {
    let (result, _) = run("kill -TERM $$", None, Duration::from_secs(10), &CancelToken::new());
    assert_eq!(result.signal, Some(15));
    assert_eq!(result.status, AttemptStatus::Cancelled);
}

#[test]
fn test_missing_binary_is_launch_failure() {
    let mut runner = FfmpegRunner::new(MonitorSettings {
        program: PathBuf::from("/nonexistent/ffmpeg"),
        ..settings(Duration::from_secs(1))
    });
    let result = runner.run(&script_plan("", None), &mut |_| {}, &CancelToken::new());
    assert!(matches!(
        result.status,
        AttemptStatus::Fatal(FatalReason::LaunchFailed(_))
    ));
    assert_eq!(result.exit_code, None);
}
