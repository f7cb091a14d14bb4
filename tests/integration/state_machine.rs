// Fallback state machine driven by a scripted engine

use crate::common::helpers::{Script, ScriptedRunner, nvenc_table, request_in, software_table};
use ffswitch::engine::{
    AttemptStatus, BackendId, CancelToken, Codec, ConversionEvent, FallbackChain, FallbackMachine,
    FallbackState, FatalReason, HdrMode, MachineSettings, OutcomeKind, RecoverableReason,
};

#[test]
fn test_hdr_rejected_on_gpu_falls_back_to_software_copy() {
    let dir = tempfile::tempdir().unwrap();
    let request = request_in(dir.path(), "movie", Codec::Hevc, true);
    let table = nvenc_table();
    let chain = FallbackChain::build(&table, &request, false);
    let settings = MachineSettings::default();
    let mut runner = ScriptedRunner::new([
        Script::Recoverable(RecoverableReason::HdrRejected),
        Script::Succeed(2048),
    ]);

    let outcome = FallbackMachine::new(&request, &table, chain, &settings).drive(
        &mut runner,
        &mut |_| {},
        &CancelToken::new(),
    );

    assert_eq!(
        runner.labels(),
        vec!["nvenc/explicit-values", "software/copy-metadata"]
    );
    assert_eq!(
        outcome.kind,
        OutcomeKind::Succeeded {
            attempt: 2,
            backend: BackendId::Software,
            hdr_mode: HdrMode::CopyMetadata,
        }
    );
    assert_eq!(
        outcome.reason,
        "fell back to software encoder after hardware rejected HDR parameters"
    );
    assert_eq!(outcome.attempts.len(), 2);
    assert_eq!(
        outcome.attempts[0].result.status,
        AttemptStatus::Recoverable(RecoverableReason::HdrRejected)
    );
    assert_eq!(outcome.output_size, Some(2048));
    assert_eq!(outcome.input_size, Some(4096));
    assert_eq!(outcome.size_change_pct(), Some(-50.0));
}

#[test]
fn test_stall_advances_to_next_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let request = request_in(dir.path(), "movie", Codec::Hevc, false);
    let table = nvenc_table();
    let chain = FallbackChain::build(&table, &request, false);
    let settings = MachineSettings::default();
    let mut runner = ScriptedRunner::new([
        Script::Recoverable(RecoverableReason::Stall),
        Script::Succeed(4096),
    ]);

    let outcome = FallbackMachine::new(&request, &table, chain, &settings).drive(
        &mut runner,
        &mut |_| {},
        &CancelToken::new(),
    );

    assert!(outcome.is_success());
    assert_eq!(runner.labels(), vec!["nvenc/disabled", "software/disabled"]);
    assert_eq!(
        outcome.reason,
        "fell back to software encoder after engine stopped producing output"
    );
}

#[test]
fn test_fatal_failure_stops_the_chain() {
    let dir = tempfile::tempdir().unwrap();
    let request = request_in(dir.path(), "movie", Codec::Hevc, true);
    let table = nvenc_table();
    let chain = FallbackChain::build(&table, &request, false);
    let settings = MachineSettings::default();
    let mut runner = ScriptedRunner::new([Script::Fatal(FatalReason::CorruptInput)]);

    let outcome = FallbackMachine::new(&request, &table, chain, &settings).drive(
        &mut runner,
        &mut |_| {},
        &CancelToken::new(),
    );

    assert_eq!(outcome.kind, OutcomeKind::ExhaustedFailed);
    assert_eq!(runner.calls.len(), 1);
    assert_eq!(
        outcome.reason,
        "failed: nvenc/explicit-values: input is corrupt or unreadable"
    );
    assert!(!request.resolved_output_path().exists(), "partial output removed");
}

#[test]
fn test_every_candidate_failing_exhausts_chain() {
    let dir = tempfile::tempdir().unwrap();
    let request = request_in(dir.path(), "movie", Codec::Hevc, true);
    let table = nvenc_table();
    let chain = FallbackChain::build(&table, &request, false);
    let settings = MachineSettings::default();
    let mut runner = ScriptedRunner::new(
        std::iter::repeat(Script::Recoverable(RecoverableReason::EncoderInit)).take(4),
    );

    let outcome = FallbackMachine::new(&request, &table, chain, &settings).drive(
        &mut runner,
        &mut |_| {},
        &CancelToken::new(),
    );

    assert_eq!(outcome.kind, OutcomeKind::ExhaustedFailed);
    assert_eq!(runner.calls.len(), 4);
    assert_eq!(
        outcome.reason,
        "all 4 attempts failed; last: software/disabled: encoder failed to initialize"
    );
    assert!(!request.resolved_output_path().exists());
}

#[test]
fn test_cancel_during_attempt_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let request = request_in(dir.path(), "movie", Codec::Hevc, true);
    let table = nvenc_table();
    let chain = FallbackChain::build(&table, &request, false);
    let settings = MachineSettings::default();
    let cancel = CancelToken::new();
    let mut runner = ScriptedRunner::new([Script::CancelDuring, Script::Succeed(4096)]);

    let outcome = FallbackMachine::new(&request, &table, chain, &settings).drive(
        &mut runner,
        &mut |_| {},
        &cancel,
    );

    assert_eq!(outcome.kind, OutcomeKind::Cancelled);
    assert_eq!(outcome.reason, "cancelled by user");
    assert_eq!(runner.calls.len(), 1, "no candidate runs after cancellation");
    assert!(!request.resolved_output_path().exists());
}

#[test]
fn test_cancel_before_start_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let request = request_in(dir.path(), "movie", Codec::Av1, false);
    let table = software_table();
    let chain = FallbackChain::build(&table, &request, false);
    let settings = MachineSettings::default();
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut runner = ScriptedRunner::new([Script::Succeed(4096)]);

    let outcome = FallbackMachine::new(&request, &table, chain, &settings).drive(
        &mut runner,
        &mut |_| {},
        &cancel,
    );

    assert_eq!(outcome.kind, OutcomeKind::Cancelled);
    assert!(runner.calls.is_empty());
}

#[test]
fn test_clean_exit_with_tiny_output_is_recoverable() {
    let dir = tempfile::tempdir().unwrap();
    let request = request_in(dir.path(), "movie", Codec::Hevc, false);
    let table = nvenc_table();
    let chain = FallbackChain::build(&table, &request, false);
    let settings = MachineSettings::default();
    let mut runner = ScriptedRunner::new([Script::Succeed(10), Script::Succeed(4096)]);

    let outcome = FallbackMachine::new(&request, &table, chain, &settings).drive(
        &mut runner,
        &mut |_| {},
        &CancelToken::new(),
    );

    assert!(outcome.is_success());
    assert_eq!(
        outcome.attempts[0].result.status,
        AttemptStatus::Recoverable(RecoverableReason::EmptyOutput)
    );
    assert_eq!(outcome.output_size, Some(4096));
}

#[test]
fn test_step_walks_states_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let request = request_in(dir.path(), "movie", Codec::Hevc, false);
    let table = nvenc_table();
    let chain = FallbackChain::build(&table, &request, false);
    let settings = MachineSettings::default();
    let cancel = CancelToken::new();
    let mut runner = ScriptedRunner::new([
        Script::Recoverable(RecoverableReason::EncoderUnavailable),
        Script::Succeed(4096),
    ]);
    let mut events = Vec::new();

    let mut machine = FallbackMachine::new(&request, &table, chain, &settings);
    assert_eq!(machine.state(), FallbackState::Pending { index: 0 });

    let state = machine.step(&mut runner, &mut |e| events.push(e), &cancel);
    assert_eq!(state, FallbackState::Pending { index: 1 });

    let state = machine.step(&mut runner, &mut |e| events.push(e), &cancel);
    assert_eq!(state, FallbackState::Succeeded { index: 1 });

    // Terminal states don't move
    let state = machine.step(&mut runner, &mut |e| events.push(e), &cancel);
    assert_eq!(state, FallbackState::Succeeded { index: 1 });
    assert_eq!(runner.calls.len(), 2);

    let path: Vec<FallbackState> = machine.transitions().iter().map(|t| t.to).collect();
    assert_eq!(
        path,
        vec![
            FallbackState::Running { index: 0 },
            FallbackState::Pending { index: 1 },
            FallbackState::Running { index: 1 },
            FallbackState::Succeeded { index: 1 },
        ]
    );

    let started = events
        .iter()
        .filter(|e| matches!(e, ConversionEvent::AttemptStarted { .. }))
        .count();
    let progress = events
        .iter()
        .filter(|e| matches!(e, ConversionEvent::Progress { .. }))
        .count();
    let finished = events
        .iter()
        .filter(|e| matches!(e, ConversionEvent::AttemptFinished { .. }))
        .count();
    assert_eq!((started, progress, finished), (2, 2, 2));
}
