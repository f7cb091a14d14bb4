// Batch orchestration and the background worker

use crate::common::helpers::{Script, ScriptedRunner, nvenc_table, request_in, software_table};
use ffswitch::engine::{
    BatchEvent, BatchOptions, BatchSummary, BatchWorker, CancelToken, Codec, FatalReason,
    OutcomeKind, RecoverableReason, WorkerMessage, run_batch,
};
use std::fs;
use std::time::Duration;

#[test]
fn test_dry_run_launches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let requests = vec![
        request_in(dir.path(), "a", Codec::Hevc, true),
        request_in(dir.path(), "b", Codec::Hevc, false),
    ];
    let options = BatchOptions {
        dry_run: true,
        ..Default::default()
    };
    let mut runner = ScriptedRunner::default();

    let report = run_batch(
        &requests,
        &nvenc_table(),
        &options,
        &mut runner,
        &mut |_| {},
        &CancelToken::new(),
    );

    assert!(runner.calls.is_empty());
    assert_eq!(report.summary.planned, 2);
    match &report.outcomes[0].kind {
        OutcomeKind::DryRun { first, chain } => {
            assert_eq!(first.map(|c| c.label()).as_deref(), Some("nvenc/explicit-values"));
            assert_eq!(chain.len(), 4);
        }
        other => panic!("expected dry run, got {:?}", other),
    }
    assert!(!requests[0].resolved_output_path().exists());
}

#[test]
fn test_existing_output_is_skipped_unless_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let request = request_in(dir.path(), "a", Codec::Hevc, false);
    fs::write(request.resolved_output_path(), b"already converted").unwrap();
    let requests = vec![request];

    let mut runner = ScriptedRunner::new([Script::Succeed(4096)]);
    let report = run_batch(
        &requests,
        &software_table(),
        &BatchOptions::default(),
        &mut runner,
        &mut |_| {},
        &CancelToken::new(),
    );
    assert_eq!(report.outcomes[0].kind, OutcomeKind::Skipped);
    assert!(runner.calls.is_empty());

    let options = BatchOptions {
        overwrite: true,
        ..Default::default()
    };
    let report = run_batch(
        &requests,
        &software_table(),
        &options,
        &mut runner,
        &mut |_| {},
        &CancelToken::new(),
    );
    assert!(report.outcomes[0].is_success());
    assert_eq!(runner.calls.len(), 1);
}

#[test]
fn test_failed_file_does_not_stop_batch() {
    let dir = tempfile::tempdir().unwrap();
    let requests = vec![
        request_in(dir.path(), "a", Codec::Hevc, false),
        request_in(dir.path(), "b", Codec::Hevc, false),
        request_in(dir.path(), "c", Codec::Hevc, false),
    ];
    let mut runner = ScriptedRunner::new([
        Script::Succeed(4096),
        Script::Fatal(FatalReason::MissingInput),
        Script::Recoverable(RecoverableReason::EncoderUnavailable),
        Script::Succeed(4096),
    ]);
    let mut finished = 0;

    let report = run_batch(
        &requests,
        &nvenc_table(),
        &BatchOptions::default(),
        &mut runner,
        &mut |event| {
            if matches!(event, BatchEvent::FileFinished { .. }) {
                finished += 1;
            }
        },
        &CancelToken::new(),
    );

    assert_eq!(finished, 3);
    assert_eq!(
        report.summary,
        BatchSummary {
            total: 3,
            succeeded: 2,
            failed: 1,
            cancelled: 0,
            skipped: 0,
            planned: 0,
        }
    );
    assert_eq!(report.outcomes[1].kind, OutcomeKind::ExhaustedFailed);
    assert_eq!(report.outcomes[2].attempts.len(), 2);
}

#[test]
fn test_cancel_marks_remaining_files_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let requests = vec![
        request_in(dir.path(), "a", Codec::Hevc, false),
        request_in(dir.path(), "b", Codec::Hevc, false),
        request_in(dir.path(), "c", Codec::Hevc, false),
    ];
    let mut runner = ScriptedRunner::new([Script::Succeed(4096), Script::CancelDuring]);

    let report = run_batch(
        &requests,
        &software_table(),
        &BatchOptions::default(),
        &mut runner,
        &mut |_| {},
        &CancelToken::new(),
    );

    assert_eq!(runner.calls.len(), 2);
    assert!(report.outcomes[0].is_success());
    assert_eq!(report.outcomes[1].kind, OutcomeKind::Cancelled);
    assert_eq!(report.outcomes[2].kind, OutcomeKind::Cancelled);
    assert_eq!(report.summary.cancelled, 2);
}

#[test]
fn test_worker_reports_over_channel() {
    let dir = tempfile::tempdir().unwrap();
    let requests = vec![
        request_in(dir.path(), "a", Codec::Hevc, true),
        request_in(dir.path(), "b", Codec::Hevc, false),
    ];
    let runner = ScriptedRunner::new([
        Script::Recoverable(RecoverableReason::HdrRejected),
        Script::Succeed(4096),
        Script::Succeed(4096),
    ]);

    let worker = BatchWorker::spawn(
        requests,
        nvenc_table(),
        BatchOptions::default(),
        runner,
        CancelToken::new(),
    );

    let mut messages = Vec::new();
    loop {
        let message = worker
            .receiver()
            .recv_timeout(Duration::from_secs(10))
            .expect("worker message");
        let done = matches!(message, WorkerMessage::BatchFinished(_));
        messages.push(message);
        if done {
            break;
        }
    }
    worker.join().unwrap();

    let started: Vec<usize> = messages
        .iter()
        .filter_map(|m| match m {
            WorkerMessage::FileStarted { index, total, .. } => {
                assert_eq!(*total, 2);
                Some(*index)
            }
            _ => None,
        })
        .collect();
    assert_eq!(started, vec![0, 1]);

    let attempts = messages
        .iter()
        .filter(|m| matches!(m, WorkerMessage::AttemptStarted { .. }))
        .count();
    assert_eq!(attempts, 3);
    assert!(messages.iter().any(|m| matches!(m, WorkerMessage::Progress { .. })));

    let Some(WorkerMessage::BatchFinished(report)) = messages.last() else {
        panic!("last message should be the report");
    };
    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(report.outcomes[0].attempts.len(), 2);
}
