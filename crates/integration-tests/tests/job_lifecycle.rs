//! Job lifecycle scenarios
//!
//! Filesystem store + subprocess spawner + supervisor + event bus wired
//! together, running real `/bin/sh` children.

mod common;

use common::{engine, events_until_terminal, read_text, request, sh, statuses};
use futures::StreamExt;
use jobhost_core::domain::{CommandLine, JobEvent, JobStatus, OutputStream};
use jobhost_core::port::JobStore;
use std::time::{Duration, Instant};

/// A job that prints and exits 0 ends FINISHED_SUCCESS with its output stored
#[tokio::test]
async fn test_hello_job_succeeds() {
    let engine = engine().await;

    let (job, termination) = engine
        .service
        .submit_and_wait(request("hello", sh("printf hello")))
        .await
        .unwrap();

    assert_eq!(termination.status, JobStatus::FinishedSuccess);
    assert_eq!(termination.exit_code, Some(0));

    let details = engine.store.get_details(&job.id).await.unwrap();
    assert_eq!(details.status, JobStatus::FinishedSuccess);
    assert_eq!(details.exit_code, Some(0));
    assert!(details.started_at().is_some());
    assert!(details.finished_at() >= details.started_at());

    assert_eq!(
        read_text(&engine.store, &job.id, OutputStream::Stdout).await.as_deref(),
        Some("hello")
    );
    // Nothing went to stderr, so there is no log for it
    assert!(!engine.store.has_stderr(&job.id).await);
    assert_eq!(read_text(&engine.store, &job.id, OutputStream::Stderr).await, None);

    println!("✅ hello job finished with stdout stored");
}

/// A non-zero exit ends FINISHED_ERROR with the exit code recorded
#[tokio::test]
async fn test_nonzero_exit_is_finished_error() {
    let engine = engine().await;

    let (job, termination) = engine
        .service
        .submit_and_wait(request("fails", sh("echo boom >&2; exit 1")))
        .await
        .unwrap();

    assert_eq!(termination.status, JobStatus::FinishedError);
    assert_eq!(termination.exit_code, Some(1));
    assert_eq!(
        read_text(&engine.store, &job.id, OutputStream::Stderr).await.as_deref(),
        Some("boom\n")
    );
    assert!(!engine.store.has_stdout(&job.id).await);
}

/// An unknown executable fails the job without ever reporting RUNNING
#[tokio::test]
async fn test_missing_executable_never_runs() {
    let engine = engine().await;
    let mut events = engine.bus.subscribe_status_changes();

    let job = engine
        .service
        .submit(request("ghost", CommandLine::new("/nonexistent/jobhost-binary")))
        .await
        .unwrap();
    let seen = events_until_terminal(&mut events, &job.id).await;

    assert_eq!(
        statuses(&seen),
        vec![JobStatus::Submitted, JobStatus::FinishedError]
    );

    let details = engine.store.get_details(&job.id).await.unwrap();
    assert_eq!(details.status, JobStatus::FinishedError);
    assert_eq!(details.exit_code, None);
    assert!(details.started_at().is_none());
    let reason = details.timestamps.last().and_then(|t| t.message.clone());
    assert!(reason.is_some_and(|m| m.contains("jobhost-binary")));

    assert!(!engine.store.has_stdout(&job.id).await);
    assert!(!engine.store.has_stderr(&job.id).await);
}

/// Terminating a long-running job converges on ABORTED
#[tokio::test]
async fn test_abort_running_job() {
    let engine = engine().await;
    let mut events = engine.bus.subscribe_status_changes();

    let job = engine
        .service
        .submit(request("sleeper", CommandLine::new("sleep").arg("30")))
        .await
        .unwrap();

    // Wait until the process is really running
    loop {
        let event = tokio::time::timeout(common::EVENT_TIMEOUT, events.next())
            .await
            .unwrap()
            .unwrap();
        if event.new_status() == Some(JobStatus::Running) {
            break;
        }
    }

    let started = Instant::now();
    assert!(engine.service.abort(&job.id).await.unwrap());
    let seen = events_until_terminal(&mut events, &job.id).await;

    assert_eq!(statuses(&seen), vec![JobStatus::Aborted]);
    assert!(started.elapsed() < Duration::from_secs(10));

    let details = engine.store.get_details(&job.id).await.unwrap();
    assert_eq!(details.status, JobStatus::Aborted);

    // Nothing left to abort
    assert!(!engine.service.abort(&job.id).await.unwrap());
    assert!(engine.supervisor.running_jobs().is_empty());
}

/// Status events arrive in lifecycle order and every output event of the
/// job precedes its terminal status
#[tokio::test]
async fn test_event_ordering() {
    let engine = engine().await;
    let mut events = engine.bus.subscribe_all();

    let job = engine
        .service
        .submit(request("chatty", sh("printf 'a\\n'; printf 'b\\n' >&2; printf 'c\\n'")))
        .await
        .unwrap();
    let seen = events_until_terminal(&mut events, &job.id).await;

    assert_eq!(
        statuses(&seen),
        vec![
            JobStatus::Submitted,
            JobStatus::Running,
            JobStatus::FinishedSuccess
        ]
    );

    let running_at = seen
        .iter()
        .position(|e| e.new_status() == Some(JobStatus::Running))
        .unwrap();
    let mut live_stdout = Vec::new();
    for (i, event) in seen.iter().enumerate() {
        if let JobEvent::Output { stream, chunk, .. } = event {
            assert!(i > running_at, "output published before RUNNING");
            if *stream == OutputStream::Stdout {
                live_stdout.extend_from_slice(chunk);
            }
        }
    }
    assert!(matches!(
        seen.last(),
        Some(JobEvent::StatusChanged {
            new_status: JobStatus::FinishedSuccess,
            ..
        })
    ));
    assert_eq!(live_stdout, b"a\nc\n");
}

/// Each stream keeps production order even when both are busy at once
#[tokio::test]
async fn test_large_interleaved_output_keeps_order() {
    let engine = engine().await;

    let (job, termination) = engine
        .service
        .submit_and_wait(request(
            "counter",
            sh("i=0; while [ $i -lt 3000 ]; do echo out-$i; echo err-$i >&2; i=$((i+1)); done"),
        ))
        .await
        .unwrap();

    assert_eq!(termination.status, JobStatus::FinishedSuccess);

    let expected_out: String = (0..3000).map(|i| format!("out-{}\n", i)).collect();
    let expected_err: String = (0..3000).map(|i| format!("err-{}\n", i)).collect();
    assert_eq!(
        read_text(&engine.store, &job.id, OutputStream::Stdout).await.unwrap(),
        expected_out
    );
    assert_eq!(
        read_text(&engine.store, &job.id, OutputStream::Stderr).await.unwrap(),
        expected_err
    );
}

/// Jobs running side by side never see each other's output
#[tokio::test]
async fn test_concurrent_jobs_are_isolated() {
    let engine = engine().await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = engine.service.clone();
        handles.push(tokio::spawn(async move {
            let script = format!("printf job-{}; exit {}", i, i % 2);
            service
                .submit_and_wait(request(&format!("job-{}", i), sh(&script)))
                .await
                .unwrap()
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let (job, termination) = handle.await.unwrap();
        let expected = if i % 2 == 0 {
            JobStatus::FinishedSuccess
        } else {
            JobStatus::FinishedError
        };
        assert_eq!(termination.status, expected);
        assert_eq!(
            read_text(&engine.store, &job.id, OutputStream::Stdout).await,
            Some(format!("job-{}", i))
        );
    }

    assert_eq!(engine.store.list_ids().await.unwrap().len(), 8);
}

/// A background grandchild holding stdout open does not keep the job alive
#[tokio::test]
async fn test_grandchild_holding_pipe_is_drained() {
    let engine = engine().await;
    let started = Instant::now();

    let (job, termination) = engine
        .service
        .submit_and_wait(request("forks", sh("echo parent; sleep 30 &")))
        .await
        .unwrap();

    assert_eq!(termination.status, JobStatus::FinishedSuccess);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(
        read_text(&engine.store, &job.id, OutputStream::Stdout).await.as_deref(),
        Some("parent\n")
    );
}

/// Removing a log behind the store's back is reported, the record survives
#[tokio::test]
async fn test_externally_removed_log() {
    let engine = engine().await;

    let (job, _) = engine
        .service
        .submit_and_wait(request("hello", sh("echo hi; echo oops >&2")))
        .await
        .unwrap();
    assert!(engine.store.has_stdout(&job.id).await);

    std::fs::remove_file(engine.dir.path().join(job.id.as_str()).join("stdout")).unwrap();

    assert!(!engine.store.has_stdout(&job.id).await);
    assert!(engine.store.read_output(&job.id, OutputStream::Stdout).await.is_none());
    assert!(engine.store.has_stderr(&job.id).await);
    assert!(engine.store.get_details(&job.id).await.is_some());
}

/// Environment reaches the child only through the allowlist
#[tokio::test]
async fn test_request_env_is_filtered() {
    let engine = engine().await;

    let command = sh("printf '%s|%s' \"$LANG\" \"$SECRET_TOKEN\"")
        .env("LANG", "C.UTF-8")
        .env("SECRET_TOKEN", "hunter2");
    let (job, _) = engine
        .service
        .submit_and_wait(request("env", command))
        .await
        .unwrap();

    assert_eq!(
        read_text(&engine.store, &job.id, OutputStream::Stdout).await.as_deref(),
        Some("C.UTF-8|")
    );
}
