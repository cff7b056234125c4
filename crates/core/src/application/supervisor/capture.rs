// Capture paths of one job: stdout, stderr and exit-wait
//
// The three paths share nothing but the store, the bus and a kill-request
// channel into the exit-wait path.

use futures::StreamExt;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::application::constants::ABORT_REQUESTED_MESSAGE;
use crate::application::event_bus::JobEventBus;
use crate::domain::{JobEvent, JobId, JobTermination, OutputStream};
use crate::error::{AppError, Result};
use crate::port::{read_chunks, ChildProcess, ExecutionError, JobStore, OutputReader, ProcessExit};

/// Why the exit-wait path was asked to stop the child
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum KillReason {
    /// External terminate request
    Abort,
    /// A capture path failed; the whole process is stopped
    CaptureFailed { stream: OutputStream, error: String },
}

impl fmt::Display for KillReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KillReason::Abort => f.write_str(ABORT_REQUESTED_MESSAGE),
            KillReason::CaptureFailed { stream, error } => {
                write!(f, "error capturing {}: {}", stream, error)
            }
        }
    }
}

pub(crate) type KillSender = mpsc::UnboundedSender<KillReason>;
pub(crate) type KillReceiver = mpsc::UnboundedReceiver<KillReason>;

/// Result of the exit-wait path
#[derive(Debug)]
pub(crate) struct ExitCapture {
    pub result: io::Result<ProcessExit>,
    pub reason: Option<KillReason>,
}

/// Read one output pipe to end-of-stream, appending every chunk to the
/// job's log and publishing it as a live output event.
///
/// On failure the child is killed through `kill_tx`.
pub(crate) async fn capture_output(
    store: Arc<dyn JobStore>,
    bus: JobEventBus,
    job_id: JobId,
    stream: OutputStream,
    reader: OutputReader,
    kill_tx: KillSender,
    chunk_size: usize,
) -> Result<u64> {
    let event_job_id = job_id.clone();
    let chunks = read_chunks(reader, chunk_size).inspect(move |item| {
        if let Ok(chunk) = item {
            bus.publish(JobEvent::Output {
                job_id: event_job_id.clone(),
                stream,
                chunk: chunk.clone(),
            });
        }
    });

    match store.append_output(&job_id, stream, Box::pin(chunks)).await {
        Ok(bytes) => {
            debug!(job_id = %job_id, stream = %stream, bytes = bytes, "Output reached end-of-stream");
            Ok(bytes)
        }
        Err(e) => {
            error!(
                job_id = %job_id,
                stream = %stream,
                error = %e,
                "Error capturing output, aborting process"
            );
            let reason = KillReason::CaptureFailed {
                stream,
                error: e.to_string(),
            };
            let message = reason.to_string();
            // Exit-wait may already be gone if the child exited first
            let _ = kill_tx.send(reason);
            Err(AppError::Execution(ExecutionError::CaptureFailed(message)))
        }
    }
}

/// Wait for the child to exit, serving kill requests meanwhile.
///
/// Abort requests get SIGTERM and, after `grace`, SIGKILL. Capture failures
/// kill immediately. Only the first request is acted upon.
pub(crate) async fn await_exit(
    mut child: Box<dyn ChildProcess>,
    mut kill_rx: KillReceiver,
    job_id: JobId,
    grace: Duration,
) -> ExitCapture {
    let mut reason: Option<KillReason> = None;
    let mut force_kill_at: Option<Instant> = None;
    let mut requests_open = true;

    loop {
        tokio::select! {
            result = child.wait() => {
                return ExitCapture { result, reason };
            }
            request = kill_rx.recv(), if requests_open => {
                let Some(request) = request else {
                    requests_open = false;
                    continue;
                };
                if reason.is_some() {
                    continue;
                }
                match &request {
                    KillReason::Abort => {
                        info!(job_id = %job_id, "Terminating job process");
                        if let Err(e) = child.terminate() {
                            warn!(job_id = %job_id, error = %e, "SIGTERM failed, killing");
                            force_kill(&mut *child, &job_id);
                        } else {
                            force_kill_at = Some(Instant::now() + grace);
                        }
                    }
                    KillReason::CaptureFailed { .. } => force_kill(&mut *child, &job_id),
                }
                reason = Some(request);
            }
            _ = sleep_until(force_kill_at.unwrap_or_else(Instant::now)), if force_kill_at.is_some() => {
                warn!(
                    job_id = %job_id,
                    grace_ms = grace.as_millis() as u64,
                    "Process did not exit after SIGTERM, sending SIGKILL"
                );
                force_kill(&mut *child, &job_id);
                force_kill_at = None;
            }
        }
    }
}

fn force_kill(child: &mut dyn ChildProcess, job_id: &JobId) {
    if let Err(e) = child.kill() {
        error!(job_id = %job_id, error = %e, "Failed to kill job process");
    }
}

/// Map how the process ended to the job's terminal status
pub(crate) fn resolve_termination(capture: &ExitCapture) -> JobTermination {
    let exit = match &capture.result {
        Ok(exit) => *exit,
        Err(e) => {
            return JobTermination::failed(format!("failed waiting for process: {}", e));
        }
    };

    match &capture.reason {
        Some(KillReason::Abort) => {
            JobTermination::aborted(ABORT_REQUESTED_MESSAGE).with_exit_code(exit.code)
        }
        Some(reason @ KillReason::CaptureFailed { .. }) => {
            JobTermination::failed(reason.to_string()).with_exit_code(exit.code)
        }
        None => match exit.code {
            Some(code) => JobTermination::from_exit_code(code),
            None => JobTermination::aborted(format!("terminated externally ({})", exit)),
        },
    }
}
