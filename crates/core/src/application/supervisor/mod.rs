// Process Supervisor - runs one job's process from spawn to terminal status

mod capture;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::constants::{
    CAPTURE_DRAIN_TIMEOUT, GRACEFUL_TERMINATION_TIMEOUT, STDIO_CHUNK_SIZE,
};
use crate::application::event_bus::JobEventBus;
use crate::domain::{
    JobDetails, JobEvent, JobId, JobStatus, JobTermination, OutputStream, PersistedJobRequest,
};
use crate::error::{AppError, Result};
use crate::port::{JobStore, ProcessSpawner, SpawnedProcess};
use capture::{await_exit, capture_output, resolve_termination, ExitCapture, KillReason, KillReceiver, KillSender};

/// Supervisor tuning
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Read size for the output pipes
    pub chunk_size: usize,
    /// SIGTERM -> SIGKILL delay for terminate requests
    pub termination_grace: Duration,
    /// How long capture paths may drain after the child exited
    pub drain_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            chunk_size: STDIO_CHUNK_SIZE,
            termination_grace: GRACEFUL_TERMINATION_TIMEOUT,
            drain_timeout: CAPTURE_DRAIN_TIMEOUT,
        }
    }
}

type RunningJobs = Arc<Mutex<HashMap<JobId, KillSender>>>;

/// Spawns job processes and drives them to a terminal status.
///
/// Per job: SUBMITTED -> RUNNING -> terminal. Three independent tasks run
/// while the job is RUNNING (stdout capture, stderr capture, exit-wait). The
/// terminal status is stored and published only after all three quiesced.
/// Failures are isolated to the job they belong to.
#[derive(Clone)]
pub struct ProcessSupervisor {
    store: Arc<dyn JobStore>,
    spawner: Arc<dyn ProcessSpawner>,
    bus: JobEventBus,
    config: SupervisorConfig,
    running: RunningJobs,
}

impl ProcessSupervisor {
    pub fn new(store: Arc<dyn JobStore>, spawner: Arc<dyn ProcessSpawner>, bus: JobEventBus) -> Self {
        Self {
            store,
            spawner,
            bus,
            config: SupervisorConfig::default(),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    /// Run `job` in the background
    ///
    /// The job is registered before this returns, so an immediate
    /// `terminate` reaches it.
    pub fn spawn(&self, job: PersistedJobRequest) -> JoinHandle<Result<JobTermination>> {
        let registration = self.register(&job.id);
        let this = self.clone();
        tokio::spawn(async move { this.supervise(job, registration?).await })
    }

    /// Run `job` to completion
    pub async fn run(&self, job: PersistedJobRequest) -> Result<JobTermination> {
        let registration = self.register(&job.id)?;
        self.supervise(job, registration).await
    }

    /// Terminate a supervised job (SIGTERM, then SIGKILL after the grace
    /// period). Returns false if the job is not supervised here.
    pub fn terminate(&self, id: &JobId) -> bool {
        match self.lock_running().get(id) {
            Some(kill_tx) => kill_tx.send(KillReason::Abort).is_ok(),
            None => false,
        }
    }

    /// Terminate every supervised job; returns how many were signalled
    pub fn terminate_all(&self) -> usize {
        self.lock_running()
            .values()
            .filter(|kill_tx| kill_tx.send(KillReason::Abort).is_ok())
            .count()
    }

    pub fn is_running(&self, id: &JobId) -> bool {
        self.lock_running().contains_key(id)
    }

    pub fn running_jobs(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.lock_running().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn lock_running(&self) -> MutexGuard<'_, HashMap<JobId, KillSender>> {
        // Entries stay consistent even if a holder panicked
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, id: &JobId) -> Result<Registration> {
        let mut running = self.lock_running();
        if running.contains_key(id) {
            return Err(AppError::InvalidArgument(format!(
                "Job {} is already supervised",
                id
            )));
        }
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        running.insert(id.clone(), kill_tx.clone());
        Ok(Registration {
            id: id.clone(),
            kill_tx,
            kill_rx: Some(kill_rx),
            running: Arc::clone(&self.running),
        })
    }

    async fn supervise(
        &self,
        job: PersistedJobRequest,
        mut registration: Registration,
    ) -> Result<JobTermination> {
        let id = job.id.clone();
        let command = job.command();

        // Only a SUBMITTED job may start; a job never runs twice
        match self.store.get_details(&id).await {
            Some(details) if details.status == JobStatus::Submitted => {}
            Some(details) if details.is_terminal() => {
                warn!(job_id = %id, status = %details.status, "Job already finished, not starting it again");
                return Ok(stored_termination(&details));
            }
            Some(details) => {
                return Err(AppError::InvalidArgument(format!(
                    "Job {} is {}, only SUBMITTED jobs can be started",
                    id, details.status
                )));
            }
            None => return Err(AppError::NotFound(format!("Job {} not found", id))),
        }

        info!(
            job_id = %id,
            program = %command.program,
            args = ?command.args,
            "Spawning job process"
        );

        let SpawnedProcess {
            pid,
            stdout,
            stderr,
            mut child,
        } = match self.spawner.spawn(command) {
            Ok(process) => process,
            Err(e) => {
                // No capture path is started and RUNNING is never published
                error!(job_id = %id, error = %e, "Failed to spawn job process");
                return self.finish(&id, JobTermination::failed(e.to_string())).await;
            }
        };

        match self.store.mark_running(&id).await {
            Ok(details) => self.publish_status(&details),
            Err(e) => {
                error!(job_id = %id, error = %e, "Could not record RUNNING status, killing process");
                if let Err(kill_err) = child.kill() {
                    warn!(job_id = %id, error = %kill_err, "Failed to kill process");
                }
                if let Err(wait_err) = child.wait().await {
                    warn!(job_id = %id, error = %wait_err, "Failed to reap killed process");
                }
                return self
                    .finish(
                        &id,
                        JobTermination::failed(format!("could not record RUNNING status: {}", e)),
                    )
                    .await;
            }
        }

        info!(job_id = %id, pid = ?pid, "Job running");

        let stdout_task = self.spawn_capture(&id, OutputStream::Stdout, stdout, &registration.kill_tx);
        let stderr_task = self.spawn_capture(&id, OutputStream::Stderr, stderr, &registration.kill_tx);
        let exit_task = tokio::spawn(await_exit(
            child,
            registration.take_receiver(),
            id.clone(),
            self.config.termination_grace,
        ));

        let exit = match exit_task.await {
            Ok(capture) => capture,
            Err(join_err) => {
                error!(job_id = %id, error = ?join_err, "Exit-wait task failed (this shouldn't happen)");
                ExitCapture {
                    result: Err(std::io::Error::other(join_err.to_string())),
                    reason: None,
                }
            }
        };

        match &exit.result {
            Ok(status) => debug!(job_id = %id, exit = %status, "Process exited, draining output"),
            Err(e) => error!(job_id = %id, error = %e, "Failed waiting for job process"),
        }
        self.drain(&id, OutputStream::Stdout, stdout_task).await;
        self.drain(&id, OutputStream::Stderr, stderr_task).await;

        let finished = self.finish(&id, resolve_termination(&exit)).await;
        // The job counts as running until its terminal status is stored
        drop(registration);
        finished
    }

    fn spawn_capture(
        &self,
        id: &JobId,
        stream: OutputStream,
        reader: crate::port::OutputReader,
        kill_tx: &KillSender,
    ) -> JoinHandle<Result<u64>> {
        tokio::spawn(capture_output(
            Arc::clone(&self.store),
            self.bus.clone(),
            id.clone(),
            stream,
            reader,
            kill_tx.clone(),
            self.config.chunk_size,
        ))
    }

    /// Wait for a capture path to finish; stop it if it outlives the drain period
    async fn drain(&self, id: &JobId, stream: OutputStream, mut task: JoinHandle<Result<u64>>) {
        match timeout(self.config.drain_timeout, &mut task).await {
            Ok(Ok(_)) => {} // errors were logged by the capture path
            Ok(Err(join_err)) => {
                error!(job_id = %id, stream = %stream, error = ?join_err, "Capture task failed");
            }
            Err(_) => {
                warn!(
                    job_id = %id,
                    stream = %stream,
                    "Output still open after process exit, stopping capture"
                );
                task.abort();
                let _ = task.await;
            }
        }
    }

    /// Store the terminal status, then publish it
    async fn finish(&self, id: &JobId, termination: JobTermination) -> Result<JobTermination> {
        match self.store.finalize(id, &termination).await {
            Ok(details) => {
                info!(
                    job_id = %id,
                    status = %details.status,
                    exit_code = ?details.exit_code,
                    "Job finished"
                );
                self.publish_status(&details);
                Ok(termination)
            }
            Err(AppError::AlreadyFinalized(_)) => {
                warn!(job_id = %id, "Job already finalized, keeping stored terminal state");
                let stored = self.store.get_details(id).await;
                Ok(stored.map_or(termination, |d| stored_termination(&d)))
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "Failed to finalize job");
                Err(e)
            }
        }
    }

    fn publish_status(&self, details: &JobDetails) {
        let Some(latest) = details.timestamps.last() else {
            return;
        };
        self.bus.publish(JobEvent::StatusChanged {
            job_id: details.id.clone(),
            new_status: details.status,
            timestamp: latest.time,
            message: latest.message.clone(),
        });
    }
}

/// Outcome recorded in a terminal job's details
fn stored_termination(details: &JobDetails) -> JobTermination {
    JobTermination {
        status: details.status,
        exit_code: details.exit_code,
        message: details.timestamps.last().and_then(|t| t.message.clone()),
    }
}

/// A job's entry in the running table; removed on drop
struct Registration {
    id: JobId,
    kill_tx: KillSender,
    kill_rx: Option<KillReceiver>,
    running: RunningJobs,
}

impl Registration {
    fn take_receiver(&mut self) -> KillReceiver {
        match self.kill_rx.take() {
            Some(rx) => rx,
            // Only taken once per job; a fresh closed channel keeps exit-wait simple
            None => mpsc::unbounded_channel().1,
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running
            .get(&self.id)
            .is_some_and(|tx| tx.same_channel(&self.kill_tx))
        {
            running.remove(&self.id);
        }
    }
}
