// Job Service - submit / abort use cases on top of store, supervisor and bus

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::application::event_bus::JobEventBus;
use crate::application::supervisor::ProcessSupervisor;
use crate::domain::{JobEvent, JobId, JobStatus, JobTermination, PersistedJobRequest, ValidJobRequest};
use crate::error::{AppError, Result};
use crate::port::JobStore;

/// Entry point for callers that create or stop jobs
#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobStore>,
    supervisor: ProcessSupervisor,
    bus: JobEventBus,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>, supervisor: ProcessSupervisor, bus: JobEventBus) -> Self {
        Self {
            store,
            supervisor,
            bus,
        }
    }

    /// Persist the request, announce SUBMITTED and start supervising it.
    ///
    /// Returns as soon as the job is durably recorded; the process runs in
    /// the background.
    pub async fn submit(&self, request: ValidJobRequest) -> Result<PersistedJobRequest> {
        let (persisted, _handle) = self.start(request).await?;
        Ok(persisted)
    }

    /// Like `submit`, but waits for the terminal status
    pub async fn submit_and_wait(
        &self,
        request: ValidJobRequest,
    ) -> Result<(PersistedJobRequest, JobTermination)> {
        let (persisted, handle) = self.start(request).await?;
        let termination = handle
            .await
            .map_err(|e| AppError::Internal(format!("Supervision task failed: {}", e)))??;
        Ok((persisted, termination))
    }

    async fn start(
        &self,
        request: ValidJobRequest,
    ) -> Result<(PersistedJobRequest, JoinHandle<Result<JobTermination>>)> {
        let persisted = self.store.persist(request).await?;

        info!(
            job_id = %persisted.id,
            owner = %persisted.request.owner(),
            name = %persisted.request.name(),
            "Job submitted"
        );
        self.bus.publish(JobEvent::status_changed(
            persisted.id.clone(),
            JobStatus::Submitted,
            persisted.persisted_at,
        ));

        let handle = self.supervisor.spawn(persisted.clone());
        Ok((persisted, handle))
    }

    /// Request termination of a job.
    ///
    /// Returns false if the job already reached (or is about to reach) a
    /// terminal status.
    pub async fn abort(&self, id: &JobId) -> Result<bool> {
        let details = self
            .store
            .get_details(id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;

        if details.is_terminal() {
            debug!(job_id = %id, status = %details.status, "Abort ignored, job already finished");
            return Ok(false);
        }

        if !self.supervisor.is_running(id) {
            return Err(AppError::InvalidArgument(format!(
                "Job {} is not supervised by this daemon",
                id
            )));
        }

        // false: the process already exited and the job is being finalized
        let delivered = self.supervisor.terminate(id);
        if delivered {
            info!(job_id = %id, "Abort requested");
        }
        Ok(delivered)
    }

    pub fn events(&self) -> &JobEventBus {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }
}
