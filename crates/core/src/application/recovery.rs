// Crash recovery: jobs left non-terminal by a previous daemon run
use crate::application::constants::ORPHANED_JOB_MESSAGE;
use crate::application::event_bus::JobEventBus;
use crate::domain::{JobEvent, JobTermination};
use crate::error::AppError;
use crate::port::JobStore;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Crash recovery service
///
/// On daemon startup no job can be supervised yet, so every SUBMITTED or
/// RUNNING record belongs to a process the previous daemon lost track of.
pub struct RecoveryService {
    store: Arc<dyn JobStore>,
    bus: JobEventBus,
}

impl RecoveryService {
    pub fn new(store: Arc<dyn JobStore>, bus: JobEventBus) -> Self {
        Self { store, bus }
    }

    /// Mark orphaned jobs ABORTED
    ///
    /// Must run before the first submit of this daemon.
    ///
    /// # Returns
    /// Number of jobs recovered
    pub async fn recover_orphaned_jobs(&self) -> crate::error::Result<usize> {
        let ids = self.store.list_ids().await?;
        info!(job_count = ids.len(), "Starting orphaned job recovery");

        let termination = JobTermination::aborted(ORPHANED_JOB_MESSAGE);
        let mut recovered_count = 0;

        for id in ids {
            let Some(details) = self.store.get_details(&id).await else {
                warn!(job_id = %id, "Job record unreadable, skipping recovery");
                continue;
            };
            if details.is_terminal() {
                continue;
            }

            info!(
                job_id = %id,
                status = %details.status,
                "Recovering orphaned job"
            );

            match self.store.finalize(&id, &termination).await {
                Ok(finalized) => {
                    let time = finalized
                        .finished_at()
                        .unwrap_or(finalized.submitted_at);
                    self.bus.publish(JobEvent::StatusChanged {
                        job_id: id,
                        new_status: finalized.status,
                        timestamp: time,
                        message: termination.message.clone(),
                    });
                    recovered_count += 1;
                }
                Err(AppError::AlreadyFinalized(_)) => {}
                Err(e) => {
                    // One broken record must not block startup
                    error!(job_id = %id, error = %e, "Failed to recover orphaned job");
                }
            }
        }

        info!(recovered_count = %recovered_count, "Orphaned job recovery complete");
        Ok(recovered_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CommandLine, CommandTemplate, JobSpec, JobStatus, ValidJobRequest};
    use crate::port::id_provider::mocks::SequenceIdGenerator;
    use crate::port::job_store::mocks::InMemoryJobStore;
    use crate::port::time_provider::mocks::FixedTimeProvider;
    use futures::StreamExt;

    fn request() -> ValidJobRequest {
        let spec = JobSpec {
            id: "true".to_string(),
            name: "True".to_string(),
            description: None,
            expected_inputs: serde_json::Value::Null,
            command: CommandTemplate {
                application: "true".to_string(),
                arguments: Vec::new(),
            },
        };
        ValidJobRequest::new("carol", "noop", spec, serde_json::Value::Null, CommandLine::new("true"))
            .unwrap()
    }

    #[tokio::test]
    async fn test_non_terminal_jobs_are_aborted() {
        let store = Arc::new(InMemoryJobStore::new(
            Arc::new(SequenceIdGenerator::new(&["queued", "running", "done"])),
            Arc::new(FixedTimeProvider::new(10)),
        ));
        let queued = store.persist(request()).await.unwrap();
        let running = store.persist(request()).await.unwrap();
        let done = store.persist(request()).await.unwrap();
        store.mark_running(&running.id).await.unwrap();
        store.mark_running(&done.id).await.unwrap();
        store
            .finalize(&done.id, &JobTermination::from_exit_code(0))
            .await
            .unwrap();

        let bus = JobEventBus::new(8);
        let events = bus.subscribe_status_changes();
        let recovery = RecoveryService::new(store.clone(), bus);

        assert_eq!(recovery.recover_orphaned_jobs().await.unwrap(), 2);

        for id in [&queued.id, &running.id] {
            let details = store.get_details(id).await.unwrap();
            assert_eq!(details.status, JobStatus::Aborted);
            assert_eq!(
                details.timestamps.last().unwrap().message.as_deref(),
                Some(ORPHANED_JOB_MESSAGE)
            );
        }
        let done_details = store.get_details(&done.id).await.unwrap();
        assert_eq!(done_details.status, JobStatus::FinishedSuccess);

        let published: Vec<JobEvent> = events.take(2).collect().await;
        assert!(published
            .iter()
            .all(|e| e.new_status() == Some(JobStatus::Aborted)));
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = Arc::new(InMemoryJobStore::new(
            Arc::new(SequenceIdGenerator::new(&[])),
            Arc::new(FixedTimeProvider::new(0)),
        ));
        let recovery = RecoveryService::new(store, JobEventBus::default());

        assert_eq!(recovery.recover_orphaned_jobs().await.unwrap(), 0);
    }
}
