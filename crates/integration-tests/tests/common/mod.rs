//! Shared wiring for the scenario tests: real filesystem store, real
//! subprocesses, short supervisor timeouts.
#![allow(dead_code)]

use futures::{StreamExt, TryStreamExt};
use jobhost_core::application::{JobEventBus, JobEventStream, JobService, ProcessSupervisor, SupervisorConfig};
use jobhost_core::domain::{
    CommandLine, CommandTemplate, JobEvent, JobId, JobSpec, JobStatus, OutputStream, ValidJobRequest,
};
use jobhost_core::port::id_provider::RandomIdGenerator;
use jobhost_core::port::time_provider::SystemTimeProvider;
use jobhost_core::port::JobStore;
use jobhost_infra_fs::FilesystemJobStore;
use jobhost_infra_system::SubprocessSpawner;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Engine {
    // Keeps the jobs directory alive for the test
    pub dir: TempDir,
    pub store: Arc<dyn JobStore>,
    pub bus: JobEventBus,
    pub supervisor: ProcessSupervisor,
    pub service: JobService,
}

pub async fn open_store(root: &Path, seed: u64) -> Arc<dyn JobStore> {
    Arc::new(
        FilesystemJobStore::open(
            root,
            Arc::new(RandomIdGenerator::seeded(seed)),
            Arc::new(SystemTimeProvider),
        )
        .await
        .unwrap(),
    )
}

pub async fn engine() -> Engine {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path(), 7).await;
    let bus = JobEventBus::new(1024);
    let supervisor = ProcessSupervisor::new(
        store.clone(),
        Arc::new(SubprocessSpawner::default()),
        bus.clone(),
    )
    .with_config(SupervisorConfig {
        chunk_size: 1024,
        termination_grace: Duration::from_millis(500),
        drain_timeout: Duration::from_millis(300),
    });
    let service = JobService::new(store.clone(), supervisor.clone(), bus.clone());

    Engine {
        dir,
        store,
        bus,
        supervisor,
        service,
    }
}

pub fn sh(script: &str) -> CommandLine {
    CommandLine::new("/bin/sh").arg("-c").arg(script)
}

pub fn request(name: &str, command: CommandLine) -> ValidJobRequest {
    let spec = JobSpec {
        id: "shell".to_string(),
        name: "Shell command".to_string(),
        description: Some("Runs a command line".to_string()),
        expected_inputs: serde_json::Value::Null,
        command: CommandTemplate {
            application: command.program.clone(),
            arguments: command.args.clone(),
        },
    };
    ValidJobRequest::new("tester", name, spec, serde_json::json!({}), command).unwrap()
}

pub async fn read_text(store: &Arc<dyn JobStore>, id: &JobId, stream: OutputStream) -> Option<String> {
    let chunks = store.read_output(id, stream).await?;
    let chunks: Vec<Vec<u8>> = chunks.try_collect().await.unwrap();
    Some(String::from_utf8_lossy(&chunks.concat()).into_owned())
}

/// Collect events until `id` reaches a terminal status
pub async fn events_until_terminal(events: &mut JobEventStream, id: &JobId) -> Vec<JobEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(EVENT_TIMEOUT, events.next())
            .await
            .expect("timed out waiting for job events")
            .expect("event stream ended");
        if event.job_id() != id {
            continue;
        }
        let terminal = event.new_status().is_some_and(JobStatus::is_terminal);
        seen.push(event);
        if terminal {
            return seen;
        }
    }
}

pub fn statuses(events: &[JobEvent]) -> Vec<JobStatus> {
    events.iter().filter_map(JobEvent::new_status).collect()
}
