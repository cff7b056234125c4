// Application Layer - Job lifecycle use cases

pub mod constants;
pub mod event_bus;
pub mod job_service;
pub mod recovery;
pub mod supervisor;

// Re-exports
pub use event_bus::{JobEventBus, JobEventStream};
pub use job_service::JobService;
pub use recovery::RecoveryService;
pub use supervisor::{ProcessSupervisor, SupervisorConfig};
