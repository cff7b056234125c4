// Domain Layer - Job lifecycle entities

pub mod error;
pub mod event;
pub mod job;
pub mod request;

// Re-exports
pub use error::DomainError;
pub use event::{JobEvent, OutputStream};
pub use job::{JobDetails, JobId, JobStatus, JobTermination, JobTimestamp};
pub use request::{CommandLine, CommandTemplate, JobSpec, PersistedJobRequest, ValidJobRequest};
