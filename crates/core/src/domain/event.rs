// Job Events (published on the JobEventBus)

use serde::{Deserialize, Serialize};

use crate::domain::job::{JobId, JobStatus};

/// Which output log a chunk belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// Event delivered to bus subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    StatusChanged {
        job_id: JobId,
        new_status: JobStatus,
        timestamp: i64, // epoch ms
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Output {
        job_id: JobId,
        stream: OutputStream,
        chunk: Vec<u8>,
    },
}

impl JobEvent {
    pub fn status_changed(job_id: JobId, new_status: JobStatus, timestamp: i64) -> Self {
        JobEvent::StatusChanged {
            job_id,
            new_status,
            timestamp,
            message: None,
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            JobEvent::StatusChanged { job_id, .. } => job_id,
            JobEvent::Output { job_id, .. } => job_id,
        }
    }

    pub fn is_status_change(&self) -> bool {
        matches!(self, JobEvent::StatusChanged { .. })
    }

    /// New status carried by a status-change event
    pub fn new_status(&self) -> Option<JobStatus> {
        match self {
            JobEvent::StatusChanged { new_status, .. } => Some(*new_status),
            JobEvent::Output { .. } => None,
        }
    }
}
