//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results.

use jobhost_core::domain::{CommandLine, JobDetails, JobSpec, JobStatus};
use serde::{Deserialize, Serialize};

/// jobs.submit.v1 - Submit a job
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub owner: String,
    pub name: String,
    pub spec: JobSpec,
    #[serde(default)]
    pub inputs: serde_json::Value,
    /// Resolved command line (argument templating happens upstream)
    pub command: CommandLine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub submitted_at: i64,
}

/// Parameters of every per-job query (details, spec, stdout, stderr, abort)
#[derive(Debug, Deserialize)]
pub struct JobIdRequest {
    pub job_id: String,
}

/// jobs.details.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetailsResponse {
    #[serde(flatten)]
    pub details: JobDetails,
    pub has_stdout: bool,
    pub has_stderr: bool,
}

/// jobs.stdout.v1 / jobs.stderr.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputResponse {
    pub job_id: String,
    /// Log content so far (lossy UTF-8); null if the log does not exist
    pub text: Option<String>,
}

/// jobs.abort.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbortResponse {
    pub job_id: String,
    pub aborted: bool,
}

/// jobs.list.v1 - List jobs
#[derive(Debug, Default, Deserialize)]
pub struct ListJobsRequest {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobDetails>,
}

/// jobs.subscribe_events.v1 - Push job events
#[derive(Debug, Default, Deserialize)]
pub struct SubscribeEventsRequest {
    /// Only events of this job
    #[serde(default)]
    pub job_id: Option<String>,
    /// Also push live output chunks (status changes only by default)
    #[serde(default)]
    pub include_output: bool,
}
