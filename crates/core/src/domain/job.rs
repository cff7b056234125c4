// Job Domain Model

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::error::{DomainError, Result};

/// Upper bound for externally supplied ids (generated ids are 10 chars)
pub const MAX_JOB_ID_LEN: usize = 64;

/// Job identifier.
///
/// Always a non-empty ASCII alphanumeric token, so it is safe as a path
/// segment, a URL path component and a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Validate an id received from outside the process (RPC, directory listing)
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() || raw.len() > MAX_JOB_ID_LEN {
            return Err(DomainError::InvalidJobId(format!(
                "length must be 1..={} (got {})",
                MAX_JOB_ID_LEN,
                raw.len()
            )));
        }
        if !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DomainError::InvalidJobId(format!(
                "'{}' contains non-alphanumeric characters",
                raw
            )));
        }
        Ok(Self(raw.to_string()))
    }

    /// Wrap a token produced by an `IdGenerator` (already alphanumeric)
    pub(crate) fn from_generated(token: String) -> Self {
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for JobId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self> {
        JobId::parse(&value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

/// Job Status
///
/// Advances monotonically: SUBMITTED -> RUNNING -> one terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Submitted,
    Running,
    FinishedSuccess,
    FinishedError,
    Aborted,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::FinishedSuccess | JobStatus::FinishedError | JobStatus::Aborted
        )
    }

    /// SUBMITTED may jump straight to a terminal status (spawn failure, abort
    /// before start). Nothing leaves a terminal status.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match self {
            JobStatus::Submitted => next == JobStatus::Running || next.is_terminal(),
            JobStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Submitted => write!(f, "SUBMITTED"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::FinishedSuccess => write!(f, "FINISHED_SUCCESS"),
            JobStatus::FinishedError => write!(f, "FINISHED_ERROR"),
            JobStatus::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// One entry of a job's status history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTimestamp {
    pub status: JobStatus,
    pub time: i64, // epoch ms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// How a job ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTermination {
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub message: Option<String>,
}

impl JobTermination {
    /// 0 => FINISHED_SUCCESS, anything else => FINISHED_ERROR
    pub fn from_exit_code(code: i32) -> Self {
        let status = if code == 0 {
            JobStatus::FinishedSuccess
        } else {
            JobStatus::FinishedError
        };
        Self {
            status,
            exit_code: Some(code),
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::FinishedError,
            exit_code: None,
            message: Some(message.into()),
        }
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Aborted,
            exit_code: None,
            message: Some(message.into()),
        }
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }
}

/// Mutable metadata of a job (everything except the output logs)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDetails {
    pub id: JobId,
    pub name: String,
    pub owner: String,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub submitted_at: i64, // epoch ms
    pub timestamps: Vec<JobTimestamp>,
}

impl JobDetails {
    /// New details in SUBMITTED status
    pub fn new(
        id: JobId,
        name: impl Into<String>,
        owner: impl Into<String>,
        submitted_at: i64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            owner: owner.into(),
            status: JobStatus::Submitted,
            exit_code: None,
            submitted_at,
            timestamps: vec![JobTimestamp {
                status: JobStatus::Submitted,
                time: submitted_at,
                message: None,
            }],
        }
    }

    /// SUBMITTED -> RUNNING
    pub fn start(&mut self, now_millis: i64) -> Result<()> {
        if self.status != JobStatus::Submitted {
            return Err(DomainError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: JobStatus::Running.to_string(),
            });
        }
        self.push_status(JobStatus::Running, now_millis, None);
        Ok(())
    }

    /// Move to a terminal status. Fails if already terminal or if the
    /// requested status is not terminal.
    pub fn finish(&mut self, termination: &JobTermination, now_millis: i64) -> Result<()> {
        if !termination.status.is_terminal() || !self.status.can_transition_to(termination.status)
        {
            return Err(DomainError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: termination.status.to_string(),
            });
        }
        self.exit_code = termination.exit_code;
        self.push_status(termination.status, now_millis, termination.message.clone());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn started_at(&self) -> Option<i64> {
        self.timestamps
            .iter()
            .find(|t| t.status == JobStatus::Running)
            .map(|t| t.time)
    }

    pub fn finished_at(&self) -> Option<i64> {
        self.timestamps
            .iter()
            .rev()
            .find(|t| t.status.is_terminal())
            .map(|t| t.time)
    }

    fn push_status(&mut self, status: JobStatus, time: i64, message: Option<String>) {
        self.status = status;
        self.timestamps.push(JobTimestamp {
            status,
            time,
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details() -> JobDetails {
        JobDetails::new(JobId::parse("abc123").unwrap(), "build", "alice", 1000)
    }

    #[test]
    fn test_job_id_rejects_path_traversal() {
        assert!(JobId::parse("../etc").is_err());
        assert!(JobId::parse("a/b").is_err());
        assert!(JobId::parse("").is_err());
        assert!(JobId::parse(&"a".repeat(MAX_JOB_ID_LEN + 1)).is_err());
        assert!(JobId::parse("k3j2h1g0f9").is_ok());
    }

    #[test]
    fn test_job_id_serde_is_plain_string() {
        let id = JobId::parse("k3j2h1g0f9").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"k3j2h1g0f9\"");

        let bad: std::result::Result<JobId, _> = serde_json::from_str("\"../x\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_lifecycle_success() {
        let mut d = details();
        assert_eq!(d.status, JobStatus::Submitted);

        d.start(2000).unwrap();
        assert_eq!(d.status, JobStatus::Running);
        assert_eq!(d.started_at(), Some(2000));

        d.finish(&JobTermination::from_exit_code(0), 3000).unwrap();
        assert_eq!(d.status, JobStatus::FinishedSuccess);
        assert_eq!(d.exit_code, Some(0));
        assert_eq!(d.finished_at(), Some(3000));
        assert_eq!(d.timestamps.len(), 3);
    }

    #[test]
    fn test_terminal_is_final() {
        let mut d = details();
        d.start(2000).unwrap();
        d.finish(&JobTermination::from_exit_code(1), 3000).unwrap();
        assert_eq!(d.status, JobStatus::FinishedError);

        let again = d.finish(&JobTermination::from_exit_code(0), 4000);
        assert!(matches!(
            again,
            Err(DomainError::InvalidStatusTransition { .. })
        ));
        assert_eq!(d.status, JobStatus::FinishedError);
        assert_eq!(d.exit_code, Some(1));
        assert!(d.start(5000).is_err());
    }

    #[test]
    fn test_submitted_can_fail_without_running() {
        let mut d = details();
        d.finish(&JobTermination::failed("No such file or directory"), 1500)
            .unwrap();
        assert_eq!(d.status, JobStatus::FinishedError);
        assert_eq!(d.started_at(), None);
        assert_eq!(
            d.timestamps.last().unwrap().message.as_deref(),
            Some("No such file or directory")
        );
    }

    #[test]
    fn test_finish_rejects_non_terminal_status() {
        let mut d = details();
        let bogus = JobTermination {
            status: JobStatus::Running,
            exit_code: None,
            message: None,
        };
        assert!(d.finish(&bogus, 2000).is_err());
        assert_eq!(d.status, JobStatus::Submitted);
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&JobStatus::FinishedSuccess).unwrap();
        assert_eq!(json, "\"FINISHED_SUCCESS\"");
        assert_eq!(JobStatus::Aborted.to_string(), "ABORTED");
    }
}
