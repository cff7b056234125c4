// Lifecycle constants (no magic values)
use std::time::Duration;

/// Read size for child stdout/stderr pipes and log read-back (bytes)
pub const STDIO_CHUNK_SIZE: usize = 4096;

/// Per-subscriber event buffer of the JobEventBus
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Time a terminated child gets between SIGTERM and SIGKILL
pub const GRACEFUL_TERMINATION_TIMEOUT: Duration = Duration::from_secs(5);

/// How long capture paths may keep draining after the child exited
/// (a grandchild can hold the pipe open)
pub const CAPTURE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Message recorded on jobs aborted by the terminate capability
pub const ABORT_REQUESTED_MESSAGE: &str = "terminate requested";

/// Message recorded on jobs found non-terminal at startup
pub const ORPHANED_JOB_MESSAGE: &str = "orphaned by daemon restart";
