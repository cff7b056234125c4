// jobhost Infrastructure - Filesystem Adapter
// Implements: JobStore on a local directory tree

mod job_store;
pub mod layout;

pub use job_store::{FilesystemJobStore, MAX_ID_ATTEMPTS};
pub use layout::JobsLayout;
