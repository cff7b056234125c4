// On-disk layout of the jobs directory
//
// <root>/
//   .staging/<uuid>/      records being written, invisible to readers
//   <job id>/
//     details.json        replaced atomically on every transition
//     spec.json           written once
//     request.json        written once
//     stdout, stderr      append-only, created by the first append

use jobhost_core::domain::{JobId, OutputStream};
use std::path::{Path, PathBuf};

pub const STAGING_DIR: &str = ".staging";
pub const DETAILS_FILE: &str = "details.json";
pub const SPEC_FILE: &str = "spec.json";
pub const REQUEST_FILE: &str = "request.json";
pub const STDOUT_FILE: &str = "stdout";
pub const STDERR_FILE: &str = "stderr";

/// Temp name for the details document while it is being replaced
pub const DETAILS_TEMP_FILE: &str = ".details.json.tmp";

#[derive(Debug, Clone)]
pub struct JobsLayout {
    root: PathBuf,
}

impl JobsLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging_root(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Ids are alphanumeric, so the join never leaves the root
    pub fn job_dir(&self, id: &JobId) -> PathBuf {
        self.root.join(id.as_str())
    }

    pub fn details_path(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join(DETAILS_FILE)
    }

    pub fn details_temp_path(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join(DETAILS_TEMP_FILE)
    }

    pub fn spec_path(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join(SPEC_FILE)
    }

    pub fn request_path(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join(REQUEST_FILE)
    }

    pub fn output_path(&self, id: &JobId, stream: OutputStream) -> PathBuf {
        self.job_dir(id).join(output_file(stream))
    }
}

pub fn output_file(stream: OutputStream) -> &'static str {
    match stream {
        OutputStream::Stdout => STDOUT_FILE,
        OutputStream::Stderr => STDERR_FILE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_live_under_job_dir() {
        let layout = JobsLayout::new("/var/jobs");
        let id = JobId::parse("abc123").unwrap();

        assert_eq!(layout.job_dir(&id), PathBuf::from("/var/jobs/abc123"));
        assert_eq!(
            layout.output_path(&id, OutputStream::Stderr),
            PathBuf::from("/var/jobs/abc123/stderr")
        );
        assert_eq!(layout.staging_root(), PathBuf::from("/var/jobs/.staging"));
    }
}
