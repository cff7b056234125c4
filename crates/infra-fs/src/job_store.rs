// Filesystem JobStore Implementation

use async_trait::async_trait;
use futures::StreamExt;
use jobhost_core::domain::{
    JobDetails, JobId, JobSpec, JobTermination, OutputStream, PersistedJobRequest, ValidJobRequest,
};
use jobhost_core::error::{AppError, Result};
use jobhost_core::port::{read_chunks, ByteChunkStream, IdGenerator, JobStore, TimeProvider};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::layout::JobsLayout;

/// Attempts at finding an unused id before giving up
pub const MAX_ID_ATTEMPTS: usize = 8;

/// Read size for log streams
const READ_CHUNK_SIZE: usize = 8192;

// Helper to convert an io::Error on the durable medium into StoreUnavailable
fn unavailable(context: &str, path: &Path, err: io::Error) -> AppError {
    AppError::StoreUnavailable(format!("{} {}: {}", context, path.display(), err))
}

/// JobStore on a local directory tree (see `layout` for the file names)
pub struct FilesystemJobStore {
    layout: JobsLayout,
    id_generator: Arc<dyn IdGenerator>,
    time_provider: Arc<dyn TimeProvider>,
    // Serializes read-modify-write of one job's details document
    details_locks: Mutex<HashMap<JobId, Arc<tokio::sync::Mutex<()>>>>,
}

impl FilesystemJobStore {
    /// Open the store rooted at `root`.
    ///
    /// The root must already exist and be writable. Leftovers of records that
    /// were being staged when a previous process died are removed.
    pub async fn open(
        root: impl Into<PathBuf>,
        id_generator: Arc<dyn IdGenerator>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        let layout = JobsLayout::new(root);
        let root = layout.root();

        let meta = fs::metadata(root)
            .await
            .map_err(|e| unavailable("jobs directory not accessible:", root, e))?;
        if !meta.is_dir() {
            return Err(AppError::StoreUnavailable(format!(
                "jobs directory {} is not a directory",
                root.display()
            )));
        }

        let staging = layout.staging_root();
        fs::create_dir_all(&staging)
            .await
            .map_err(|e| unavailable("cannot create staging directory", &staging, e))?;
        let removed = clear_staging(&staging).await?;
        if removed > 0 {
            warn!(removed = removed, "Removed incomplete job records from staging");
        }

        info!(root = %root.display(), "Filesystem job store opened");

        Ok(Self {
            layout,
            id_generator,
            time_provider,
            details_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    fn details_lock(&self, id: &JobId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .details_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id.clone()).or_default())
    }

    fn forget_details_lock(&self, id: &JobId) {
        self.details_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Read-modify-write of the details document under the job's lock
    async fn update_details<F>(&self, id: &JobId, apply: F) -> Result<JobDetails>
    where
        F: FnOnce(&mut JobDetails) -> Result<()> + Send,
    {
        let lock = self.details_lock(id);
        let _guard = lock.lock().await;

        let path = self.layout.details_path(id);
        let mut details: JobDetails = match read_json(&path).await {
            Ok(Some(details)) => details,
            Ok(None) => return Err(AppError::NotFound(format!("Job {} not found", id))),
            Err(e) => return Err(e),
        };

        apply(&mut details)?;

        let temp = self.layout.details_temp_path(id);
        write_atomic(&temp, &path, &serde_json::to_vec_pretty(&details)?).await?;
        Ok(details)
    }

    /// Write the three documents of a new record into `dir`
    async fn write_record(&self, dir: &Path, job: &PersistedJobRequest, details: &JobDetails) -> Result<()> {
        write_json_synced(&dir.join(crate::layout::DETAILS_FILE), details).await?;
        write_json_synced(&dir.join(crate::layout::SPEC_FILE), job.spec()).await?;
        write_json_synced(&dir.join(crate::layout::REQUEST_FILE), job).await?;
        Ok(())
    }

    async fn commit_staged(&self, staging: &Path, request: ValidJobRequest) -> Result<PersistedJobRequest> {
        let now = self.time_provider.now_millis();
        let mut job = PersistedJobRequest::new(self.id_generator.generate(), now, request);

        for attempt in 1..=MAX_ID_ATTEMPTS {
            if attempt > 1 {
                job.id = self.id_generator.generate();
            }
            let target = self.layout.job_dir(&job.id);

            if fs::try_exists(&target).await.unwrap_or(true) {
                warn!(job_id = %job.id, attempt = attempt, "Job id collision, retrying");
                continue;
            }

            let details = JobDetails::new(job.id.clone(), job.request.name(), job.request.owner(), now);
            self.write_record(staging, &job, &details).await?;

            match fs::rename(staging, &target).await {
                Ok(()) => {
                    sync_dir(self.layout.root()).await;
                    return Ok(job);
                }
                // Lost a race for the id (directory appeared since the existence check)
                Err(_) if fs::try_exists(&target).await.unwrap_or(false) => {
                    warn!(job_id = %job.id, attempt = attempt, "Job id collision on commit, retrying");
                }
                Err(e) => return Err(unavailable("cannot commit job record", &target, e)),
            }
        }

        Err(AppError::StoreUnavailable(format!(
            "no unused job id after {} attempts",
            MAX_ID_ATTEMPTS
        )))
    }
}

#[async_trait]
impl JobStore for FilesystemJobStore {
    async fn persist(&self, request: ValidJobRequest) -> Result<PersistedJobRequest> {
        let staging = self.layout.staging_root().join(Uuid::new_v4().to_string());
        fs::create_dir(&staging)
            .await
            .map_err(|e| unavailable("cannot create staging directory", &staging, e))?;

        let result = self.commit_staged(&staging, request).await;
        if result.is_err() {
            if let Err(e) = fs::remove_dir_all(&staging).await {
                warn!(path = %staging.display(), error = %e, "Failed to clean up staging directory");
            }
        }

        let job = result?;
        debug!(job_id = %job.id, "Job record committed");
        Ok(job)
    }

    async fn exists(&self, id: &JobId) -> bool {
        is_file(&self.layout.details_path(id)).await
    }

    async fn list_ids(&self) -> Result<Vec<JobId>> {
        let root = self.layout.root();
        let mut entries = fs::read_dir(root)
            .await
            .map_err(|e| unavailable("cannot list jobs directory", root, e))?;

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| unavailable("cannot list jobs directory", root, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            // Foreign entries (not a valid id) are not ours
            let Ok(id) = JobId::parse(name) else { continue };
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }

    async fn get_details(&self, id: &JobId) -> Option<JobDetails> {
        read_json_logged(&self.layout.details_path(id)).await
    }

    async fn get_spec_snapshot(&self, id: &JobId) -> Option<JobSpec> {
        read_json_logged(&self.layout.spec_path(id)).await
    }

    async fn get_request(&self, id: &JobId) -> Option<PersistedJobRequest> {
        read_json_logged(&self.layout.request_path(id)).await
    }

    async fn mark_running(&self, id: &JobId) -> Result<JobDetails> {
        let now = self.time_provider.now_millis();
        self.update_details(id, |d| Ok(d.start(now)?)).await
    }

    async fn finalize(&self, id: &JobId, termination: &JobTermination) -> Result<JobDetails> {
        if !termination.status.is_terminal() {
            return Err(AppError::InvalidArgument(format!(
                "{} is not a terminal status",
                termination.status
            )));
        }

        let now = self.time_provider.now_millis();
        let details = self
            .update_details(id, |d| {
                if d.is_terminal() {
                    return Err(AppError::AlreadyFinalized(id.to_string()));
                }
                Ok(d.finish(termination, now)?)
            })
            .await?;

        // Terminal details never change again
        self.forget_details_lock(id);
        Ok(details)
    }

    async fn append_output(
        &self,
        id: &JobId,
        stream: OutputStream,
        mut chunks: ByteChunkStream,
    ) -> Result<u64> {
        let job_dir = self.layout.job_dir(id);
        if !fs::try_exists(&job_dir).await.unwrap_or(false) {
            return Err(AppError::NotFound(format!("Job {} not found", id)));
        }

        // The log is created by its first byte; an empty stream leaves none
        let path = self.layout.output_path(id, stream);
        let mut file: Option<File> = None;

        let mut written = 0u64;
        let outcome: io::Result<()> = async {
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                if chunk.is_empty() {
                    continue;
                }
                let log = match &mut file {
                    Some(log) => log,
                    slot => slot.insert(
                        OpenOptions::new()
                            .create(true)
                            .append(true)
                            .open(&path)
                            .await?,
                    ),
                };
                log.write_all(&chunk).await?;
                // Readers see every chunk as soon as it is captured
                log.flush().await?;
                written += chunk.len() as u64;
            }
            Ok(())
        }
        .await;

        if let Some(file) = &file {
            if let Err(e) = file.sync_data().await {
                debug!(job_id = %id, stream = %stream, error = %e, "sync_data failed on log");
            }
        }

        outcome?;
        Ok(written)
    }

    async fn has_output(&self, id: &JobId, stream: OutputStream) -> bool {
        // Checked on every call: logs may be removed externally
        is_file(&self.layout.output_path(id, stream)).await
    }

    async fn read_output(&self, id: &JobId, stream: OutputStream) -> Option<ByteChunkStream> {
        let file = File::open(self.layout.output_path(id, stream)).await.ok()?;
        Some(read_chunks(file, READ_CHUNK_SIZE))
    }
}

// ============================================================================
// File helpers
// ============================================================================

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

/// `Ok(None)` if the file does not exist
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(unavailable("cannot read", path, e)),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Query-side read: every failure is reported as absence
async fn read_json_logged<T: DeserializeOwned>(path: &Path) -> Option<T> {
    match read_json(path).await {
        Ok(value) => value,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable job document");
            None
        }
    }
}

async fn write_json_synced<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_synced(path, &bytes).await
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)
        .await
        .map_err(|e| unavailable("cannot create", path, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| unavailable("cannot write", path, e))?;
    file.sync_all()
        .await
        .map_err(|e| unavailable("cannot sync", path, e))?;
    Ok(())
}

/// Replace `path` so that readers see either the old or the new content
async fn write_atomic(temp: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    write_synced(temp, bytes).await?;
    fs::rename(temp, path)
        .await
        .map_err(|e| unavailable("cannot replace", path, e))
}

/// Persist a directory entry change (best effort)
async fn sync_dir(dir: &Path) {
    let synced = match File::open(dir).await {
        Ok(handle) => handle.sync_all().await,
        Err(e) => Err(e),
    };
    if let Err(e) = synced {
        debug!(path = %dir.display(), error = %e, "Directory sync failed");
    }
}

async fn clear_staging(staging: &Path) -> Result<usize> {
    let mut entries = fs::read_dir(staging)
        .await
        .map_err(|e| unavailable("cannot list staging directory", staging, e))?;

    let mut removed = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| unavailable("cannot list staging directory", staging, e))?
    {
        let path = entry.path();
        let outcome = if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        match outcome {
            Ok(()) => removed += 1,
            Err(e) => return Err(unavailable("cannot clean staging entry", &path, e)),
        }
    }
    Ok(removed)
}
