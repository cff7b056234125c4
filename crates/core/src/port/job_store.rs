// Job Store Port (Interface)

use async_trait::async_trait;
use futures::stream::{self, Stream};
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::domain::{
    JobDetails, JobId, JobSpec, JobTermination, OutputStream, PersistedJobRequest, ValidJobRequest,
};
use crate::error::Result;

/// Lazy sequence of byte chunks (an output log being written or read back)
pub type ByteChunkStream = Pin<Box<dyn Stream<Item = std::io::Result<Vec<u8>>> + Send>>;

/// Turn any async reader into a chunk stream that ends at EOF.
///
/// A read error is yielded once and terminates the stream.
pub fn read_chunks<R>(reader: R, chunk_size: usize) -> ByteChunkStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let chunk_size = chunk_size.max(1);
    Box::pin(stream::try_unfold(reader, move |mut reader| async move {
        let mut buf = vec![0u8; chunk_size];
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some((buf, reader)))
    }))
}

/// Durable store of job records
///
/// Read-side queries never fail: absence (unknown id, removed log, unreadable
/// record) is reported as `None` / `false`.
///
/// Output logs follow single-writer discipline per (job, stream); the store
/// does not lock appends. Any number of readers may run concurrently.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Assign an id and durably create the job record.
    ///
    /// The record (details + spec snapshot + request) is fully written before
    /// the id becomes visible to any reader.
    async fn persist(&self, request: ValidJobRequest) -> Result<PersistedJobRequest>;

    /// True if a committed record exists for `id`
    async fn exists(&self, id: &JobId) -> bool;

    /// Ids of all committed records
    async fn list_ids(&self) -> Result<Vec<JobId>>;

    async fn get_details(&self, id: &JobId) -> Option<JobDetails>;

    /// Spec the job was submitted against
    async fn get_spec_snapshot(&self, id: &JobId) -> Option<JobSpec>;

    async fn get_request(&self, id: &JobId) -> Option<PersistedJobRequest>;

    /// SUBMITTED -> RUNNING
    async fn mark_running(&self, id: &JobId) -> Result<JobDetails>;

    /// Move the job to a terminal status exactly once.
    ///
    /// # Errors
    /// - `InvalidArgument` if `termination.status` is not terminal
    /// - `AlreadyFinalized` if the job is already terminal (stored state untouched)
    /// - `NotFound` if the job does not exist
    async fn finalize(&self, id: &JobId, termination: &JobTermination) -> Result<JobDetails>;

    /// Append chunks in order to one of the job's logs.
    ///
    /// Returns the number of bytes appended. Stops at the first error item
    /// from `chunks` (everything before it stays appended).
    async fn append_output(
        &self,
        id: &JobId,
        stream: OutputStream,
        chunks: ByteChunkStream,
    ) -> Result<u64>;

    /// Live existence check (reflects external deletion)
    async fn has_output(&self, id: &JobId, stream: OutputStream) -> bool;

    /// Fresh read from the start of the log; `None` if the log does not exist
    async fn read_output(&self, id: &JobId, stream: OutputStream) -> Option<ByteChunkStream>;

    async fn append_stdout(&self, id: &JobId, chunks: ByteChunkStream) -> Result<u64> {
        self.append_output(id, OutputStream::Stdout, chunks).await
    }

    async fn append_stderr(&self, id: &JobId, chunks: ByteChunkStream) -> Result<u64> {
        self.append_output(id, OutputStream::Stderr, chunks).await
    }

    async fn has_stdout(&self, id: &JobId) -> bool {
        self.has_output(id, OutputStream::Stdout).await
    }

    async fn has_stderr(&self, id: &JobId) -> bool {
        self.has_output(id, OutputStream::Stderr).await
    }

    async fn read_stdout(&self, id: &JobId) -> Option<ByteChunkStream> {
        self.read_output(id, OutputStream::Stdout).await
    }

    async fn read_stderr(&self, id: &JobId) -> Option<ByteChunkStream> {
        self.read_output(id, OutputStream::Stderr).await
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use crate::port::{IdGenerator, TimeProvider};
    use futures::StreamExt;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Record {
        request: Option<PersistedJobRequest>,
        details: Option<JobDetails>,
        stdout: Option<Vec<u8>>,
        stderr: Option<Vec<u8>>,
    }

    /// In-memory JobStore for unit tests of the lifecycle services
    pub struct InMemoryJobStore {
        records: Mutex<HashMap<JobId, Record>>,
        id_generator: Arc<dyn IdGenerator>,
        time_provider: Arc<dyn TimeProvider>,
    }

    impl InMemoryJobStore {
        pub fn new(id_generator: Arc<dyn IdGenerator>, time_provider: Arc<dyn TimeProvider>) -> Self {
            Self {
                records: Mutex::new(HashMap::new()),
                id_generator,
                time_provider,
            }
        }

        /// Full contents of a log (test helper)
        pub fn output(&self, id: &JobId, stream: OutputStream) -> Option<Vec<u8>> {
            let records = self.records.lock().unwrap();
            let record = records.get(id)?;
            match stream {
                OutputStream::Stdout => record.stdout.clone(),
                OutputStream::Stderr => record.stderr.clone(),
            }
        }

        fn update_details<F>(&self, id: &JobId, f: F) -> Result<JobDetails>
        where
            F: FnOnce(&mut JobDetails) -> Result<()>,
        {
            let mut records = self.records.lock().unwrap();
            let details = records
                .get_mut(id)
                .and_then(|r| r.details.as_mut())
                .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;
            let mut updated = details.clone();
            f(&mut updated)?;
            *details = updated.clone();
            Ok(updated)
        }
    }

    #[async_trait]
    impl JobStore for InMemoryJobStore {
        async fn persist(&self, request: ValidJobRequest) -> Result<PersistedJobRequest> {
            let now = self.time_provider.now_millis();
            let mut records = self.records.lock().unwrap();
            let mut id = self.id_generator.generate();
            while records.contains_key(&id) {
                id = self.id_generator.generate();
            }
            let details = JobDetails::new(id.clone(), request.name(), request.owner(), now);
            let persisted = PersistedJobRequest::new(id.clone(), now, request);
            records.insert(
                id,
                Record {
                    request: Some(persisted.clone()),
                    details: Some(details),
                    ..Record::default()
                },
            );
            Ok(persisted)
        }

        async fn exists(&self, id: &JobId) -> bool {
            self.records.lock().unwrap().contains_key(id)
        }

        async fn list_ids(&self) -> Result<Vec<JobId>> {
            let mut ids: Vec<JobId> = self.records.lock().unwrap().keys().cloned().collect();
            ids.sort();
            Ok(ids)
        }

        async fn get_details(&self, id: &JobId) -> Option<JobDetails> {
            self.records.lock().unwrap().get(id)?.details.clone()
        }

        async fn get_spec_snapshot(&self, id: &JobId) -> Option<JobSpec> {
            let records = self.records.lock().unwrap();
            Some(records.get(id)?.request.as_ref()?.spec().clone())
        }

        async fn get_request(&self, id: &JobId) -> Option<PersistedJobRequest> {
            self.records.lock().unwrap().get(id)?.request.clone()
        }

        async fn mark_running(&self, id: &JobId) -> Result<JobDetails> {
            let now = self.time_provider.now_millis();
            self.update_details(id, |d| Ok(d.start(now)?))
        }

        async fn finalize(&self, id: &JobId, termination: &JobTermination) -> Result<JobDetails> {
            if !termination.status.is_terminal() {
                return Err(AppError::InvalidArgument(format!(
                    "{} is not a terminal status",
                    termination.status
                )));
            }
            let now = self.time_provider.now_millis();
            self.update_details(id, |d| {
                if d.is_terminal() {
                    return Err(AppError::AlreadyFinalized(id.to_string()));
                }
                Ok(d.finish(termination, now)?)
            })
        }

        async fn append_output(
            &self,
            id: &JobId,
            stream: OutputStream,
            mut chunks: ByteChunkStream,
        ) -> Result<u64> {
            if !self.records.lock().unwrap().contains_key(id) {
                return Err(AppError::NotFound(format!("Job {} not found", id)));
            }
            let mut written = 0u64;
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                // Like the filesystem store, the log appears with its first byte
                if chunk.is_empty() {
                    continue;
                }
                let mut records = self.records.lock().unwrap();
                let record = records
                    .get_mut(id)
                    .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;
                let log = match stream {
                    OutputStream::Stdout => &mut record.stdout,
                    OutputStream::Stderr => &mut record.stderr,
                };
                log.get_or_insert_with(Vec::new).extend_from_slice(&chunk);
                written += chunk.len() as u64;
            }
            Ok(written)
        }

        async fn has_output(&self, id: &JobId, stream: OutputStream) -> bool {
            self.output(id, stream).is_some()
        }

        async fn read_output(&self, id: &JobId, stream: OutputStream) -> Option<ByteChunkStream> {
            let data = self.output(id, stream)?;
            Some(Box::pin(futures::stream::iter(vec![Ok(data)])))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_read_chunks_splits_and_preserves_order() {
        let data: Vec<u8> = (0u8..=255).collect();
        let chunks: Vec<Vec<u8>> = read_chunks(std::io::Cursor::new(data.clone()), 100)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    async fn test_read_chunks_empty_reader() {
        let chunks: Vec<Vec<u8>> = read_chunks(std::io::Cursor::new(Vec::new()), 16)
            .try_collect()
            .await
            .unwrap();
        assert!(chunks.is_empty());
    }
}
