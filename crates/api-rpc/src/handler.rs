//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method.

use crate::error::{throttled, to_rpc_error};
use crate::rate_limiter::RateLimiter;
use crate::types::{
    AbortResponse, JobDetailsResponse, JobIdRequest, ListJobsRequest, ListJobsResponse,
    OutputResponse, SubmitJobRequest, SubmitJobResponse, SubscribeEventsRequest,
};
use futures::TryStreamExt;
use jobhost_core::application::{JobEventStream, JobService};
use jobhost_core::domain::{JobId, JobSpec, JobStatus, OutputStream, ValidJobRequest};
use jobhost_core::error::AppError;
use jobhost_core::port::JobStore;
use jsonrpsee::types::ErrorObjectOwned;

/// Submit throttle settings
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub burst: u32,
    pub per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        // 200 burst, 100 req/sec
        Self {
            burst: 200,
            per_second: 100,
        }
    }
}

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    service: JobService,
    rate_limiter: RateLimiter,
}

fn parse_job_id(raw: &str) -> Result<JobId, ErrorObjectOwned> {
    JobId::parse(raw).map_err(|e| to_rpc_error(AppError::InvalidArgument(e.to_string())))
}

fn not_found(id: &JobId) -> ErrorObjectOwned {
    to_rpc_error(AppError::NotFound(format!("Job {} not found", id)))
}

impl RpcHandler {
    pub fn new(service: JobService, rate_limit: RateLimitConfig) -> Self {
        Self {
            service,
            rate_limiter: RateLimiter::new(rate_limit.burst, rate_limit.per_second),
        }
    }

    /// jobs.submit.v1
    pub async fn submit(
        &self,
        params: SubmitJobRequest,
    ) -> Result<SubmitJobResponse, ErrorObjectOwned> {
        // Rate limiting check (DoS protection)
        if !self.rate_limiter.try_acquire() {
            return Err(throttled());
        }

        let request = ValidJobRequest::new(
            params.owner,
            params.name,
            params.spec,
            params.inputs,
            params.command,
        )
        .map_err(|e| to_rpc_error(AppError::InvalidArgument(e.to_string())))?;

        let job = self.service.submit(request).await.map_err(to_rpc_error)?;

        Ok(SubmitJobResponse {
            job_id: job.id.to_string(),
            status: JobStatus::Submitted,
            submitted_at: job.persisted_at,
        })
    }

    /// jobs.details.v1
    pub async fn details(
        &self,
        params: JobIdRequest,
    ) -> Result<JobDetailsResponse, ErrorObjectOwned> {
        let id = parse_job_id(&params.job_id)?;
        let store = self.service.store();

        let details = store.get_details(&id).await.ok_or_else(|| not_found(&id))?;

        Ok(JobDetailsResponse {
            details,
            has_stdout: store.has_stdout(&id).await,
            has_stderr: store.has_stderr(&id).await,
        })
    }

    /// jobs.spec.v1
    pub async fn spec(&self, params: JobIdRequest) -> Result<JobSpec, ErrorObjectOwned> {
        let id = parse_job_id(&params.job_id)?;

        self.service
            .store()
            .get_spec_snapshot(&id)
            .await
            .ok_or_else(|| not_found(&id))
    }

    /// jobs.stdout.v1 / jobs.stderr.v1
    pub async fn output(
        &self,
        params: JobIdRequest,
        stream: OutputStream,
    ) -> Result<OutputResponse, ErrorObjectOwned> {
        let id = parse_job_id(&params.job_id)?;
        let store = self.service.store();

        if !store.exists(&id).await {
            return Err(not_found(&id));
        }

        let text = match store.read_output(&id, stream).await {
            Some(chunks) => {
                let chunks: Vec<Vec<u8>> = chunks
                    .try_collect()
                    .await
                    .map_err(|e| to_rpc_error(AppError::Io(e)))?;
                Some(String::from_utf8_lossy(&chunks.concat()).into_owned())
            }
            None => None,
        };

        Ok(OutputResponse {
            job_id: params.job_id,
            text,
        })
    }

    /// jobs.abort.v1
    pub async fn abort(&self, params: JobIdRequest) -> Result<AbortResponse, ErrorObjectOwned> {
        let id = parse_job_id(&params.job_id)?;

        let aborted = self.service.abort(&id).await.map_err(to_rpc_error)?;

        Ok(AbortResponse {
            job_id: params.job_id,
            aborted,
        })
    }

    /// jobs.list.v1
    pub async fn list(&self, params: ListJobsRequest) -> Result<ListJobsResponse, ErrorObjectOwned> {
        let store = self.service.store();
        let ids = store.list_ids().await.map_err(to_rpc_error)?;

        let mut jobs = Vec::new();
        for id in ids {
            if jobs.len() >= params.limit {
                break;
            }
            // Removed between listing and reading
            let Some(details) = store.get_details(&id).await else {
                continue;
            };
            if params.status.is_some_and(|s| s != details.status) {
                continue;
            }
            if params.owner.as_deref().is_some_and(|o| o != details.owner) {
                continue;
            }
            jobs.push(details);
        }

        Ok(ListJobsResponse { jobs })
    }

    /// Event stream for jobs.subscribe_events.v1
    pub fn events(&self, params: SubscribeEventsRequest) -> Result<JobEventStream, ErrorObjectOwned> {
        let bus = self.service.events();
        let job_id = params.job_id.as_deref().map(parse_job_id).transpose()?;

        let stream = match (job_id, params.include_output) {
            (Some(id), true) => bus.subscribe(id),
            (Some(id), false) => bus.subscribe_job_status(id),
            (None, true) => bus.subscribe_all(),
            (None, false) => bus.subscribe_status_changes(),
        };
        Ok(stream)
    }
}
