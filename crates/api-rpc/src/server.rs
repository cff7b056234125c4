//! JSON-RPC Server
//!
//! JSON-RPC 2.0 over HTTP and WebSocket (subscriptions need WebSocket).

use crate::handler::{RateLimitConfig, RpcHandler};
use crate::types::{JobIdRequest, ListJobsRequest, SubmitJobRequest, SubscribeEventsRequest};
use futures::StreamExt;
use jobhost_core::application::{JobEventStream, JobService};
use jobhost_core::domain::OutputStream;
use jsonrpsee::core::SubscriptionResult;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::{PendingSubscriptionSink, RpcModule, SubscriptionMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

// Local clients only by default
pub const DEFAULT_RPC_HOST: &str = "127.0.0.1";
pub const DEFAULT_RPC_PORT: u16 = 9637;

pub const SUBSCRIBE_EVENTS: &str = "jobs.subscribe_events.v1";
pub const EVENT_NOTIFICATION: &str = "jobs.event";
pub const UNSUBSCRIBE_EVENTS: &str = "jobs.unsubscribe_events.v1";

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    /// 0 picks a free port
    pub port: u16,
    pub rate_limit: RateLimitConfig,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, service: JobService) -> Self {
        let handler = Arc::new(RpcHandler::new(service, config.rate_limit));
        Self { config, handler }
    }

    /// Start the JSON-RPC server
    ///
    /// Returns the bound address and the handle used to stop it.
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!(
            host = %self.config.host,
            port = %self.config.port,
            "Starting JSON-RPC server"
        );

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let module = self.module().map_err(|e| e.to_string())?;

        info!(addr = %local_addr, "JSON-RPC server started successfully");

        let handle = server.start(module);
        Ok((local_addr, handle))
    }

    fn module(&self) -> Result<RpcModule<()>, Box<dyn std::error::Error>> {
        let mut module = RpcModule::new(());

        let handler = self.handler.clone();
        module.register_async_method("jobs.submit.v1", move |params, _, _| {
            let handler = handler.clone();
            async move {
                let req: SubmitJobRequest = params.parse()?;
                handler.submit(req).await
            }
        })?;

        let handler = self.handler.clone();
        module.register_async_method("jobs.details.v1", move |params, _, _| {
            let handler = handler.clone();
            async move {
                let req: JobIdRequest = params.parse()?;
                handler.details(req).await
            }
        })?;

        let handler = self.handler.clone();
        module.register_async_method("jobs.spec.v1", move |params, _, _| {
            let handler = handler.clone();
            async move {
                let req: JobIdRequest = params.parse()?;
                handler.spec(req).await
            }
        })?;

        let handler = self.handler.clone();
        module.register_async_method("jobs.stdout.v1", move |params, _, _| {
            let handler = handler.clone();
            async move {
                let req: JobIdRequest = params.parse()?;
                handler.output(req, OutputStream::Stdout).await
            }
        })?;

        let handler = self.handler.clone();
        module.register_async_method("jobs.stderr.v1", move |params, _, _| {
            let handler = handler.clone();
            async move {
                let req: JobIdRequest = params.parse()?;
                handler.output(req, OutputStream::Stderr).await
            }
        })?;

        let handler = self.handler.clone();
        module.register_async_method("jobs.abort.v1", move |params, _, _| {
            let handler = handler.clone();
            async move {
                let req: JobIdRequest = params.parse()?;
                handler.abort(req).await
            }
        })?;

        let handler = self.handler.clone();
        module.register_async_method("jobs.list.v1", move |params, _, _| {
            let handler = handler.clone();
            async move {
                // No params means no filter
                let req: ListJobsRequest = match params.as_str() {
                    Some(_) => params.parse()?,
                    None => ListJobsRequest {
                        limit: 100,
                        ..Default::default()
                    },
                };
                handler.list(req).await
            }
        })?;

        let handler = self.handler.clone();
        module.register_subscription(
            SUBSCRIBE_EVENTS,
            EVENT_NOTIFICATION,
            UNSUBSCRIBE_EVENTS,
            move |params, pending, _, _| {
                let handler = handler.clone();
                async move {
                    let req: SubscribeEventsRequest = match params.as_str() {
                        Some(_) => match params.parse() {
                            Ok(req) => req,
                            Err(e) => {
                                pending.reject(e).await;
                                return Ok(());
                            }
                        },
                        None => SubscribeEventsRequest::default(),
                    };
                    match handler.events(req) {
                        Ok(events) => forward_events(pending, events).await,
                        Err(e) => {
                            pending.reject(e).await;
                            Ok(())
                        }
                    }
                }
            },
        )?;

        Ok(module)
    }
}

/// Push bus events to one subscriber until either side goes away
async fn forward_events(
    pending: PendingSubscriptionSink,
    mut events: JobEventStream,
) -> SubscriptionResult {
    let sink = pending.accept().await?;
    debug!(subscription = ?sink.subscription_id(), "Event subscription opened");

    loop {
        tokio::select! {
            _ = sink.closed() => break,
            next = events.next() => {
                let Some(event) = next else { break };
                let message = SubscriptionMessage::from_json(&event)?;
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        }
    }

    debug!(subscription = ?sink.subscription_id(), "Event subscription closed");
    Ok(())
}
