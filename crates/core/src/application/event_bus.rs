// Job Event Bus - multicast of job events to live subscribers
//
// Backpressure policy: two tokio broadcast rings. The event ring carries
// everything in publish order; the status ring carries status changes only,
// so output chunks can never push a status change out of a status-only
// subscriber's buffer. Publishing never waits. A subscriber that falls more
// than `capacity` events behind on its ring loses the oldest ones, is told
// how many it missed (logged at WARN) and resumes from the oldest retained
// event.

use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{trace, warn};

use crate::application::constants::DEFAULT_EVENT_BUFFER;
use crate::domain::{JobEvent, JobId};

/// Lazy, unbounded sequence of events for one subscriber
pub type JobEventStream = Pin<Box<dyn Stream<Item = JobEvent> + Send>>;

/// Cloneable handle to the bus; all clones share the same channels
#[derive(Clone)]
pub struct JobEventBus {
    events: broadcast::Sender<JobEvent>,
    statuses: broadcast::Sender<JobEvent>,
    capacity: usize,
}

impl JobEventBus {
    /// `capacity` is the per-subscriber buffer of each ring (clamped to at
    /// least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (events, _) = broadcast::channel(capacity);
        let (statuses, _) = broadcast::channel(capacity);
        Self {
            events,
            statuses,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Publish to every current subscriber. Never blocks.
    ///
    /// Returns the number of subscribers the event was queued for.
    pub fn publish(&self, event: JobEvent) -> usize {
        let status_receivers = if event.is_status_change() {
            self.statuses.send(event.clone()).unwrap_or(0)
        } else {
            0
        };
        match self.events.send(event) {
            Ok(receivers) => receivers + status_receivers,
            Err(broadcast::error::SendError(event)) => {
                if status_receivers == 0 {
                    trace!(job_id = %event.job_id(), "No subscribers for job event");
                }
                status_receivers
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count() + self.statuses.receiver_count()
    }

    /// Every event published from now on
    pub fn subscribe_all(&self) -> JobEventStream {
        Self::filtered(&self.events, |_| true)
    }

    /// Events for one job, published from now on
    pub fn subscribe(&self, job_id: JobId) -> JobEventStream {
        Self::filtered(&self.events, move |event| event.job_id() == &job_id)
    }

    /// Status changes of every job (no output chunks)
    pub fn subscribe_status_changes(&self) -> JobEventStream {
        Self::filtered(&self.statuses, |_| true)
    }

    /// Status changes of one job
    pub fn subscribe_job_status(&self, job_id: JobId) -> JobEventStream {
        Self::filtered(&self.statuses, move |event| event.job_id() == &job_id)
    }

    fn filtered<F>(ring: &broadcast::Sender<JobEvent>, keep: F) -> JobEventStream
    where
        F: Fn(&JobEvent) -> bool + Send + 'static,
    {
        let stream = BroadcastStream::new(ring.subscribe()).filter_map(move |item| {
            let event = match item {
                Ok(event) if keep(&event) => Some(event),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    warn!(missed = missed, "Event subscriber lagging, dropped oldest events");
                    None
                }
            };
            futures::future::ready(event)
        });
        Box::pin(stream)
    }
}

impl Default for JobEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}
