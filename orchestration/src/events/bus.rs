//! Event publishing: the `EventSink` contract plus a broadcast-backed bus.
//!
//! The orchestration core only needs the publish contract; the bus here
//! is the in-process implementation used by tests and single-process
//! deployments. Fan-out to transports (WebSocket etc.) lives outside.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::JobEvent;

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 256;

/// The publish contract the core emits through.
///
/// Publishing must not fail the caller: implementations absorb delivery
/// problems (a slow subscriber never stalls a job).
pub trait EventSink: Send + Sync {
    fn publish(&self, event: JobEvent);
}

/// Shared reference to an event sink.
pub type SharedEventSink = Arc<dyn EventSink>;

/// Broadcast-channel event bus.
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared sink reference to this bus.
    pub fn shared(self) -> Arc<EventBus> {
        Arc::new(self)
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: JobEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "event published"),
            // No receivers is fine; events are progress, not state.
            Err(_) => debug!(event_type, "event published (no receivers)"),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::state::JobStatus;
    use chrono::Utc;

    fn status_event(job_id: &str, old: JobStatus, new: JobStatus) -> JobEvent {
        JobEvent::JobStatusChanged {
            job_id: job_id.to_string(),
            old,
            new,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.publish(status_event("job-1", JobStatus::Pending, JobStatus::Running));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "job.status_changed");
        assert_eq!(received.job_id(), "job-1");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new();
        // Must not panic or error.
        bus.publish(status_event("job-1", JobStatus::Running, JobStatus::Completed));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_order_preserved_per_job() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.publish(status_event("job-1", JobStatus::Pending, JobStatus::Running));
        bus.publish(status_event("job-1", JobStatus::Running, JobStatus::Completed));

        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        match (first, second) {
            (
                JobEvent::JobStatusChanged { new: n1, .. },
                JobEvent::JobStatusChanged { new: n2, .. },
            ) => {
                assert_eq!(n1, JobStatus::Running);
                assert_eq!(n2, JobStatus::Completed);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new().shared();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(status_event("job-1", JobStatus::Pending, JobStatus::Running));

        assert_eq!(rx1.recv().await.unwrap().job_id(), "job-1");
        assert_eq!(rx2.recv().await.unwrap().job_id(), "job-1");
    }
}
