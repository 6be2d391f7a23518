#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sentra-bus** – Best-effort status-event publishing.
//!
//! `StatusPublisher` is the Orchestrator's only window onto the outside
//! world during a job: it carries `StatusEvent`s to whatever real-time
//! subscription transport the enclosing service uses. Delivery is
//! best-effort by contract — a publish failure, or a subscriber too slow
//! to keep up, must never fail the job it describes.

use async_trait::async_trait;
use sentra_types::StatusEvent;
use tokio::sync::broadcast;
use tracing::warn;

/// Errors a `StatusPublisher` implementation may report. The Orchestrator
/// logs these at `warn` and otherwise ignores them; they never propagate
/// as job failures.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The publish call itself failed (e.g. the underlying channel was
    /// torn down).
    #[error("publish failed: {0}")]
    PublishFailed(String),
}

/// A sink accepting `StatusEvent`s. Implementations must be safe for
/// concurrent use by multiple Orchestrator instances running different
/// jobs.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    /// Publish one event. Best-effort: an `Err` return is logged by the
    /// caller and otherwise has no effect on the job's outcome.
    async fn publish(&self, event: StatusEvent) -> Result<(), BusError>;
}

/// In-process reference implementation backed by a `tokio::sync::broadcast`
/// channel. If every subscriber is gone, or a subscriber is lagging and
/// drops the event, `publish` still reports success — there being no
/// subscriber to deliver to is not a delivery failure.
pub struct InMemoryStatusPublisher {
    tx: broadcast::Sender<StatusEvent>,
}

impl InMemoryStatusPublisher {
    /// Create a new publisher with the given channel capacity. Events
    /// published while a subscriber lags beyond this capacity are
    /// silently dropped for that subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to future events. Each subscriber receives its own
    /// lagging-independent stream.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Number of currently live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for InMemoryStatusPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl StatusPublisher for InMemoryStatusPublisher {
    async fn publish(&self, event: StatusEvent) -> Result<(), BusError> {
        // A `send` error here only means there are no receivers right
        // now; per contract that is not a delivery failure.
        let _ = self.tx.send(event);
        Ok(())
    }
}

/// Publish an event through `publisher`, downgrading any error to a
/// logged warning. This is the helper the Orchestrator calls at every
/// publish point, so that a publisher failure can never interrupt a job.
pub async fn publish_best_effort(publisher: &dyn StatusPublisher, event: StatusEvent) {
    if let Err(err) = publisher.publish(event).await {
        warn!(error = %err, "status publish failed; continuing job");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sentra_types::StatusTag;

    fn event(status: StatusTag) -> StatusEvent {
        StatusEvent {
            job_id: "job-1".into(),
            user_id: None,
            tenant_id: "tenant-1".into(),
            agent_name: None,
            status,
            message: "test".into(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn publish_succeeds_with_no_subscribers() {
        let bus = InMemoryStatusPublisher::default();
        assert!(bus.publish(event(StatusTag::LoadingAgents)).await.is_ok());
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = InMemoryStatusPublisher::default();
        let mut rx = bus.subscribe();
        bus.publish(event(StatusTag::Invoking)).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.job_id, "job-1");
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_the_event() {
        let bus = InMemoryStatusPublisher::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(event(StatusTag::Complete)).await.unwrap();
        assert_eq!(a.recv().await.unwrap().job_id, "job-1");
        assert_eq!(b.recv().await.unwrap().job_id, "job-1");
    }

    #[tokio::test]
    async fn lagging_subscriber_does_not_fail_publish() {
        let bus = InMemoryStatusPublisher::new(1);
        let mut rx = bus.subscribe();
        bus.publish(event(StatusTag::Invoking)).await.unwrap();
        bus.publish(event(StatusTag::Complete)).await.unwrap();
        bus.publish(event(StatusTag::Error)).await.unwrap();
        // The lagging receiver may skip ahead; it must not panic or error
        // the publisher.
        assert!(rx.recv().await.is_ok() || matches!(rx.recv().await, Err(broadcast::error::RecvError::Lagged(_))));
    }

    #[tokio::test]
    async fn publish_best_effort_never_panics_without_subscribers() {
        let bus = InMemoryStatusPublisher::default();
        publish_best_effort(&bus, event(StatusTag::Saving)).await;
    }
}
