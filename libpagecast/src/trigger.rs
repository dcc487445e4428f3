//! Deferred publish triggers
//!
//! Every scheduled post gets a single-shot trigger registered for its exact
//! publish instant. Delivery is at-least-once: the orchestrator's guarded
//! status transitions make a duplicate or early fire a no-op, so the trigger
//! layer stays simple.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

pub trait TriggerScheduler: Send + Sync {
    /// Arrange for the post id to be delivered at (or after) `when`.
    /// Re-registering a post replaces its previous trigger.
    fn register(&self, post_id: i64, when: DateTime<Utc>);

    /// Drop any pending trigger for the post. Unknown ids are a no-op.
    fn cancel(&self, post_id: i64);
}

/// Tokio-backed trigger scheduler. One task per registration sleeps until
/// the instant and then sends the post id into the channel the daemon
/// drains.
pub struct TokioTriggerScheduler {
    sender: UnboundedSender<i64>,
    tasks: Mutex<HashMap<i64, JoinHandle<()>>>,
}

impl TokioTriggerScheduler {
    /// Create the scheduler plus the receiver of fired post ids.
    pub fn new() -> (Self, UnboundedReceiver<i64>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                tasks: Mutex::new(HashMap::new()),
            },
            receiver,
        )
    }
}

impl TriggerScheduler for TokioTriggerScheduler {
    fn register(&self, post_id: i64, when: DateTime<Utc>) {
        let sender = self.sender.clone();
        let delay_ms = (when - Utc::now()).num_milliseconds().max(0) as u64;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            // The receiver being gone just means the daemon is shutting down.
            let _ = sender.send(post_id);
        });

        let mut tasks = self.tasks.lock().unwrap();
        if let Some(previous) = tasks.insert(post_id, handle) {
            previous.abort();
        }
        tracing::debug!(post_id, %when, "Registered publish trigger");
    }

    fn cancel(&self, post_id: i64) {
        if let Some(handle) = self.tasks.lock().unwrap().remove(&post_id) {
            handle.abort();
            tracing::debug!(post_id, "Cancelled publish trigger");
        }
    }
}

/// Recording trigger scheduler for tests: registrations and cancellations
/// are captured instead of firing.
#[derive(Default)]
pub struct MockTrigger {
    pub registered: Mutex<Vec<(i64, DateTime<Utc>)>>,
    pub cancelled: Mutex<Vec<i64>>,
}

impl MockTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent registration for a post, if any.
    pub fn last_registration(&self, post_id: i64) -> Option<DateTime<Utc>> {
        self.registered
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _)| *id == post_id)
            .map(|(_, when)| *when)
    }

    pub fn registration_count(&self, post_id: i64) -> usize {
        self.registered
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == post_id)
            .count()
    }

    pub fn was_cancelled(&self, post_id: i64) -> bool {
        self.cancelled.lock().unwrap().contains(&post_id)
    }
}

impl TriggerScheduler for MockTrigger {
    fn register(&self, post_id: i64, when: DateTime<Utc>) {
        self.registered.lock().unwrap().push((post_id, when));
    }

    fn cancel(&self, post_id: i64) {
        self.cancelled.lock().unwrap().push(post_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_due_trigger_fires() {
        let (scheduler, mut receiver) = TokioTriggerScheduler::new();
        scheduler.register(42, Utc::now());

        let fired = tokio::time::timeout(std::time::Duration::from_secs(2), receiver.recv())
            .await
            .expect("trigger should fire promptly");
        assert_eq!(fired, Some(42));
    }

    #[tokio::test]
    async fn test_past_instant_fires_immediately() {
        let (scheduler, mut receiver) = TokioTriggerScheduler::new();
        scheduler.register(7, Utc::now() - chrono::Duration::hours(1));

        let fired = tokio::time::timeout(std::time::Duration::from_secs(2), receiver.recv())
            .await
            .expect("overdue trigger should fire immediately");
        assert_eq!(fired, Some(7));
    }

    #[tokio::test]
    async fn test_cancel_prevents_fire() {
        let (scheduler, mut receiver) = TokioTriggerScheduler::new();
        scheduler.register(9, Utc::now() + chrono::Duration::milliseconds(200));
        scheduler.cancel(9);

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(500), receiver.recv()).await;
        assert!(result.is_err(), "cancelled trigger must not fire");
    }

    #[tokio::test]
    async fn test_reregistration_replaces() {
        let (scheduler, mut receiver) = TokioTriggerScheduler::new();
        // Far-future registration is replaced by an immediate one; only one
        // fire arrives.
        scheduler.register(5, Utc::now() + chrono::Duration::hours(6));
        scheduler.register(5, Utc::now());

        let first = tokio::time::timeout(std::time::Duration::from_secs(2), receiver.recv())
            .await
            .expect("replacement trigger should fire");
        assert_eq!(first, Some(5));

        let second =
            tokio::time::timeout(std::time::Duration::from_millis(300), receiver.recv()).await;
        assert!(second.is_err(), "replaced trigger must not also fire");
    }

    #[test]
    fn test_mock_trigger_records() {
        let mock = MockTrigger::new();
        let when = Utc::now();
        mock.register(1, when);
        mock.register(1, when + chrono::Duration::hours(1));
        mock.cancel(2);

        assert_eq!(mock.registration_count(1), 2);
        assert_eq!(mock.last_registration(1), Some(when + chrono::Duration::hours(1)));
        assert!(mock.was_cancelled(2));
        assert!(!mock.was_cancelled(1));
    }
}
