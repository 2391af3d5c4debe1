//! Scope-keyed event fan-out
//!
//! Each scope with at least one subscriber has its own broadcast channel.
//! Publishing to a scope nobody listens to is a no-op, and a channel whose
//! last subscriber went away is dropped on the next publish. There is no
//! replay: a subscriber only sees events published after it subscribed.

use dashmap::DashMap;
use futures::Stream;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::types::{Scope, StatusEvent, SystemAlert};

/// Publishes status events per scope and system alerts globally
pub struct Notifier {
    channels: DashMap<Scope, broadcast::Sender<StatusEvent>>,
    channel_capacity: usize,
    alerts: broadcast::Sender<SystemAlert>,
}

impl Notifier {
    pub fn new(channel_capacity: usize, alert_capacity: usize) -> Self {
        let (alerts, _) = broadcast::channel(alert_capacity.max(1));
        Self {
            channels: DashMap::new(),
            channel_capacity: channel_capacity.max(1),
            alerts,
        }
    }

    /// Receive every subsequent event for tasks in `scope`
    pub fn subscribe(&self, scope: &Scope) -> Subscription {
        let receiver = self
            .channels
            .entry(scope.clone())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .subscribe();

        tracing::debug!("New subscriber for scope '{}'", scope);
        Subscription {
            scope: scope.clone(),
            inner: BroadcastStream::new(receiver),
            lagged: 0,
        }
    }

    /// Publish an event to the subscribers of its scope
    pub fn publish(&self, event: StatusEvent) {
        let scope = event.scope.clone();
        let delivered = match self.channels.get(&scope) {
            Some(sender) => sender.send(event).is_ok(),
            None => return,
        };

        if !delivered {
            // Every receiver is gone
            self.channels
                .remove_if(&scope, |_, sender| sender.receiver_count() == 0);
        }
    }

    /// System-level alert stream
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<SystemAlert> {
        self.alerts.subscribe()
    }

    pub fn alert(&self, alert: SystemAlert) {
        tracing::warn!(
            "System alert for task {} ({}): {}",
            alert.task_id,
            alert.category,
            alert.message
        );
        // Nobody listening is fine
        let _ = self.alerts.send(alert);
    }

    pub fn subscriber_count(&self, scope: &Scope) -> usize {
        self.channels
            .get(scope)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Scopes that currently have a channel
    pub fn active_scopes(&self) -> usize {
        self.channels.len()
    }
}

/// Live stream of status events for one scope; dropping it unsubscribes
pub struct Subscription {
    scope: Scope,
    inner: BroadcastStream<StatusEvent>,
    lagged: u64,
}

impl Subscription {
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Events skipped because this subscriber fell behind
    pub fn lagged(&self) -> u64 {
        self.lagged
    }

    /// Next event, or `None` once the service has shut down
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        self.next().await
    }
}

impl Stream for Subscription {
    type Item = StatusEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StatusEvent>> {
        loop {
            match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                Some(Ok(event)) => return Poll::Ready(Some(event)),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::warn!(
                        "Subscriber for scope '{}' lagged by {} events",
                        self.scope,
                        skipped
                    );
                    self.lagged += skipped;
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKind, Progress, TaskId, TaskStatus};
    use chrono::Utc;

    fn event(scope: &str, new_status: TaskStatus) -> StatusEvent {
        StatusEvent {
            task_id: TaskId::new(),
            scope: Scope::new(scope),
            kind: EventKind::Transition,
            old_status: TaskStatus::Pending,
            new_status,
            progress: Progress::default(),
            attempt_count: 0,
            error: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_events_are_scoped() {
        let notifier = Notifier::new(16, 4);
        let mut a = notifier.subscribe(&Scope::new("a"));
        let mut b = notifier.subscribe(&Scope::new("b"));

        notifier.publish(event("a", TaskStatus::Queued));
        notifier.publish(event("b", TaskStatus::Cancelled));

        assert_eq!(a.recv().await.unwrap().new_status, TaskStatus::Queued);
        assert_eq!(b.recv().await.unwrap().new_status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_no_replay() {
        let notifier = Notifier::new(16, 4);
        let _early = notifier.subscribe(&Scope::new("a"));
        notifier.publish(event("a", TaskStatus::Queued));

        let mut late = notifier.subscribe(&Scope::new("a"));
        notifier.publish(event("a", TaskStatus::Processing));
        assert_eq!(late.recv().await.unwrap().new_status, TaskStatus::Processing);
    }

    #[test]
    fn test_dropped_subscription_prunes_channel() {
        let notifier = Notifier::new(16, 4);
        let sub = notifier.subscribe(&Scope::new("a"));
        assert_eq!(notifier.subscriber_count(&Scope::new("a")), 1);

        drop(sub);
        notifier.publish(event("a", TaskStatus::Queued));
        assert_eq!(notifier.active_scopes(), 0);

        // Publishing without subscribers is a no-op
        notifier.publish(event("nobody", TaskStatus::Queued));
        assert_eq!(notifier.active_scopes(), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_ahead() {
        let notifier = Notifier::new(2, 4);
        let mut sub = notifier.subscribe(&Scope::new("a"));
        for _ in 0..5 {
            notifier.publish(event("a", TaskStatus::Queued));
        }
        notifier.publish(event("a", TaskStatus::Completed));

        let mut last = None;
        while let Ok(Some(e)) =
            tokio::time::timeout(std::time::Duration::from_millis(50), sub.recv()).await
        {
            last = Some(e.new_status);
        }
        assert_eq!(last, Some(TaskStatus::Completed));
        assert!(sub.lagged() > 0);
    }
}
