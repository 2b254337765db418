//! # Progress Bus
//!
//! One broadcast channel per project. The coordinator is the single writer;
//! any number of stream subscribers read. Channels are created on first
//! subscribe and removed when the last subscription drops. Publishing to a
//! project nobody is watching is a no-op, and there is no replay.
//!
//! A subscription releases its receiver while holding the map lock, so the
//! last of several concurrent drops always sees zero receivers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use super::context::ProjectScope;
use super::events::ProgressEvent;

/// Default per-project buffer; slow readers lose the oldest events beyond it
pub const DEFAULT_CAPACITY: usize = 64;

/// Where the coordinator sends progress
pub trait ProgressSink: Send + Sync {
    /// Never blocks
    fn publish(&self, scope: &ProjectScope, event: ProgressEvent);
}

type Channels = HashMap<ProjectScope, broadcast::Sender<ProgressEvent>>;

/// In-process progress bus
#[derive(Debug)]
pub struct ProgressBus {
    capacity: usize,
    channels: Arc<Mutex<Channels>>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ProgressBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(channels: &Mutex<Channels>) -> MutexGuard<'_, Channels> {
        channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start receiving events for a project from now on
    pub fn subscribe(&self, scope: ProjectScope) -> Subscription {
        let mut channels = Self::lock(&self.channels);
        let receiver = channels
            .entry(scope.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        Subscription {
            scope,
            receiver: Some(receiver),
            channels: Arc::clone(&self.channels),
        }
    }

    pub fn subscriber_count(&self, scope: &ProjectScope) -> usize {
        Self::lock(&self.channels)
            .get(scope)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Number of live project channels
    pub fn channel_count(&self) -> usize {
        Self::lock(&self.channels).len()
    }
}

impl ProgressSink for ProgressBus {
    fn publish(&self, scope: &ProjectScope, event: ProgressEvent) {
        let mut channels = Self::lock(&self.channels);
        let orphaned = match channels.get(scope) {
            // Err only means every receiver is gone
            Some(tx) => tx.send(event).is_err(),
            None => false,
        };
        if orphaned {
            channels.remove(scope);
        }
    }
}

/// A live subscription to one project's progress
#[derive(Debug)]
pub struct Subscription {
    scope: ProjectScope,
    receiver: Option<broadcast::Receiver<ProgressEvent>>,
    channels: Arc<Mutex<Channels>>,
}

impl Subscription {
    pub fn scope(&self) -> &ProjectScope {
        &self.scope
    }

    /// Next event. Skips over events lost to lag; `None` once the channel closes.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        tenant_id = %self.scope.tenant_id,
                        project_id = %self.scope.project_id,
                        skipped,
                        "progress subscriber lagged, oldest events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut channels = ProgressBus::lock(&self.channels);
        drop(self.receiver.take());
        let last = channels
            .get(&self.scope)
            .map(|tx| tx.receiver_count() == 0)
            .unwrap_or(false);
        if last {
            channels.remove(&self.scope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::events::ProgressKind;

    fn scope(project: &str) -> ProjectScope {
        ProjectScope::new("tenant", project)
    }

    fn event(kind: ProgressKind) -> ProgressEvent {
        ProgressEvent::new(kind, 1, "corr")
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = ProgressBus::default();
        bus.publish(&scope("p"), event(ProgressKind::Started));
        assert_eq!(bus.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_only_see_their_project() {
        let bus = ProgressBus::default();
        let mut a = bus.subscribe(scope("a"));
        let mut b = bus.subscribe(scope("b"));

        bus.publish(&scope("a"), event(ProgressKind::Started));
        bus.publish(&scope("b"), event(ProgressKind::Completed));

        assert_eq!(a.recv().await.unwrap().status, ProgressKind::Started);
        assert_eq!(b.recv().await.unwrap().status, ProgressKind::Completed);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_no_replay() {
        let bus = ProgressBus::default();
        let _early = bus.subscribe(scope("p"));
        bus.publish(&scope("p"), event(ProgressKind::Started));

        let mut late = bus.subscribe(scope("p"));
        bus.publish(&scope("p"), event(ProgressKind::Generating));
        assert_eq!(late.recv().await.unwrap().status, ProgressKind::Generating);
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let bus = ProgressBus::new(2);
        let mut sub = bus.subscribe(scope("p"));

        bus.publish(&scope("p"), event(ProgressKind::Started));
        bus.publish(&scope("p"), event(ProgressKind::ContextRetrieved));
        bus.publish(&scope("p"), event(ProgressKind::Generating));
        bus.publish(&scope("p"), event(ProgressKind::Completed));

        assert_eq!(sub.recv().await.unwrap().status, ProgressKind::Generating);
        assert_eq!(sub.recv().await.unwrap().status, ProgressKind::Completed);
    }

    #[tokio::test]
    async fn test_channel_torn_down_after_last_subscriber() {
        let bus = ProgressBus::default();
        let first = bus.subscribe(scope("p"));
        let second = bus.subscribe(scope("p"));
        assert_eq!(bus.subscriber_count(&scope("p")), 2);

        drop(first);
        assert_eq!(bus.channel_count(), 1);
        drop(second);
        assert_eq!(bus.channel_count(), 0);
    }

    #[test]
    fn test_concurrent_drops_remove_channel() {
        let bus = ProgressBus::default();
        for _ in 0..50 {
            let barrier = Arc::new(std::sync::Barrier::new(8));
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let sub = bus.subscribe(scope("p"));
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        drop(sub);
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(bus.channel_count(), 0);
            assert_eq!(bus.subscriber_count(&scope("p")), 0);
        }
    }
}
