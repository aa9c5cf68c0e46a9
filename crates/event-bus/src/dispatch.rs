use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use flowreplay_core_types::{CoreError, SessionId};

use crate::events::{Channel, ReplayEvent};
use crate::{EventBus, InMemoryBus};

/// External one-way status surface (websocket, log shipper, ...).
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn deliver(
        &self,
        session: &SessionId,
        channel: Channel,
        event: &ReplayEvent,
    ) -> Result<(), CoreError>;
}

type LockKey = (SessionId, Channel);

/// Routes replay events to the sink registered for their session.
///
/// Each `(session, channel)` pair has its own async lock so concurrent emitters
/// cannot interleave messages on one channel. Delivery failures are logged and
/// swallowed.
pub struct StatusDispatcher {
    sinks: DashMap<SessionId, Arc<dyn StatusSink>>,
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
    bus: Arc<InMemoryBus<ReplayEvent>>,
}

impl StatusDispatcher {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            sinks: DashMap::new(),
            locks: DashMap::new(),
            bus: InMemoryBus::new(capacity),
        })
    }

    pub fn bus(&self) -> Arc<InMemoryBus<ReplayEvent>> {
        self.bus.clone()
    }

    pub fn register(&self, session: SessionId, sink: Arc<dyn StatusSink>) {
        self.sinks.insert(session, sink);
    }

    /// Drop the sink and the channel locks of a finished session.
    pub fn unregister(&self, session: &SessionId) {
        self.sinks.remove(session);
        self.locks.retain(|(owner, _), _| owner != session);
    }

    fn lock_for(&self, session: &SessionId, channel: Channel) -> Arc<Mutex<()>> {
        self.locks
            .entry((session.clone(), channel))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn emit(&self, event: ReplayEvent) {
        if self.bus.subscriber_count() > 0 {
            if let Err(err) = self.bus.publish(event.clone()).await {
                debug!(error = %err, "no local subscribers for replay event");
            }
        }

        let sink = match self.sinks.get(&event.session) {
            Some(entry) => entry.value().clone(),
            None => return,
        };

        let channel = event.channel();
        let lock = self.lock_for(&event.session, channel);
        let _guard = lock.lock().await;
        if let Err(err) = sink.deliver(&event.session, channel, &event).await {
            warn!(
                session = %event.session,
                channel = channel.as_str(),
                error = %err,
                "status delivery failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ReplayEventKind;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        seen: StdMutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl StatusSink for RecordingSink {
        async fn deliver(
            &self,
            _session: &SessionId,
            channel: Channel,
            event: &ReplayEvent,
        ) -> Result<(), CoreError> {
            // Longer messages take longer to deliver; the lock must still keep order.
            tokio::time::sleep(Duration::from_millis(10 - event.message.len() as u64)).await;
            self.seen
                .lock()
                .unwrap()
                .push((channel.as_str().to_string(), event.message.clone()));
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl StatusSink for FailingSink {
        async fn deliver(
            &self,
            _session: &SessionId,
            _channel: Channel,
            _event: &ReplayEvent,
        ) -> Result<(), CoreError> {
            Err(CoreError::new("socket closed"))
        }
    }

    #[tokio::test]
    async fn preserves_order_per_channel() {
        let dispatcher = StatusDispatcher::new(16);
        let sink = Arc::new(RecordingSink::default());
        let session = SessionId::from("s-1");
        dispatcher.register(session.clone(), sink.clone());

        let mut handles = Vec::new();
        for message in ["a", "bb", "ccc"] {
            let dispatcher = dispatcher.clone();
            let session = session.clone();
            let event = ReplayEvent::new(session, ReplayEventKind::StepStarted, message);
            handles.push(tokio::spawn(async move { dispatcher.emit(event).await }));
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let seen = sink.seen.lock().unwrap();
        let messages: Vec<&str> = seen.iter().map(|(_, m)| m.as_str()).collect();
        assert_eq!(messages, vec!["a", "bb", "ccc"]);
        assert!(seen.iter().all(|(channel, _)| channel == "event"));
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        let dispatcher = StatusDispatcher::new(4);
        let session = SessionId::from("s-2");
        dispatcher.register(session.clone(), Arc::new(FailingSink));
        dispatcher
            .emit(ReplayEvent::new(session.clone(), ReplayEventKind::StepFailed, "boom"))
            .await;
        dispatcher.unregister(&session);
        assert!(dispatcher.sinks.is_empty());
        assert!(dispatcher.locks.is_empty());
    }

    #[tokio::test]
    async fn events_without_sink_reach_local_subscribers() {
        let dispatcher = StatusDispatcher::new(4);
        let mut rx = dispatcher.bus().subscribe();
        let session = SessionId::from("s-3");
        dispatcher
            .emit(ReplayEvent::new(session, ReplayEventKind::ReplayStarted, "go").with_step("x"))
            .await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.step_id.as_deref(), Some("x"));
        assert_eq!(event.channel(), Channel::Event);
    }
}
