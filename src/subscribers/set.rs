//! # Non-blocking event fan-out to multiple subscribers.
//!
//! ```text
//! emit(event)
//!     ├──► [queue 1] ──► worker 1 ──► subscriber1.on_event()
//!     │    (bounded)         └──────► panic → SubscriberPanicked
//!     └──► [queue N] ──► worker N ──► subscriberN.on_event()
//! ```
//!
//! ## Rules
//! - **Non-blocking**: `emit()` uses `try_send` and returns immediately.
//! - **Overflow**: event dropped for that subscriber only, `SubscriberOverflow` published.
//! - **Per-subscriber FIFO**, no cross-subscriber ordering.

use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::events::{Bus, Event, EventKind};
use crate::subscribers::Subscribe;

struct Channel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
}

/// Fan-out coordinator for event subscribers.
pub struct SubscriberSet {
    channels: Vec<Channel>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Creates the set and spawns one worker per subscriber.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let mut channels = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let name = sub.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
            let worker_bus = bus.clone();

            workers.push(tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let fut = std::panic::AssertUnwindSafe(sub.on_event(ev.as_ref()));
                    if let Err(payload) = fut.catch_unwind().await {
                        let info = if let Some(msg) = payload.downcast_ref::<&'static str>() {
                            (*msg).to_string()
                        } else if let Some(msg) = payload.downcast_ref::<String>() {
                            msg.clone()
                        } else {
                            "unknown panic".to_string()
                        };
                        worker_bus.publish(Event::subscriber_panicked(name, info));
                    }
                }
            }));
            channels.push(Channel { name, sender: tx });
        }
        Self {
            channels,
            workers,
            bus,
        }
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Returns `true` when there are no subscribers.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Emits an event to all subscribers without waiting for them.
    ///
    /// Overflow events are never re-published when they overflow themselves.
    pub fn emit(&self, event: &Event) {
        let event = Arc::new(event.clone());
        let is_overflow = matches!(event.kind, EventKind::SubscriberOverflow);

        for channel in &self.channels {
            let reason = match channel.sender.try_send(Arc::clone(&event)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            if !is_overflow {
                self.bus
                    .publish(Event::subscriber_overflow(channel.name, reason));
            }
        }
    }

    /// Closes all queues and waits for the workers to drain them.
    pub async fn shutdown(self) {
        drop(self.channels);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<EventKind>>,
    }

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, ev: &Event) {
            self.seen.lock().unwrap().push(ev.kind);
        }
        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    struct Panicky;

    #[async_trait]
    impl Subscribe for Panicky {
        async fn on_event(&self, _ev: &Event) {
            panic!("boom");
        }
        fn name(&self) -> &'static str {
            "panicky"
        }
    }

    #[tokio::test]
    async fn delivers_in_order_and_drains_on_shutdown() {
        let bus = Bus::new(16);
        let rec = Arc::new(Recorder::default());
        let set = SubscriberSet::new(vec![rec.clone() as Arc<dyn Subscribe>], bus);

        set.emit(&Event::new(EventKind::ProcessSpawned));
        set.emit(&Event::new(EventKind::StartupSucceeded));
        set.shutdown().await;

        assert_eq!(
            *rec.seen.lock().unwrap(),
            vec![EventKind::ProcessSpawned, EventKind::StartupSucceeded]
        );
    }

    #[tokio::test]
    async fn panics_are_reported_on_the_bus() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let set = SubscriberSet::new(vec![Arc::new(Panicky) as Arc<dyn Subscribe>], bus);

        set.emit(&Event::new(EventKind::Stopped));
        let ev = rx.recv().await.expect("panic event");
        assert_eq!(ev.kind, EventKind::SubscriberPanicked);
        assert_eq!(ev.subscriber, Some("panicky"));
        assert_eq!(ev.reason.as_deref(), Some("boom"));
    }
}
