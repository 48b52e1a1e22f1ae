//! # Event bus for broadcasting supervisor events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`]. The control loop,
//! the subscriber workers and the shutdown helper publish into it; the
//! supervisor's listener and any caller of [`Supervisor::subscribe`](crate::Supervisor::subscribe)
//! receive from it.
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks.
//! - **Bounded capacity**: one ring buffer shared by all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events are lost if there are no receivers at send time.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for supervisor events.
///
/// Cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    ///
    /// If there are no receivers, the event is dropped.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that observes subsequent events only.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn receiver_sees_events_after_subscribe() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::ProcessSpawned));

        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::Stopped));

        let ev = rx.recv().await.expect("event");
        assert_eq!(ev.kind, EventKind::Stopped);
    }
}
