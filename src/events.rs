//! Event bus for lifecycle and traffic notifications.
//!
//! Publishing never blocks: every subscriber owns an unbounded channel.
//! Handler subscriptions drain their channel on a dedicated thread, so a
//! slow or panicking handler cannot hold up the protocol path. Each
//! subscriber sees events in publish order.

use crate::state::ConnectionState;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    State,
    Rx,
    Tx,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [Self::State, Self::Rx, Self::Tx, Self::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Rx => "rx",
            Self::Tx => "tx",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// The state just entered.
    State(ConnectionState),
    /// A received line, cleaned up.
    Rx(String),
    /// A response, without the line terminator.
    Tx(String),
    /// Description of a transport failure.
    Error(String),
}

/// One notification. Immutable once published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// ISO-8601 UTC timestamp with millisecond precision.
    pub utc: String,
    pub payload: Payload,
}

impl Event {
    pub fn new(at: DateTime<Utc>, payload: Payload) -> Self {
        Self {
            utc: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self.payload {
            Payload::State(_) => EventKind::State,
            Payload::Rx(_) => EventKind::Rx,
            Payload::Tx(_) => EventKind::Tx,
            Payload::Error(_) => EventKind::Error,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::State(state) => write!(f, "{} state {}", self.utc, state),
            Payload::Rx(text) => write!(f, "{} rx    {}", self.utc, text),
            Payload::Tx(text) => write!(f, "{} tx    {}", self.utc, text),
            Payload::Error(text) => write!(f, "{} error {}", self.utc, text),
        }
    }
}

/// Identifies a subscription so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    kinds: Vec<EventKind>,
    tx: Sender<Event>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Multi-subscriber publish/subscribe hub. Cloning yields another handle to
/// the same bus.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls `handler` for every event of `kind`, on a dedicated thread.
    ///
    /// A panic inside the handler is logged and the subscription keeps running.
    /// Returns `None`, with nothing registered, if the thread cannot start.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Option<SubscriptionId>
    where
        F: FnMut(&Event) + Send + 'static,
    {
        let (id, rx) = self.add(vec![kind]);
        let spawned = thread::Builder::new()
            .name(format!("events-{kind}-{}", id.0))
            .spawn(move || deliver(rx, handler));
        match spawned {
            Ok(_) => Some(id),
            Err(e) => {
                warn!(%kind, error = %e, "cannot start event handler thread");
                self.unsubscribe(id);
                None
            }
        }
    }

    /// Returns a channel receiving every event of the given kinds.
    pub fn listen(&self, kinds: &[EventKind]) -> (SubscriptionId, Receiver<Event>) {
        self.add(kinds.to_vec())
    }

    /// Removes a subscription. Its handler thread stops once the channel drains.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.lock();
        let before = registry.subscribers.len();
        registry.subscribers.retain(|s| s.id != id);
        registry.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().subscribers.len()
    }

    /// Delivers `event` to every interested subscriber without waiting on any
    /// of them. Subscribers whose receiving end is gone are dropped.
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        trace!(%kind, "publish");
        let mut registry = self.registry.lock();
        registry.subscribers.retain(|s| {
            if !s.kinds.contains(&kind) {
                return true;
            }
            s.tx.send(event.clone()).is_ok()
        });
    }

    fn add(&self, kinds: Vec<EventKind>) -> (SubscriptionId, Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        let mut registry = self.registry.lock();
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry.subscribers.push(Subscriber { id, kinds, tx });
        (id, rx)
    }
}

fn deliver<F>(rx: Receiver<Event>, mut handler: F)
where
    F: FnMut(&Event),
{
    for event in rx {
        if panic::catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
            warn!(kind = %event.kind(), "event handler panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 15).unwrap()
    }

    fn rx(text: &str) -> Event {
        Event::new(at(), Payload::Rx(text.into()))
    }

    #[test]
    fn timestamps_are_iso8601_utc() {
        assert_eq!(rx("S").utc, "2024-03-01T12:30:15.000Z");
    }

    #[test]
    fn kind_follows_payload() {
        assert_eq!(rx("S").kind(), EventKind::Rx);
        assert_eq!(
            Event::new(at(), Payload::State(ConnectionState::Offline)).kind(),
            EventKind::State
        );
        assert_eq!(Event::new(at(), Payload::Tx("S A".into())).kind(), EventKind::Tx);
        assert_eq!(Event::new(at(), Payload::Error("x".into())).kind(), EventKind::Error);
    }

    #[test]
    fn listeners_only_receive_requested_kinds() {
        let bus = EventBus::new();
        let (_, rx_only) = bus.listen(&[EventKind::Rx]);
        let (_, everything) = bus.listen(&EventKind::ALL);

        bus.publish(rx("I4"));
        bus.publish(Event::new(at(), Payload::Tx("I4 A".into())));

        assert_eq!(rx_only.try_iter().count(), 1);
        assert_eq!(everything.try_iter().count(), 2);
    }

    #[test]
    fn events_arrive_in_publish_order() {
        let bus = EventBus::new();
        let (_, events) = bus.listen(&[EventKind::Rx]);
        for i in 0..50 {
            bus.publish(rx(&i.to_string()));
        }
        let received: Vec<_> = events
            .try_iter()
            .map(|e| match e.payload {
                Payload::Rx(text) => text,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        let expected: Vec<_> = (0..50).map(|i| i.to_string()).collect();
        assert_eq!(received, expected);
    }

    #[test]
    fn handler_runs_off_thread_in_order() {
        let bus = EventBus::new();
        let (done_tx, done_rx) = mpsc::channel();
        bus.subscribe(EventKind::Rx, move |event| {
            done_tx.send(event.clone()).unwrap();
        })
        .unwrap();
        bus.publish(rx("A"));
        bus.publish(rx("B"));

        let first = done_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = done_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first.payload, Payload::Rx("A".into()));
        assert_eq!(second.payload, Payload::Rx("B".into()));
    }

    #[test]
    fn panicking_handler_does_not_affect_others() {
        let bus = EventBus::new();
        bus.subscribe(EventKind::Rx, |_| panic!("subscriber failure")).unwrap();
        let (done_tx, done_rx) = mpsc::channel();
        bus.subscribe(EventKind::Rx, move |event| {
            let _ = done_tx.send(event.clone());
        })
        .unwrap();

        bus.publish(rx("first"));
        bus.publish(rx("second"));

        assert!(done_rx.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(done_rx.recv_timeout(Duration::from_secs(2)).is_ok());
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn dropped_listeners_are_pruned() {
        let bus = EventBus::new();
        let (_, events) = bus.listen(&[EventKind::Tx]);
        drop(events);
        bus.publish(Event::new(at(), Payload::Tx("S A".into())));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (id, events) = bus.listen(&[EventKind::Rx]);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(rx("I4"));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn subscription_id_removes_the_handler() {
        let bus = EventBus::new();
        let (done_tx, done_rx) = mpsc::channel();
        let id = bus
            .subscribe(EventKind::Error, move |event| {
                let _ = done_tx.send(event.clone());
            })
            .expect("handler thread");
        assert_eq!(bus.subscriber_count(), 1);

        assert!(bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(Event::new(at(), Payload::Error("Port Error: gone".into())));
        // The handler thread exits and drops its sender once unsubscribed.
        assert_eq!(
            done_rx.recv_timeout(Duration::from_secs(2)),
            Err(mpsc::RecvTimeoutError::Disconnected)
        );
    }
}
