//! Topic-scoped event bus
//!
//! The session and every capability handler publish [`DomainEvent`]s here.
//! Delivery is synchronous: `publish` calls each listener of the event's
//! topic in subscription order before returning. Nothing is buffered, so a
//! listener registered after a publish never sees it.

use crate::core::codec::{AnalogSamples, ControlCommand, HardwareStatus, PowerOffStatus};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Event topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Connected / disconnected / reconnect failed
    ConnectionState,
    /// Hardware status notification
    HardwareStatus,
    /// Analog sample frame
    AnalogSamples,
    /// Battery level
    BatteryLevel,
    /// Auto power-off timer
    PowerOffStatus,
    /// Control command written
    CommandSent,
    /// Control command write failed
    CommandFailed,
}

impl Topic {
    /// All topics, in declaration order
    pub const ALL: [Topic; 7] = [
        Topic::ConnectionState,
        Topic::HardwareStatus,
        Topic::AnalogSamples,
        Topic::BatteryLevel,
        Topic::PowerOffStatus,
        Topic::CommandSent,
        Topic::CommandFailed,
    ];
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConnectionState => "connection-state",
            Self::HardwareStatus => "hardware-status",
            Self::AnalogSamples => "analog-samples",
            Self::BatteryLevel => "battery-level",
            Self::PowerOffStatus => "power-off-status",
            Self::CommandSent => "command-sent",
            Self::CommandFailed => "command-failed",
        };
        f.write_str(name)
    }
}

/// Connection state change kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Session established and every capability initialised
    Connected,
    /// Session is gone
    Disconnected,
    /// A reconnect attempt failed and another one follows
    ReconnectFailed,
}

/// Why the connection state changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionReason {
    /// Connect or reconnect succeeded
    Established,
    /// No device could be acquired, or GATT connect failed
    ConnectionFailed,
    /// GATT is up but a capability failed to initialise
    CapabilitiesUninitialised,
    /// Caller asked for the disconnect
    Requested,
    /// The transport reported link loss
    TransportLost,
}

impl fmt::Display for ConnectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Established => "established",
            Self::ConnectionFailed => "connection failed",
            Self::CapabilitiesUninitialised => "capabilities uninitialised",
            Self::Requested => "disconnect requested",
            Self::TransportLost => "transport lost",
        };
        f.write_str(text)
    }
}

/// Payload of [`DomainEvent::ConnectionStateChanged`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// What happened
    pub kind: ConnectionKind,
    /// Why
    pub reason: ConnectionReason,
}

impl ConnectionEvent {
    /// Create a new connection event
    pub fn new(kind: ConnectionKind, reason: ConnectionReason) -> Self {
        Self { kind, reason }
    }
}

/// Domain events
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    /// Connection state changed
    ConnectionStateChanged(ConnectionEvent),
    /// New hardware status snapshot
    HardwareStatusChanged(HardwareStatus),
    /// New analog sample frame
    AnalogSamplesReceived(AnalogSamples),
    /// Battery percentage
    BatteryLevelChanged(u8),
    /// Auto power-off timer state
    PowerOffStatusChanged(PowerOffStatus),
    /// Control command was written
    CommandSent(ControlCommand),
    /// Control command write failed
    CommandFailed {
        /// The command that failed
        command: ControlCommand,
        /// Transport error text
        error: String,
    },
}

impl DomainEvent {
    /// Topic this event is published on
    pub fn topic(&self) -> Topic {
        match self {
            Self::ConnectionStateChanged(_) => Topic::ConnectionState,
            Self::HardwareStatusChanged(_) => Topic::HardwareStatus,
            Self::AnalogSamplesReceived(_) => Topic::AnalogSamples,
            Self::BatteryLevelChanged(_) => Topic::BatteryLevel,
            Self::PowerOffStatusChanged(_) => Topic::PowerOffStatus,
            Self::CommandSent(_) => Topic::CommandSent,
            Self::CommandFailed { .. } => Topic::CommandFailed,
        }
    }
}

/// Listener callback
pub type Listener = Arc<dyn Fn(&DomainEvent) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Synchronous publish/subscribe bus
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<Topic, Vec<(SubscriptionId, Listener)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Legal topics
    pub fn topics(&self) -> &'static [Topic] {
        &Topic::ALL
    }

    /// Register a listener for one topic
    pub fn subscribe<F>(&self, topic: Topic, listener: F) -> SubscriptionId
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(topic)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Forward every event of `topic` into an unbounded channel
    pub fn subscribe_channel(&self, topic: Topic) -> mpsc::UnboundedReceiver<DomainEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(topic, move |event| {
            let _ = tx.send(event.clone());
        });
        rx
    }

    /// Remove a listener. Returns false if it was not registered on `topic`.
    pub fn unsubscribe(&self, topic: Topic, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let Some(registered) = listeners.get_mut(&topic) else {
            return false;
        };
        let before = registered.len();
        registered.retain(|(registered_id, _)| *registered_id != id);
        registered.len() != before
    }

    /// Number of listeners on a topic
    pub fn listener_count(&self, topic: Topic) -> usize {
        self.listeners.read().get(&topic).map_or(0, Vec::len)
    }

    /// Deliver an event to every listener of its topic, in subscription order
    pub fn publish(&self, event: DomainEvent) {
        let topic = event.topic();
        // Snapshot so listeners may (un)subscribe from inside a callback
        let listeners: Vec<Listener> = match self.listeners.read().get(&topic) {
            Some(registered) => registered.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => return,
        };
        tracing::trace!(%topic, listeners = listeners.len(), "publish");
        for listener in listeners {
            listener(&event);
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read();
        let counts: HashMap<Topic, usize> = listeners.iter().map(|(t, l)| (*t, l.len())).collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn battery(level: u8) -> DomainEvent {
        DomainEvent::BatteryLevelChanged(level)
    }

    #[test]
    fn test_publish_order_is_subscription_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            bus.subscribe(Topic::BatteryLevel, move |_| seen.lock().push(tag));
        }

        bus.publish(battery(50));
        assert_eq!(*seen.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_topic_scoping() {
        let bus = EventBus::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        bus.subscribe(Topic::PowerOffStatus, move |_| *counter.lock() += 1);

        bus.publish(battery(10));
        assert_eq!(*hits.lock(), 0);

        bus.publish(DomainEvent::PowerOffStatusChanged(PowerOffStatus::Off));
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn test_late_subscriber_misses_earlier_publish() {
        let bus = EventBus::new();
        bus.publish(battery(1));

        let mut rx = bus.subscribe_channel(Topic::BatteryLevel);
        assert!(rx.try_recv().is_err());

        bus.publish(battery(2));
        assert_eq!(rx.try_recv().unwrap(), battery(2));
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let id = bus.subscribe(Topic::BatteryLevel, |_| {});
        assert_eq!(bus.listener_count(Topic::BatteryLevel), 1);

        assert!(!bus.unsubscribe(Topic::CommandSent, id));
        assert!(bus.unsubscribe(Topic::BatteryLevel, id));
        assert!(!bus.unsubscribe(Topic::BatteryLevel, id));
        assert_eq!(bus.listener_count(Topic::BatteryLevel), 0);
    }

    #[test]
    fn test_listener_may_subscribe_during_publish() {
        let bus = Arc::new(EventBus::new());
        let inner = bus.clone();
        bus.subscribe(Topic::BatteryLevel, move |_| {
            inner.subscribe(Topic::BatteryLevel, |_| {});
        });

        bus.publish(battery(3));
        assert_eq!(bus.listener_count(Topic::BatteryLevel), 2);
    }

    #[test]
    fn test_event_topics() {
        let event = DomainEvent::ConnectionStateChanged(ConnectionEvent::new(
            ConnectionKind::Connected,
            ConnectionReason::Established,
        ));
        assert_eq!(event.topic(), Topic::ConnectionState);
        assert_eq!(Topic::ALL.len(), EventBus::new().topics().len());
    }
}
