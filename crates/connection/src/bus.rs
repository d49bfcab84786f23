//! Signal-keyed subscriber registry.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::error;

/// The signals a connection emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    DataLine,
    Connected,
    Disconnected,
    Error,
}

/// A signal together with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    DataLine(String),
    Connected,
    Disconnected,
    Error(String),
}

impl Event {
    pub fn signal(&self) -> Signal {
        match self {
            Self::DataLine(_) => Signal::DataLine,
            Self::Connected => Signal::Connected,
            Self::Disconnected => Signal::Disconnected,
            Self::Error(_) => Signal::Error,
        }
    }
}

/// Handle returned by [`EventBus::connect`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Ordered subscriber lists, one per signal.
///
/// Lists are copy-on-write: `emit` iterates a snapshot taken under a short
/// read lock, so a subscriber may connect or disconnect (itself or others)
/// from inside its own invocation. Changes apply from the next emission.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    slots: RwLock<HashMap<Signal, Arc<Vec<(SubscriptionId, Callback)>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `callback` to the subscribers of `signal`.
    pub fn connect<F>(&self, signal: Signal, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut slots = self.slots.write().unwrap();
        let list = slots.entry(signal).or_default();
        Arc::make_mut(list).push((id, Arc::new(callback)));
        id
    }

    /// Removes a subscriber. Returns `false` if it was not subscribed.
    pub fn disconnect(&self, signal: Signal, id: SubscriptionId) -> bool {
        let mut slots = self.slots.write().unwrap();
        let Some(list) = slots.get_mut(&signal) else {
            return false;
        };
        let Some(pos) = list.iter().position(|(sub, _)| *sub == id) else {
            return false;
        };
        Arc::make_mut(list).remove(pos);
        true
    }

    /// Removes every subscriber of every signal.
    pub fn clear(&self) {
        self.slots.write().unwrap().clear();
    }

    pub fn subscriber_count(&self, signal: Signal) -> usize {
        self.slots
            .read()
            .unwrap()
            .get(&signal)
            .map_or(0, |list| list.len())
    }

    /// Invokes every subscriber of the event's signal on the calling
    /// thread, in subscription order.
    ///
    /// A panicking subscriber is logged and skipped. Returns how many
    /// subscribers completed normally.
    pub fn emit(&self, event: &Event) -> usize {
        let signal = event.signal();
        let snapshot = match self.slots.read().unwrap().get(&signal) {
            Some(list) => Arc::clone(list),
            None => return 0,
        };

        let mut delivered = 0;
        for (id, callback) in snapshot.iter() {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".into());
                    error!(?signal, subscriber = id.0, %reason, "subscriber panicked");
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&Event) + Send + Sync>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        let make = move |tag: &str| -> Box<dyn Fn(&Event) + Send + Sync> {
            let log = log2.clone();
            let tag = tag.to_string();
            Box::new(move |event: &Event| log.lock().unwrap().push(format!("{tag}:{event:?}")))
        };
        (log, make)
    }

    #[test]
    fn delivers_in_subscription_order() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        bus.connect(Signal::DataLine, make("a"));
        bus.connect(Signal::DataLine, make("b"));
        bus.connect(Signal::Error, make("err"));

        assert_eq!(bus.emit(&Event::DataLine("x".into())), 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:DataLine(\"x\")", "b:DataLine(\"x\")"]
        );
    }

    #[test]
    fn disconnect_unknown_is_noop() {
        let bus = EventBus::new();
        let id = bus.connect(Signal::Connected, |_| {});
        assert!(!bus.disconnect(Signal::Disconnected, id));
        assert!(bus.disconnect(Signal::Connected, id));
        assert!(!bus.disconnect(Signal::Connected, id));
        assert_eq!(bus.subscriber_count(Signal::Connected), 0);
    }

    #[test]
    fn panicking_subscriber_does_not_stop_delivery() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        bus.connect(Signal::Error, |_| panic!("boom"));
        bus.connect(Signal::Error, make("after"));
        assert_eq!(bus.emit(&Event::Error("x".into())), 1);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn subscriber_may_unsubscribe_itself_while_emitting() {
        let bus = Arc::new(EventBus::new());
        let calls = Arc::new(AtomicU64::new(0));
        let own_id = Arc::new(Mutex::new(None::<SubscriptionId>));

        let id = {
            let bus2 = Arc::downgrade(&bus);
            let calls = calls.clone();
            let own_id = own_id.clone();
            bus.connect(Signal::DataLine, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let (Some(bus), Some(id)) = (bus2.upgrade(), *own_id.lock().unwrap()) {
                    bus.disconnect(Signal::DataLine, id);
                    bus.connect(Signal::DataLine, |_| {});
                }
            })
        };
        *own_id.lock().unwrap() = Some(id);
        let (log, make) = recorder();
        bus.connect(Signal::DataLine, make("second"));

        bus.emit(&Event::DataLine("1".into()));
        bus.emit(&Event::DataLine("2".into()));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(bus.subscriber_count(Signal::DataLine), 2);
    }
}
