use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::model::{EventKind, MonitorEvent};

/// Fan-out of [`MonitorEvent`]s to every live subscriber.
///
/// Subscribers whose receiver has been dropped are pruned on the next broadcast.
#[derive(Clone, Default)]
pub struct MonitorEventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

struct Subscriber {
    filter: Option<EventKind>,
    tx: Sender<MonitorEvent>,
}

impl MonitorEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receives every event kind.
    pub fn subscribe(&self) -> Receiver<MonitorEvent> {
        self.add_subscriber(None)
    }

    /// Receives only events of `kind`.
    pub fn subscribe_kind(&self, kind: EventKind) -> Receiver<MonitorEvent> {
        self.add_subscriber(Some(kind))
    }

    fn add_subscriber(&self, filter: Option<EventKind>) -> Receiver<MonitorEvent> {
        let (tx, rx) = unbounded::<MonitorEvent>();
        {
            let mut subscribers = self
                .subscribers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            subscribers.push(Subscriber { filter, tx });
        }
        rx
    }

    pub(crate) fn broadcast(&self, event: MonitorEvent) {
        let kind = event.kind();
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|subscriber| match subscriber.filter {
            Some(filter) if filter != kind => true,
            _ => subscriber.tx.send(event.clone()).is_ok(),
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
