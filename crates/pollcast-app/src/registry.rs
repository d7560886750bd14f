// Subscriber registry: the set of connections that receive broadcasts.

use std::collections::BTreeMap;

use pollcast_core::ws_server::ConnectionId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

#[derive(Debug)]
struct Subscriber {
    addr: String,
    outbound: mpsc::Sender<String>,
}

/// Connections currently subscribed to broadcasts, keyed by id.
///
/// Delivery never blocks. A subscriber whose queue is full or whose
/// connection is gone is removed on the spot, so it never sees a gapped
/// event stream; its socket closes once the queue drains.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    subscribers: BTreeMap<ConnectionId, Subscriber>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: ConnectionId, addr: String, outbound: mpsc::Sender<String>) {
        debug!("Subscriber #{id} ({addr}) registered");
        self.subscribers.insert(id, Subscriber { addr, outbound });
    }

    /// Returns whether the connection was registered.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.subscribers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Queue `text` for one connection. Returns `false` if the connection is
    /// unknown or had to be dropped.
    pub fn send_to(&mut self, id: ConnectionId, text: String) -> bool {
        let Some(subscriber) = self.subscribers.get(&id) else {
            debug!("Reply for unknown connection #{id} discarded");
            return false;
        };
        match subscriber.outbound.try_send(text) {
            Ok(()) => true,
            Err(e) => {
                self.drop_subscriber(id, &e);
                false
            }
        }
    }

    /// Queue `text` for every connection. Returns how many accepted it.
    pub fn broadcast(&mut self, text: &str) -> usize {
        let mut failed = Vec::new();
        let mut delivered = 0;

        for (id, subscriber) in &self.subscribers {
            match subscriber.outbound.try_send(text.to_string()) {
                Ok(()) => delivered += 1,
                Err(e) => failed.push((*id, e)),
            }
        }
        for (id, e) in failed {
            self.drop_subscriber(id, &e);
        }

        delivered
    }

    fn drop_subscriber(&mut self, id: ConnectionId, reason: &TrySendError<String>) {
        if let Some(subscriber) = self.subscribers.remove(&id) {
            match reason {
                TrySendError::Full(_) => warn!(
                    "Subscriber #{id} ({}) is not keeping up, dropping it",
                    subscriber.addr
                ),
                TrySendError::Closed(_) => debug!(
                    "Subscriber #{id} ({}) already disconnected",
                    subscriber.addr
                ),
            }
        }
    }
}
