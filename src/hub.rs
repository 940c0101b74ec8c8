//! Fan-out of [`OutboundMessage`]s to every live subscriber.
//!
//! The subscriber set has its own lock, which is never held across an await
//! point and never waits for a subscriber. Each subscriber owns a bounded
//! queue which is drained by its own task (see the websocket module).
//! A subscriber whose queue is full is considered failed and is dropped,
//! so a stalled client cannot hold back the device or other subscribers.
//!
//! The hub also holds the current [`ConnectionState`]. It is only changed
//! under the subscriber lock, so a new subscriber's snapshot and the status
//! broadcasts it receives afterwards never overlap.

use std::{
    collections::HashMap,
    fmt::Display,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::events::{ConnectionState, OutboundMessage};

/// Identifies a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Subscribers = HashMap<SubscriberId, mpsc::Sender<OutboundMessage>>;

#[derive(Debug)]
struct HubInner {
    subscribers: Mutex<Subscribers>,
    state: watch::Sender<ConnectionState>,
    capacity: usize,
}

/// Delivers status and data messages to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    /// Create a hub.
    ///
    /// The state starts out as `initial`.
    /// Each subscriber may have at most `capacity` undelivered messages.
    pub fn new(initial: ConnectionState, capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(HashMap::new()),
                state: watch::channel(initial).0,
                capacity: capacity.max(1),
            }),
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new subscriber.
    ///
    /// The first message it receives is the current connection state.
    pub fn subscribe(&self) -> Subscriber {
        let id = SubscriberId::new();
        let (tx, rx) = mpsc::channel(self.inner.capacity);

        let mut subscribers = self.subscribers();

        // States only change under this lock, so the snapshot is neither stale
        // nor repeated by a broadcast that was already under way.
        let state = *self.inner.state.borrow();

        // The queue is fresh and has room for at least one message.
        let _ = tx.try_send(OutboundMessage::status(state));

        subscribers.insert(id, tx);
        debug!(%id, %state, total = subscribers.len(), "Subscribed");

        Subscriber {
            id,
            messages: rx,
            hub: self.clone(),
        }
    }

    /// Remove a subscriber.
    /// Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers().remove(&id).is_some();

        if removed {
            debug!(%id, "Unsubscribed");
        }

        removed
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch the connection state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Record a new connection state and broadcast it as a status message.
    pub(crate) fn publish_state(&self, state: ConnectionState) -> usize {
        let mut subscribers = self.subscribers();

        self.inner.state.send_replace(state);

        Self::deliver(&mut subscribers, OutboundMessage::status(state))
    }

    /// Deliver a message to every subscriber.
    ///
    /// Subscribers which cannot accept the message right away are dropped.
    /// Returns how many subscribers got the message.
    pub fn broadcast(&self, message: OutboundMessage) -> usize {
        let mut subscribers = self.subscribers();

        Self::deliver(&mut subscribers, message)
    }

    /// Like [`Self::broadcast`], unless the session the message stems from is over.
    ///
    /// The check happens under the subscriber lock, so once a session is cancelled
    /// and the resulting status is broadcast, no more data from it gets through.
    pub(crate) fn broadcast_from_session(
        &self,
        message: OutboundMessage,
        session: &CancellationToken,
    ) -> usize {
        let mut subscribers = self.subscribers();

        if session.is_cancelled() {
            trace!("Session over, message not delivered");
            return 0;
        }

        Self::deliver(&mut subscribers, message)
    }

    fn deliver(subscribers: &mut Subscribers, message: OutboundMessage) -> usize {
        subscribers.retain(|id, tx| match tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%id, "Subscriber is not keeping up, dropping it");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(%id, "Subscriber went away");
                false
            }
        });

        trace!(%message, listeners = subscribers.len(), "Broadcasted");

        subscribers.len()
    }

    /// The number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }
}

/// A registered subscriber.
///
/// Unsubscribes when dropped.
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    messages: mpsc::Receiver<OutboundMessage>,
    hub: BroadcastHub,
}

impl Subscriber {
    /// This subscriber's id.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// The next message.
    ///
    /// `None` means the hub dropped this subscriber, for example for not keeping up.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        self.messages.recv().await
    }

    /// The next message if one is queued.
    pub fn try_recv(&mut self) -> Option<OutboundMessage> {
        self.messages.try_recv().ok()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}
