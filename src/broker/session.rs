//! Listener sessions: one delivery queue per subscriber.

use crate::types::{Event, SessionId, SessionState};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::manager::BrokerInner;
use super::types::RecvOutcome;

/// Session state shared between the broker and the consumer.
pub(crate) struct SessionShared {
    pub(crate) id: SessionId,
    pub(crate) topic: String,
    state: Mutex<SessionState>,
    /// Queue read side. The broker keeps access to it so it can discard the
    /// oldest entry on overflow and empty the queue on forced close.
    pub(crate) receiver: Receiver<Event>,
}

impl SessionShared {
    pub(crate) fn new(id: SessionId, topic: &str, receiver: Receiver<Event>) -> Self {
        Self {
            id,
            topic: topic.to_string(),
            state: Mutex::new(SessionState::Active),
            receiver,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Move the state forward to `next`. Returns the previous state if it
    /// changed, `None` if the session was already at or past `next`.
    pub(crate) fn advance(&self, next: SessionState) -> Option<SessionState> {
        let mut state = self.state.lock();
        if *state < next {
            let prev = *state;
            *state = next;
            Some(prev)
        } else {
            None
        }
    }

    /// Throw away everything still queued. Returns the number discarded.
    pub(crate) fn discard_queued(&self) -> usize {
        self.receiver.try_iter().count()
    }
}

/// A subscriber's view of its session.
///
/// Produced by `Broker::subscribe` and consumed by whatever delivers events
/// to the remote peer. Events come out in publish order. Once the session is
/// cancelled, events already queued are still handed out; after the last one
/// the session closes itself and `recv` returns `None`.
///
/// Dropping the session closes it.
pub struct ListenerSession {
    shared: Arc<SessionShared>,
    broker: Arc<BrokerInner>,
}

impl ListenerSession {
    pub(crate) fn new(shared: Arc<SessionShared>, broker: Arc<BrokerInner>) -> Self {
        Self { shared, broker }
    }

    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    pub fn topic(&self) -> &str {
        &self.shared.topic
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Number of events waiting in the queue.
    pub fn queued(&self) -> usize {
        self.shared.receiver.len()
    }

    /// Block until the next event arrives or the session ends.
    pub fn recv(&self) -> Option<Event> {
        if self.is_closed() {
            return None;
        }
        match self.shared.receiver.recv() {
            Ok(event) => Some(event),
            Err(_) => {
                self.close();
                None
            }
        }
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> RecvOutcome {
        if self.is_closed() {
            return RecvOutcome::Closed;
        }
        match self.shared.receiver.recv_timeout(timeout) {
            Ok(event) => RecvOutcome::Event(event),
            Err(RecvTimeoutError::Timeout) => RecvOutcome::Timeout,
            Err(RecvTimeoutError::Disconnected) => {
                self.close();
                RecvOutcome::Closed
            }
        }
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&self) -> Option<Event> {
        if self.is_closed() {
            return None;
        }
        match self.shared.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.close();
                None
            }
        }
    }

    /// Stop receiving new events. Same as `Broker::unsubscribe(self.id())`.
    pub fn cancel(&self) {
        self.broker.unsubscribe(self.shared.id);
    }

    /// Release the session without reading what is left in the queue.
    pub fn close(&self) {
        self.broker.close_session(&self.shared);
    }

    /// A reference that does not keep the session alive.
    pub fn downgrade(&self) -> WeakSession {
        WeakSession {
            id: self.shared.id,
            shared: Arc::downgrade(&self.shared),
        }
    }
}

impl Drop for ListenerSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ListenerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSession")
            .field("id", &self.shared.id)
            .field("topic", &self.shared.topic)
            .field("state", &self.state())
            .finish()
    }
}

/// Non-owning reference to a listener session.
#[derive(Clone, Debug)]
pub struct WeakSession {
    id: SessionId,
    shared: Weak<SessionShared>,
}

impl WeakSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current state, or `None` once the session has been released.
    pub fn resolve(&self) -> Option<SessionState> {
        self.shared.upgrade().map(|shared| shared.state())
    }

    /// True if the session is still open (Active or Cancelled).
    pub fn is_live(&self) -> bool {
        matches!(
            self.resolve(),
            Some(SessionState::Active) | Some(SessionState::Cancelled)
        )
    }
}

impl std::fmt::Debug for SessionShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionShared")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}
