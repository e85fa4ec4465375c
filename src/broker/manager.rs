//! Single-topic publish/subscribe hub.

use crate::config::{BrokerConfig, QueuePolicy};
use crate::error::{CatalogError, Result};
use crate::types::{Event, SessionId, SessionState};
use crossbeam_channel::{bounded, unbounded, Sender, TrySendError};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::session::{ListenerSession, SessionShared};
use super::types::{BrokerStats, DrainReport};

/// A session's entry in the topic registry. Holds the only sender for the
/// session's queue, so removing the entry is what wakes a waiting consumer.
struct Registration {
    session: Arc<SessionShared>,
    sender: Sender<Event>,
}

/// Topic registry, guarded by a single lock.
struct Topics {
    /// False once drain has begun.
    accepting: bool,
    by_topic: HashMap<String, HashMap<SessionId, Registration>>,
}

impl Topics {
    fn remove(&mut self, id: SessionId) -> Option<Registration> {
        let mut found = None;
        self.by_topic.retain(|_, sessions| {
            if found.is_none() {
                found = sessions.remove(&id);
            }
            !sessions.is_empty()
        });
        found
    }

    fn active_count(&self) -> usize {
        self.by_topic.values().map(HashMap::len).sum()
    }
}

/// Outcome of pushing one event into one session queue.
enum Enqueue {
    Queued,
    Overflow,
}

pub(crate) struct BrokerInner {
    config: BrokerConfig,
    topics: RwLock<Topics>,
    /// Sessions that are not yet Closed. Lock order: `topics` before `live`.
    live: Mutex<HashMap<SessionId, Arc<SessionShared>>>,
    /// Signalled whenever a session leaves `live`.
    closed: Condvar,
    next_id: AtomicU64,
    published: AtomicU64,
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

impl BrokerInner {
    fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            topics: RwLock::new(Topics {
                accepting: true,
                by_topic: HashMap::new(),
            }),
            live: Mutex::new(HashMap::new()),
            closed: Condvar::new(),
            next_id: AtomicU64::new(1),
            published: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Under `DropOldest` a full queue is retried once before the oldest event
    /// is popped, so a consumer read racing the overflow usually frees the
    /// slot instead. The queue is shared with the consumer, so a read landing
    /// between the retry and the pop can still cost one extra event.
    fn enqueue(&self, registration: &Registration, event: Event) -> Enqueue {
        let mut event = event;
        let mut retried = false;
        loop {
            match registration.sender.try_send(event) {
                Ok(()) => {
                    self.enqueued.fetch_add(1, Ordering::Relaxed);
                    return Enqueue::Queued;
                }
                Err(TrySendError::Full(rejected)) => match self.config.queue {
                    QueuePolicy::DropOldest { .. } if !retried => {
                        retried = true;
                        event = rejected;
                    }
                    QueuePolicy::DropOldest { .. } => {
                        if registration.session.receiver.try_recv().is_ok() {
                            self.dropped.fetch_add(1, Ordering::Relaxed);
                        }
                        event = rejected;
                    }
                    QueuePolicy::Disconnect { .. } | QueuePolicy::Unbounded => {
                        return Enqueue::Overflow;
                    }
                },
                Err(TrySendError::Disconnected(_)) => return Enqueue::Overflow,
            }
        }
    }

    pub(crate) fn unsubscribe(&self, id: SessionId) {
        let removed = self.topics.write().remove(id);
        match removed {
            Some(registration) => {
                registration.session.advance(SessionState::Cancelled);
                tracing::debug!(
                    session_id = %id,
                    topic = %registration.session.topic,
                    queued = registration.session.receiver.len(),
                    "session cancelled"
                );
                // Dropping the sender here disconnects the queue once it empties.
            }
            None => {
                tracing::debug!(session_id = %id, "unsubscribe for unknown or inactive session");
            }
        }
    }

    /// Mark a session Closed and release the broker's hold on it.
    pub(crate) fn close_session(&self, session: &SessionShared) {
        let Some(prev) = session.advance(SessionState::Closed) else {
            return;
        };
        if prev == SessionState::Active {
            self.topics.write().remove(session.id);
        }
        self.live.lock().remove(&session.id);
        self.closed.notify_all();
        tracing::debug!(session_id = %session.id, from = ?prev, "session closed");
    }
}

/// Single-topic-per-name publish/subscribe hub.
///
/// Cheap to clone; every clone shares the same registry. Construct one per
/// process and hand it to whatever publishes or subscribes.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    /// Create a broker, validating the queue policy.
    pub fn new(config: BrokerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(BrokerInner::new(config)),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Open a new Active session on `topic`.
    ///
    /// Fails with `ShuttingDown` once `drain` has started.
    pub fn subscribe(&self, topic: &str) -> Result<ListenerSession> {
        let mut topics = self.inner.topics.write();
        if !topics.accepting {
            return Err(CatalogError::ShuttingDown);
        }

        let id = SessionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = match self.inner.config.queue.capacity() {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        };
        let shared = Arc::new(SessionShared::new(id, topic, receiver));

        topics.by_topic.entry(topic.to_string()).or_default().insert(
            id,
            Registration {
                session: Arc::clone(&shared),
                sender,
            },
        );
        self.inner.live.lock().insert(id, Arc::clone(&shared));
        drop(topics);

        tracing::debug!(session_id = %id, topic, "session subscribed");
        Ok(ListenerSession::new(shared, Arc::clone(&self.inner)))
    }

    /// Push `event` to every Active session on `topic`.
    ///
    /// Returns the number of session queues the event entered. Never waits
    /// on a consumer. Sessions that overflow under the disconnect policy are
    /// cancelled after the fan-out.
    ///
    /// An event whose own topic differs from `topic` is rejected and reaches
    /// no one.
    pub fn publish(&self, topic: &str, event: Event) -> usize {
        if event.topic != topic {
            tracing::warn!(topic, event_topic = %event.topic, "event topic mismatch, not published");
            return 0;
        }
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let mut queued = 0;
        let mut overflowed = Vec::new();
        {
            let topics = self.inner.topics.read();
            let Some(sessions) = topics.by_topic.get(topic) else {
                return 0;
            };
            for (id, registration) in sessions {
                if registration.session.state() != SessionState::Active {
                    continue;
                }
                match self.inner.enqueue(registration, event.clone()) {
                    Enqueue::Queued => queued += 1,
                    Enqueue::Overflow => overflowed.push(*id),
                }
            }
        }

        for id in overflowed {
            tracing::warn!(session_id = %id, topic, "session queue overflowed, disconnecting");
            self.inner.unsubscribe(id);
        }

        queued
    }

    /// Cancel a session. Unknown or already-cancelled ids are ignored.
    pub fn unsubscribe(&self, id: SessionId) {
        self.inner.unsubscribe(id);
    }

    /// Cancel every session, stop accepting new ones, and wait for the
    /// sessions to close.
    ///
    /// Sessions still open after the configured grace period are closed by
    /// force and whatever they had queued is discarded.
    pub fn drain(&self) -> DrainReport {
        let grace = self.inner.config.drain_grace();
        let mut report = DrainReport::default();

        let outstanding = {
            let mut topics = self.inner.topics.write();
            topics.accepting = false;
            let outstanding = self.inner.live.lock().len();
            for (_, sessions) in topics.by_topic.drain() {
                for (_, registration) in sessions {
                    if registration.session.advance(SessionState::Cancelled).is_some() {
                        report.cancelled += 1;
                    }
                }
            }
            outstanding
        };
        tracing::info!(
            cancelled = report.cancelled,
            outstanding,
            grace_ms = grace.as_millis() as u64,
            "draining broker"
        );

        let deadline = Instant::now() + grace;
        let mut live = self.inner.live.lock();
        while !live.is_empty() {
            if self.inner.closed.wait_until(&mut live, deadline).timed_out() {
                break;
            }
        }
        let forced: Vec<Arc<SessionShared>> = live.drain().map(|(_, session)| session).collect();
        drop(live);

        report.forced = forced.len();
        report.closed = outstanding.saturating_sub(report.forced);
        for session in forced {
            session.advance(SessionState::Closed);
            let discarded = session.discard_queued();
            report.discarded_events += discarded;
            self.inner
                .dropped
                .fetch_add(discarded as u64, Ordering::Relaxed);
            tracing::warn!(session_id = %session.id, discarded, "session force-closed at drain");
        }
        self.inner.closed.notify_all();

        tracing::info!(
            closed = report.closed,
            forced = report.forced,
            discarded_events = report.discarded_events,
            "broker drained"
        );
        report
    }

    /// State of a session, or `None` once it has been closed and released.
    pub fn session_state(&self, id: SessionId) -> Option<SessionState> {
        self.inner.live.lock().get(&id).map(|session| session.state())
    }

    /// Number of Active sessions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .read()
            .by_topic
            .get(topic)
            .map_or(0, HashMap::len)
    }

    /// Number of sessions not yet Closed.
    pub fn live_sessions(&self) -> usize {
        self.inner.live.lock().len()
    }

    /// False once `drain` has started.
    pub fn is_accepting(&self) -> bool {
        self.inner.topics.read().accepting
    }

    pub fn stats(&self) -> BrokerStats {
        let active_sessions = self.inner.topics.read().active_count();
        BrokerStats {
            published: self.inner.published.load(Ordering::Relaxed),
            enqueued: self.inner.enqueued.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            active_sessions,
            live_sessions: self.live_sessions(),
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self {
            inner: Arc::new(BrokerInner::new(BrokerConfig::default())),
        }
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("config", &self.inner.config)
            .field("live_sessions", &self.live_sessions())
            .finish()
    }
}
