//! Client-side subscription handles.
//!
//! A [`HandleTable`] keeps named references to live subscriptions so a later
//! command can find and cancel them. A handle never keeps its session alive:
//! the session belongs to the delivery worker draining it, and the handle only
//! holds a weak reference for lookup.
//!
//! Removing a handle never waits on its delivery worker. The worker may still
//! be flushing a backlog or blocked inside a slow sink; it is kept aside and
//! reaped once it has finished.

use crate::broker::{Broker, ListenerSession, WeakSession};
use crate::catalog::Catalog;
use crate::delivery::{DeliverySink, DeliveryWorker};
use crate::error::{CatalogError, Result};
use crate::types::{Event, SessionId, SessionState, BOOK_ADDED};
use std::collections::HashMap;
use std::sync::Arc;

/// Handle name used by the register/deregister commands.
pub const DEFAULT_HANDLE: &str = "subscription";

/// Something that can open and cancel book-added subscriptions.
pub trait SubscriptionSource: Send + Sync {
    fn subscribe(&self) -> Result<ListenerSession>;
    fn unsubscribe(&self, id: SessionId);
}

impl SubscriptionSource for Broker {
    fn subscribe(&self) -> Result<ListenerSession> {
        Broker::subscribe(self, BOOK_ADDED)
    }

    fn unsubscribe(&self, id: SessionId) {
        Broker::unsubscribe(self, id)
    }
}

impl SubscriptionSource for Catalog {
    fn subscribe(&self) -> Result<ListenerSession> {
        self.subscribe_to_book_added()
    }

    fn unsubscribe(&self, id: SessionId) {
        self.broker().unsubscribe(id)
    }
}

impl<T: SubscriptionSource + ?Sized> SubscriptionSource for Arc<T> {
    fn subscribe(&self) -> Result<ListenerSession> {
        (**self).subscribe()
    }

    fn unsubscribe(&self, id: SessionId) {
        (**self).unsubscribe(id)
    }
}

/// Builds the sink for a newly registered handle, given the handle's name.
pub type SinkFactory = Box<dyn Fn(&str) -> Box<dyn DeliverySink> + Send + Sync>;

/// User-facing text for a delivered event.
pub fn book_added_notice(event: &Event) -> String {
    format!("New book \"{}\" added", event.payload.title)
}

/// A named reference to one subscription.
pub struct SubscriptionHandle {
    name: String,
    session: WeakSession,
    worker: Option<DeliveryWorker>,
}

impl SubscriptionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    /// Session state, or `None` once the session has been released.
    pub fn state(&self) -> Option<SessionState> {
        self.session.resolve()
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("name", &self.name)
            .field("session_id", &self.session.id())
            .field("state", &self.state())
            .finish()
    }
}

/// Outcome of `HandleTable::deactivate_all`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeactivationReport {
    /// Handles whose sessions were cancelled.
    pub cancelled: Vec<String>,
    /// Handles whose sessions had already ended.
    pub expired: Vec<String>,
}

/// User-invocable client actions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientCommand {
    Register(String),
    Deregister(String),
}

/// Severity of a message shown to the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Message shown to the user after a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Named subscription handles held by a client.
pub struct HandleTable<S: SubscriptionSource> {
    source: S,
    sinks: SinkFactory,
    handles: HashMap<String, SubscriptionHandle>,
    /// Workers of removed handles that had not finished when removed.
    retired: Vec<DeliveryWorker>,
}

impl<S: SubscriptionSource> HandleTable<S> {
    pub fn new(source: S, sinks: SinkFactory) -> Self {
        Self {
            source,
            sinks,
            handles: HashMap::new(),
            retired: Vec::new(),
        }
    }

    /// Subscribe and store the subscription under `name`.
    ///
    /// An existing handle with the same name is cancelled before the new one
    /// is installed.
    pub fn register(&mut self, name: &str) -> Result<()> {
        if let Some(prior) = self.handles.remove(name) {
            match self.release(prior) {
                Ok(id) => tracing::debug!(name, session_id = %id, "replaced subscription handle"),
                Err(e) => tracing::debug!(name, error = %e, "replaced expired subscription handle"),
            }
        }

        let session = self.source.subscribe().map_err(|e| match e {
            CatalogError::SubscriptionSetupFailure(_) => e,
            other => CatalogError::SubscriptionSetupFailure(other.to_string()),
        })?;
        let weak = session.downgrade();
        let sink = (self.sinks)(name);
        let worker = DeliveryWorker::spawn(session, sink)
            .map_err(|e| CatalogError::SubscriptionSetupFailure(e.to_string()))?;

        tracing::debug!(name, session_id = %weak.id(), "subscription registered");
        self.handles.insert(
            name.to_string(),
            SubscriptionHandle {
                name: name.to_string(),
                session: weak,
                worker: Some(worker),
            },
        );
        Ok(())
    }

    /// Cancel and forget the subscription under `name`.
    ///
    /// Fails with `HandleNotFound`, leaving the table untouched, if there is
    /// no such handle. If the session had already ended the handle is still
    /// removed and `SessionExpired` is returned.
    pub fn deregister(&mut self, name: &str) -> Result<()> {
        let handle = self
            .handles
            .remove(name)
            .ok_or_else(|| CatalogError::HandleNotFound(name.to_string()))?;
        let id = self.release(handle)?;
        tracing::debug!(name, session_id = %id, "subscription deregistered");
        Ok(())
    }

    /// Cancel every subscription. Used when the client shuts down; never
    /// fails, and sessions that already ended are skipped.
    pub fn deactivate_all(&mut self) -> DeactivationReport {
        let mut report = DeactivationReport::default();
        let mut handles: Vec<SubscriptionHandle> =
            self.handles.drain().map(|(_, handle)| handle).collect();
        handles.sort_by(|a, b| a.name.cmp(&b.name));

        for handle in handles {
            let name = handle.name.clone();
            match self.release(handle) {
                Ok(_) => report.cancelled.push(name),
                Err(_) => report.expired.push(name),
            }
        }
        tracing::debug!(
            cancelled = report.cancelled.len(),
            expired = report.expired.len(),
            "client subscriptions deactivated"
        );
        report
    }

    /// Run a user command and describe the result.
    pub fn execute(&mut self, command: ClientCommand) -> Notice {
        match command {
            ClientCommand::Register(name) => match self.register(&name) {
                Ok(()) => Notice::info("Subscribed to Book Added event"),
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "register failed");
                    Notice::error(format!("Error subscribing to event: {}", e))
                }
            },
            ClientCommand::Deregister(name) => match self.deregister(&name) {
                Ok(()) => Notice::info("Unsubscribed from Book Added event"),
                Err(CatalogError::HandleNotFound(_)) => Notice::error("No existing subscription"),
                Err(CatalogError::SessionExpired(_)) => {
                    Notice::error("Subscription had already ended")
                }
                Err(e) => Notice::error(e.to_string()),
            },
        }
    }

    pub fn get(&self, name: &str) -> Option<&SubscriptionHandle> {
        self.handles.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    pub fn session_id(&self, name: &str) -> Option<SessionId> {
        self.handles.get(name).map(SubscriptionHandle::session_id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Handle names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handles.keys().cloned().collect();
        names.sort();
        names
    }

    /// Workers of removed handles that are still running, after reaping the
    /// ones that have finished.
    pub fn retired_workers(&mut self) -> usize {
        self.reap_workers();
        self.retired.len()
    }

    /// Unsubscribe a removed handle's session. The worker is set aside
    /// without waiting for it.
    fn release(&mut self, mut handle: SubscriptionHandle) -> Result<SessionId> {
        let id = handle.session.id();
        let live = handle.session.is_live();
        if live {
            self.source.unsubscribe(id);
        }
        if let Some(worker) = handle.worker.take() {
            self.retired.push(worker);
        }
        self.reap_workers();
        if live {
            Ok(id)
        } else {
            Err(CatalogError::SessionExpired(id))
        }
    }

    /// Join every retired worker that has already stopped.
    fn reap_workers(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) = self
            .retired
            .drain(..)
            .partition(DeliveryWorker::is_finished);
        self.retired = running;
        for worker in finished {
            let id = worker.session_id();
            match worker.join() {
                Ok(stats) => tracing::debug!(
                    session_id = %id,
                    delivered = stats.delivered,
                    "delivery worker joined"
                ),
                Err(e) => tracing::warn!(session_id = %id, error = %e, "delivery worker failed"),
            }
        }
    }
}

impl<S: SubscriptionSource> Drop for HandleTable<S> {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.deactivate_all();
        }
        if !self.retired.is_empty() {
            // Dropping a join handle detaches the thread; it exits once its
            // sink returns and the session queue is empty.
            tracing::debug!(running = self.retired.len(), "detaching delivery workers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};
    use std::time::Duration;

    /// Sink factory that forwards every handle's events into one channel.
    fn channel_sinks() -> (SinkFactory, Receiver<(String, Event)>) {
        let (tx, rx) = unbounded::<(String, Event)>();
        let factory: SinkFactory = Box::new(move |name: &str| -> Box<dyn DeliverySink> {
            let tx = tx.clone();
            let name = name.to_string();
            Box::new(crate::delivery::FnSink(move |event: &Event| {
                tx.send((name.clone(), event.clone())).map_err(|_| {
                    CatalogError::DeliveryFailure("test receiver gone".to_string())
                })
            }))
        });
        (factory, rx)
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn test_register_and_receive() {
        let broker = Broker::default();
        let catalog = Catalog::new(Default::default(), broker.clone());
        let (sinks, rx) = channel_sinks();
        let mut table = HandleTable::new(broker, sinks);

        table.register(DEFAULT_HANDLE).unwrap();
        catalog.add_book("T1", "Au1").unwrap();

        let (name, event) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(name, DEFAULT_HANDLE);
        assert_eq!(book_added_notice(&event), "New book \"T1\" added");
    }

    #[test]
    fn test_register_twice_cancels_prior() {
        let broker = Broker::default();
        let (sinks, _rx) = channel_sinks();
        let mut table = HandleTable::new(broker.clone(), sinks);

        table.register("x").unwrap();
        let first = table.session_id("x").unwrap();
        let first_weak = table.get("x").unwrap().session.clone();
        table.register("x").unwrap();
        let second = table.session_id("x").unwrap();

        assert_eq!(table.len(), 1);
        assert_ne!(first, second);
        assert_ne!(first_weak.resolve(), Some(SessionState::Active));
        assert!(wait_until(|| broker.session_state(first).is_none()));
        assert_eq!(broker.session_state(second), Some(SessionState::Active));
        assert_eq!(broker.subscriber_count(BOOK_ADDED), 1);
    }

    #[test]
    fn test_deregister_missing() {
        let broker = Broker::default();
        let (sinks, _rx) = channel_sinks();
        let mut table = HandleTable::new(broker, sinks);
        table.register("kept").unwrap();

        let result = table.deregister("missing");

        assert!(matches!(result, Err(CatalogError::HandleNotFound(_))));
        assert_eq!(table.names(), vec!["kept".to_string()]);
    }

    #[test]
    fn test_deregister_cancels_session() {
        let broker = Broker::default();
        let (sinks, _rx) = channel_sinks();
        let mut table = HandleTable::new(broker.clone(), sinks);
        table.register(DEFAULT_HANDLE).unwrap();
        let id = table.session_id(DEFAULT_HANDLE).unwrap();

        table.deregister(DEFAULT_HANDLE).unwrap();

        assert!(table.is_empty());
        assert_eq!(broker.subscriber_count(BOOK_ADDED), 0);
        assert!(wait_until(|| broker.session_state(id).is_none()));
        assert!(wait_until(|| table.retired_workers() == 0));
    }

    #[test]
    fn test_deregister_does_not_wait_for_stalled_sink() {
        let broker = Broker::default();
        // Rendezvous channel nobody reads: the first delivery blocks forever.
        let (tx, _stalled) = crossbeam_channel::bounded::<Event>(0);
        let factory: SinkFactory =
            Box::new(move |_name: &str| -> Box<dyn DeliverySink> { Box::new(tx.clone()) });
        let mut table = HandleTable::new(broker.clone(), factory);
        table.register("a").unwrap();
        table.register("b").unwrap();
        for n in 1..=20 {
            broker.publish(
                BOOK_ADDED,
                Event::book_added(crate::types::Book {
                    id: crate::types::BookId(n),
                    title: format!("T{}", n),
                    author: "A".to_string(),
                }),
            );
        }

        let start = std::time::Instant::now();
        table.deregister("a").unwrap();
        let report = table.deactivate_all();
        let elapsed = start.elapsed();

        assert!(elapsed < Duration::from_millis(500), "took {:?}", elapsed);
        assert_eq!(report.cancelled, vec!["b".to_string()]);
        assert!(table.is_empty());
        assert_eq!(broker.subscriber_count(BOOK_ADDED), 0);
        assert_eq!(table.retired_workers(), 2);
    }

    #[test]
    fn test_deregister_expired_session() {
        let broker = Broker::default();
        let (sinks, rx) = channel_sinks();
        let mut table = HandleTable::new(broker.clone(), sinks);
        table.register(DEFAULT_HANDLE).unwrap();
        let id = table.session_id(DEFAULT_HANDLE).unwrap();

        // Peer goes away; the next delivery fails and the worker ends the session.
        drop(rx);
        broker.publish(
            BOOK_ADDED,
            Event::book_added(crate::types::Book {
                id: crate::types::BookId(1),
                title: "T".to_string(),
                author: "A".to_string(),
            }),
        );
        for _ in 0..100 {
            if broker.session_state(id).is_none() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        let result = table.deregister(DEFAULT_HANDLE);
        assert!(matches!(result, Err(CatalogError::SessionExpired(sid)) if sid == id));
        assert!(table.is_empty());
    }

    #[test]
    fn test_deactivate_all() {
        let broker = Broker::default();
        let (sinks, _rx) = channel_sinks();
        let mut table = HandleTable::new(broker.clone(), sinks);
        table.register("a").unwrap();
        table.register("b").unwrap();
        let b = table.session_id("b").unwrap();
        broker.unsubscribe(b);
        for _ in 0..100 {
            if broker.session_state(b).is_none() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        let report = table.deactivate_all();

        assert_eq!(report.cancelled, vec!["a".to_string()]);
        assert_eq!(report.expired, vec!["b".to_string()]);
        assert!(table.is_empty());
        assert!(wait_until(|| broker.live_sessions() == 0));
    }

    #[test]
    fn test_execute_messages() {
        let broker = Broker::default();
        let (sinks, _rx) = channel_sinks();
        let mut table = HandleTable::new(broker.clone(), sinks);

        let notice = table.execute(ClientCommand::Deregister(DEFAULT_HANDLE.to_string()));
        assert_eq!(notice.level, NoticeLevel::Error);
        assert_eq!(notice.message, "No existing subscription");

        let notice = table.execute(ClientCommand::Register(DEFAULT_HANDLE.to_string()));
        assert_eq!(notice, Notice::info("Subscribed to Book Added event"));

        let notice = table.execute(ClientCommand::Deregister(DEFAULT_HANDLE.to_string()));
        assert_eq!(notice, Notice::info("Unsubscribed from Book Added event"));

        broker.drain();
        let notice = table.execute(ClientCommand::Register(DEFAULT_HANDLE.to_string()));
        assert_eq!(notice.level, NoticeLevel::Error);
        assert!(!table.contains(DEFAULT_HANDLE));
    }

    #[test]
    fn test_drop_deactivates() {
        let broker = Broker::default();
        let (sinks, _rx) = channel_sinks();
        {
            let mut table = HandleTable::new(broker.clone(), sinks);
            table.register("a").unwrap();
            assert_eq!(broker.live_sessions(), 1);
        }
        assert_eq!(broker.subscriber_count(BOOK_ADDED), 0);
        assert!(wait_until(|| broker.live_sessions() == 0));
    }
}
