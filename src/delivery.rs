//! Delivery of session events to a remote peer.
//!
//! The physical connection lives outside this crate behind [`DeliverySink`].
//! A [`DeliveryWorker`] pops a session's events in order and hands them to the
//! sink. The broker never notices a dead peer on its own: when the sink
//! reports a failure, the worker cancels the session.

use crate::broker::ListenerSession;
use crate::error::{CatalogError, Result};
use crate::types::{Event, SessionId};
use crossbeam_channel::Sender;
use std::thread::{self, JoinHandle};

/// Destination for a session's events.
pub trait DeliverySink: Send {
    /// Deliver one event. An error means the peer is gone.
    fn deliver(&mut self, event: &Event) -> Result<()>;
}

impl DeliverySink for Sender<Event> {
    fn deliver(&mut self, event: &Event) -> Result<()> {
        self.send(event.clone())
            .map_err(|_| CatalogError::DeliveryFailure("peer channel disconnected".to_string()))
    }
}

impl DeliverySink for Box<dyn DeliverySink> {
    fn deliver(&mut self, event: &Event) -> Result<()> {
        (**self).deliver(event)
    }
}

/// Sink backed by a closure.
pub struct FnSink<F>(pub F);

impl<F> DeliverySink for FnSink<F>
where
    F: FnMut(&Event) -> Result<()> + Send,
{
    fn deliver(&mut self, event: &Event) -> Result<()> {
        (self.0)(event)
    }
}

/// What a delivery worker did before it stopped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Events the sink accepted.
    pub delivered: u64,
    /// True if the worker stopped because the sink failed.
    pub failed: bool,
}

/// Background thread draining one session into one sink.
pub struct DeliveryWorker {
    session_id: SessionId,
    handle: JoinHandle<DeliveryStats>,
}

impl DeliveryWorker {
    /// Start delivering `session` to `sink`. The worker owns the session and
    /// runs until the session ends or the sink fails.
    pub fn spawn<S>(session: ListenerSession, sink: S) -> Result<Self>
    where
        S: DeliverySink + 'static,
    {
        let session_id = session.id();
        let handle = thread::Builder::new()
            .name(format!("delivery-{}", session_id))
            .spawn(move || run_delivery(session, sink))?;
        Ok(Self { session_id, handle })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker to stop.
    pub fn join(self) -> Result<DeliveryStats> {
        self.handle.join().map_err(|_| {
            CatalogError::DeliveryFailure(format!(
                "delivery worker for session {} panicked",
                self.session_id
            ))
        })
    }
}

fn run_delivery<S: DeliverySink>(session: ListenerSession, mut sink: S) -> DeliveryStats {
    let mut stats = DeliveryStats::default();
    while let Some(event) = session.recv() {
        match sink.deliver(&event) {
            Ok(()) => stats.delivered += 1,
            Err(e) => {
                tracing::warn!(
                    session_id = %session.id(),
                    error = %e,
                    "delivery failed, unsubscribing"
                );
                stats.failed = true;
                session.cancel();
                break;
            }
        }
    }
    tracing::debug!(
        session_id = %session.id(),
        delivered = stats.delivered,
        failed = stats.failed,
        "delivery worker stopped"
    );
    stats
}
