//! Report and outcome types returned by the broker and its sessions.

use crate::types::Event;
use serde::Serialize;

/// Result of a bounded wait on a listener session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecvOutcome {
    /// The next event in publish order.
    Event(Event),
    /// Nothing arrived before the timeout. The session is still open.
    Timeout,
    /// The session is closed and will yield no more events.
    Closed,
}

/// Summary of a `Broker::drain` call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Sessions moved from Active to Cancelled by this drain.
    pub cancelled: usize,
    /// Sessions that closed on their own within the grace period.
    pub closed: usize,
    /// Sessions still open when the grace period ran out.
    pub forced: usize,
    /// Queued events thrown away by forced closes.
    pub discarded_events: usize,
}

/// Point-in-time broker counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    /// Calls to `publish`.
    pub published: u64,
    /// Events that entered a session queue.
    pub enqueued: u64,
    /// Events discarded by drop-oldest overflow or forced close.
    pub dropped: u64,
    /// Sessions currently registered and Active.
    pub active_sessions: usize,
    /// Sessions not yet Closed (Active or Cancelled).
    pub live_sessions: usize,
}
