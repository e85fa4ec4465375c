//! Event broker for live catalog notifications.
//!
//! Publishers push an event onto a topic; the broker copies it into the queue
//! of every Active listener session on that topic. Each session has its own
//! queue, so a slow consumer never blocks the publisher or other consumers.
//!
//! - Per-session FIFO; no ordering promised across sessions
//! - Idempotent unsubscribe
//! - Optional bounded queues with drop-oldest or disconnect on overflow
//! - Drain with a grace period for shutdown
//!
//! # Example
//!
//! ```ignore
//! let broker = Broker::default();
//! let session = broker.subscribe(BOOK_ADDED)?;
//!
//! broker.publish(BOOK_ADDED, Event::book_added(book));
//!
//! while let Some(event) = session.recv() {
//!     println!("New book {:?} added", event.payload.title);
//! }
//! ```

mod manager;
mod session;
mod types;

pub use manager::Broker;
pub use session::{ListenerSession, WeakSession};
pub use types::{BrokerStats, DrainReport, RecvOutcome};
