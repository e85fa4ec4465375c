//! # Book Catalog
//!
//! A live book catalog: callers list, add, and update books, and listeners
//! are told about every book added.
//!
//! ## Core Concepts
//!
//! - **Catalog**: A flat list of books, deduplicated on title and author
//! - **Broker**: Fans each published event out to every listener's own queue
//! - **Listener Session**: One subscriber's queue and cancellation state
//! - **Handle Table**: Client-side named handles for cancelling subscriptions
//! - **Shutdown**: Drains the broker, then closes transport endpoints
//!
//! ## Example
//!
//! ```ignore
//! use book_catalog::{Broker, Catalog, ServiceConfig, ShutdownCoordinator};
//!
//! let config = ServiceConfig::load("catalog.json")?;
//! let broker = Broker::new(config.broker)?;
//! let catalog = Catalog::new(config.catalog, broker.clone());
//!
//! let session = catalog.subscribe_to_book_added()?;
//! catalog.add_book("City of Glass", "Paul Auster")?;
//! assert_eq!(session.recv().unwrap().payload.title, "City of Glass");
//!
//! ShutdownCoordinator::new(broker).shutdown();
//! ```

pub mod broker;
pub mod catalog;
pub mod client;
pub mod config;
pub mod delivery;
pub mod error;
pub mod shutdown;
pub mod types;

// Re-exports
pub use broker::{Broker, BrokerStats, DrainReport, ListenerSession, RecvOutcome, WeakSession};
pub use catalog::{AddOutcome, Catalog, CatalogStore};
pub use client::{
    book_added_notice, ClientCommand, DeactivationReport, HandleTable, Notice, NoticeLevel,
    SinkFactory, SubscriptionHandle, SubscriptionSource, DEFAULT_HANDLE,
};
pub use config::{BrokerConfig, CatalogConfig, DedupPublish, QueuePolicy, ServiceConfig};
pub use delivery::{DeliverySink, DeliveryStats, DeliveryWorker, FnSink};
pub use error::{CatalogError, Result};
pub use shutdown::{
    Endpoint, Phase, ShutdownCoordinator, ShutdownReport, ShutdownSignal, TcpEndpoint,
};
pub use types::*;
