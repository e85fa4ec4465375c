//! Configuration for the broker and the catalog.
//!
//! Every field has a default, so a JSON file only needs to name what it
//! overrides:
//!
//! ```json
//! {
//!     "broker": { "queue": { "kind": "drop_oldest", "capacity": 256 } },
//!     "catalog": { "dedup_publish": "always" }
//! }
//! ```

use crate::error::{CatalogError, Result};
use crate::types::NewBook;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default grace period for draining sessions at shutdown.
const DEFAULT_DRAIN_GRACE_MS: u64 = 5_000;

/// How a listener's queue behaves when its consumer falls behind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueuePolicy {
    /// No limit. A consumer that never drains grows its queue without bound.
    #[default]
    Unbounded,
    /// Keep at most `capacity` events, discarding the oldest on overflow.
    DropOldest { capacity: usize },
    /// Keep at most `capacity` events, cancelling the session on overflow.
    Disconnect { capacity: usize },
}

impl QueuePolicy {
    /// Queue capacity, or `None` if unbounded.
    pub fn capacity(&self) -> Option<usize> {
        match *self {
            QueuePolicy::Unbounded => None,
            QueuePolicy::DropOldest { capacity } | QueuePolicy::Disconnect { capacity } => {
                Some(capacity)
            }
        }
    }
}

/// Broker configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Per-session queue policy.
    /// Default: unbounded
    pub queue: QueuePolicy,

    /// How long `drain` waits for sessions to close before forcing them.
    /// Default: 5000ms
    pub drain_grace_ms: u64,
}

impl BrokerConfig {
    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue.capacity() == Some(0) {
            return Err(CatalogError::Config(
                "queue capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue: QueuePolicy::Unbounded,
            drain_grace_ms: DEFAULT_DRAIN_GRACE_MS,
        }
    }
}

/// When `add_book` publishes a "book added" event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPublish {
    /// Publish only when a new record was inserted.
    #[default]
    OnInsert,
    /// Publish on every call, including ones that hit an existing record.
    Always,
}

/// Catalog configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Publish policy for duplicate adds.
    pub dedup_publish: DedupPublish,

    /// Books loaded into the store at startup. Seeding never publishes.
    pub seed: Vec<NewBook>,
}

/// Top-level service configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub broker: BrokerConfig,
    pub catalog: CatalogConfig,
}

impl ServiceConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ServiceConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let config = Self::from_json_str(&raw)?;
        tracing::debug!(path = %path.display(), "loaded service config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.broker.validate()
    }
}
