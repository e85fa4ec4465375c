//! Error types for the catalog and its subscription machinery.

use crate::types::{BookId, SessionId};
use thiserror::Error;

/// Main error type for catalog and subscription operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Book not found: {0}")]
    NotFound(BookId),

    #[error("No subscription handle named {0:?}")]
    HandleNotFound(String),

    #[error("Session expired: {0}")]
    SessionExpired(SessionId),

    #[error("Delivery failed: {0}")]
    DeliveryFailure(String),

    #[error("Subscription setup failed: {0}")]
    SubscriptionSetupFailure(String),

    #[error("Broker is shutting down")]
    ShuttingDown,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CatalogError {
    fn from(e: serde_json::Error) -> Self {
        CatalogError::Serialization(e.to_string())
    }
}

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;
