//! Core types for the catalog and its event feed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The single event topic: a book was added to the catalog.
pub const BOOK_ADDED: &str = "book-added";

/// Unique identifier for a book.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BookId(pub u64);

impl fmt::Debug for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BookId({})", self.0)
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A catalog record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: String,
}

impl Book {
    /// True if this record has exactly the given title and author.
    pub fn same_work(&self, title: &str, author: &str) -> bool {
        self.title == title && self.author == author
    }
}

/// Input for adding a book.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBook {
    pub title: String,
    pub author: String,
}

impl NewBook {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
        }
    }
}

/// Fields that may change on an existing book. Only the title is mutable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookUpdate {
    pub title: String,
}

impl BookUpdate {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

/// Unique identifier for a listener session.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a listener session.
///
/// Transitions only move forward: `Active -> Cancelled -> Closed`, or straight
/// from `Active` to `Closed` when the session is released or force-closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Registered with the broker and receiving events.
    Active,
    /// No longer receiving events; queued events may still be read.
    Cancelled,
    /// Queue released. The session id is no longer valid for delivery.
    Closed,
}

/// An event pushed to listeners. Immutable once published.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub payload: Book,
}

impl Event {
    /// Build the "book added" event for a record.
    pub fn book_added(book: Book) -> Self {
        Self {
            topic: BOOK_ADDED.to_string(),
            payload: book,
        }
    }
}
