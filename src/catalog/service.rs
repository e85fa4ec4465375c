//! Catalog query and mutation surface.

use crate::broker::{Broker, ListenerSession};
use crate::config::{CatalogConfig, DedupPublish};
use crate::error::Result;
use crate::types::{Book, BookId, BookUpdate, Event, NewBook, BOOK_ADDED};
use parking_lot::Mutex;

use super::store::{AddOutcome, CatalogStore};

/// The catalog service: a store behind a writer lock, plus the broker that
/// announces new books.
pub struct Catalog {
    store: Mutex<CatalogStore>,
    broker: Broker,
    dedup_publish: DedupPublish,
}

impl Catalog {
    /// Create a catalog publishing on `broker`, seeded from `config`.
    ///
    /// Seed books are inserted without publishing.
    pub fn new(config: CatalogConfig, broker: Broker) -> Self {
        let mut store = CatalogStore::new();
        for book in config.seed {
            store.add(book);
        }
        tracing::debug!(seeded = store.len(), "catalog created");

        Self {
            store: Mutex::new(store),
            broker,
            dedup_publish: config.dedup_publish,
        }
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Snapshot of every book.
    pub fn list_books(&self) -> Vec<Book> {
        self.store.lock().list()
    }

    pub fn find_book(&self, id: BookId) -> Option<Book> {
        self.store.lock().find(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    /// Add a book, or return the existing record with the same title and
    /// author.
    ///
    /// The event is published while the store lock is held, so listeners see
    /// books in insertion order.
    pub fn add_book(&self, title: impl Into<String>, author: impl Into<String>) -> Result<Book> {
        let mut store = self.store.lock();
        let outcome = store.add(NewBook::new(title, author));

        let publish = match self.dedup_publish {
            DedupPublish::OnInsert => outcome.is_inserted(),
            DedupPublish::Always => true,
        };
        if publish {
            let queued = self
                .broker
                .publish(BOOK_ADDED, Event::book_added(outcome.book().clone()));
            tracing::debug!(book_id = %outcome.book().id, queued, "book added event published");
        }

        if let AddOutcome::Existing(ref book) = outcome {
            tracing::debug!(book_id = %book.id, "add hit existing book");
        }
        Ok(outcome.into_book())
    }

    /// Change a book's title. Never publishes.
    pub fn update_book(&self, id: BookId, update: BookUpdate) -> Result<Book> {
        let book = self.store.lock().update(id, update)?;
        tracing::debug!(book_id = %id, title = %book.title, "book updated");
        Ok(book)
    }

    /// Open a live feed of added books.
    pub fn subscribe_to_book_added(&self) -> Result<ListenerSession> {
        self.broker.subscribe(BOOK_ADDED)
    }
}
