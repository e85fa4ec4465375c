//! Flat in-memory book store.

use crate::error::{CatalogError, Result};
use crate::types::{Book, BookId, BookUpdate, NewBook};

/// What `CatalogStore::add` did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new record was created.
    Inserted(Book),
    /// A record with the same title and author already existed.
    Existing(Book),
}

impl AddOutcome {
    pub fn book(&self) -> &Book {
        match self {
            AddOutcome::Inserted(book) | AddOutcome::Existing(book) => book,
        }
    }

    pub fn into_book(self) -> Book {
        match self {
            AddOutcome::Inserted(book) | AddOutcome::Existing(book) => book,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, AddOutcome::Inserted(_))
    }
}

/// Unindexed list of books with linear lookup.
///
/// Not synchronized; callers serialize access.
#[derive(Debug)]
pub struct CatalogStore {
    books: Vec<Book>,
    next_id: u64,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self {
            books: Vec::new(),
            next_id: 1,
        }
    }

    /// Add a book unless one with the same title and author exists.
    pub fn add(&mut self, input: NewBook) -> AddOutcome {
        if let Some(existing) = self
            .books
            .iter()
            .find(|b| b.same_work(&input.title, &input.author))
        {
            return AddOutcome::Existing(existing.clone());
        }

        let book = Book {
            id: BookId(self.next_id),
            title: input.title,
            author: input.author,
        };
        self.next_id += 1;
        self.books.push(book.clone());
        AddOutcome::Inserted(book)
    }

    pub fn find(&self, id: BookId) -> Option<&Book> {
        self.books.iter().find(|b| b.id == id)
    }

    /// Change a book's title. Fails with `NotFound`, touching nothing, if
    /// the id is absent.
    pub fn update(&mut self, id: BookId, update: BookUpdate) -> Result<Book> {
        let book = self
            .books
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or(CatalogError::NotFound(id))?;
        book.title = update.title;
        Ok(book.clone())
    }

    pub fn list(&self) -> Vec<Book> {
        self.books.clone()
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new()
    }
}
