//! The book catalog: a flat store and the service that wraps it.

mod service;
mod store;

pub use service::Catalog;
pub use store::{AddOutcome, CatalogStore};
