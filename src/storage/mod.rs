//! Storage layer: the page store contract and its collaborators.

mod durable;
mod snapshot;
mod store;

pub use durable::write_atomic;
pub use snapshot::Snapshot;
pub use store::{MemStore, PageStore};
