//! Snapshot-on-write key-value store.
//!
//! A [`Store`] keeps every entry in memory and rewrites the whole snapshot
//! through a [`SnapshotBackend`] after each mutation.

mod error;
mod file;
mod memory;
mod store;
mod traits;

pub use error::StoreError;
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use store::{CorruptPolicy, Store};
pub use traits::SnapshotBackend;
