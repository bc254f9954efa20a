//! Local durable store for offline data and pending mutations.
//!
//! Records are partitioned into two collections:
//! - `offlineData`: last known copy of fetched resources, keyed by logical key
//! - `syncQueue`: mutations waiting to be replayed, keyed by queue item id
//!
//! When the storage engine can't be opened the store degrades to a no-op
//! backend and the client keeps working online-only.

mod storage;
mod traits;

pub use storage::{open_or_degrade, LocalStore};
#[cfg(test)]
pub use storage::{NoopStore, SqliteStore};
pub use traits::{CachedRecord, Collection};
