//! Offline mutation queue and the connectivity monitor that drains it.
//!
//! Mutations made while offline are persisted in the store's `syncQueue`
//! collection and replayed in enqueue order once the platform reports that the
//! network is back. Each item gets three retries after its first failure
//! before it is evicted and the user is told.

mod connectivity;
mod queue;

pub use connectivity::{ConnectivityMonitor, ConnectivityState, NetworkStatus};
pub use queue::{RetryPolicy, SyncAction, SyncQueue};
