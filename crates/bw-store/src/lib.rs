//! bw-store: Resource store implementations and client helpers
//!
//! - [`MemoryStore`]: the in-process versioned store backing `burrow serve`
//!   and every test in the workspace
//! - [`Api`]: typed access to one kind, with conflict-retrying patches
//! - [`Cache`]: a watch-fed, eventually consistent local copy of one kind
//! - [`snapshot`]: on-disk persistence of a [`MemoryStore`]

mod api;
mod cache;
mod memory;
mod retry;
pub mod snapshot;

pub use api::Api;
pub use cache::{Cache, CacheEvent};
pub use memory::{FaultOp, MemoryStore, StoreStats};
pub use retry::{retry_on_conflict, MAX_CONFLICT_RETRIES};
pub use snapshot::{SnapshotData, SnapshotError};
