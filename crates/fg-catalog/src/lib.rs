//! Snapshot catalog: the transactional store of snapshot metadata, the
//! admission coordinator, and the eviction policies.
//!
//! The catalog is the only process-wide shared mutable state for
//! admission; the uniqueness constraint on `(repo_url, version, backend)`
//! is the admission lock.

pub mod admission;
pub mod eviction;
pub mod store;

pub use admission::AcquireOutcome;
pub use eviction::{EvictionPolicy, Evictor, GraphPurge, LogPurge};
pub use store::Catalog;
