//! Snapshot-scoped property graph over SQLite: Function/External/Fuzzer
//! nodes and CALLS/ENTRY/REACHES edges, with the batched writes the
//! analysis pipeline commits through and the query surface downstream
//! consumers read from.
//!
//! Every operation takes a `snapshot_id`, making cross-snapshot
//! contamination structurally impossible.

pub mod model;
pub mod paths;
pub mod queries;
pub mod store;

pub use model::{
    CallNeighbor, FunctionNode, NodeKind, ReachedFunction, Subtree, SubtreeEdge,
};
pub use paths::CallAdjacency;
pub use store::GraphStore;
