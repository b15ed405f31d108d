//! fuzzgraph analysis pipeline — static call-graph snapshots for C/C++
//! fuzzing projects.
//!
//! The [`orchestrator::Orchestrator`] drives the six-phase state machine
//! over a work ticket: probe the project shape, derive a build command,
//! produce library-only whole-program bitcode, run pointer analysis,
//! bridge each fuzz harness into the library, compute per-fuzzer
//! reachability, and commit the snapshot atomically to the graph store.

pub mod backend;
pub mod bitcode;
pub mod build_cmd;
pub mod executor;
pub mod harness;
pub mod logsink;
pub mod orchestrator;
pub mod probe;
pub mod reaches;
pub mod refine;

pub use logsink::LogSink;
pub use orchestrator::Orchestrator;
