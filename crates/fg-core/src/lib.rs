//! Core types, errors, and configuration shared by the fuzzgraph engine
//! crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use types::*;
