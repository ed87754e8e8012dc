//! Data Models
//!
//! Configuration structures for the memory store. Memory value types live in
//! the `agent-memory-core` crate.

pub mod settings;

pub use settings::*;
