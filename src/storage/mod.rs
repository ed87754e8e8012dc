//! Storage Layer
//!
//! Handles data persistence: SQLite database, schema migrations, and JSON config.

pub mod config;
pub mod database;
pub mod migrations;

pub use config::*;
pub use database::*;
pub use migrations::*;
