//! Integration Tests Module
//!
//! End-to-end behavior of the memory store through the public API, run
//! against both backends where the behavior is shared.

// Shared helpers for building backends
mod common;

// Store/retrieve/delete/compact behavior across both backends
mod memory_service_test;

// Governance policy enforcement
mod governance_test;

// Durable backend persistence, traces and introspection
mod sqlite_backend_test;

// Config file round trip into a working backend
mod config_test;
