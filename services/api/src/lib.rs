//! services/api/src/lib.rs
//!
//! The HTTP service around `revision_core`: store and LLM adapters, the axum
//! router, configuration and error mapping. The `api` and `openapi` binaries
//! are thin wrappers around this library.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
