//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use revision_core::StudyEngine;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<StudyEngine>,
    pub config: Arc<Config>,
    /// Cancelled when the server starts shutting down.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(engine: Arc<StudyEngine>, config: Arc<Config>) -> Self {
        Self {
            engine,
            config,
            shutdown: CancellationToken::new(),
        }
    }
}
