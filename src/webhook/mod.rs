//! Admission webhook HTTP surface
//!
//! Thin axum layer over the mutation engine. The API server POSTs
//! `AdmissionReview` envelopes to `/mutate/pods`; everything interesting
//! happens in [`crate::mutate`], and this module only translates between
//! the envelope and the engine's outcome.

pub mod pod;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::config::InjectorConfig;
use crate::mutate::MutationEngine;

/// Shared state for webhook handlers
#[derive(Clone)]
pub struct WebhookState {
    /// The mutation engine, shared immutably across requests
    pub engine: MutationEngine,
}

impl WebhookState {
    /// Create webhook state with the given injector configuration
    pub fn new(config: InjectorConfig) -> Self {
        Self {
            engine: MutationEngine::new(config),
        }
    }
}

/// Create the webhook router with all mutation endpoints
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate/pods", post(pod::mutate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}
