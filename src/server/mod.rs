//! HTTP server for the webhook listener.
//!
//! This module implements the HTTP server that:
//! - Accepts webhooks from GitHub, validates signatures, and runs the actions
//!   of every matching rule before responding
//! - Answers `GET /health` while the listener is up
//!
//! # Endpoints
//!
//! - `POST /webhook` - Accepts GitHub webhook deliveries (returns 200 "ok")
//! - `GET /health` - Returns `{"status":"ok"}` if the server is running
//!
//! Other methods on these paths get 405 Method Not Allowed from the router.

use std::sync::Arc;

use tower_http::trace::TraceLayer;

use crate::actions::Dispatcher;
use crate::config::Config;

pub mod health;
pub mod webhook;

pub use health::health_handler;
pub use webhook::{MAX_BODY_BYTES, WebhookError, webhook_handler};

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor. Everything in
/// it is read-only after startup, so requests share it without locking.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Validated repository configuration.
    config: Config,

    /// Runs actions for accepted deliveries.
    dispatcher: Dispatcher,
}

impl AppState {
    /// Creates application state, deriving the dispatcher from `config`.
    pub fn new(config: Config) -> Self {
        let dispatcher = config.dispatcher();
        AppState {
            inner: Arc::new(AppStateInner { config, dispatcher }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns the action dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
