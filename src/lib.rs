//! Webhook Listener - runs operator-defined shell commands in response to
//! GitHub webhook deliveries.
//!
//! A delivery flows through:
//! signature verification ([`webhooks::signature`]) → payload extraction
//! ([`webhooks::payload`]) → rule matching ([`rules`]) → action dispatch
//! ([`actions`]), orchestrated by the HTTP handler in [`server::webhook`].

pub mod actions;
pub mod config;
pub mod rules;
pub mod server;
pub mod types;
pub mod webhooks;
