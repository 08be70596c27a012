//! Webhook endpoint handler.
//!
//! Accepts GitHub webhook deliveries, authenticates them against the
//! repository's secret, and runs the actions of every matching rule before
//! responding. Each delivery goes through these steps, stopping at the first
//! failure:
//!
//! ```text
//! read body (≤ 10 MiB)           ── fail → 400
//! extract repository.full_name   ── fail → 400
//! look up repository config      ── fail → 404
//! verify X-Hub-Signature-256     ── fail → 401
//! require X-GitHub-Event         ── fail → 400
//! match rules, run actions       ── always → 200 "ok"
//! ```
//!
//! Once actions start the delivery has been authenticated, so action failures
//! are logged and never change the response.

use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::AppState;
use crate::rules::{Rule, matching_rules};
use crate::types::{DeliveryId, RepoName};
use crate::webhooks::{extract_branch, extract_repository, verify_signature};

/// Header name for GitHub event type.
const HEADER_EVENT: &str = "x-github-event";
/// Header name for GitHub delivery ID.
const HEADER_DELIVERY: &str = "x-github-delivery";
/// Header name for GitHub signature.
const HEADER_SIGNATURE: &str = "x-hub-signature-256";

/// Maximum accepted request body size (10 MiB).
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Errors that end a delivery before any action runs.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// The body could not be read or exceeded [`MAX_BODY_BYTES`].
    #[error("could not read request body: {0}")]
    MalformedRequest(String),

    /// The payload has no usable `repository.full_name`.
    #[error("could not determine repository from payload")]
    MissingRepository,

    /// The repository is not in the configuration.
    #[error("repository not configured: {0}")]
    UnknownRepository(RepoName),

    /// The signature header is missing, malformed, or does not match.
    #[error("invalid signature")]
    InvalidSignature,

    /// `X-GitHub-Event` is missing or empty.
    #[error("missing X-GitHub-Event header")]
    MissingEventType,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            WebhookError::MissingRepository => StatusCode::BAD_REQUEST,
            WebhookError::UnknownRepository(_) => StatusCode::NOT_FOUND,
            WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
            WebhookError::MissingEventType => StatusCode::BAD_REQUEST,
        };

        (status, self.to_string()).into_response()
    }
}

/// Webhook handler.
///
/// Verifies the delivery and runs the actions of every matching rule. The
/// response is sent only after all of them have finished or timed out.
///
/// # Request
///
/// - Method: POST
/// - Headers:
///   - `X-Hub-Signature-256`: HMAC-SHA256 signature of the payload
///   - `X-GitHub-Event`: Event type (e.g., "push")
///   - `X-GitHub-Delivery`: Delivery ID, optional, used only for logging
/// - Body: JSON webhook payload
///
/// # Response
///
/// - 200 OK, body "ok": delivery accepted and its actions have run
/// - 400 Bad Request: unreadable or oversized body, no repository, no event type
/// - 401 Unauthorized: invalid signature
/// - 404 Not Found: repository not configured
///
/// # Example
///
/// ```ignore
/// POST /webhook HTTP/1.1
/// X-GitHub-Event: push
/// X-Hub-Signature-256: sha256=...
/// Content-Type: application/json
///
/// {"ref": "refs/heads/main", "repository": {"full_name": "acme/app", ...}}
///
/// HTTP/1.1 200 OK
/// Content-Type: text/plain; charset=utf-8
///
/// ok
/// ```
pub async fn webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, &'static str), WebhookError> {
    let started = Instant::now();
    let delivery_id = header_str(&headers, HEADER_DELIVERY)
        .map(DeliveryId::new)
        .unwrap_or_else(|| DeliveryId::new("-"));

    let body = read_body(body).await.inspect_err(|e| {
        warn!(delivery_id = %delivery_id, error = %e, "Failed to read webhook body");
    })?;

    let repo = match extract_repository(&body) {
        Some(name) => RepoName::new(name),
        None => {
            warn!(delivery_id = %delivery_id, "Could not extract repository from payload");
            return Err(WebhookError::MissingRepository);
        }
    };

    let Some(repo_config) = app_state.config().repo(repo.as_str()) else {
        warn!(delivery_id = %delivery_id, repo = %repo, "Repository not found in config");
        return Err(WebhookError::UnknownRepository(repo));
    };

    // Verify against the raw bytes exactly as received.
    let signature = header_str(&headers, HEADER_SIGNATURE).unwrap_or_default();
    if !verify_signature(&body, signature, repo_config.secret.as_bytes()) {
        warn!(delivery_id = %delivery_id, repo = %repo, "Invalid webhook signature");
        return Err(WebhookError::InvalidSignature);
    }

    let event = match header_str(&headers, HEADER_EVENT) {
        Some(event) if !event.is_empty() => event.to_string(),
        _ => {
            warn!(delivery_id = %delivery_id, repo = %repo, "Missing X-GitHub-Event header");
            return Err(WebhookError::MissingEventType);
        }
    };

    let branch = extract_branch(&body).unwrap_or_default();
    info!(
        delivery_id = %delivery_id,
        repo = %repo,
        event = %event,
        branch = %branch,
        "Received webhook"
    );

    let matched: Vec<Rule> = matching_rules(&repo_config.rules, &event, &branch)
        .into_iter()
        .cloned()
        .collect();
    for rule in &matched {
        info!(
            delivery_id = %delivery_id,
            repo = %repo,
            event = %rule.event,
            branch = %branch,
            actions = rule.actions.len(),
            "Rule matched"
        );
    }
    if matched.is_empty() {
        debug!(delivery_id = %delivery_id, repo = %repo, event = %event, branch = %branch, "No rules matched");
    }

    // Run in a separate task so a client disconnect cannot cancel actions
    // half-way; the response still waits for them.
    let dispatch_state = app_state.clone();
    let dispatch_repo = repo.clone();
    let dispatched = tokio::spawn(async move {
        let rules: Vec<&Rule> = matched.iter().collect();
        dispatch_state
            .dispatcher()
            .dispatch_rules(&dispatch_repo, &rules)
            .await
    })
    .await;

    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match dispatched {
        Ok(outcomes) => {
            let failed = outcomes.iter().filter(|o| !o.status.is_success()).count();
            info!(
                delivery_id = %delivery_id,
                repo = %repo,
                actions = outcomes.len(),
                failed,
                elapsed_ms,
                "Webhook processed"
            );
        }
        Err(e) => {
            error!(delivery_id = %delivery_id, repo = %repo, error = %e, elapsed_ms, "Action dispatch task failed");
        }
    }

    Ok((StatusCode::OK, "ok"))
}

/// Reads the whole body, refusing anything over [`MAX_BODY_BYTES`].
async fn read_body(body: Body) -> Result<Bytes, WebhookError> {
    axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| WebhookError::MalformedRequest(e.to_string()))
}

/// Returns a header value if present and valid UTF-8.
fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
