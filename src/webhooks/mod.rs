//! Webhook handling for GitHub events.
//!
//! This module provides:
//! - Signature verification for webhook payloads (HMAC-SHA256)
//! - Tolerant extraction of the repository and branch from a payload

pub mod payload;
pub mod signature;

pub use payload::{extract_branch, extract_repository};
pub use signature::{
    SIGNATURE_PREFIX, compute_signature, format_signature_header, parse_signature_header,
    verify_signature,
};
