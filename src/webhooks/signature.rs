//! GitHub webhook signature verification using HMAC-SHA256.
//!
//! GitHub signs webhook payloads using HMAC-SHA256 with the repository's shared
//! secret. The signature is provided in the `X-Hub-Signature-256` header as
//! `sha256=<hex>`.
//!
//! Verification must run over the raw request body exactly as received. Parsing
//! and re-serializing the JSON first changes the bytes and breaks the signature.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Prefix GitHub puts in front of the hex digest.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Parses a GitHub signature header (e.g., "sha256=abc123...") into raw bytes.
///
/// Returns `None` for malformed headers (missing prefix, invalid hex, etc.).
/// GitHub sends lowercase hex, and only lowercase is accepted. Never panics.
///
/// # Examples
///
/// ```
/// use webhook_listener::webhooks::parse_signature_header;
///
/// assert!(parse_signature_header("sha256=abcd1234").is_some());
/// assert!(parse_signature_header("abcd1234").is_none());
/// assert!(parse_signature_header("sha1=abcd1234").is_none());
/// assert!(parse_signature_header("sha256=xyz").is_none());
/// assert!(parse_signature_header("sha256=ABCD1234").is_none());
/// ```
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.strip_prefix(SIGNATURE_PREFIX)?;
    if hex_sig.bytes().any(|b| b.is_ascii_uppercase()) {
        return None;
    }
    hex::decode(hex_sig).ok()
}

/// Computes the HMAC-SHA256 signature of a payload using the given secret.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Formats a signature as a GitHub-style header value.
///
/// Returns a string in the format "sha256=<hex>".
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(signature))
}

/// Verifies a GitHub webhook signature against the payload and secret.
///
/// Returns `false`, never an error, when:
/// - the secret is empty
/// - the header is empty or lacks the `sha256=` prefix
/// - the header digest is not valid lowercase hex
/// - the digest does not match
///
/// The digest comparison is constant-time (delegated to the HMAC library).
///
/// # Examples
///
/// ```
/// use webhook_listener::webhooks::{verify_signature, compute_signature, format_signature_header};
///
/// let payload = b"Hello, World!";
/// let secret = b"my-secret-key";
///
/// let header = format_signature_header(&compute_signature(payload, secret));
///
/// assert!(verify_signature(payload, &header, secret));
/// assert!(!verify_signature(payload, &header, b"wrong-secret"));
/// assert!(!verify_signature(payload, &header, b""));
/// ```
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    // An empty key would make every unsigned sender able to forge deliveries.
    if secret.is_empty() || signature_header.is_empty() {
        return false;
    }

    let expected_signature = match parse_signature_header(signature_header) {
        Some(sig) => sig,
        None => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);

    // Length mismatch is rejected too; no truncated tags.
    mac.verify_slice(&expected_signature).is_ok()
}
