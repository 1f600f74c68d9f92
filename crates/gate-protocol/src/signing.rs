//! Request signing for the device's HTTP control API.
//!
//! A request carries an RFC 3339 timestamp and a hex HMAC-SHA256 over
//! `timestamp ++ path`, keyed with the shared API secret. The device rejects
//! stamps outside [`SIGNATURE_WINDOW`] of its own clock.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::types::GateAction;

type HmacSha256 = Hmac<Sha256>;

// Lowercase so they can be used as static header names.
pub const API_KEY_HEADER: &str = "x-api-key";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Maximum distance between a request's timestamp and the verifier's clock.
pub const SIGNATURE_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Request path controlling one action, e.g. `/api/gate/full`.
pub fn api_path(action: GateAction) -> String {
    format!("/api/gate/{action}")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("missing {0} header")]
    MissingHeader(&'static str),

    #[error("timestamp is not RFC 3339")]
    BadTimestamp,

    #[error("timestamp outside the validity window")]
    Expired,

    #[error("signature mismatch")]
    Mismatch,

    #[error("invalid signing key")]
    InvalidKey,
}

/// Timestamp and signature headers for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub timestamp: String,
    pub signature: String,
}

fn mac(timestamp: &str, path: &str, secret: &str) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(timestamp.as_bytes());
    mac.update(path.as_bytes());
    Ok(mac)
}

/// Hex HMAC-SHA256 of `timestamp ++ path`.
pub fn sign(timestamp: &str, path: &str, secret: &str) -> Result<String, SignatureError> {
    Ok(hex::encode(mac(timestamp, path, secret)?.finalize().into_bytes()))
}

/// Signs `path` with a timestamp taken from `now`.
pub fn signed_headers(
    path: &str,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<SignedHeaders, SignatureError> {
    let timestamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    let signature = sign(&timestamp, path, secret)?;
    Ok(SignedHeaders {
        timestamp,
        signature,
    })
}

/// Checks a request's timestamp and signature against `secret`.
pub fn verify(
    timestamp: &str,
    signature: &str,
    path: &str,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let stamped = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|_| SignatureError::BadTimestamp)?
        .with_timezone(&Utc);
    let skew = if now >= stamped { now - stamped } else { stamped - now };
    let skew = skew.to_std().map_err(|_| SignatureError::Expired)?;
    if skew > SIGNATURE_WINDOW {
        return Err(SignatureError::Expired);
    }

    let presented = hex::decode(signature).map_err(|_| SignatureError::Mismatch)?;
    mac(timestamp, path, secret)?
        .verify_slice(&presented)
        .map_err(|_| SignatureError::Mismatch)
}

/// Constant-time comparison for API keys.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
