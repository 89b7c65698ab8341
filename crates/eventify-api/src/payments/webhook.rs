//! Payment provider webhook signatures.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac-sha256>[,v1=...]`, where the
//! MAC covers `"<t>.<raw body>"`. Verification fails closed.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted age of a signed payload, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,

    #[error("webhook secret is not configured")]
    NoSecret,

    #[error("invalid signature format: {0}")]
    Format(&'static str),

    #[error("signature timestamp outside tolerance")]
    Expired,

    #[error("no matching signature")]
    Mismatch,
}

pub fn verify_signature(
    payload: &[u8],
    header: Option<&str>,
    secret: Option<&str>,
    now: i64,
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;
    let secret = secret
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::NoSecret)?;

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(
                    value
                        .parse::<i64>()
                        .map_err(|_| SignatureError::Format("bad timestamp"))?,
                );
            }
            Some(("v1", value)) => {
                // Undecodable entries are skipped; another v1 may still match.
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Format("missing timestamp"))?;
    if signatures.is_empty() {
        return Err(SignatureError::Format("missing v1 signature"));
    }
    if now.abs_diff(timestamp) > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
        return Err(SignatureError::Expired);
    }

    for expected in &signatures {
        // verify_slice compares in constant time
        if signed_mac(secret, timestamp, payload)?.verify_slice(expected).is_ok() {
            return Ok(());
        }
    }
    Err(SignatureError::Mismatch)
}

fn signed_mac(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::Format("unusable secret"))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Build a valid header for `payload`. Used by tests and local tooling.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let digest = match signed_mac(secret, timestamp, payload) {
        Ok(mac) => hex::encode(mac.finalize().into_bytes()),
        Err(_) => String::new(),
    };
    format!("t={},v1={}", timestamp, digest)
}

/// Envelope of a provider notification. Only the fields we branch on.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub object: serde_json::Value,
}

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
