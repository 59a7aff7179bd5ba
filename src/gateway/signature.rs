//! Webhook signature verification.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac>[,v1=...]`, where the HMAC is
//! SHA-256 keyed by the endpoint secret over `"<t>." + raw body`. The body is
//! used byte for byte; it must never be re-serialized before checking.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,
    #[error("malformed signature header")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
}

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier").field("secret", &"[REDACTED]").field("tolerance_secs", &self.tolerance_secs).finish()
    }
}

impl WebhookVerifier {
    pub fn new(secret: SecretString, tolerance_secs: i64) -> Self {
        Self { secret, tolerance_secs }
    }

    pub fn verify(&self, payload: &[u8], header: Option<&str>, now: DateTime<Utc>) -> Result<(), SignatureError> {
        let header = header.ok_or(SignatureError::Missing)?;
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
        if signatures.is_empty() { return Err(SignatureError::Malformed); }
        if (now.timestamp() - timestamp).abs() > self.tolerance_secs { return Err(SignatureError::Expired); }

        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes()).map_err(|_| SignatureError::Malformed)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);

        // verify_slice compares in constant time.
        let matched = signatures.iter().filter_map(|sig| hex::decode(sig).ok()).any(|sig| mac.clone().verify_slice(&sig).is_ok());
        if matched { Ok(()) } else { Err(SignatureError::Mismatch) }
    }
}

/// Produces a header value for `payload`. Used by tests and local tooling.
pub fn sign(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}
