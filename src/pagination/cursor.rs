//! Signed, time-bound pagination cursors
//!
//! A cursor is `base64url({"payload": {...}, "signature": "<hex>"})`. The
//! signature is HMAC-SHA256 over the payload's canonical JSON (sorted keys,
//! no whitespace), so any process holding the same secret can validate a
//! cursor without shared state.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::api::models::error_codes;

type HmacSha256 = Hmac<Sha256>;

/// Decoded cursor contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPayload {
    pub offset: u64,
    /// Issue time as fractional unix seconds
    pub ts: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SignedEnvelope {
    payload: Value,
    signature: String,
}

/// Cursor decoding failures, distinguished for status mapping
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CursorError {
    #[error("malformed cursor: {0}")]
    Malformed(String),

    #[error("cursor signature mismatch")]
    Tampered,

    #[error("cursor expired: issued {age_secs:.1}s ago, ttl is {ttl_secs}s")]
    Expired { age_secs: f64, ttl_secs: u64 },

    #[error("invalid cursor input: {0}")]
    Validation(String),
}

impl CursorError {
    pub fn code(&self) -> &'static str {
        match self {
            CursorError::Malformed(_) => error_codes::CURSOR_MALFORMED,
            CursorError::Tampered => error_codes::CURSOR_TAMPERED,
            CursorError::Expired { .. } => error_codes::CURSOR_EXPIRED,
            CursorError::Validation(_) => error_codes::VALIDATION_ERROR,
        }
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            CursorError::Malformed(_) => "malformed",
            CursorError::Tampered => "tampered",
            CursorError::Expired { .. } => "expired",
            CursorError::Validation(_) => "validation",
        }
    }

    /// Actionable message for API consumers
    pub fn client_message(&self) -> &'static str {
        match self {
            CursorError::Malformed(_) => {
                "cursor could not be decoded; pass the next_cursor value exactly as returned"
            }
            CursorError::Tampered => {
                "cursor signature is invalid; it was modified or issued by another deployment, request a fresh page from the start"
            }
            CursorError::Expired { .. } => "cursor expired, request a fresh page from the start",
            CursorError::Validation(_) => "cursor parameters are invalid",
        }
    }
}

/// Stateless encoder/decoder for pagination cursors
pub struct CursorCodec {
    secret: SecretString,
}

impl CursorCodec {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Codec with a random per-process secret; cursors will not survive a restart
    pub fn with_random_secret() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(SecretString::new(hex::encode(bytes)))
    }

    /// Encode a cursor issued now
    pub fn encode(
        &self,
        offset: i64,
        order_by: Option<String>,
        filters: Option<Map<String, Value>>,
    ) -> Result<String, CursorError> {
        self.encode_at(offset, unix_now(), order_by, filters)
    }

    /// Encode a cursor with an explicit issue time
    pub fn encode_at(
        &self,
        offset: i64,
        issued_at: f64,
        order_by: Option<String>,
        filters: Option<Map<String, Value>>,
    ) -> Result<String, CursorError> {
        if offset < 0 {
            return Err(CursorError::Validation(format!(
                "offset must be non-negative, got {}",
                offset
            )));
        }
        if !issued_at.is_finite() {
            return Err(CursorError::Validation("issue time must be finite".to_string()));
        }

        let payload = CursorPayload {
            offset: offset as u64,
            ts: issued_at,
            order_by,
            filters,
        };
        let payload = canonicalize(
            &serde_json::to_value(&payload).map_err(|e| CursorError::Validation(e.to_string()))?,
        );
        let signature = self.sign(&canonical_bytes(&payload));

        let envelope = serde_json::to_vec(&SignedEnvelope { payload, signature })
            .map_err(|e| CursorError::Validation(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(envelope))
    }

    /// Decode and validate a cursor against the current time
    pub fn decode(&self, cursor: &str, ttl: Duration) -> Result<CursorPayload, CursorError> {
        self.decode_at(cursor, ttl, unix_now())
    }

    /// Decode and validate a cursor as of `now` (unix seconds).
    ///
    /// The signature is checked before freshness, so a forged cursor is
    /// always reported as tampered even when it would also be stale.
    pub fn decode_at(
        &self,
        cursor: &str,
        ttl: Duration,
        now: f64,
    ) -> Result<CursorPayload, CursorError> {
        let raw = URL_SAFE_NO_PAD
            .decode(cursor.trim().trim_end_matches('='))
            .map_err(|e| CursorError::Malformed(format!("invalid base64: {}", e)))?;

        let envelope: SignedEnvelope = serde_json::from_slice(&raw)
            .map_err(|e| CursorError::Malformed(format!("invalid envelope: {}", e)))?;

        if !envelope.payload.is_object() {
            return Err(CursorError::Malformed("payload is not an object".to_string()));
        }

        let expected = self.sign(&canonical_bytes(&canonicalize(&envelope.payload)));
        let matches: bool = expected
            .as_bytes()
            .ct_eq(envelope.signature.to_ascii_lowercase().as_bytes())
            .into();
        if !matches {
            return Err(CursorError::Tampered);
        }

        let payload: CursorPayload = serde_json::from_value(envelope.payload)
            .map_err(|e| CursorError::Malformed(format!("invalid payload: {}", e)))?;

        if !payload.ts.is_finite() {
            return Err(CursorError::Malformed("issue time is not finite".to_string()));
        }

        let age = now - payload.ts;
        if age > ttl.as_secs_f64() {
            return Err(CursorError::Expired {
                age_secs: age,
                ttl_secs: ttl.as_secs(),
            });
        }

        Ok(payload)
    }

    fn sign(&self, canonical: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(canonical);
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Current time as fractional unix seconds
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Rebuild a value with every object's keys in sorted order
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn canonical_bytes(value: &Value) -> Vec<u8> {
    // Compact output; Value serialization cannot fail
    serde_json::to_vec(value).unwrap_or_default()
}
