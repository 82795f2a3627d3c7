//! Svix-style webhook signature verification for Clerk deliveries.
//!
//! Clerk signs webhooks with HMAC-SHA256 over `"{msg_id}.{timestamp}.{body}"`
//! using the base64-decoded portion of the `whsec_`-prefixed endpoint secret.
//! The `svix-signature` header carries one or more space-separated
//! `v1,<base64>` entries.

use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::app_error::{AppError, AppResult};

/// Maximum age of a webhook timestamp before the delivery is rejected.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub fn verify_webhook_signature(
    payload: &str,
    svix_id: &str,
    svix_timestamp: &str,
    svix_signature: &str,
    webhook_secret: &str,
) -> AppResult<()> {
    let ts: i64 = svix_timestamp
        .parse()
        .map_err(|_| AppError::InvalidSignature)?;
    let now = Utc::now().timestamp();
    if (now - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(AppError::InvalidSignature);
    }

    let key_b64 = webhook_secret
        .strip_prefix("whsec_")
        .unwrap_or(webhook_secret);
    let key = base64::engine::general_purpose::STANDARD
        .decode(key_b64)
        .map_err(|_| AppError::InvalidSignature)?;

    let signed_payload = format!("{}.{}.{}", svix_id, svix_timestamp, payload);
    let mut mac = Hmac::<Sha256>::new_from_slice(&key)
        .map_err(|_| AppError::Internal("HMAC error".into()))?;
    mac.update(signed_payload.as_bytes());
    let expected = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    for entry in svix_signature.split_whitespace() {
        if let Some(sig) = entry.strip_prefix("v1,")
            && constant_time_compare(sig, &expected)
        {
            return Ok(());
        }
    }

    Err(AppError::InvalidSignature)
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
