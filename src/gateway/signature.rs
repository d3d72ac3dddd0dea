//! HMAC signature helpers for the Razorpay gateway.
//!
//! Razorpay signs both the checkout callback (`"{order_id}|{payment_id}"`)
//! and webhook bodies with HMAC-SHA256 over the raw bytes, hex-encoded.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex-encoded HMAC-SHA256 of `payload` under `secret`.
///
/// HMAC accepts keys of any length, so construction cannot fail in
/// practice; an empty string is returned in the impossible case.
pub fn hmac_sha256_hex(payload: &[u8], secret: &str) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex-encoded HMAC-SHA256 signature in constant time.
pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    let computed = hmac_sha256_hex(payload, secret);
    if computed.is_empty() {
        return false;
    }
    secure_eq(computed.as_bytes(), signature.trim().as_bytes())
}

/// Signature payload for checkout verification: `"{order_id}|{payment_id}"`.
pub fn checkout_payload(gateway_order_id: &str, gateway_payment_id: &str) -> String {
    format!("{}|{}", gateway_order_id, gateway_payment_id)
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
