//! Gateway webhook signature verification.
//!
//! The gateway signs each notification body with HMAC-SHA256 under the
//! shared webhook secret and sends `sha256=<hex>` in [`SIGNATURE_HEADER`].

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::error::AppError;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

/// Verify a webhook body against its signature header.
///
/// # Errors
///
/// Returns [`AppError::Unauthenticated`] if the signature is missing or wrong.
pub fn verify_signature(
    secret: &SecretString,
    body: &[u8],
    signature: Option<&str>,
) -> Result<(), AppError> {
    let signature =
        signature.ok_or_else(|| AppError::Unauthenticated("missing webhook signature".to_string()))?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|e| AppError::Internal(e.to_string()))?;
    mac.update(body);
    let expected = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

    if !constant_time_compare(&expected, signature) {
        return Err(AppError::Unauthenticated(
            "webhook signature mismatch".to_string(),
        ));
    }

    Ok(())
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}
