//! HMAC-SHA256 request signing and constant-time token checks.
//!
//! Provides:
//! - `sign_body()` -- hex HMAC-SHA256 of an outbound webhook body
//! - `verify_signature()` -- constant-time check of a `sha256=<hex>` header
//! - `verify_bearer_token()` -- constant-time bearer token comparison

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature on outbound webhook requests.
pub const SIGNATURE_HEADER: &str = "x-journey-signature";

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("signature verification failed")]
    Mismatch,

    #[error("bearer token verification failed")]
    BearerMismatch,

    #[error("invalid HMAC key: {0}")]
    InvalidKey(String),
}

/// Compute the hex-encoded HMAC-SHA256 of `body`.
pub fn sign_body(secret: &[u8], body: &[u8]) -> Result<String, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
    mac.update(body);
    Ok(hex_encode(&mac.finalize().into_bytes()))
}

/// Verify a signature header value (`sha256=<hex>` or plain hex).
pub fn verify_signature(secret: &[u8], body: &[u8], header: &str) -> Result<(), SignatureError> {
    let hex_sig = header.strip_prefix("sha256=").unwrap_or(header);
    let expected = hex_decode(hex_sig).map_err(|_| SignatureError::Mismatch)?;

    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}

/// Compare a provided `Authorization` value (with or without the `Bearer `
/// prefix) against the expected token in constant time.
pub fn verify_bearer_token(expected: &str, provided: &str) -> Result<(), SignatureError> {
    let token = provided.strip_prefix("Bearer ").unwrap_or(provided);
    if constant_time_eq(expected.as_bytes(), token.as_bytes()) {
        Ok(())
    } else {
        Err(SignatureError::BearerMismatch)
    }
}

fn hex_decode(hex: &str) -> Result<Vec<u8>, ()> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return Err(());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Returns true iff `a == b`, in time independent of where they differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_then_verify() {
        let sig = sign_body(b"hook-secret", b"{\"content\":\"hi\"}").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(verify_signature(b"hook-secret", b"{\"content\":\"hi\"}", &format!("sha256={sig}")).is_ok());
        assert!(verify_signature(b"hook-secret", b"{\"content\":\"bye\"}", &sig).is_err());
        assert!(verify_signature(b"other", b"{\"content\":\"hi\"}", &sig).is_err());
        assert!(verify_signature(b"hook-secret", b"x", "not-hex").is_err());
    }

    #[test]
    fn test_hmac_sha256_rfc4231_vector2() {
        let sig = sign_body(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify_bearer_token() {
        assert!(verify_bearer_token("tick-token", "Bearer tick-token").is_ok());
        assert!(verify_bearer_token("tick-token", "tick-token").is_ok());
        assert!(verify_bearer_token("tick-token", "Bearer tick-tokeN").is_err());
        assert!(verify_bearer_token("tick-token", "").is_err());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
        assert!(constant_time_eq(b"", b""));
    }
}
