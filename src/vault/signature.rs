//! HMAC-SHA256 webhook signature verification.
//!
//! Providers sign the raw request body and send the MAC in a header shaped
//! `sha256=<hex>`. Verification recomputes the MAC over the exact payload
//! bytes and compares in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Computes the `sha256=<hex>` signature header for a payload.
///
/// Used by tests and by outbound subscription registration; inbound
/// verification goes through [`verify_signature`].
pub fn sign_payload(payload: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a `sha256=<hex>` signature header against the raw payload bytes.
///
/// Returns `false` for a malformed header, wrong prefix, bad hex or a MAC
/// mismatch. Never errors: a mismatch is an expected outcome, not a fault.
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &str) -> bool {
    let Some(signature_hex) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(provided) = hex::decode(signature_hex) else {
        return false;
    };

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    let expected = mac.finalize().into_bytes();

    expected.as_slice().ct_eq(provided.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_then_verify() {
        let payload = br#"{"object":"adaccount","entry":[]}"#;
        let header = sign_payload(payload, "shared-secret");
        assert!(header.starts_with("sha256="));
        assert!(verify_signature(payload, &header, "shared-secret"));
    }

    #[test]
    fn test_mutated_payload_fails() {
        let payload = b"original body";
        let header = sign_payload(payload, "shared-secret");
        assert!(!verify_signature(b"original bodY", &header, "shared-secret"));
    }

    #[test]
    fn test_mutated_signature_fails() {
        let payload = b"original body";
        let mut header = sign_payload(payload, "shared-secret");
        let last = header.pop().unwrap();
        header.push(if last == '0' { '1' } else { '0' });
        assert!(!verify_signature(payload, &header, "shared-secret"));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let payload = b"original body";
        let header = sign_payload(payload, "shared-secret");
        assert!(!verify_signature(payload, &header, "other-secret"));
    }

    #[test]
    fn test_malformed_header_returns_false_not_error() {
        let payload = b"body";
        assert!(!verify_signature(payload, "", "s"));
        assert!(!verify_signature(payload, "sha1=abcd", "s"));
        assert!(!verify_signature(payload, "sha256=nothex!!", "s"));
        assert!(!verify_signature(payload, "sha256=", "s"));
    }
}
