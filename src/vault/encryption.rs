//! AES-256-GCM token encryption with a PBKDF2-derived key.

use crate::error::SyncError;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Size of the derived encryption key in bytes (256 bits).
const KEY_SIZE: usize = 32;

/// Size of the GCM nonce in bytes (96 bits).
const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes.
const TAG_SIZE: usize = 16;

/// PBKDF2 iteration count for key derivation.
const KDF_ITERATIONS: u32 = 100_000;

/// Fixed application salt for key derivation. Changing this breaks every
/// stored ciphertext; see the module docs before touching it.
const KDF_SALT: &[u8] = b"adsync-credential-kdf-v1";

/// Associated data binding ciphertexts to this application context.
const CONTEXT_TAG: &[u8] = b"adsync-credentials";

/// Symmetric vault over a key derived once from the configured secret.
pub struct Vault {
    key: [u8; KEY_SIZE],
}

impl Vault {
    /// Derives the AES-256 key from the configured secret.
    ///
    /// PBKDF2 is deliberately slow; construct one `Vault` at startup and
    /// share it, do not derive per call.
    pub fn new(secret: &str) -> Self {
        let mut key = [0u8; KEY_SIZE];
        pbkdf2_hmac::<Sha256>(secret.as_bytes(), KDF_SALT, KDF_ITERATIONS, &mut key);
        Self { key }
    }

    /// Encrypts plaintext, returning `hex(nonce) || hex(tag) || hex(body)`.
    ///
    /// A fresh random nonce is generated per call.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, SyncError> {
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| SyncError::Decryption)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: CONTEXT_TAG,
                },
            )
            .map_err(|_| SyncError::Decryption)?;

        // aes-gcm appends the 16-byte tag to the ciphertext body
        let (body, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

        Ok(format!(
            "{}{}{}",
            hex::encode(nonce_bytes),
            hex::encode(tag),
            hex::encode(body)
        ))
    }

    /// Decrypts a blob produced by [`Vault::encrypt`].
    ///
    /// Any parse or authentication failure yields `SyncError::Decryption`;
    /// partially decrypted or unauthenticated data is never returned.
    pub fn decrypt(&self, blob: &str) -> Result<String, SyncError> {
        let nonce_hex_len = NONCE_SIZE * 2;
        let tag_hex_len = TAG_SIZE * 2;
        // Split on bytes, not chars: the blob comes from untrusted input and
        // may contain multi-byte characters at arbitrary offsets.
        let blob = blob.as_bytes();
        if blob.len() < nonce_hex_len + tag_hex_len {
            return Err(SyncError::Decryption);
        }

        let nonce_bytes =
            hex::decode(&blob[..nonce_hex_len]).map_err(|_| SyncError::Decryption)?;
        let tag = hex::decode(&blob[nonce_hex_len..nonce_hex_len + tag_hex_len])
            .map_err(|_| SyncError::Decryption)?;
        let body = hex::decode(&blob[nonce_hex_len + tag_hex_len..])
            .map_err(|_| SyncError::Decryption)?;

        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| SyncError::Decryption)?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        // Reassemble body || tag for the AEAD open call
        let mut sealed = body;
        sealed.extend_from_slice(&tag);

        let plaintext = cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &sealed,
                    aad: CONTEXT_TAG,
                },
            )
            .map_err(|_| SyncError::Decryption)?;

        String::from_utf8(plaintext).map_err(|_| SyncError::Decryption)
    }
}

/// Cryptographically random hex string from `n` random bytes (2n hex chars).
pub fn generate_random_string(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// One-way SHA-256 hex digest for fingerprinting.
pub fn hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let vault = Vault::new("unit-test-secret");
        for plaintext in ["", "a", "my-access-token-12345", "日本語トークン"] {
            let blob = vault.encrypt(plaintext).unwrap();
            assert_ne!(blob, plaintext);
            assert_eq!(vault.decrypt(&blob).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_distinct_nonces_per_call() {
        let vault = Vault::new("unit-test-secret");
        let a = vault.encrypt("same-plaintext").unwrap();
        let b = vault.encrypt("same-plaintext").unwrap();
        assert_ne!(a, b);
        assert_ne!(&a[..24], &b[..24], "nonce prefix must differ");
    }

    #[test]
    fn test_any_flipped_byte_fails_decryption() {
        let vault = Vault::new("unit-test-secret");
        let blob = vault.encrypt("sensitive-token").unwrap();

        // Flip one hex digit at every position: nonce, tag and body regions
        // must all authenticate.
        for i in 0..blob.len() {
            let mut corrupted: Vec<u8> = blob.clone().into_bytes();
            corrupted[i] = if corrupted[i] == b'0' { b'1' } else { b'0' };
            let corrupted = String::from_utf8(corrupted).unwrap();
            if corrupted == blob {
                continue;
            }
            let err = vault.decrypt(&corrupted).unwrap_err();
            assert_eq!(err.code(), "DECRYPTION_ERROR", "position {}", i);
        }
    }

    #[test]
    fn test_truncated_or_garbage_blob_fails() {
        let vault = Vault::new("unit-test-secret");
        assert!(vault.decrypt("").is_err());
        assert!(vault.decrypt("abcdef").is_err());
        assert!(vault.decrypt("not-hex-at-all!!##zz").is_err());
        let blob = vault.encrypt("token").unwrap();
        assert!(vault.decrypt(&blob[..40]).is_err());
    }

    #[test]
    fn test_non_ascii_blob_fails_without_panic() {
        let vault = Vault::new("unit-test-secret");
        // Multi-byte characters land across the nonce/tag byte boundaries;
        // decrypt must reject these, not slice mid-character.
        let err = vault.decrypt(&format!("a{}", "日".repeat(20))).unwrap_err();
        assert_eq!(err.code(), "DECRYPTION_ERROR");
        let err = vault.decrypt(&"é".repeat(40)).unwrap_err();
        assert_eq!(err.code(), "DECRYPTION_ERROR");

        let blob = vault.encrypt("token").unwrap();
        let poisoned = format!("{}日本語", &blob[..24]);
        assert!(vault.decrypt(&poisoned).is_err());
    }

    #[test]
    fn test_different_secret_fails() {
        let vault = Vault::new("secret-one");
        let other = Vault::new("secret-two");
        let blob = vault.encrypt("token").unwrap();
        assert!(other.decrypt(&blob).is_err());
    }

    #[test]
    fn test_random_string_length_and_charset() {
        let s = generate_random_string(16);
        assert_eq!(s.len(), 32);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_random_string(16), generate_random_string(16));
    }

    #[test]
    fn test_hash_is_stable_and_one_way() {
        let a = hash("fingerprint-me");
        let b = hash("fingerprint-me");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash("fingerprint-me2"));
    }
}
