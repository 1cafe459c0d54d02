//! Credential vault: secrets at rest and webhook signatures.
//!
//! Two independent primitives live here:
//!
//! - [`Vault`] — AES-256-GCM encryption for OAuth tokens. The key is derived
//!   once at startup from the configured secret with PBKDF2-HMAC-SHA256.
//!   Ciphertexts serialize as `hex(nonce) || hex(tag) || hex(body)` so a
//!   single TEXT column holds the whole blob.
//! - [`verify_signature`] — HMAC-SHA256 verification for inbound webhook
//!   payloads, `"sha256=" + hex(mac)` header format, constant-time compare.
//!
//! # Security
//! - Fresh random 96-bit nonce per encryption, never reused
//! - Authenticated encryption bound to a fixed application context tag;
//!   tampering with any byte fails decryption outright
//! - The derivation salt is a fixed application constant. Rotating it to a
//!   per-deployment value invalidates every stored ciphertext, so that change
//!   has to ship as a versioned re-encryption migration, not a code edit.

mod encryption;
mod signature;

pub use encryption::{generate_random_string, hash, Vault};
pub use signature::{sign_payload, verify_signature};
