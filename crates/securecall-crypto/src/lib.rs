//! SecureCall cryptographic layer — identity vault and challenge signatures.
//!
//! This crate provides:
//! - Password hardening via PBKDF2-HMAC-SHA256 (600k iterations)
//! - The vault codec: an RSA-2048 signing keypair wrapped at rest with
//!   AES-256-GCM under the password-derived key
//! - Challenge-response primitives: nonce generation, RSA-PSS signing and
//!   verification with matched parameters on both paths
//!
//! Everything here is a stateless transformer: no storage, no network.
//! Persisting the vault fields is the caller's responsibility.

pub mod challenge;
pub mod encoding;
pub mod error;
pub mod kdf;
pub mod vault;

pub use challenge::{generate_nonce, sign_challenge, verify_challenge};
pub use error::CryptoError;
pub use kdf::{derive_wrapping_key, generate_salt, WrappingKey};
pub use vault::{create_vault, unlock_vault, CreatedVault, PrivateKeyHandle};
