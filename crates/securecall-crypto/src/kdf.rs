//! Password hardening.
//!
//! PBKDF2-HMAC-SHA256 with 600 000 iterations turns a password + 16-byte
//! salt into a 256-bit wrapping key for the vault. The function is pure
//! and deterministic: a returning device re-derives the exact key from the
//! stored salt without the password ever leaving the client. It is also
//! deliberately expensive; callers must keep it off any interactive path.

use std::num::NonZeroU32;

use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// PBKDF2 salt length in bytes. Stored alongside the vault, not secret.
pub const SALT_LEN: usize = 16;
/// Derived key length: AES-256.
pub const KEY_LEN: usize = 32;
/// Iteration count, fixed by the vault scheme version.
pub const PBKDF2_ITERATIONS: u32 = 600_000;

/// 32-byte vault wrapping key derived from the user password.
/// Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct WrappingKey([u8; KEY_LEN]);

impl WrappingKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// Derive the vault wrapping key from a password and salt.
///
/// Accepts any password, including the empty string; rejecting weak
/// passwords is a policy decision that belongs to the vault layer.
pub fn derive_wrapping_key(password: &str, salt: &[u8; SALT_LEN]) -> WrappingKey {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        NonZeroU32::new(PBKDF2_ITERATIONS).expect("iteration count is nonzero"),
        salt,
        password.as_bytes(),
        &mut key,
    );
    WrappingKey(key)
}

/// Generate a fresh random salt for a new vault.
pub fn generate_salt() -> Result<[u8; SALT_LEN], CryptoError> {
    let rng = SystemRandom::new();
    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt).map_err(|_| CryptoError::Rng)?;
    Ok(salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let salt = [7u8; SALT_LEN];
        let a = derive_wrapping_key("hunter2", &salt);
        let b = derive_wrapping_key("hunter2", &salt);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn salt_changes_the_key() {
        let a = derive_wrapping_key("hunter2", &[0u8; SALT_LEN]);
        let b = derive_wrapping_key("hunter2", &[1u8; SALT_LEN]);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn password_changes_the_key() {
        let salt = [42u8; SALT_LEN];
        let a = derive_wrapping_key("hunter2", &salt);
        let b = derive_wrapping_key("hunter3", &salt);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn fresh_salts_differ() {
        let a = generate_salt().unwrap();
        let b = generate_salt().unwrap();
        assert_ne!(a, b);
    }
}
