use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Policy rejection at the vault layer; the derivation function itself
    /// accepts any password.
    #[error("empty password rejected")]
    EmptyPassword,

    /// Authenticated decryption of the vault failed. Wrong password and
    /// corrupted/tampered ciphertext are indistinguishable here on purpose:
    /// the GCM tag is the only password check, so no oracle separates the
    /// two cases.
    #[error("vault unlock failed: incorrect password or corrupted vault")]
    VaultUnlock,

    /// Bad encoding: base64, DER, or a salt/IV of the wrong length.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The vault record carries a scheme version this build does not
    /// implement.
    #[error("unsupported vault version {0}")]
    UnsupportedVaultVersion(u16),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("signing failed: {0}")]
    Signing(String),

    /// System randomness unavailable.
    #[error("RNG failure")]
    Rng,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlock_failure_message_does_not_distinguish_causes() {
        // The user-facing message must read identically for wrong password
        // and tampered vault.
        let msg = CryptoError::VaultUnlock.to_string();
        assert!(msg.contains("incorrect password or corrupted vault"));
    }

    #[test]
    fn unsupported_version_display() {
        let msg = CryptoError::UnsupportedVaultVersion(7).to_string();
        assert!(msg.contains('7'));
    }
}
