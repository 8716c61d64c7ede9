//! The identity vault codec.
//!
//! `create_vault` generates a fresh RSA-2048 signing keypair, derives a
//! wrapping key from the password (see [`crate::kdf`]), and seals the
//! PKCS#8-serialized private key with AES-256-GCM under a fresh 12-byte IV.
//! `unlock_vault` reverses the process. The GCM authentication tag is the
//! only password check: a wrong password and a tampered vault fail the
//! same way, so no oracle distinguishes them.
//!
//! Both functions are pure transformers over the supplied data — no
//! storage, no network. There is no recovery path: without the password
//! the wrapped key is unrecoverable.

use std::fmt;

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use rsa::RsaPrivateKey;
use tracing::{debug, warn};
use zeroize::Zeroize;

use securecall_protocol::records::{VaultRecord, VAULT_VERSION};

use crate::encoding::{decode, encode};
use crate::error::CryptoError;
use crate::kdf::{derive_wrapping_key, generate_salt, SALT_LEN};

/// AES-GCM initialization vector length.
pub const IV_LEN: usize = 12;
/// RSA modulus size. Fixed by vault scheme version 1.
pub const RSA_BITS: usize = 2048;

/// In-memory handle to an unwrapped private key.
///
/// Only obtainable from `create_vault` or a successful `unlock_vault`;
/// it cannot be reconstructed later without the password. The underlying
/// key material is zeroized on drop.
pub struct PrivateKeyHandle {
    key: RsaPrivateKey,
}

impl PrivateKeyHandle {
    pub(crate) fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    pub(crate) fn key(&self) -> &RsaPrivateKey {
        &self.key
    }

    /// The matching public key in its canonical text form, for publishing
    /// or local verification.
    pub fn public_key_b64(&self) -> Result<String, CryptoError> {
        let der = self
            .key
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(encode(der.as_bytes()))
    }
}

impl fmt::Debug for PrivateKeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKeyHandle(..)")
    }
}

/// Result of vault creation: the record to persist plus the unwrapped key
/// for immediate local use.
#[derive(Debug)]
pub struct CreatedVault {
    pub record: VaultRecord,
    pub private_key: PrivateKeyHandle,
}

/// Create a fresh vault from a password.
///
/// Rejects the empty password here — the derivation function below is
/// policy-free, and registration flows are outside this crate, so the
/// vault layer is where the rule lives.
pub fn create_vault(password: &str) -> Result<CreatedVault, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::EmptyPassword);
    }

    let mut rng = rand::rngs::OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, RSA_BITS)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

    let public_der = private_key
        .to_public_key()
        .to_public_key_der()
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

    let salt = generate_salt()?;
    let wrapping_key = derive_wrapping_key(password, &salt);

    let iv = generate_iv()?;

    // Serialize to PKCS#8 and seal in place; the buffer holds plaintext
    // key material only until the seal call rewrites it.
    let pkcs8 = private_key
        .to_pkcs8_der()
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    let mut sealed = pkcs8.as_bytes().to_vec();

    let sealing_key = LessSafeKey::new(
        UnboundKey::new(&AES_256_GCM, wrapping_key.as_bytes()).expect("valid key length"),
    );
    sealing_key
        .seal_in_place_append_tag(Nonce::assume_unique_for_key(iv), Aad::empty(), &mut sealed)
        .map_err(|_| CryptoError::KeyGeneration("vault sealing failed".into()))?;

    let record = VaultRecord {
        version: VAULT_VERSION,
        public_key: encode(public_der.as_bytes()),
        wrapped_private_key: encode(&sealed),
        salt: encode(&salt),
        iv: encode(&iv),
    };
    debug!(version = VAULT_VERSION, "vault sealed");

    Ok(CreatedVault {
        record,
        private_key: PrivateKeyHandle::new(private_key),
    })
}

/// Unlock a vault with the supplied password.
///
/// Fails with [`CryptoError::VaultUnlock`] whenever the authentication tag
/// does not verify: wrong password, corrupted or tampered ciphertext, or a
/// mismatched salt/IV all land here indistinguishably.
pub fn unlock_vault(password: &str, record: &VaultRecord) -> Result<PrivateKeyHandle, CryptoError> {
    if record.version != VAULT_VERSION {
        return Err(CryptoError::UnsupportedVaultVersion(record.version));
    }

    let salt: [u8; SALT_LEN] = decode("vault salt", &record.salt)?
        .try_into()
        .map_err(|_| CryptoError::MalformedInput("vault salt length".into()))?;
    let iv: [u8; IV_LEN] = decode("vault iv", &record.iv)?
        .try_into()
        .map_err(|_| CryptoError::MalformedInput("vault iv length".into()))?;
    let mut ciphertext = decode("wrapped private key", &record.wrapped_private_key)?;

    let wrapping_key = derive_wrapping_key(password, &salt);
    let opening_key = LessSafeKey::new(
        UnboundKey::new(&AES_256_GCM, wrapping_key.as_bytes()).expect("valid key length"),
    );

    let plaintext = opening_key
        .open_in_place(Nonce::assume_unique_for_key(iv), Aad::empty(), &mut ciphertext)
        .map_err(|_| {
            warn!("vault authentication tag mismatch");
            CryptoError::VaultUnlock
        })?;

    // The tag verified, so the bytes are authentic; a parse failure here
    // means a record produced by something other than create_vault.
    let private_key = RsaPrivateKey::from_pkcs8_der(plaintext)
        .map_err(|e| CryptoError::MalformedInput(format!("pkcs8: {e}")))?;

    ciphertext.zeroize();

    Ok(PrivateKeyHandle::new(private_key))
}

fn generate_iv() -> Result<[u8; IV_LEN], CryptoError> {
    let rng = SystemRandom::new();
    let mut iv = [0u8; IV_LEN];
    rng.fill(&mut iv).map_err(|_| CryptoError::Rng)?;
    Ok(iv)
}
