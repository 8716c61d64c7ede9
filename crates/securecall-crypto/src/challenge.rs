//! Challenge-response signature primitives.
//!
//! The target proves possession of their private key by signing a nonce;
//! anyone holding the target's public key can check the proof. Signing and
//! verification share one set of RSA-PSS parameters (SHA-256, 32-byte PSS
//! salt) — a mismatch would surface as a spurious false rejection, which
//! is why both paths read the same constants and the vault record carries
//! a scheme version tag.

use rsa::pkcs8::DecodePublicKey;
use rsa::{Pss, RsaPublicKey};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

use crate::encoding::{decode, encode};
use crate::error::CryptoError;
use crate::vault::PrivateKeyHandle;

/// Nonce entropy in bytes. 256 bits: guessing is infeasible and collision
/// across concurrent challenges negligible.
pub const NONCE_LEN: usize = 32;

/// PSS salt length, in bytes. Must match between sign and verify.
pub const PSS_SALT_LEN: usize = 32;

fn pss() -> Pss {
    Pss::new_with_salt::<Sha256>(PSS_SALT_LEN)
}

/// Generate a fresh challenge nonce as base64url text.
pub fn generate_nonce() -> Result<String, CryptoError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; NONCE_LEN];
    rng.fill(&mut bytes).map_err(|_| CryptoError::Rng)?;
    Ok(encode(&bytes))
}

/// Sign a nonce with an unwrapped private key. Returns the signature as
/// base64url text.
pub fn sign_challenge(handle: &PrivateKeyHandle, nonce: &str) -> Result<String, CryptoError> {
    let digest = Sha256::digest(nonce.as_bytes());
    let mut rng = rand::rngs::OsRng;
    let signature = handle
        .key()
        .sign_with_rng(&mut rng, pss(), &digest)
        .map_err(|e| CryptoError::Signing(e.to_string()))?;
    Ok(encode(&signature))
}

/// Verify a signature over a nonce against a public key in its canonical
/// text form.
///
/// Returns `Ok(false)` for any cryptographically invalid signature; fails
/// only on malformed encodings (bad base64, bad SPKI DER).
pub fn verify_challenge(
    public_key_b64: &str,
    signature_b64: &str,
    nonce: &str,
) -> Result<bool, CryptoError> {
    let public_der = decode("public key", public_key_b64)?;
    let public_key = RsaPublicKey::from_public_key_der(&public_der)
        .map_err(|e| CryptoError::MalformedInput(format!("spki: {e}")))?;
    let signature = decode("signature", signature_b64)?;

    let digest = Sha256::digest(nonce.as_bytes());
    Ok(public_key.verify(pss(), &digest, &signature).is_ok())
}
