//! base64url text encoding for opaque byte fields.
//!
//! Stores only ever see text; every byte field (keys, salt, IV, nonce,
//! signatures) crosses the storage boundary base64url-encoded, no padding.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::error::CryptoError;

pub(crate) fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub(crate) fn decode(label: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| CryptoError::MalformedInput(format!("{label}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let bytes = [0u8, 1, 2, 254, 255];
        assert_eq!(decode("field", &encode(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn bad_encoding_names_the_field() {
        let err = decode("vault salt", "!!not-base64!!").unwrap_err();
        assert!(err.to_string().contains("vault salt"));
    }
}
