//! Base64url helpers shared across the ceremony layer.
//!
//! WebAuthn wire fields (challenges, credential ids, client data) are
//! base64url without padding, but browsers and client libraries are not
//! perfectly consistent, so decoding tolerates padded input.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;

/// Encode bytes as base64url without padding.
pub fn b64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode base64url input, accepting both padded and unpadded forms.
pub fn b64url_decode(input: &str) -> Option<Vec<u8>> {
    let s = input.trim();
    if let Ok(v) = URL_SAFE_NO_PAD.decode(s) {
        return Some(v);
    }
    URL_SAFE.decode(s).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let data = b"\x00\x01\xfe\xff aegis";
        let encoded = b64url_encode(data);
        assert!(!encoded.contains('='));
        assert_eq!(b64url_decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_padded_input_accepted() {
        assert_eq!(b64url_decode("YWJjZA==").unwrap(), b"abcd");
        assert_eq!(b64url_decode("YWJjZA").unwrap(), b"abcd");
    }

    #[test]
    fn test_invalid_input_rejected() {
        assert!(b64url_decode("!!not base64!!").is_none());
    }
}
