//! Challenge nonce generation.

use rand::rngs::OsRng;
use rand::RngCore;

/// Length of a challenge nonce in bytes (256 bits).
pub const NONCE_LEN: usize = 32;

/// Generate a fresh challenge nonce from the operating system CSPRNG.
///
/// Nonces are never derived from time, counters, or any other predictable
/// input.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_length() {
        assert_eq!(generate_nonce().len(), 32);
    }

    #[test]
    fn test_nonces_are_unique() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_ne!(a, b);
    }
}
