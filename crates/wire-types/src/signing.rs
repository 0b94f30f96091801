//! SHA-256 + HMAC-SHA-512 signing primitives shared by the REST client and
//! the WebSocket challenge-response handshake (spec §4.4).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("api secret is not valid base64: {0}")]
    InvalidSecret(#[from] base64::DecodeError),
    #[error("hmac key of any length should be accepted by HMAC-SHA512")]
    InvalidKeyLength,
}

/// `base64_decode(secret)` then `HMAC-SHA512(key, SHA256(message))`,
/// base64-encoded. Used both for the REST `Authent` header and the
/// WebSocket `signed_challenge` value.
pub fn sign(secret_b64: &str, message: &[u8]) -> Result<String, SigningError> {
    let key = STANDARD.decode(secret_b64)?;
    let hashed = Sha256::digest(message);
    let mut mac =
        HmacSha512::new_from_slice(&key).map_err(|_| SigningError::InvalidKeyLength)?;
    mac.update(&hashed);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// REST signature input: `postData || nonce || endpointPath`, per §4.4.
pub fn rest_signature(
    secret_b64: &str,
    post_data: &str,
    nonce: &str,
    endpoint_path: &str,
) -> Result<String, SigningError> {
    let message = format!("{post_data}{nonce}{endpoint_path}");
    sign(secret_b64, message.as_bytes())
}

/// WebSocket challenge signature: signs the raw challenge string.
pub fn challenge_signature(secret_b64: &str, challenge: &str) -> Result<String, SigningError> {
    sign(secret_b64, challenge.as_bytes())
}

/// A monotonically non-decreasing nonce source. Using the current
/// millisecond timestamp is acceptable per spec; this type also tolerates
/// a clock that doesn't advance between calls by bumping by 1.
#[derive(Debug, Default)]
pub struct NonceGenerator {
    last: u64,
}

impl NonceGenerator {
    pub fn new() -> Self {
        Self { last: 0 }
    }

    pub fn next(&mut self, now_millis: u64) -> u64 {
        let candidate = if now_millis > self.last {
            now_millis
        } else {
            self.last + 1
        };
        self.last = candidate;
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn signs_deterministically() {
        let secret = STANDARD.encode(b"super-secret-key-material");
        let sig1 = sign(&secret, b"hello").unwrap();
        let sig2 = sign(&secret, b"hello").unwrap();
        assert_eq!(sig1, sig2);
    }

    #[test]
    fn different_messages_sign_differently() {
        let secret = STANDARD.encode(b"super-secret-key-material");
        let sig1 = sign(&secret, b"hello").unwrap();
        let sig2 = sign(&secret, b"world").unwrap();
        assert_ne!(sig1, sig2);
    }

    #[test]
    fn rejects_non_base64_secret() {
        let err = sign("not base64!!", b"hello").unwrap_err();
        assert!(matches!(err, SigningError::InvalidSecret(_)));
    }

    #[test]
    fn nonce_is_monotonic_even_if_clock_stalls() {
        let mut gen = NonceGenerator::new();
        let a = gen.next(1000);
        let b = gen.next(1000);
        let c = gen.next(999);
        assert!(b > a);
        assert!(c > b);
    }

    proptest! {
        // Nonces must be strictly increasing no matter how the wall clock
        // jumps or stalls between calls.
        #[test]
        fn nonce_sequence_is_always_strictly_increasing(clocks in prop::collection::vec(0u64..10_000_000, 1..50)) {
            let mut gen = NonceGenerator::new();
            let mut previous = 0u64;
            for clock in clocks {
                let nonce = gen.next(clock);
                prop_assert!(nonce > previous);
                previous = nonce;
            }
        }
    }
}
