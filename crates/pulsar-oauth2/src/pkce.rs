//! PKCE (Proof Key for Code Exchange) per RFC 7636, and CSRF state values
//!
//! The verifier stays with the client; the challenge travels with the
//! authorization request so that the server can check the later token
//! exchange came from the same party. Both the verifier and the state are
//! 32 random bytes, URL-safe base64 without padding (43 characters).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

/// The only challenge method this client produces.
pub const CHALLENGE_METHOD_S256: &str = "S256";

/// Number of random bytes behind verifiers and state values.
const RANDOM_BYTES: usize = 32;

/// A PKCE verifier with its derived S256 challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub verifier: String,
    pub code: String,
    pub method: &'static str,
}

impl Challenge {
    /// Generate a fresh random verifier and its challenge.
    ///
    /// Panics if the operating system cannot provide secure randomness.
    pub fn generate() -> Self {
        Self::from_verifier(random_url_safe())
    }

    /// Derive the challenge for a known verifier.
    pub fn from_verifier(verifier: String) -> Self {
        let code = compute_challenge(&verifier);
        Self {
            verifier,
            code,
            method: CHALLENGE_METHOD_S256,
        }
    }
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Random opaque value for the `state` parameter of an authorization request.
pub fn state() -> String {
    random_url_safe()
}

fn random_url_safe() -> String {
    let mut bytes = [0u8; RANDOM_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
