use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// PKCE verifier/challenge pair for the S256 method.
pub struct PkceCodes {
    pub verifier: String,
    pub challenge: String,
}

/// Generate a verifier from 64 random bytes (86 base64url chars, inside the
/// 43-128 range required by OAuth 2.1) and its SHA-256 challenge, both
/// base64url-encoded without padding.
pub fn generate_pkce() -> PkceCodes {
    let mut verifier_bytes = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut verifier_bytes);
    let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

    let digest = Sha256::digest(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(digest);

    PkceCodes {
        verifier,
        challenge,
    }
}

/// Random `state` parameter binding the callback to this login attempt.
pub fn random_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_is_sha256_of_verifier() {
        let codes = generate_pkce();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(codes.verifier.as_bytes()));
        assert_eq!(codes.challenge, expected);
    }

    #[test]
    fn verifier_length_within_oauth_bounds() {
        let codes = generate_pkce();
        assert!((43..=128).contains(&codes.verifier.len()));
        // No padding characters in either value.
        assert!(!codes.verifier.contains('='));
        assert!(!codes.challenge.contains('='));
    }

    #[test]
    fn generations_are_unique() {
        let a = generate_pkce();
        let b = generate_pkce();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(random_state(), random_state());
    }
}
