//! Authentication and authorization
//!
//! Everything that turns a presented credential into a local user: API keys,
//! locally issued JWTs, federated OIDC tokens with a userinfo fallback, the
//! PKCE code flow, refresh rotation, and the OAuth handoff. The extractors in
//! [`extract`] are the admission points the routers use.

use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};

use crate::error::AppError;

pub mod extract;
pub mod jwt;
pub mod keys;
pub mod oidc;
pub mod orchestrator;

pub use extract::{admin_auth_middleware, RequireAdmin};
pub use jwt::JwtManager;
pub use keys::ApiKeyService;
pub use oidc::{OidcClaims, OidcError, OidcVerifier};
pub use orchestrator::HandoffStore;

/// Hex-encoded SHA-256, the length-independent hash used for tokens and
/// codes (never for API keys, which get argon2).
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Base64url (unpadded) SHA-256, the PKCE S256 transformation.
pub fn base64url_sha256(input: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(Sha256::digest(input.as_bytes()))
}

/// 32 bytes of fresh randomness, URL-safe base64 encoded. The shape of API
/// keys, authorization codes, refresh tokens, and handoff tokens.
pub fn random_token() -> Result<String, AppError> {
    let mut bytes = [0u8; 32];
    getrandom::fill(&mut bytes)
        .map_err(|e| AppError::internal(format!("failed to gather randomness: {e}")))?;

    Ok(general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_base64url_sha256_matches_rfc7636_appendix() {
        // RFC 7636 appendix B test vector.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            base64url_sha256(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_random_token_shape() {
        let token = random_token().unwrap();
        // 32 bytes base64url without padding.
        assert_eq!(token.len(), 43);
        assert!(!token.contains('='));
        assert_ne!(token, random_token().unwrap());
    }
}
