//! Bearer-credential verification for the connection handshake.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::ConnectError;

use super::cache::EphemeralCache;

/// How long a resolved identity stays cached. Purely a performance
/// optimization for reconnect storms; a miss falls back to full verification.
const IDENTITY_CACHE_TTL: Duration = Duration::from_secs(60);
const IDENTITY_CACHE_CAPACITY: usize = 1024;

/// Identity resolved from a verified credential.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    /// The raw claim set, for collaborators that need more than the user id.
    pub claims: Value,
}

/// Verifies HS256 bearer credentials and resolves them to an [`Identity`].
pub struct TokenVerifier {
    decoding: DecodingKey,
    validation: Validation,
    cache: EphemeralCache<Identity>,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            cache: EphemeralCache::new(IDENTITY_CACHE_CAPACITY, IDENTITY_CACHE_TTL),
        }
    }

    /// Verify a credential extracted from the handshake.
    ///
    /// Absence or malformed input is an immediate rejection; there are no
    /// anonymous connections.
    pub fn verify(&self, credential: Option<&str>) -> Result<Identity, ConnectError> {
        let credential = credential
            .filter(|c| !c.is_empty())
            .ok_or(ConnectError::MissingCredential)?;

        let cache_key = credential_hash(credential);
        if let Some(identity) = self.cache.get(&cache_key) {
            return Ok(identity);
        }

        let token_data = jsonwebtoken::decode::<Value>(credential, &self.decoding, &self.validation)
            .map_err(|e| {
                tracing::debug!(?e, "credential rejected");
                ConnectError::InvalidCredential
            })?;

        let user_id = token_data
            .claims
            .get("sub")
            .and_then(Value::as_str)
            .ok_or(ConnectError::InvalidCredential)?
            .to_string();

        let identity = Identity {
            user_id,
            claims: token_data.claims,
        };
        self.cache.insert(cache_key, identity.clone());
        Ok(identity)
    }

    /// Remove expired cache entries. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }
}

/// Cache key for a credential: the credential itself never leaves this module.
fn credential_hash(credential: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(credential.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn mint(sub: Option<&str>, exp_offset_secs: i64) -> String {
        let exp = chrono::Utc::now().timestamp() + exp_offset_secs;
        let claims = match sub {
            Some(sub) => serde_json::json!({ "sub": sub, "exp": exp }),
            None => serde_json::json!({ "exp": exp }),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn verify_resolves_user_id_and_claims() {
        let verifier = TokenVerifier::new(SECRET);
        let token = mint(Some("u1"), 300);
        let identity = verifier.verify(Some(&token)).unwrap();
        assert_eq!(identity.user_id, "u1");
        assert_eq!(identity.claims["sub"], "u1");
    }

    #[test]
    fn missing_credential_is_rejected() {
        let verifier = TokenVerifier::new(SECRET);
        let err = verifier.verify(None).unwrap_err();
        assert_eq!(err, ConnectError::MissingCredential);
    }

    #[test]
    fn empty_credential_is_rejected() {
        let verifier = TokenVerifier::new(SECRET);
        let err = verifier.verify(Some("")).unwrap_err();
        assert_eq!(err, ConnectError::MissingCredential);
    }

    #[test]
    fn bad_signature_is_rejected() {
        let verifier = TokenVerifier::new("a-different-secret");
        let token = mint(Some("u1"), 300);
        let err = verifier.verify(Some(&token)).unwrap_err();
        assert_eq!(err, ConnectError::InvalidCredential);
    }

    #[test]
    fn expired_credential_is_rejected() {
        let verifier = TokenVerifier::new(SECRET);
        // Well past the default validation leeway.
        let token = mint(Some("u1"), -3600);
        let err = verifier.verify(Some(&token)).unwrap_err();
        assert_eq!(err, ConnectError::InvalidCredential);
    }

    #[test]
    fn credential_without_subject_is_rejected() {
        let verifier = TokenVerifier::new(SECRET);
        let token = mint(None, 300);
        let err = verifier.verify(Some(&token)).unwrap_err();
        assert_eq!(err, ConnectError::InvalidCredential);
    }

    #[test]
    fn repeated_verification_hits_the_cache() {
        let verifier = TokenVerifier::new(SECRET);
        let token = mint(Some("u1"), 300);

        verifier.verify(Some(&token)).unwrap();
        assert_eq!(verifier.cache.len(), 1);

        // Second call resolves the same identity from cache.
        let identity = verifier.verify(Some(&token)).unwrap();
        assert_eq!(identity.user_id, "u1");
        assert_eq!(verifier.cache.len(), 1);
    }
}
