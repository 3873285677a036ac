//! JWT validation and actor context extraction.
//!
//! Tokens are issued by the identity subsystem; this service only verifies
//! them (HS256, shared secret) and derives an [`ActorContext`] per request.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::auth::context::{ActorContext, Role};
use crate::types::LaurelError;

/// JWT claims carried by administrative tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Actor identifier
    pub sub: String,
    /// Role strings (unknown roles are dropped)
    #[serde(default)]
    pub roles: Vec<String>,
    /// Institution the actor belongs to
    pub institution_id: String,
    /// Department assignment, when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    /// Expiry (unix seconds)
    pub exp: u64,
    /// Issued at (unix seconds)
    pub iat: u64,
}

/// Validates bearer tokens and produces actor contexts
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Verify a raw token and derive the actor context.
    pub fn verify(&self, token: &str) -> Result<ActorContext, LaurelError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| LaurelError::AuthorizationDenied(format!("invalid token: {}", e)))?;

        Ok(actor_from_claims(data.claims))
    }
}

/// Build an [`ActorContext`] from verified claims.
/// Unknown role strings are ignored rather than rejected.
pub fn actor_from_claims(claims: Claims) -> ActorContext {
    let roles: Vec<Role> = claims
        .roles
        .iter()
        .filter_map(|r| Role::parse(r))
        .collect();

    let mut actor = ActorContext::new(claims.sub, claims.institution_id).with_roles(roles);
    if let Some(dept) = claims.department {
        actor = actor.with_department(dept);
    }
    actor
}

/// Extract the bearer token from an Authorization header value
pub fn extract_token_from_header(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn issue(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims() -> Claims {
        let now = chrono::Utc::now().timestamp() as u64;
        Claims {
            sub: "actor-1".to_string(),
            roles: vec!["INSTITUTION_HEAD".to_string(), "bogus".to_string()],
            institution_id: "inst-a".to_string(),
            department: None,
            exp: now + 3600,
            iat: now,
        }
    }

    #[test]
    fn test_verify_round_trip() {
        let verifier = TokenVerifier::new("test-secret");
        let token = issue(&claims(), "test-secret");

        let actor = verifier.verify(&token).unwrap();
        assert_eq!(actor.actor_id, "actor-1");
        assert_eq!(actor.institution_id, "inst-a");
        // Unknown role string dropped, known one kept
        assert_eq!(actor.roles, vec![Role::InstitutionHead]);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let verifier = TokenVerifier::new("test-secret");
        let token = issue(&claims(), "other-secret");
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let verifier = TokenVerifier::new("test-secret");
        let mut c = claims();
        c.exp = c.iat.saturating_sub(7200);
        c.iat = c.iat.saturating_sub(9000);
        let token = issue(&c, "test-secret");
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_token_from_header("Bearer abc"), Some("abc"));
        assert_eq!(extract_token_from_header("bearer abc"), Some("abc"));
        assert_eq!(extract_token_from_header("Basic abc"), None);
        assert_eq!(extract_token_from_header("Bearer "), None);
    }
}
