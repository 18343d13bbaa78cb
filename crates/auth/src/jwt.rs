//! HS256 bearer token validation.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use crate::claims::{JwtClaims, TokenValidationError, validate_claims};

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("malformed or badly signed token: {0}")]
    Decode(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Claims(#[from] TokenValidationError),
}

/// Turns a raw bearer token into verified claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, JwtError>;
}

/// Shared-secret (HS256) validator.
///
/// The time window is checked by [`validate_claims`] against `issued_at` /
/// `expires_at`; the registered `exp` claim is not required.
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, JwtError> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.key, &self.validation)?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

/// Sign claims with a shared secret. Used by tooling and tests to mint tokens.
pub fn sign_hs256(claims: &JwtClaims, secret: impl AsRef<[u8]>) -> Result<String, JwtError> {
    Ok(jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use shopledger_core::{OrganizationId, UserId};

    use crate::Role;

    fn claims() -> JwtClaims {
        let now = Utc::now();
        JwtClaims {
            sub: UserId::new(),
            organization_id: OrganizationId::new(),
            roles: vec![Role::new("manager")],
            issued_at: now - Duration::seconds(5),
            expires_at: now + Duration::minutes(5),
        }
    }

    #[test]
    fn round_trips_a_signed_token() {
        let c = claims();
        let token = sign_hs256(&c, "secret").unwrap();
        let validated = Hs256JwtValidator::new("secret").validate(&token, Utc::now()).unwrap();
        assert_eq!(validated, c);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = sign_hs256(&claims(), "secret").unwrap();
        let err = Hs256JwtValidator::new("other").validate(&token, Utc::now()).unwrap_err();
        assert!(matches!(err, JwtError::Decode(_)));
    }

    #[test]
    fn expired_claims_are_rejected_after_signature_check() {
        let c = claims();
        let token = sign_hs256(&c, "secret").unwrap();
        let later = c.expires_at + Duration::seconds(1);
        let err = Hs256JwtValidator::new("secret").validate(&token, later).unwrap_err();
        assert!(matches!(err, JwtError::Claims(TokenValidationError::Expired)));
    }
}
