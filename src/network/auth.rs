//! JWT Authentication
//!
//! Validates bearer tokens from the external identity provider. The server
//! never issues tokens. A valid token's `sub` claim becomes the [`UserId`]
//! every engine call runs under.

use std::collections::HashSet;

use chrono::Utc;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::ids::UserId;

/// Identity provider settings.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Expected `iss`. Any issuer when unset.
    pub issuer: Option<String>,
    /// Expected `aud`. Audience is not checked when unset.
    pub audience: Option<String>,
    /// RS256 public key (PEM). Takes precedence over `secret`.
    pub public_key_pem: Option<String>,
    /// HS256 shared secret.
    pub secret: Option<String>,
    /// Clock skew tolerated on `exp`, in seconds.
    pub leeway_seconds: u64,
    /// Reject tokens that carry no `exp`.
    pub require_exp: bool,
    /// Skip expiry checks. Local testing only.
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Read `AUTH_ISSUER`, `AUTH_AUDIENCE`, `AUTH_PUBLIC_KEY_PEM`,
    /// `AUTH_SECRET`, `AUTH_LEEWAY_SECONDS`, `AUTH_REQUIRE_EXP` and
    /// `AUTH_SKIP_EXPIRY`. `exp` is required by default once an issuer is set.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let flag = |v: String| v == "true" || v == "1";
        let issuer = var("AUTH_ISSUER");
        Self {
            require_exp: var("AUTH_REQUIRE_EXP").map(flag).unwrap_or(issuer.is_some()),
            issuer,
            audience: var("AUTH_AUDIENCE"),
            public_key_pem: var("AUTH_PUBLIC_KEY_PEM"),
            secret: var("AUTH_SECRET"),
            leeway_seconds: var("AUTH_LEEWAY_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            skip_expiry: var("AUTH_SKIP_EXPIRY").map(flag).unwrap_or(false),
        }
    }

    /// Whether a verification key is present.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.required_spec_claims = HashSet::new();
        validation.leeway = self.leeway_seconds;
        validation.validate_exp = !self.skip_expiry;
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        validation
    }
}

/// Claims read from provider tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Provider user id.
    pub sub: String,
    /// Expiry (Unix seconds). 0 when absent.
    #[serde(default)]
    pub exp: u64,
    /// Issued at (Unix seconds).
    #[serde(default)]
    pub iat: u64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience, string or array.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// Engine identity for this subject.
    pub fn user_id(&self) -> UserId {
        UserId::from_subject(&self.sub)
    }
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No verification key configured.
    #[error("authentication not configured")]
    NotConfigured,
    /// Not a well-formed JWT.
    #[error("invalid token format")]
    InvalidFormat,
    /// Signature did not verify.
    #[error("invalid signature")]
    InvalidSignature,
    /// Past `exp`.
    #[error("token expired")]
    Expired,
    /// `iss` mismatch.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// `aud` mismatch.
    #[error("invalid audience")]
    InvalidAudience,
    /// A required claim is missing or empty.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Key or payload could not be decoded.
    #[error("decode error: {0}")]
    DecodeError(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
            ErrorKind::InvalidAudience => AuthError::InvalidAudience,
            ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
            _ => AuthError::DecodeError(err.to_string()),
        }
    }
}

/// Verify `token` and return its claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    let (key, algorithm) = match (&config.public_key_pem, &config.secret) {
        (Some(pem), _) => {
            let key = DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|e| AuthError::DecodeError(format!("invalid public key: {}", e)))?;
            (key, Algorithm::RS256)
        }
        (None, Some(secret)) => (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256),
        (None, None) => return Err(AuthError::NotConfigured),
    };

    let claims = decode::<TokenClaims>(token, &key, &config.validation(algorithm))?.claims;

    if claims.sub.is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }

    if config.require_exp && !config.skip_expiry && claims.exp == 0 {
        return Err(AuthError::MissingClaim("exp".into()));
    }

    // The library skips exp when the claim is absent; a present exp is
    // re-checked against the server clock.
    if !config.skip_expiry && claims.exp > 0 {
        let now = Utc::now().timestamp().max(0) as u64;
        if now > claims.exp.saturating_add(config.leeway_seconds) {
            return Err(AuthError::Expired);
        }
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "fieldquest-test-secret-0123456789";

    fn sign(claims: &TokenClaims, secret: &str) -> String {
        encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn claims() -> TokenClaims {
        let now = Utc::now().timestamp() as u64;
        TokenClaims {
            sub: "provider|ranger-42".into(),
            exp: now + 3600,
            iat: now,
            iss: Some("https://id.fieldquest.test".into()),
            aud: Some(serde_json::json!("fieldquest")),
        }
    }

    fn config() -> AuthConfig {
        AuthConfig { secret: Some(SECRET.into()), ..Default::default() }
    }

    #[test]
    fn test_valid_token() {
        let token = sign(&claims(), SECRET);
        let validated = validate_token(&token, &config()).unwrap();
        assert_eq!(validated.sub, "provider|ranger-42");
        assert_eq!(validated.user_id(), UserId::from_subject("provider|ranger-42"));
    }

    #[test]
    fn test_expired_token() {
        let mut expired = claims();
        expired.exp = 1;
        let token = sign(&expired, SECRET);
        assert!(matches!(validate_token(&token, &config()), Err(AuthError::Expired)));

        let lenient = AuthConfig { skip_expiry: true, ..config() };
        assert!(validate_token(&token, &lenient).is_ok());
    }

    #[test]
    fn test_missing_exp_only_rejected_when_required() {
        let mut open_ended = claims();
        open_ended.exp = 0;
        let token = sign(&open_ended, SECRET);
        assert!(validate_token(&token, &config()).is_ok());

        let strict = AuthConfig { require_exp: true, ..config() };
        assert!(matches!(validate_token(&token, &strict), Err(AuthError::MissingClaim(c)) if c == "exp"));
        assert!(validate_token(&sign(&claims(), SECRET), &strict).is_ok());
    }

    #[test]
    fn test_wrong_secret() {
        let token = sign(&claims(), "some-other-secret-0123456789abc");
        assert!(matches!(validate_token(&token, &config()), Err(AuthError::InvalidSignature)));
    }

    #[test]
    fn test_empty_subject() {
        let mut anonymous = claims();
        anonymous.sub.clear();
        let token = sign(&anonymous, SECRET);
        assert!(matches!(validate_token(&token, &config()), Err(AuthError::MissingClaim(c)) if c == "sub"));
    }

    #[test]
    fn test_issuer_and_audience() {
        let token = sign(&claims(), SECRET);

        let issuer = AuthConfig { issuer: Some("https://elsewhere.test".into()), ..config() };
        assert!(matches!(validate_token(&token, &issuer), Err(AuthError::InvalidIssuer)));

        let audience = AuthConfig { audience: Some("other-app".into()), ..config() };
        assert!(matches!(validate_token(&token, &audience), Err(AuthError::InvalidAudience)));

        let both = AuthConfig {
            issuer: Some("https://id.fieldquest.test".into()),
            audience: Some("fieldquest".into()),
            ..config()
        };
        assert!(validate_token(&token, &both).is_ok());
    }

    #[test]
    fn test_garbage_token() {
        assert!(matches!(validate_token("not-a-jwt", &config()), Err(AuthError::InvalidFormat)));
    }

    #[test]
    fn test_not_configured() {
        assert!(matches!(
            validate_token("a.b.c", &AuthConfig::default()),
            Err(AuthError::NotConfigured)
        ));
    }

    #[test]
    fn test_user_id_is_stable_per_subject() {
        let a = claims();
        let b = TokenClaims { sub: "provider|ranger-43".into(), ..claims() };
        assert_eq!(a.user_id(), claims().user_id());
        assert_ne!(a.user_id(), b.user_id());
    }
}
