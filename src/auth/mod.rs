//! Bearer-token identity and the admin registry check.
//!
//! A [`TokenVerifier`] turns a bearer token into a verified email. The
//! [`AdminGuard`] then requires that email to be present in the `admins`
//! collection, failing closed otherwise.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::models::{collections, AdminRecord};
use crate::store::{DocumentStore, StoreError};

/// Authentication and authorization failures.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("{0} is not an admin")]
    NotAdmin(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Claims read from identity tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl IdentityClaims {
    pub fn for_email(email: &str, expires_in: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            email: Some(email.to_string()),
            email_verified: Some(true),
            sub: None,
            exp: (now + expires_in).timestamp(),
            iat: Some(now.timestamp()),
            iss: None,
            aud: None,
        }
    }
}

/// Verifies a bearer token and yields the principal's email.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<String, AuthError>;
}

/// HS256 JWT verifier.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    validation: Validation,
    issuer: Option<String>,
    audience: Option<String>,
}

impl JwtVerifier {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            encoding_key: EncodingKey::from_secret(secret),
            validation,
            issuer: None,
            audience: None,
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();
        self.validation.set_issuer(&[issuer.as_str()]);
        self.issuer = Some(issuer);
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        let audience = audience.into();
        self.validation.set_audience(&[audience.as_str()]);
        self.validation.validate_aud = true;
        self.audience = Some(audience);
        self
    }

    /// Sign a token for `email` with this verifier's secret and issuer/audience.
    pub fn issue(&self, email: &str, expires_in: chrono::Duration) -> Result<String, AuthError> {
        let mut claims = IdentityClaims::for_email(email, expires_in);
        claims.iss = self.issuer.clone();
        claims.aud = self.audience.clone();
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<String, AuthError> {
        let claims = decode::<IdentityClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        if claims.email_verified == Some(false) {
            return Err(AuthError::InvalidToken("email not verified".to_string()));
        }

        claims
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AuthError::InvalidToken("token has no email claim".to_string()))
    }
}

/// Extract the token from an `Authorization: Bearer ...` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// A verified admin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminPrincipal {
    pub email: String,
}

/// Verifies tokens and checks the admin registry.
#[derive(Clone)]
pub struct AdminGuard {
    verifier: Arc<dyn TokenVerifier>,
    store: DocumentStore,
}

impl AdminGuard {
    pub fn new(verifier: Arc<dyn TokenVerifier>, store: DocumentStore) -> Self {
        Self { verifier, store }
    }

    /// Resolve an `Authorization` header value to an admin principal.
    pub async fn require_admin(
        &self,
        authorization: Option<&str>,
    ) -> Result<AdminPrincipal, AuthError> {
        let token = authorization
            .and_then(bearer_token)
            .ok_or(AuthError::MissingToken)?;

        let email = self.verifier.verify(token).await?;
        let key = AdminRecord::normalize(&email);

        let record: Option<AdminRecord> = self.store.get(collections::ADMINS, &key).await?;
        match record {
            Some(_) => Ok(AdminPrincipal { email: key }),
            None => {
                debug!("Rejected non-admin {}", key);
                Err(AuthError::NotAdmin(key))
            }
        }
    }
}

impl std::fmt::Debug for AdminGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SECRET: &[u8] = b"test-secret-for-khobor";

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("bearer   xyz "), Some("xyz"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc"), None);
    }

    #[tokio::test]
    async fn test_jwt_roundtrip() {
        let verifier = JwtVerifier::new(SECRET);
        let token = verifier
            .issue("Editor@Example.com", chrono::Duration::minutes(5))
            .unwrap();
        assert_eq!(verifier.verify(&token).await.unwrap(), "Editor@Example.com");
    }

    #[tokio::test]
    async fn test_jwt_rejects_wrong_secret_and_expiry() {
        let verifier = JwtVerifier::new(SECRET);
        let other = JwtVerifier::new(b"another-secret");

        let token = other.issue("a@b.c", chrono::Duration::minutes(5)).unwrap();
        assert!(matches!(
            verifier.verify(&token).await,
            Err(AuthError::InvalidToken(_))
        ));

        let expired = verifier
            .issue("a@b.c", chrono::Duration::minutes(-10))
            .unwrap();
        assert!(matches!(
            verifier.verify(&expired).await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_jwt_issuer_mismatch() {
        let verifier = JwtVerifier::new(SECRET).with_issuer("khobor");
        let foreign = JwtVerifier::new(SECRET).with_issuer("someone-else");

        let token = foreign.issue("a@b.c", chrono::Duration::minutes(5)).unwrap();
        assert!(verifier.verify(&token).await.is_err());

        let token = verifier.issue("a@b.c", chrono::Duration::minutes(5)).unwrap();
        assert!(verifier.verify(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_unverified_email_rejected() {
        let verifier = JwtVerifier::new(SECRET);
        let mut claims = IdentityClaims::for_email("a@b.c", chrono::Duration::minutes(5));
        claims.email_verified = Some(false);
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        assert!(verifier.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_admin_guard() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::from_path(&dir.path().join("auth.db"));
        store.init_schema().await.unwrap();
        let admin = AdminRecord::new("Admin@Example.com", None);
        store
            .set(collections::ADMINS, &admin.id, &admin)
            .await
            .unwrap();

        let verifier = Arc::new(JwtVerifier::new(SECRET));
        let guard = AdminGuard::new(verifier.clone(), store);

        let token = verifier
            .issue("admin@example.com", chrono::Duration::minutes(5))
            .unwrap();
        let principal = guard
            .require_admin(Some(&format!("Bearer {}", token)))
            .await
            .unwrap();
        assert_eq!(principal.email, "admin@example.com");

        let outsider = verifier
            .issue("reader@example.com", chrono::Duration::minutes(5))
            .unwrap();
        assert!(matches!(
            guard
                .require_admin(Some(&format!("Bearer {}", outsider)))
                .await,
            Err(AuthError::NotAdmin(_))
        ));

        assert!(matches!(
            guard.require_admin(None).await,
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(
            guard.require_admin(Some("Bearer not-a-jwt")).await,
            Err(AuthError::InvalidToken(_))
        ));
    }
}
