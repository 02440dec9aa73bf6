// ABOUTME: Bearer-token authentication with shared-secret HS256 JWTs
// ABOUTME: Issues, refreshes, and validates tokens carrying tenant and cross-tenant claims
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::config::CredentialSeed;
use crate::errors::{AppError, AppResult};

/// Role granting access to every tenant
pub const SYSTEM_ADMINISTRATOR_ROLE: &str = "SystemAdministrator";
/// Value of the `cross_tenant_access` claim granting access to every tenant
pub const CROSS_TENANT_ALL: &str = "all";

/// Authenticated principal claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Home tenant of the principal
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Granted roles
    #[serde(default)]
    pub roles: Vec<String>,
    /// Additional tenants this principal may act on; accepts a single string
    /// or an array on the wire
    #[serde(
        default,
        rename = "accessible_tenant",
        deserialize_with = "one_or_many"
    )]
    pub accessible_tenants: Vec<String>,
    /// `all` grants access to every tenant
    #[serde(default)]
    pub cross_tenant_access: Option<String>,
    /// Session id carried into the correlation context
    #[serde(default)]
    pub session_id: Option<String>,
    /// Expiry (unix seconds)
    pub exp: i64,
    /// Issued-at (unix seconds)
    pub iat: i64,
}

impl Claims {
    /// Whether this principal carries the given role
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(v) => vec![v],
        OneOrMany::Many(v) => v,
    })
}

/// Successful login/refresh payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Signed bearer token
    pub access_token: String,
    /// Always `Bearer`
    pub token_type: String,
    /// Seconds until expiry
    pub expires_in: u64,
    /// User id the token was issued to
    pub user_id: String,
    /// Home tenant of the token
    pub tenant_id: String,
}

/// Shared-secret JWT issuance and validation
pub struct AuthManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    token_ttl_secs: u64,
    credentials: Vec<CredentialSeed>,
}

impl AuthManager {
    /// Build a manager around the shared secret
    #[must_use]
    pub fn new(secret: &str, token_ttl_secs: u64, credentials: Vec<CredentialSeed>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            token_ttl_secs,
            credentials,
        }
    }

    /// Issue a token for a principal.
    ///
    /// # Errors
    /// Returns `Internal` when signing fails.
    pub fn issue_token(
        &self,
        user_id: &str,
        tenant_id: &str,
        roles: Vec<String>,
        session_id: Option<String>,
    ) -> AppResult<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_owned(),
            tenant_id: Some(tenant_id.to_owned()),
            roles,
            accessible_tenants: Vec::new(),
            cross_tenant_access: None,
            session_id,
            exp: now + i64::try_from(self.token_ttl_secs).unwrap_or(3600),
            iat: now,
        };
        self.sign(&claims)
    }

    /// Sign arbitrary claims (tests and refresh use this directly).
    ///
    /// # Errors
    /// Returns `Internal` when signing fails.
    pub fn sign(&self, claims: &Claims) -> AppResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AppError::internal(format!("failed to sign token: {e}")))
    }

    /// Validate a bearer token and return its claims.
    ///
    /// # Errors
    /// Returns `Unauthenticated` on any signature, expiry, or format failure.
    pub fn validate_token(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AppError::unauthenticated(format!("invalid token: {e}")))
    }

    /// Authenticate a seeded credential and issue a token.
    ///
    /// # Errors
    /// Returns `Unauthenticated` on unknown user or wrong password.
    pub fn login(&self, username: &str, password: &str) -> AppResult<TokenResponse> {
        let seed = self
            .credentials
            .iter()
            .find(|c| c.username == username && c.password == password)
            .ok_or_else(|| AppError::unauthenticated("invalid credentials"))?;
        let session_id = Uuid::new_v4().to_string();
        let token = self.issue_token(
            &seed.user_id,
            &seed.tenant_id,
            seed.roles.clone(),
            Some(session_id),
        )?;
        Ok(TokenResponse {
            access_token: token,
            token_type: "Bearer".to_owned(),
            expires_in: self.token_ttl_secs,
            user_id: seed.user_id.clone(),
            tenant_id: seed.tenant_id.clone(),
        })
    }

    /// Re-issue a still-valid token with a fresh expiry.
    ///
    /// # Errors
    /// Returns `Unauthenticated` when the presented token is invalid.
    pub fn refresh(&self, token: &str) -> AppResult<TokenResponse> {
        let mut claims = self.validate_token(token)?;
        let now = Utc::now().timestamp();
        claims.iat = now;
        claims.exp = now + i64::try_from(self.token_ttl_secs).unwrap_or(3600);
        let tenant_id = claims.tenant_id.clone().unwrap_or_default();
        let user_id = claims.sub.clone();
        let access_token = self.sign(&claims)?;
        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_owned(),
            expires_in: self.token_ttl_secs,
            user_id,
            tenant_id,
        })
    }
}

/// Extract the bearer token from an `Authorization` header value
#[must_use]
pub fn bearer_token(header_value: &str) -> Option<&str> {
    header_value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn manager() -> AuthManager {
        AuthManager::new(
            "unit-secret",
            3600,
            vec![CredentialSeed {
                username: "alice".to_owned(),
                password: "wonder".to_owned(),
                user_id: "u-alice".to_owned(),
                tenant_id: "t1".to_owned(),
                roles: vec!["Member".to_owned()],
            }],
        )
    }

    #[test]
    fn issue_and_validate_round_trip() {
        let auth = manager();
        let token = auth
            .issue_token("u1", "t1", vec!["Member".to_owned()], None)
            .unwrap();
        let claims = auth.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.tenant_id.as_deref(), Some("t1"));
        assert!(claims.has_role("Member"));
    }

    #[test]
    fn wrong_secret_rejected() {
        let auth = manager();
        let other = AuthManager::new("other-secret", 3600, Vec::new());
        let token = auth.issue_token("u1", "t1", Vec::new(), None).unwrap();
        assert!(matches!(
            other.validate_token(&token),
            Err(AppError::Unauthenticated(_))
        ));
    }

    #[test]
    fn login_checks_credentials() {
        let auth = manager();
        assert!(auth.login("alice", "wonder").is_ok());
        assert!(auth.login("alice", "nope").is_err());
        assert!(auth.login("bob", "wonder").is_err());
    }

    #[test]
    fn refresh_extends_expiry() {
        let auth = manager();
        let first = auth.login("alice", "wonder").unwrap();
        let refreshed = auth.refresh(&first.access_token).unwrap();
        let claims = auth.validate_token(&refreshed.access_token).unwrap();
        assert_eq!(claims.sub, "u-alice");
    }

    #[test]
    fn accessible_tenant_accepts_string_or_array() {
        let single: Claims = serde_json::from_value(serde_json::json!({
            "sub": "u1", "accessible_tenant": "t2", "exp": 2_000_000_000i64, "iat": 0
        }))
        .unwrap();
        assert_eq!(single.accessible_tenants, vec!["t2"]);

        let many: Claims = serde_json::from_value(serde_json::json!({
            "sub": "u1", "accessible_tenant": ["t2", "t3"], "exp": 2_000_000_000i64, "iat": 0
        }))
        .unwrap();
        assert_eq!(many.accessible_tenants, vec!["t2", "t3"]);
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}
