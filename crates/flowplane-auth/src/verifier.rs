//! JWT verification and principal derivation.
//!
//! The verifier is reusable across HTTP handlers and WebSocket upgrades:
//! it is `Send + Sync`, holds no per-request state, and all I/O happens
//! through the [`RoleSource`] seam.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

use crate::cache::GrantsCache;
use crate::error::{AuthError, Result};
use crate::principal::{Principal, PrincipalKind};

/// Signing and matching parameters for one token family.
#[derive(Debug, Clone)]
pub struct TokenFamily {
    /// Symmetric HS256 secret.
    pub secret: String,
    /// Expected `iss` claim.
    pub issuer: String,
    /// Expected `aud` claim (string or member of an array).
    pub audience: String,
}

/// Verifier configuration covering both token families.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Family for human-user tokens issued by the identity provider.
    pub user: TokenFamily,
    /// Family for machine (client-credentials) tokens.
    pub machine: TokenFamily,
    /// Allowed clock skew in seconds for `exp`/`nbf` checks.
    pub leeway_secs: u64,
    /// TTL for the role/permission cache.
    pub cache_ttl: Duration,
    /// Capacity of the role/permission cache.
    pub cache_capacity: usize,
}

impl VerifierConfig {
    /// The default clock skew tolerance.
    pub const DEFAULT_LEEWAY_SECS: u64 = 30;
}

/// Roles and permissions resolved for a principal.
#[derive(Debug, Clone, Default)]
pub struct Grants {
    /// Role names.
    pub roles: HashSet<String>,
    /// Permission names (union over the roles).
    pub permissions: HashSet<String>,
}

/// Backend that resolves roles and permissions from the identity store.
#[async_trait]
pub trait RoleSource: Send + Sync {
    /// Roles and permissions currently assigned to a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    async fn user_grants(&self, user_id: Uuid) -> Result<Grants>;

    /// Grants for a machine client presenting `token_roles`.
    ///
    /// Implementations must reject revoked (or unknown) clients here, so a
    /// minted token stops verifying once its client is revoked (bounded
    /// only by the grants-cache TTL).
    ///
    /// # Errors
    ///
    /// Returns an error if the client is revoked, unknown, or the backend
    /// cannot be reached.
    async fn client_grants(&self, client_id: Uuid, token_roles: &[String]) -> Result<Grants>;
}

/// Trait for validating bearer tokens into principals.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify a bearer token and derive the request principal.
    ///
    /// # Errors
    ///
    /// Returns a typed [`AuthError`] when the token is invalid, expired,
    /// or matches neither token family.
    async fn verify(&self, token: &str) -> Result<Principal>;
}

/// Raw claims shared by both token families.
#[derive(Debug, Deserialize)]
struct RawClaims {
    #[allow(dead_code)]
    iss: String,
    sub: String,
    #[serde(default)]
    aud: Audience,
    exp: i64,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    roles: Option<Vec<String>>,
}

/// Audience claim that can be either a string or an array.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(untagged)]
enum Audience {
    Single(String),
    Multiple(Vec<String>),
    #[default]
    None,
}

impl Audience {
    fn contains(&self, value: &str) -> bool {
        match self {
            Self::Single(s) => s == value,
            Self::Multiple(v) => v.iter().any(|s| s == value),
            Self::None => false,
        }
    }
}

/// Production verifier accepting both token families.
pub struct JwtVerifier {
    config: VerifierConfig,
    roles: Arc<dyn RoleSource>,
    cache: GrantsCache,
}

impl JwtVerifier {
    /// Create a verifier backed by the given role source.
    #[must_use]
    pub fn new(config: VerifierConfig, roles: Arc<dyn RoleSource>) -> Self {
        let cache = GrantsCache::new(config.cache_ttl, config.cache_capacity);
        Self {
            config,
            roles,
            cache,
        }
    }

    /// Drop any cached grants for a principal (call after role changes).
    pub fn invalidate_grants(&self, principal_id: Uuid, kind: PrincipalKind) {
        let key = match kind {
            PrincipalKind::User => format!("user:{principal_id}"),
            PrincipalKind::Machine => format!("client:{principal_id}"),
        };
        self.cache.invalidate(&key);
    }

    /// Decode and fully validate `token` against one family.
    fn decode_family(&self, token: &str, family: &TokenFamily) -> Result<RawClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.config.leeway_secs;
        validation.set_issuer(&[&family.issuer]);
        validation.validate_nbf = true;
        // Audience can be a string or an array; checked manually below.
        validation.validate_aud = false;

        let data = decode::<RawClaims>(
            token,
            &DecodingKey::from_secret(family.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            jsonwebtoken::errors::ErrorKind::ImmatureSignature => AuthError::NotYetValid,
            jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            jsonwebtoken::errors::ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
            _ => AuthError::InvalidToken(e.to_string()),
        })?;

        if !data.claims.aud.contains(&family.audience) {
            return Err(AuthError::InvalidAudience);
        }

        Ok(data.claims)
    }

    async fn user_principal(&self, claims: RawClaims) -> Result<Principal> {
        let user_id = Uuid::from_str(&claims.sub).map_err(|_| AuthError::InvalidSubject)?;

        let key = format!("user:{user_id}");
        let grants = if let Some(grants) = self.cache.get(&key) {
            grants
        } else {
            let grants = self.roles.user_grants(user_id).await?;
            self.cache.insert(key, grants.clone());
            grants
        };

        Ok(build_principal(user_id, PrincipalKind::User, grants, &claims))
    }

    async fn machine_principal(&self, claims: RawClaims) -> Result<Principal> {
        let client_id = Uuid::from_str(&claims.sub).map_err(|_| AuthError::InvalidSubject)?;
        let roles = claims
            .roles
            .clone()
            .ok_or_else(|| AuthError::MissingClaim("roles".to_string()))?;

        let key = format!("client:{client_id}");
        let grants = if let Some(grants) = self.cache.get(&key) {
            grants
        } else {
            let grants = self.roles.client_grants(client_id, &roles).await?;
            self.cache.insert(key, grants.clone());
            grants
        };

        Ok(build_principal(
            client_id,
            PrincipalKind::Machine,
            grants,
            &claims,
        ))
    }
}

fn build_principal(id: Uuid, kind: PrincipalKind, grants: Grants, claims: &RawClaims) -> Principal {
    let issued_at = claims
        .iat
        .and_then(|iat| DateTime::from_timestamp(iat, 0))
        .unwrap_or_else(Utc::now);
    let expires_at = DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now);

    Principal {
        id,
        kind,
        roles: grants.roles,
        permissions: grants.permissions,
        issued_at,
        expires_at,
    }
}

/// Read the unverified issuer claim for family classification. The token
/// is still fully verified against the selected family afterwards.
fn peek_issuer(token: &str) -> Result<String> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthError::InvalidToken("malformed token".to_string()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| AuthError::InvalidToken("malformed payload".to_string()))?;

    #[derive(Deserialize)]
    struct Peek {
        #[serde(default)]
        iss: Option<String>,
    }

    let peek: Peek = serde_json::from_slice(&bytes)
        .map_err(|_| AuthError::InvalidToken("malformed claims".to_string()))?;

    peek.iss
        .ok_or_else(|| AuthError::MissingClaim("iss".to_string()))
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Principal> {
        let issuer = peek_issuer(token)?;

        if issuer == self.config.user.issuer {
            let claims = self.decode_family(token, &self.config.user)?;
            return self.user_principal(claims).await;
        }

        if issuer == self.config.machine.issuer {
            let claims = self.decode_family(token, &self.config.machine)?;
            return self.machine_principal(claims).await;
        }

        Err(AuthError::InvalidToken(
            "issuer matches neither token family".to_string(),
        ))
    }
}

/// A mock verifier for tests.
///
/// Accepts tokens in the formats `test-user:<uuid>`, `test-admin:<uuid>`
/// and `test-client:<uuid>:<role>,<role>`; the configured permissions are
/// attached to every principal.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockVerifier {
    /// Permissions granted to every verified principal.
    pub permissions: HashSet<String>,
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for MockVerifier {
    fn default() -> Self {
        Self {
            permissions: HashSet::new(),
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl MockVerifier {
    /// Create a mock verifier granting the given permissions.
    #[must_use]
    pub fn with_permissions(permissions: &[&str]) -> Self {
        Self {
            permissions: permissions.iter().map(ToString::to_string).collect(),
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl TokenVerifier for MockVerifier {
    async fn verify(&self, token: &str) -> Result<Principal> {
        let make = |id: &str, kind: PrincipalKind, roles: HashSet<String>| -> Result<Principal> {
            let id = Uuid::from_str(id).map_err(|_| AuthError::InvalidSubject)?;
            Ok(Principal {
                id,
                kind,
                roles,
                permissions: self.permissions.clone(),
                issued_at: Utc::now(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            })
        };

        if let Some(rest) = token.strip_prefix("test-user:") {
            return make(rest, PrincipalKind::User, ["user".to_string()].into());
        }
        if let Some(rest) = token.strip_prefix("test-admin:") {
            return make(rest, PrincipalKind::User, ["admin".to_string()].into());
        }
        if let Some(rest) = token.strip_prefix("test-client:") {
            let (id, roles) = rest
                .split_once(':')
                .ok_or_else(|| AuthError::InvalidToken("expected test-client:<uuid>:<roles>".into()))?;
            let roles = roles.split(',').map(ToString::to_string).collect();
            return make(id, PrincipalKind::Machine, roles);
        }

        Err(AuthError::InvalidToken("unrecognized test token".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mint::{TokenMinter, DEFAULT_TOKEN_TTL};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    fn user_family() -> TokenFamily {
        TokenFamily {
            secret: "provider-secret".into(),
            issuer: "https://id.example.com".into(),
            audience: "authenticated".into(),
        }
    }

    fn machine_family() -> TokenFamily {
        TokenFamily {
            secret: "m2m-secret".into(),
            issuer: "https://auth.flowplane.local".into(),
            audience: "flowplane-services".into(),
        }
    }

    fn verifier_config() -> VerifierConfig {
        VerifierConfig {
            user: user_family(),
            machine: machine_family(),
            leeway_secs: VerifierConfig::DEFAULT_LEEWAY_SECS,
            cache_ttl: Duration::from_secs(30),
            cache_capacity: 64,
        }
    }

    struct StubRoleSource;

    #[async_trait]
    impl RoleSource for StubRoleSource {
        async fn user_grants(&self, _user_id: Uuid) -> Result<Grants> {
            Ok(Grants {
                roles: ["user".to_string()].into(),
                permissions: ["agent:create".to_string()].into(),
            })
        }

        async fn client_grants(&self, _client_id: Uuid, token_roles: &[String]) -> Result<Grants> {
            let permissions = if token_roles.iter().any(|r| r == "conversation_client") {
                ["agent:read:any".to_string()].into()
            } else {
                HashSet::new()
            };
            Ok(Grants {
                roles: token_roles.iter().cloned().collect(),
                permissions,
            })
        }
    }

    fn verifier() -> JwtVerifier {
        JwtVerifier::new(verifier_config(), Arc::new(StubRoleSource))
    }

    #[derive(Serialize)]
    struct UserClaims {
        iss: String,
        aud: String,
        sub: String,
        iat: i64,
        exp: i64,
    }

    fn user_token(sub: Uuid, exp_offset_secs: i64, family: &TokenFamily) -> String {
        let now = Utc::now().timestamp();
        let claims = UserClaims {
            iss: family.issuer.clone(),
            aud: family.audience.clone(),
            sub: sub.to_string(),
            iat: now,
            exp: now + exp_offset_secs,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(family.secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn user_token_yields_user_principal() {
        let sub = Uuid::new_v4();
        let token = user_token(sub, 3600, &user_family());

        let principal = verifier().verify(&token).await.unwrap();
        assert_eq!(principal.id, sub);
        assert_eq!(principal.kind, PrincipalKind::User);
        assert!(principal.has_role("user"));
        assert!(principal.has_permission("agent:create"));
    }

    #[tokio::test]
    async fn machine_token_yields_machine_principal() {
        let minter = TokenMinter::new(machine_family());
        let client_id = Uuid::new_v4();
        let minted = minter
            .mint(client_id, &["conversation_client".into()], DEFAULT_TOKEN_TTL)
            .unwrap();

        let principal = verifier().verify(&minted.token).await.unwrap();
        assert_eq!(principal.id, client_id);
        assert_eq!(principal.kind, PrincipalKind::Machine);
        assert!(principal.has_role("conversation_client"));
        assert!(principal.has_permission("agent:read:any"));
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let token = user_token(Uuid::new_v4(), -120, &user_family());
        let err = verifier().verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn token_within_leeway_is_accepted() {
        // Expired 10 s ago: inside the 30 s skew window.
        let token = user_token(Uuid::new_v4(), -10, &user_family());
        assert!(verifier().verify(&token).await.is_ok());
    }

    #[tokio::test]
    async fn wrong_audience_is_rejected() {
        let mut family = user_family();
        family.audience = "somewhere-else".into();
        let token = user_token(Uuid::new_v4(), 3600, &family);

        let err = verifier().verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidAudience));
        assert_eq!(err.code(), "wrong_audience");
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let mut family = user_family();
        family.secret = "some-other-secret".into();
        let token = user_token(Uuid::new_v4(), 3600, &family);

        let err = verifier().verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidSignature));
    }

    #[tokio::test]
    async fn unknown_issuer_is_invalid_token() {
        let mut family = user_family();
        family.issuer = "https://rogue.example.com".into();
        let token = user_token(Uuid::new_v4(), 3600, &family);

        let err = verifier().verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
        assert_eq!(err.code(), "invalid_token");
    }

    #[tokio::test]
    async fn machine_token_without_roles_claim_is_rejected() {
        // A "machine" token encoded without the roles claim.
        let token = user_token(Uuid::new_v4(), 3600, &machine_family());
        let err = verifier().verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingClaim(_)));
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        let err = verifier().verify("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn mock_verifier_parses_test_tokens() {
        let mock = MockVerifier::with_permissions(&["agent:read:any"]);
        let id = Uuid::new_v4();

        let user = mock.verify(&format!("test-user:{id}")).await.unwrap();
        assert_eq!(user.kind, PrincipalKind::User);

        let client = mock
            .verify(&format!("test-client:{id}:conversation_client"))
            .await
            .unwrap();
        assert_eq!(client.kind, PrincipalKind::Machine);
        assert!(client.has_role("conversation_client"));

        assert!(mock.verify("bogus").await.is_err());
    }
}
