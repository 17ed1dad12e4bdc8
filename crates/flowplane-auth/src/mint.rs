//! Machine-token minting.
//!
//! The identity store's `/auth/token` endpoint mints these for machine
//! clients after verifying their credentials. Claims embed the client's
//! roles at issuance time; the verifier trusts them for the token's
//! (short) lifetime.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AuthError, Result};
use crate::verifier::TokenFamily;

/// Default machine-token lifetime.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

/// A freshly minted machine token.
#[derive(Debug, Clone)]
pub struct MintedToken {
    /// The signed JWT.
    pub token: String,
    /// Absolute expiry.
    pub expires_at: DateTime<Utc>,
    /// Lifetime in seconds (for `expires_in` response fields).
    pub expires_in: u64,
}

#[derive(Serialize)]
struct MachineClaims<'a> {
    iss: &'a str,
    aud: &'a str,
    sub: String,
    roles: &'a [String],
    iat: i64,
    nbf: i64,
    exp: i64,
}

/// Mints machine tokens for one configured M2M family.
pub struct TokenMinter {
    family: TokenFamily,
}

impl TokenMinter {
    /// Create a minter for the given family.
    #[must_use]
    pub const fn new(family: TokenFamily) -> Self {
        Self { family }
    }

    /// Mint a machine token for `client_id` carrying `roles`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Minting`] if encoding fails.
    pub fn mint(&self, client_id: Uuid, roles: &[String], ttl: Duration) -> Result<MintedToken> {
        let now = Utc::now();
        let expires_in = ttl.as_secs();
        let exp = now + chrono::Duration::seconds(i64::try_from(expires_in).unwrap_or(i64::MAX));

        let claims = MachineClaims {
            iss: &self.family.issuer,
            aud: &self.family.audience,
            sub: client_id.to_string(),
            roles,
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: exp.timestamp(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.family.secret.as_bytes()),
        )
        .map_err(|e| AuthError::Minting(e.to_string()))?;

        // Round-trip through the unix timestamp so expires_at matches the
        // second precision actually embedded in the claim.
        let expires_at = Utc
            .timestamp_opt(exp.timestamp(), 0)
            .single()
            .unwrap_or(exp);

        Ok(MintedToken {
            token,
            expires_at,
            expires_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family() -> TokenFamily {
        TokenFamily {
            secret: "m2m-secret".into(),
            issuer: "https://auth.flowplane.local".into(),
            audience: "flowplane-services".into(),
        }
    }

    #[test]
    fn minted_token_has_three_segments() {
        let minter = TokenMinter::new(family());
        let minted = minter
            .mint(Uuid::new_v4(), &["conversation_client".into()], DEFAULT_TOKEN_TTL)
            .unwrap();
        assert_eq!(minted.token.split('.').count(), 3);
        assert_eq!(minted.expires_in, 900);
        assert!(minted.expires_at > Utc::now());
    }
}
