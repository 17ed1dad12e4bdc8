//! Bearer-token verification for the flowplane control plane.
//!
//! A single [`TokenVerifier`] accepts both token families the platform
//! issues and derives a [`Principal`] with its effective permission set:
//!
//! - **User tokens**, signed by the external identity provider
//!   (audience `authenticated`, `sub` = user UUID). Roles and permissions
//!   are not embedded; they are fetched through a [`RoleSource`] behind a
//!   short-lived in-process cache.
//! - **Machine tokens**, signed with the service M2M secret. The `sub` is
//!   a client UUID and the token body carries the roles claim embedded at
//!   issuance time.
//!
//! Classification looks at the (unverified) issuer and audience first and
//! then fully verifies against the matching family: signature, `exp` with
//! 30 s leeway, `nbf`, `iss`, `aud`. Tokens matching neither family fail
//! with `invalid_token`.
//!
//! The crate also owns machine-token minting ([`TokenMinter`]) so both
//! sides of the M2M handshake agree on one claims layout.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod error;
pub mod extract;
pub mod mint;
pub mod principal;
pub mod verifier;

pub use cache::GrantsCache;
pub use error::{AuthError, Result};
pub use extract::bearer_token;
pub use mint::{MintedToken, TokenMinter};
pub use principal::{Principal, PrincipalKind};
#[cfg(any(test, feature = "test-utils"))]
pub use verifier::MockVerifier;
pub use verifier::{Grants, JwtVerifier, RoleSource, TokenFamily, TokenVerifier, VerifierConfig};
