//! Identity store for the flowplane control plane.
//!
//! Owns everything C1's verifier consumes: user profiles (created through
//! the external identity provider), the role/permission model, machine
//! clients with their client-credentials grant, and the cold-start
//! bootstrap protocol that hands dependent services their machine-client
//! credentials.
//!
//! The [`IdentityService`] is the single entry point used by HTTP
//! handlers; the [`bootstrap`] module runs once per process before the
//! gateway starts serving traffic and is fatal on failure.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bootstrap;
pub mod error;
pub mod provider;
pub mod roles;
pub mod secrets;
pub mod service;
pub mod tokens;

pub use bootstrap::{
    BootstrapConfig, BootstrapOutcome, ClientCredentials, CredentialStore, FileCredentialStore,
    MemoryCredentialStore, ServiceClientSpec,
};
pub use error::{IdentityError, Result};
pub use provider::{HttpIdentityProvider, IdentityProvider, ProviderTokens, ProviderUser};
#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockIdentityProvider;
pub use roles::StoreRoleSource;
pub use service::{CreatedClient, IdentityService, TokenGrant};
pub use tokens::ServiceTokenProvider;
