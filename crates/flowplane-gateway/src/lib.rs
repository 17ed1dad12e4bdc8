//! HTTP/WebSocket gateway for the flowplane control plane.
//!
//! Hosts every component behind one `/api/v1` surface:
//!
//! - `/auth/*`: registration, login, self-profile, and the
//!   client-credentials token endpoint (identity store)
//! - `/admin/*`: roles, permissions, machine clients (admin-only)
//! - `/agents/*`: the agent catalog and its versions
//! - `/deployments/*`: the deployment engine's status API
//! - `/conversations/*` and `/ws/conversations/{id}`: the conversation hub
//! - `/health/*`: liveness and readiness
//!
//! All dependencies are threaded through [`AppState`]; there is no
//! process-wide mutable state beyond the token cache and the WS
//! subscriber map, both owned by their services.

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod request_id;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::ApiError;
pub use extract::{AuthPrincipal, OnBehalfOf};
pub use routes::create_router;
pub use state::{AppState, HubTokenSource};
