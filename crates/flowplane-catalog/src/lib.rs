//! Agent catalog for the flowplane control plane.
//!
//! Persists agent definitions and their immutable, monotonically numbered
//! versions, and enforces the single-owner access model: every read and
//! write checks ownership unless the principal carries `agent:read:any` /
//! `agent:write:any`, and machine principals acting on behalf of a user
//! pivot the check through the `on_behalf_of` header.
//!
//! The catalog treats agent configuration as an opaque JSON document; it
//! validates only size. Interpretation happens in the deployment build
//! stage.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod access;
pub mod error;
pub mod service;

pub use access::AccessContext;
pub use error::{CatalogError, Result};
pub use service::{CatalogConfig, CatalogService, CreateAgentInput, CreatedAgent};
