//! HTTP and WebSocket handlers, one module per API area.

pub mod admin;
pub mod agents;
pub mod auth;
pub mod conversations;
pub mod deployments;
pub mod health;
pub mod ws;
