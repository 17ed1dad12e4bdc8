//! Conversation hub for the flowplane control plane.
//!
//! Per conversation: a REST surface (create, append messages, list) plus a
//! WebSocket channel. Appending a user message persists it, broadcasts an
//! `ack` frame to all subscribers, and schedules a background agent turn
//! that resolves the bound agent's running deployment, authenticates to
//! its runtime, and forwards streamed chunks as `stream` frames, closing
//! the turn with `complete` (failures become `warn` frames first).
//!
//! The subscriber registry is in-memory and per-process; fan-out across
//! instances would need an external bus and is explicitly out of scope.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod frames;
pub mod hub;
pub mod runtime;
pub mod service;
pub mod turn;

pub use error::{ConversationError, Result};
pub use frames::Frame;
pub use hub::{ConversationHub, Subscription, DEFAULT_QUEUE_DEPTH};
#[cfg(any(test, feature = "test-utils"))]
pub use runtime::{MockRuntimeClient, StaticTokenSource};
pub use runtime::{HttpRuntimeClient, RuntimeClient, RuntimeError, ServiceTokenSource};
pub use service::{ConversationConfig, ConversationService, CreateConversationInput};
pub use turn::TurnRunner;
