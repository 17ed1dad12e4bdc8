//! The WebSocket frame grammar.
//!
//! Within one connection, a turn's `ack` precedes its `stream` chunks and
//! `complete` is the turn's last frame. Turns may interleave when a client
//! posts multiple messages.

use serde::{Deserialize, Serialize};

use flowplane_core::MessageId;
use flowplane_store::MessageRole;

/// A frame sent to conversation subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Greeting sent when a subscription is established.
    Connected,
    /// A message was persisted.
    Ack {
        /// Id of the stored message.
        message_id: MessageId,
        /// Role of the stored message.
        role: MessageRole,
    },
    /// A chunk of runtime output.
    Stream {
        /// Chunk content.
        content: String,
    },
    /// The turn finished; no more frames for it will follow.
    Complete,
    /// The turn hit a problem; a `complete` frame follows.
    Warn {
        /// Failure category, e.g. `runtime_auth_failed`.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_matches_contract() {
        let id = MessageId::generate();
        let ack = serde_json::to_value(Frame::Ack {
            message_id: id,
            role: MessageRole::User,
        })
        .unwrap();
        assert_eq!(ack["type"], "ack");
        assert_eq!(ack["message_id"], id.to_string());
        assert_eq!(ack["role"], "user");

        let stream = serde_json::to_value(Frame::Stream {
            content: "hello".into(),
        })
        .unwrap();
        assert_eq!(stream["type"], "stream");
        assert_eq!(stream["content"], "hello");

        let complete = serde_json::to_value(Frame::Complete).unwrap();
        assert_eq!(complete["type"], "complete");

        let warn = serde_json::to_value(Frame::Warn {
            message: "runtime_auth_failed".into(),
        })
        .unwrap();
        assert_eq!(warn["type"], "warn");
        assert_eq!(warn["message"], "runtime_auth_failed");
    }
}
