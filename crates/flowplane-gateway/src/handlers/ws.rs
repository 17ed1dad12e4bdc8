//! The conversation WebSocket channel.
//!
//! Authentication happens before the upgrade; the token may come from the
//! `Authorization` header or the `?token=` query parameter (equivalent
//! trust). After the upgrade the task only forwards hub frames to the
//! socket; client-sent text is ignored, and a client close (or a dropped
//! subscriber) ends the task.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;

use flowplane_core::ConversationId;

use crate::error::ApiError;
use crate::extract::AuthPrincipal;
use crate::state::AppState;

/// `GET /ws/conversations/{conversation_id}`.
pub async fn conversation_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(conversation_id): Path<ConversationId>,
) -> Result<Response, ApiError> {
    // Access is checked before the upgrade; the subscription carries the
    // `connected` greeting.
    let subscription = state
        .conversations
        .subscribe(&principal, conversation_id)
        .await?;

    tracing::info!(
        conversation_id = %conversation_id,
        principal = %principal.id,
        "WebSocket subscription established"
    );

    let hub = state.conversations.hub().clone();
    Ok(ws.on_upgrade(move |socket| async move {
        let subscriber_id = subscription.id;
        forward_frames(socket, subscription, conversation_id).await;
        hub.unsubscribe(conversation_id, subscriber_id);
        tracing::debug!(conversation_id = %conversation_id, "WebSocket closed");
    }))
}

async fn forward_frames(
    mut socket: WebSocket,
    mut subscription: flowplane_conversation::Subscription,
    conversation_id: ConversationId,
) {
    loop {
        tokio::select! {
            frame = subscription.rx.recv() => {
                let Some(frame) = frame else {
                    // Dropped by the hub (e.g. as a slow subscriber).
                    break;
                };
                match serde_json::to_string(&frame) {
                    Ok(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            conversation_id = %conversation_id,
                            error = %e,
                            "Frame serialization failed"
                        );
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Inbound messages are posted via REST, not the socket.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
