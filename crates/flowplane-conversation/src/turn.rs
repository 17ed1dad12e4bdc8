//! The background agent turn.
//!
//! For each user message: resolve the conversation's bound agent to its
//! running deployment endpoint, authenticate to the runtime with a
//! machine token, forward streamed chunks to subscribers, and close the
//! turn with `complete`. Failures broadcast a `warn` frame first and the
//! turn terminates; `complete` is always the turn's last frame.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use serde_json::json;

use flowplane_core::MessageId;
use flowplane_store::{Conversation, ConversationStore, DeploymentStore, Message, MessageRole};

use crate::frames::Frame;
use crate::hub::ConversationHub;
use crate::runtime::{RuntimeClient, RuntimeError, ServiceTokenSource};

/// Executes agent turns.
pub struct TurnRunner {
    store: Arc<dyn ConversationStore>,
    deployments: Arc<dyn DeploymentStore>,
    runtime: Arc<dyn RuntimeClient>,
    tokens: Arc<dyn ServiceTokenSource>,
    hub: Arc<ConversationHub>,
    persist_assistant_replies: bool,
}

impl TurnRunner {
    /// Create a turn runner.
    #[must_use]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        deployments: Arc<dyn DeploymentStore>,
        runtime: Arc<dyn RuntimeClient>,
        tokens: Arc<dyn ServiceTokenSource>,
        hub: Arc<ConversationHub>,
        persist_assistant_replies: bool,
    ) -> Self {
        Self {
            store,
            deployments,
            runtime,
            tokens,
            hub,
            persist_assistant_replies,
        }
    }

    /// Run one turn to completion. Never panics or returns an error; all
    /// failures end as `warn` + `complete` frames.
    pub async fn run(&self, conversation: Conversation, user_message: String) {
        let conversation_id = conversation.id;

        if let Err(category) = self.try_run(&conversation, &user_message).await {
            self.hub.broadcast(
                conversation_id,
                &Frame::Warn {
                    message: category.to_string(),
                },
            );
        }
        self.hub.broadcast(conversation_id, &Frame::Complete);
    }

    async fn try_run(
        &self,
        conversation: &Conversation,
        user_message: &str,
    ) -> Result<(), &'static str> {
        let conversation_id = conversation.id;

        let Some(agent_id) = conversation.agent_id else {
            return Err("no_agent_bound");
        };

        let endpoint = self
            .deployments
            .running_deployment_for_agent(agent_id)
            .await
            .ok()
            .flatten()
            .and_then(|d| d.endpoint_url)
            .ok_or("agent_unavailable")?;

        let service_token = self
            .tokens
            .token()
            .await
            .map_err(|_| "runtime_auth_failed")?;

        let bearer = self
            .runtime
            .login(&endpoint, &service_token)
            .await
            .map_err(|e| match e {
                RuntimeError::AuthFailed => "runtime_auth_failed",
                _ => "runtime_unavailable",
            })?;

        let mut stream = self
            .runtime
            .run_flow(&endpoint, &bearer, user_message)
            .await
            .map_err(|_| "runtime_unavailable")?;

        let mut assembled = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(content) => {
                    assembled.push_str(&content);
                    self.hub
                        .broadcast(conversation_id, &Frame::Stream { content });
                }
                Err(e) => {
                    tracing::warn!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "Runtime stream broke mid-turn"
                    );
                    return Err("runtime_stream_failed");
                }
            }
        }

        if self.persist_assistant_replies && !assembled.is_empty() {
            let message = Message {
                id: MessageId::generate(),
                conversation_id,
                role: MessageRole::Assistant,
                content: assembled,
                metadata: json!({}),
                created_at: Utc::now(),
            };
            if let Err(e) = self.store.insert_message(&message).await {
                tracing::error!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "Failed to persist assistant reply"
                );
            }
        }

        Ok(())
    }
}
