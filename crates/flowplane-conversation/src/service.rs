//! Conversation REST operations.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as Json;

use flowplane_auth::Principal;
use flowplane_core::{AgentId, ConversationId, MessageId, Page, PageParams, UserId};
use flowplane_store::{Conversation, ConversationStore, Message, MessageRole};

use crate::error::{ConversationError, Result};
use crate::frames::Frame;
use crate::hub::ConversationHub;
use crate::turn::TurnRunner;

/// Permission that lets machine principals (the hub's own service client)
/// cross conversation owners.
const CROSS_OWNER_PERMISSION: &str = "agent:read:any";

/// Conversation hub configuration.
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Per-subscriber broadcast queue depth.
    pub queue_depth: usize,
    /// Persist one finalized assistant message per completed turn.
    pub persist_assistant_replies: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            queue_depth: crate::hub::DEFAULT_QUEUE_DEPTH,
            persist_assistant_replies: true,
        }
    }
}

/// Input for [`ConversationService::create_conversation`].
#[derive(Debug, Clone)]
pub struct CreateConversationInput {
    /// Agent whose deployment answers in this conversation.
    pub agent_id: Option<AgentId>,
    /// Optional title.
    pub title: Option<String>,
    /// Free-form metadata.
    pub metadata: Json,
}

/// The conversation service used by REST handlers and the WS upgrade.
pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
    hub: Arc<ConversationHub>,
    turns: Arc<TurnRunner>,
}

impl ConversationService {
    /// Create the service.
    #[must_use]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        hub: Arc<ConversationHub>,
        turns: Arc<TurnRunner>,
    ) -> Self {
        Self { store, hub, turns }
    }

    /// The fan-out hub (used by the WS upgrade handler).
    #[must_use]
    pub fn hub(&self) -> &Arc<ConversationHub> {
        &self.hub
    }

    fn check_access(principal: &Principal, conversation: &Conversation) -> Result<()> {
        match conversation.owner_id {
            None => Ok(()),
            Some(owner) if owner.as_uuid() == principal.id => Ok(()),
            Some(_) if principal.has_permission(CROSS_OWNER_PERMISSION) => Ok(()),
            Some(_) => Err(ConversationError::Forbidden),
        }
    }

    async fn load(
        &self,
        principal: &Principal,
        id: ConversationId,
    ) -> Result<Conversation> {
        let conversation = self
            .store
            .get_conversation(id)
            .await?
            .ok_or(ConversationError::NotFound(id))?;
        Self::check_access(principal, &conversation)?;
        Ok(conversation)
    }

    /// Create a conversation owned by the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn create_conversation(
        &self,
        principal: &Principal,
        input: CreateConversationInput,
    ) -> Result<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: ConversationId::generate(),
            owner_id: Some(UserId::from_uuid(principal.id)),
            agent_id: input.agent_id,
            title: input.title,
            metadata: input.metadata,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_conversation(&conversation).await?;

        tracing::info!(conversation_id = %conversation.id, "Created conversation");
        Ok(conversation)
    }

    /// Get a conversation.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `Forbidden`.
    pub async fn get_conversation(
        &self,
        principal: &Principal,
        id: ConversationId,
    ) -> Result<Conversation> {
        self.load(principal, id).await
    }

    /// List a conversation's messages ordered by `(created_at, id)`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `Forbidden`.
    pub async fn list_messages(
        &self,
        principal: &Principal,
        id: ConversationId,
        params: PageParams,
    ) -> Result<Vec<Message>> {
        self.load(principal, id).await?;
        Ok(self.store.list_messages(id, Page::clamped(params)).await?)
    }

    /// Subscribe to a conversation's frames (after an access check).
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `Forbidden`.
    pub async fn subscribe(
        &self,
        principal: &Principal,
        id: ConversationId,
    ) -> Result<crate::hub::Subscription> {
        self.load(principal, id).await?;
        let subscription = self.hub.subscribe(id);
        self.hub.broadcast(id, &Frame::Connected);
        Ok(subscription)
    }

    /// Append a message: persist it, broadcast the `ack`, and, for user
    /// messages, schedule the background agent turn.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` for empty content, `NotFound`, or `Forbidden`.
    pub async fn append_message(
        &self,
        principal: &Principal,
        id: ConversationId,
        role: MessageRole,
        content: String,
        metadata: Json,
    ) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(ConversationError::Invalid("content must not be empty".into()));
        }

        let conversation = self.load(principal, id).await?;

        let message = Message {
            id: MessageId::generate(),
            conversation_id: id,
            role,
            content: content.clone(),
            metadata,
            created_at: Utc::now(),
        };
        self.store.insert_message(&message).await?;

        // Ack first: within one connection the ack precedes any stream
        // chunks of the turn it triggers.
        self.hub.broadcast(
            id,
            &Frame::Ack {
                message_id: message.id,
                role,
            },
        );

        if role == MessageRole::User {
            let turns = Arc::clone(&self.turns);
            tokio::spawn(async move {
                turns.run(conversation, content).await;
            });
        }

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockRuntimeClient, StaticTokenSource};
    use chrono::Utc;
    use flowplane_auth::PrincipalKind;
    use flowplane_core::{DeploymentId, VersionId};
    use flowplane_store::{
        BuildStrategyKind, DeployStrategyKind, Deployment, DeploymentStatus, MemoryStore,
    };
    use serde_json::json;
    use uuid::Uuid;

    fn principal() -> Principal {
        Principal {
            id: Uuid::new_v4(),
            kind: PrincipalKind::User,
            roles: ["user".to_string()].into(),
            permissions: std::collections::HashSet::new(),
            issued_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::minutes(15),
        }
    }

    async fn seed_running_deployment(store: &MemoryStore, agent_id: AgentId) {
        let now = Utc::now();
        let deployment = Deployment {
            id: DeploymentId::generate(),
            owner_id: UserId::generate(),
            agent_id,
            agent_version_id: VersionId::generate(),
            status: DeploymentStatus::Running,
            endpoint_url: Some("https://agent.run.example.com".into()),
            metadata: json!({}),
            error_message: None,
            build_strategy: BuildStrategyKind::HostedBuild,
            deploy_strategy: DeployStrategyKind::Serverless,
            stop_requested: false,
            leased_by: None,
            lease_expires_at: None,
            deployed_at: Some(now),
            stopped_at: None,
            created_at: now,
            updated_at: now,
        };
        flowplane_store::DeploymentStore::insert_deployment(store, &deployment)
            .await
            .unwrap();
    }

    fn build_service(store: Arc<MemoryStore>, runtime: MockRuntimeClient) -> ConversationService {
        let hub = Arc::new(ConversationHub::default());
        let turns = Arc::new(TurnRunner::new(
            store.clone(),
            store.clone(),
            Arc::new(runtime),
            Arc::new(StaticTokenSource),
            hub.clone(),
            true,
        ));
        ConversationService::new(store, hub, turns)
    }

    async fn drain_turn(subscription: &mut crate::hub::Subscription) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            let frame = tokio::time::timeout(
                std::time::Duration::from_secs(2),
                subscription.rx.recv(),
            )
            .await
            .expect("frame timeout")
            .expect("channel closed");
            let done = frame == Frame::Complete;
            frames.push(frame);
            if done {
                break;
            }
        }
        frames
    }

    #[tokio::test]
    async fn user_message_yields_ack_streams_complete() {
        let store = Arc::new(MemoryStore::new());
        let agent_id = AgentId::generate();
        seed_running_deployment(&store, agent_id).await;

        let service = build_service(store.clone(), MockRuntimeClient::streaming(&["Hel", "lo"]));
        let caller = principal();

        let conversation = service
            .create_conversation(
                &caller,
                CreateConversationInput {
                    agent_id: Some(agent_id),
                    title: None,
                    metadata: json!({}),
                },
            )
            .await
            .unwrap();

        let mut subscription = service.subscribe(&caller, conversation.id).await.unwrap();
        assert_eq!(subscription.rx.recv().await.unwrap(), Frame::Connected);

        service
            .append_message(
                &caller,
                conversation.id,
                MessageRole::User,
                "hi".into(),
                json!({}),
            )
            .await
            .unwrap();

        let frames = drain_turn(&mut subscription).await;
        assert!(matches!(
            frames.first(),
            Some(Frame::Ack {
                role: MessageRole::User,
                ..
            })
        ));
        let streams: Vec<_> = frames
            .iter()
            .filter_map(|f| match f {
                Frame::Stream { content } => Some(content.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(streams, vec!["Hel".to_string(), "lo".to_string()]);
        assert_eq!(frames.last(), Some(&Frame::Complete));

        // The assembled assistant reply was persisted as one message.
        let messages = service
            .list_messages(&caller, conversation.id, PageParams::default())
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, "Hello");
    }

    #[tokio::test]
    async fn runtime_login_failure_warns_then_completes() {
        let store = Arc::new(MemoryStore::new());
        let agent_id = AgentId::generate();
        seed_running_deployment(&store, agent_id).await;

        let service = build_service(store.clone(), MockRuntimeClient::rejecting_login());
        let caller = principal();

        let conversation = service
            .create_conversation(
                &caller,
                CreateConversationInput {
                    agent_id: Some(agent_id),
                    title: None,
                    metadata: json!({}),
                },
            )
            .await
            .unwrap();

        let mut subscription = service.subscribe(&caller, conversation.id).await.unwrap();
        assert_eq!(subscription.rx.recv().await.unwrap(), Frame::Connected);

        service
            .append_message(
                &caller,
                conversation.id,
                MessageRole::User,
                "hi".into(),
                json!({}),
            )
            .await
            .unwrap();

        let frames = drain_turn(&mut subscription).await;
        assert!(frames.contains(&Frame::Warn {
            message: "runtime_auth_failed".into()
        }));
        assert_eq!(frames.last(), Some(&Frame::Complete));

        // No assistant message was stored.
        let messages = service
            .list_messages(&caller, conversation.id, PageParams::default())
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn no_running_deployment_warns_agent_unavailable() {
        let store = Arc::new(MemoryStore::new());
        let service = build_service(store.clone(), MockRuntimeClient::streaming(&["x"]));
        let caller = principal();

        let conversation = service
            .create_conversation(
                &caller,
                CreateConversationInput {
                    agent_id: Some(AgentId::generate()),
                    title: None,
                    metadata: json!({}),
                },
            )
            .await
            .unwrap();

        let mut subscription = service.subscribe(&caller, conversation.id).await.unwrap();
        assert_eq!(subscription.rx.recv().await.unwrap(), Frame::Connected);

        service
            .append_message(
                &caller,
                conversation.id,
                MessageRole::User,
                "hi".into(),
                json!({}),
            )
            .await
            .unwrap();

        let frames = drain_turn(&mut subscription).await;
        assert!(frames.contains(&Frame::Warn {
            message: "agent_unavailable".into()
        }));
    }

    #[tokio::test]
    async fn empty_content_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let service = build_service(store, MockRuntimeClient::streaming(&[]));
        let caller = principal();

        let conversation = service
            .create_conversation(
                &caller,
                CreateConversationInput {
                    agent_id: None,
                    title: None,
                    metadata: json!({}),
                },
            )
            .await
            .unwrap();

        let err = service
            .append_message(
                &caller,
                conversation.id,
                MessageRole::User,
                "   ".into(),
                json!({}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::Invalid(_)));
    }

    #[tokio::test]
    async fn strangers_are_forbidden() {
        let store = Arc::new(MemoryStore::new());
        let service = build_service(store, MockRuntimeClient::streaming(&[]));
        let owner = principal();

        let conversation = service
            .create_conversation(
                &owner,
                CreateConversationInput {
                    agent_id: None,
                    title: None,
                    metadata: json!({}),
                },
            )
            .await
            .unwrap();

        let stranger = principal();
        let err = service
            .get_conversation(&stranger, conversation.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::Forbidden));
    }
}
