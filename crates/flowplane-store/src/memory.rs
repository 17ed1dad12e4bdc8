//! In-memory implementation of the storage traits.
//!
//! Used by unit tests across the workspace. A single mutex serializes all
//! operations, which makes the relational invariants (gapless version
//! numbers, single-holder leases) hold trivially while keeping behavior
//! observably identical to the Postgres implementation.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value as Json;
use uuid::Uuid;

use flowplane_core::{AgentId, ClientId, ConversationId, DeploymentId, Page, UserId, VersionId};

use crate::error::{Result, StoreError};
use crate::types::{
    Agent, AgentFilter, AgentVersion, Conversation, Deployment, DeploymentFilter, DeploymentPatch,
    DeploymentStatus, DeploymentTransition, MachineClient, Message, Permission, Profile, Role,
};
use crate::{CatalogStore, ConversationStore, DeploymentStore, IdentityStore, Store};

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    profiles: HashMap<UserId, Profile>,
    roles: HashMap<Uuid, Role>,
    permissions: HashMap<Uuid, Permission>,
    role_permissions: HashSet<(Uuid, Uuid)>,
    user_roles: HashSet<(UserId, Uuid)>,
    client_roles: HashSet<(ClientId, Uuid)>,
    clients: HashMap<ClientId, MachineClient>,
    agents: HashMap<AgentId, Agent>,
    versions: HashMap<VersionId, AgentVersion>,
    deployments: HashMap<DeploymentId, Deployment>,
    transitions: Vec<DeploymentTransition>,
    next_transition_id: i64,
    conversations: HashMap<ConversationId, Conversation>,
    messages: Vec<Message>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn lease_deadline(lease: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::minutes(5))
}

fn merge_json(dst: &mut Json, patch: &Json) {
    if let (Some(dst), Some(patch)) = (dst.as_object_mut(), patch.as_object()) {
        for (key, value) in patch {
            dst.insert(key.clone(), value.clone());
        }
    }
}

fn paged<T: Clone>(items: &[T], page: Page) -> Vec<T> {
    items
        .iter()
        .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
        .take(usize::try_from(page.limit()).unwrap_or(usize::MAX))
        .cloned()
        .collect()
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn register_user(&self, profile: &Profile, default_role: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.profiles.contains_key(&profile.user_id)
            || inner.profiles.values().any(|p| p.email == profile.email)
        {
            return Err(StoreError::Conflict("profiles_email_key".into()));
        }
        let role_id = inner
            .roles
            .values()
            .find(|r| r.name == default_role)
            .map(|r| r.id)
            .ok_or(StoreError::NotFound)?;
        inner.profiles.insert(profile.user_id, profile.clone());
        inner.user_roles.insert((profile.user_id, role_id));
        Ok(())
    }

    async fn get_profile(&self, user_id: UserId) -> Result<Option<Profile>> {
        Ok(self.inner.lock().profiles.get(&user_id).cloned())
    }

    async fn get_profile_by_email(&self, email: &str) -> Result<Option<Profile>> {
        Ok(self
            .inner
            .lock()
            .profiles
            .values()
            .find(|p| p.email == email)
            .cloned())
    }

    async fn update_display_name(&self, user_id: UserId, display_name: &str) -> Result<Profile> {
        let mut inner = self.inner.lock();
        let profile = inner.profiles.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        profile.display_name = display_name.to_string();
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }

    async fn insert_role(&self, role: &Role) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.roles.values().any(|r| r.name == role.name) {
            return Err(StoreError::Conflict("roles_name_key".into()));
        }
        inner.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let mut roles: Vec<_> = self.inner.lock().roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        Ok(self
            .inner
            .lock()
            .roles
            .values()
            .find(|r| r.name == name)
            .cloned())
    }

    async fn delete_role(&self, role_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.roles.remove(&role_id).ok_or(StoreError::NotFound)?;
        inner.role_permissions.retain(|(r, _)| *r != role_id);
        inner.user_roles.retain(|(_, r)| *r != role_id);
        inner.client_roles.retain(|(_, r)| *r != role_id);
        Ok(())
    }

    async fn insert_permission(&self, permission: &Permission) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.permissions.values().any(|p| p.name == permission.name) {
            return Err(StoreError::Conflict("permissions_name_key".into()));
        }
        inner.permissions.insert(permission.id, permission.clone());
        Ok(())
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>> {
        let mut permissions: Vec<_> = self.inner.lock().permissions.values().cloned().collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(permissions)
    }

    async fn get_permission_by_name(&self, name: &str) -> Result<Option<Permission>> {
        Ok(self
            .inner
            .lock()
            .permissions
            .values()
            .find(|p| p.name == name)
            .cloned())
    }

    async fn delete_permission(&self, permission_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .permissions
            .remove(&permission_id)
            .ok_or(StoreError::NotFound)?;
        inner.role_permissions.retain(|(_, p)| *p != permission_id);
        Ok(())
    }

    async fn attach_permission(&self, role_id: Uuid, permission_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.roles.contains_key(&role_id) || !inner.permissions.contains_key(&permission_id) {
            return Err(StoreError::NotFound);
        }
        inner.role_permissions.insert((role_id, permission_id));
        Ok(())
    }

    async fn assign_user_role(&self, user_id: UserId, role_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.roles.contains_key(&role_id) {
            return Err(StoreError::NotFound);
        }
        inner.user_roles.insert((user_id, role_id));
        Ok(())
    }

    async fn assign_client_role(&self, client_id: ClientId, role_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.roles.contains_key(&role_id) || !inner.clients.contains_key(&client_id) {
            return Err(StoreError::NotFound);
        }
        inner.client_roles.insert((client_id, role_id));
        Ok(())
    }

    async fn insert_machine_client(&self, client: &MachineClient) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.clients.values().any(|c| c.name == client.name) {
            return Err(StoreError::Conflict("machine_clients_name_key".into()));
        }
        inner.clients.insert(client.client_id, client.clone());
        Ok(())
    }

    async fn get_machine_client(&self, client_id: ClientId) -> Result<Option<MachineClient>> {
        Ok(self.inner.lock().clients.get(&client_id).cloned())
    }

    async fn get_machine_client_by_name(&self, name: &str) -> Result<Option<MachineClient>> {
        Ok(self
            .inner
            .lock()
            .clients
            .values()
            .find(|c| c.name == name)
            .cloned())
    }

    async fn revoke_machine_client(&self, client_id: ClientId) -> Result<()> {
        let mut inner = self.inner.lock();
        let client = inner.clients.get_mut(&client_id).ok_or(StoreError::NotFound)?;
        if client.revoked_at.is_none() {
            client.revoked_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn roles_for_user(&self, user_id: UserId) -> Result<Vec<String>> {
        let inner = self.inner.lock();
        let mut names: Vec<_> = inner
            .user_roles
            .iter()
            .filter(|(u, _)| *u == user_id)
            .filter_map(|(_, r)| inner.roles.get(r).map(|role| role.name.clone()))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn roles_for_client(&self, client_id: ClientId) -> Result<Vec<String>> {
        let inner = self.inner.lock();
        let mut names: Vec<_> = inner
            .client_roles
            .iter()
            .filter(|(c, _)| *c == client_id)
            .filter_map(|(_, r)| inner.roles.get(r).map(|role| role.name.clone()))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn permissions_for_roles(&self, roles: &[String]) -> Result<Vec<String>> {
        let inner = self.inner.lock();
        let role_ids: HashSet<Uuid> = inner
            .roles
            .values()
            .filter(|r| roles.contains(&r.name))
            .map(|r| r.id)
            .collect();
        let mut names: Vec<_> = inner
            .role_permissions
            .iter()
            .filter(|(r, _)| role_ids.contains(r))
            .filter_map(|(_, p)| inner.permissions.get(p).map(|perm| perm.name.clone()))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn create_agent_with_version(&self, agent: &Agent, version: &AgentVersion) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner
            .agents
            .values()
            .any(|a| a.owner_id == agent.owner_id && a.name == agent.name)
        {
            return Err(StoreError::Conflict("agents_owner_id_name_key".into()));
        }
        inner.agents.insert(agent.id, agent.clone());
        inner.versions.insert(version.id, version.clone());
        Ok(())
    }

    async fn get_agent(&self, agent_id: AgentId) -> Result<Option<Agent>> {
        Ok(self.inner.lock().agents.get(&agent_id).cloned())
    }

    async fn list_agents(
        &self,
        owner: Option<UserId>,
        filter: &AgentFilter,
        page: Page,
    ) -> Result<Vec<Agent>> {
        let inner = self.inner.lock();
        let mut agents: Vec<_> = inner
            .agents
            .values()
            .filter(|a| owner.is_none_or(|o| a.owner_id == o))
            .filter(|a| filter.status.is_none_or(|s| a.status == s))
            .filter(|a| {
                filter
                    .tag
                    .as_ref()
                    .is_none_or(|t| a.tags.iter().any(|tag| tag == t))
            })
            .filter(|a| {
                filter
                    .name_contains
                    .as_ref()
                    .is_none_or(|n| a.name.to_lowercase().contains(&n.to_lowercase()))
            })
            .cloned()
            .collect();
        agents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paged(&agents, page))
    }

    async fn update_agent(&self, agent: &Agent) -> Result<()> {
        let mut inner = self.inner.lock();
        let existing = inner.agents.get_mut(&agent.id).ok_or(StoreError::NotFound)?;
        existing.description = agent.description.clone();
        existing.status = agent.status;
        existing.tags = agent.tags.clone();
        existing.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_next_version(
        &self,
        agent_id: AgentId,
        owner_id: UserId,
        config: &Json,
        changelog: Option<&str>,
    ) -> Result<AgentVersion> {
        let mut inner = self.inner.lock();
        if !inner.agents.contains_key(&agent_id) {
            return Err(StoreError::NotFound);
        }
        let current = inner
            .versions
            .values()
            .filter(|v| v.agent_id == agent_id)
            .map(|v| v.version_number)
            .max()
            .unwrap_or(0);
        let version = AgentVersion {
            id: VersionId::generate(),
            agent_id,
            owner_id,
            version_number: current + 1,
            config: config.clone(),
            changelog: changelog.map(str::to_string),
            published_at: None,
            created_at: Utc::now(),
        };
        inner.versions.insert(version.id, version.clone());
        Ok(version)
    }

    async fn get_version(&self, version_id: VersionId) -> Result<Option<AgentVersion>> {
        Ok(self.inner.lock().versions.get(&version_id).cloned())
    }

    async fn latest_version(&self, agent_id: AgentId) -> Result<Option<AgentVersion>> {
        Ok(self
            .inner
            .lock()
            .versions
            .values()
            .filter(|v| v.agent_id == agent_id)
            .max_by_key(|v| v.version_number)
            .cloned())
    }

    async fn list_versions(&self, agent_id: AgentId, page: Page) -> Result<Vec<AgentVersion>> {
        let inner = self.inner.lock();
        let mut versions: Vec<_> = inner
            .versions
            .values()
            .filter(|v| v.agent_id == agent_id)
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.version_number.cmp(&a.version_number));
        Ok(paged(&versions, page))
    }

    async fn publish_version(&self, version_id: VersionId, at: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.inner.lock();
        let version = inner
            .versions
            .get_mut(&version_id)
            .ok_or(StoreError::NotFound)?;
        if version.published_at.is_some() {
            return Ok(false);
        }
        version.published_at = Some(at);
        Ok(true)
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn insert_deployment(&self, deployment: &Deployment) -> Result<()> {
        self.inner
            .lock()
            .deployments
            .insert(deployment.id, deployment.clone());
        Ok(())
    }

    async fn get_deployment(&self, id: DeploymentId) -> Result<Option<Deployment>> {
        Ok(self.inner.lock().deployments.get(&id).cloned())
    }

    async fn list_deployments(
        &self,
        owner: Option<UserId>,
        filter: &DeploymentFilter,
        page: Page,
    ) -> Result<Vec<Deployment>> {
        let inner = self.inner.lock();
        let mut deployments: Vec<_> = inner
            .deployments
            .values()
            .filter(|d| owner.is_none_or(|o| d.owner_id == o))
            .filter(|d| filter.agent_id.is_none_or(|a| d.agent_id == a))
            .filter(|d| filter.status.is_none_or(|s| d.status == s))
            .cloned()
            .collect();
        deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paged(&deployments, page))
    }

    async fn lease_next(&self, worker: &str, lease: Duration) -> Result<Option<Deployment>> {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let id = inner
            .deployments
            .values()
            .filter(|d| {
                matches!(
                    d.status,
                    DeploymentStatus::Pending | DeploymentStatus::Deploying
                ) && d.lease_expires_at.is_none_or(|at| at < now)
            })
            .min_by_key(|d| d.created_at)
            .map(|d| d.id);

        let Some(id) = id else { return Ok(None) };
        let deployment = inner.deployments.get_mut(&id).ok_or(StoreError::NotFound)?;
        deployment.leased_by = Some(worker.to_string());
        deployment.lease_expires_at = Some(lease_deadline(lease));
        Ok(Some(deployment.clone()))
    }

    async fn renew_lease(&self, id: DeploymentId, worker: &str, lease: Duration) -> Result<bool> {
        let mut inner = self.inner.lock();
        let Some(deployment) = inner.deployments.get_mut(&id) else {
            return Ok(false);
        };
        if deployment.leased_by.as_deref() != Some(worker) {
            return Ok(false);
        }
        deployment.lease_expires_at = Some(lease_deadline(lease));
        Ok(true)
    }

    async fn release_lease(&self, id: DeploymentId, worker: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(deployment) = inner.deployments.get_mut(&id) {
            if deployment.leased_by.as_deref() == Some(worker) {
                deployment.leased_by = None;
                deployment.lease_expires_at = None;
            }
        }
        Ok(())
    }

    async fn transition(
        &self,
        id: DeploymentId,
        from: DeploymentStatus,
        to: DeploymentStatus,
        detail: Option<&str>,
        patch: DeploymentPatch,
    ) -> Result<bool> {
        let mut inner = self.inner.lock();
        let transition_id = inner.next_transition_id + 1;
        let deployment = inner.deployments.get_mut(&id).ok_or(StoreError::NotFound)?;
        if deployment.status != from {
            return Ok(false);
        }
        deployment.status = to;
        deployment.updated_at = Utc::now();
        if let Some(url) = patch.endpoint_url {
            deployment.endpoint_url = Some(url);
        }
        if let Some(message) = patch.error_message {
            deployment.error_message = Some(message);
        }
        if let Some(at) = patch.deployed_at {
            deployment.deployed_at = Some(at);
        }
        if let Some(at) = patch.stopped_at {
            deployment.stopped_at = Some(at);
        }
        if let Some(metadata) = &patch.metadata {
            merge_json(&mut deployment.metadata, metadata);
        }
        inner.next_transition_id = transition_id;
        inner.transitions.push(DeploymentTransition {
            id: transition_id,
            deployment_id: id,
            from_status: from,
            to_status: to,
            detail: detail.map(str::to_string),
            at: Utc::now(),
        });
        Ok(true)
    }

    async fn merge_metadata(&self, id: DeploymentId, patch: &Json) -> Result<()> {
        let mut inner = self.inner.lock();
        let deployment = inner.deployments.get_mut(&id).ok_or(StoreError::NotFound)?;
        merge_json(&mut deployment.metadata, patch);
        Ok(())
    }

    async fn request_stop(&self, id: DeploymentId) -> Result<()> {
        let mut inner = self.inner.lock();
        let deployment = inner.deployments.get_mut(&id).ok_or(StoreError::NotFound)?;
        deployment.stop_requested = true;
        Ok(())
    }

    async fn stop_requested(&self, id: DeploymentId) -> Result<bool> {
        let inner = self.inner.lock();
        inner
            .deployments
            .get(&id)
            .map(|d| d.stop_requested)
            .ok_or(StoreError::NotFound)
    }

    async fn transitions(&self, id: DeploymentId) -> Result<Vec<DeploymentTransition>> {
        Ok(self
            .inner
            .lock()
            .transitions
            .iter()
            .filter(|t| t.deployment_id == id)
            .cloned()
            .collect())
    }

    async fn running_deployment_for_agent(&self, agent_id: AgentId) -> Result<Option<Deployment>> {
        Ok(self
            .inner
            .lock()
            .deployments
            .values()
            .filter(|d| d.agent_id == agent_id && d.status == DeploymentStatus::Running)
            .max_by_key(|d| d.deployed_at)
            .cloned())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn insert_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.inner
            .lock()
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(())
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Option<Conversation>> {
        Ok(self.inner.lock().conversations.get(&id).cloned())
    }

    async fn insert_message(&self, message: &Message) -> Result<()> {
        self.inner.lock().messages.push(message.clone());
        Ok(())
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        page: Page,
    ) -> Result<Vec<Message>> {
        let inner = self.inner.lock();
        let mut messages: Vec<_> = inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(paged(&messages, page))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::types::{AgentStatus, BuildStrategyKind, DeployStrategyKind};
    use serde_json::json;

    fn test_agent(owner_id: UserId, name: &str) -> Agent {
        Agent {
            id: AgentId::generate(),
            owner_id,
            name: name.to_string(),
            description: String::new(),
            status: AgentStatus::Draft,
            tags: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn first_version(agent: &Agent) -> AgentVersion {
        AgentVersion {
            id: VersionId::generate(),
            agent_id: agent.id,
            owner_id: agent.owner_id,
            version_number: 1,
            config: json!({"nodes": [], "edges": []}),
            changelog: None,
            published_at: None,
            created_at: Utc::now(),
        }
    }

    fn test_deployment(agent: &Agent, version: &AgentVersion) -> Deployment {
        Deployment {
            id: DeploymentId::generate(),
            owner_id: agent.owner_id,
            agent_id: agent.id,
            agent_version_id: version.id,
            status: DeploymentStatus::Pending,
            endpoint_url: None,
            metadata: json!({}),
            error_message: None,
            build_strategy: BuildStrategyKind::HostedBuild,
            deploy_strategy: DeployStrategyKind::Serverless,
            stop_requested: false,
            leased_by: None,
            lease_expires_at: None,
            deployed_at: None,
            stopped_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_agent_name_conflicts() {
        let store = MemoryStore::new();
        let owner = UserId::generate();

        let agent = test_agent(owner, "same-name");
        store
            .create_agent_with_version(&agent, &first_version(&agent))
            .await
            .unwrap();

        let duplicate = test_agent(owner, "same-name");
        let result = store
            .create_agent_with_version(&duplicate, &first_version(&duplicate))
            .await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn version_numbers_are_gapless_under_concurrency() {
        let store = Arc::new(MemoryStore::new());
        let owner = UserId::generate();
        let agent = test_agent(owner, "concurrent");
        store
            .create_agent_with_version(&agent, &first_version(&agent))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = Arc::clone(&store);
            let agent_id = agent.id;
            handles.push(tokio::spawn(async move {
                store
                    .insert_next_version(agent_id, owner, &json!({}), None)
                    .await
                    .unwrap()
                    .version_number
            }));
        }

        let mut numbers: Vec<i32> = Vec::new();
        for handle in handles {
            numbers.push(handle.await.unwrap());
        }
        numbers.sort_unstable();
        assert_eq!(numbers, (2..=11).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn publish_is_set_at_most_once() {
        let store = MemoryStore::new();
        let owner = UserId::generate();
        let agent = test_agent(owner, "publish");
        let version = first_version(&agent);
        store
            .create_agent_with_version(&agent, &version)
            .await
            .unwrap();

        assert!(store.publish_version(version.id, Utc::now()).await.unwrap());
        assert!(!store.publish_version(version.id, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_released() {
        let store = MemoryStore::new();
        let owner = UserId::generate();
        let agent = test_agent(owner, "leased");
        let version = first_version(&agent);
        store
            .create_agent_with_version(&agent, &version)
            .await
            .unwrap();
        store
            .insert_deployment(&test_deployment(&agent, &version))
            .await
            .unwrap();

        let lease = Duration::from_secs(300);
        let first = store.lease_next("worker-a", lease).await.unwrap();
        assert!(first.is_some());

        // The same row must not be handed to a second worker.
        let second = store.lease_next("worker-b", lease).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn transition_refuses_wrong_from_status() {
        let store = MemoryStore::new();
        let owner = UserId::generate();
        let agent = test_agent(owner, "transitions");
        let version = first_version(&agent);
        store
            .create_agent_with_version(&agent, &version)
            .await
            .unwrap();
        let deployment = test_deployment(&agent, &version);
        store.insert_deployment(&deployment).await.unwrap();

        let applied = store
            .transition(
                deployment.id,
                DeploymentStatus::Running,
                DeploymentStatus::Stopped,
                None,
                DeploymentPatch::default(),
            )
            .await
            .unwrap();
        assert!(!applied);

        let applied = store
            .transition(
                deployment.id,
                DeploymentStatus::Pending,
                DeploymentStatus::Deploying,
                Some("leased"),
                DeploymentPatch::default(),
            )
            .await
            .unwrap();
        assert!(applied);

        let log = store.transitions(deployment.id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].to_status, DeploymentStatus::Deploying);
    }

    #[tokio::test]
    async fn metadata_merge_is_shallow() {
        let store = MemoryStore::new();
        let owner = UserId::generate();
        let agent = test_agent(owner, "metadata");
        let version = first_version(&agent);
        store
            .create_agent_with_version(&agent, &version)
            .await
            .unwrap();
        let deployment = test_deployment(&agent, &version);
        store.insert_deployment(&deployment).await.unwrap();

        store
            .merge_metadata(deployment.id, &json!({"build_job_id": "42"}))
            .await
            .unwrap();
        store
            .merge_metadata(deployment.id, &json!({"image_tag": "registry/img:latest"}))
            .await
            .unwrap();

        let stored = store.get_deployment(deployment.id).await.unwrap().unwrap();
        assert_eq!(stored.metadata["build_job_id"], "42");
        assert_eq!(stored.metadata["image_tag"], "registry/img:latest");
    }

    #[tokio::test]
    async fn messages_ordered_by_created_at_then_id() {
        let store = MemoryStore::new();
        let conversation = Conversation {
            id: ConversationId::generate(),
            owner_id: None,
            agent_id: None,
            title: None,
            metadata: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.insert_conversation(&conversation).await.unwrap();

        let at = Utc::now();
        for content in ["first", "second", "third"] {
            store
                .insert_message(&Message {
                    id: flowplane_core::MessageId::generate(),
                    conversation_id: conversation.id,
                    role: crate::types::MessageRole::User,
                    content: content.to_string(),
                    metadata: json!({}),
                    created_at: at,
                })
                .await
                .unwrap();
        }

        let messages = store
            .list_messages(conversation.id, Page::default())
            .await
            .unwrap();
        assert_eq!(messages.len(), 3);
        // Same created_at: ids break the tie deterministically.
        let mut ids: Vec<_> = messages.iter().map(|m| m.id).collect();
        let sorted = {
            let mut s = ids.clone();
            s.sort();
            s
        };
        ids.sort();
        assert_eq!(ids, sorted);
    }
}
