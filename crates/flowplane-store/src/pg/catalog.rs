//! Catalog queries.
//!
//! Version allocation takes a `FOR UPDATE` lock on the parent agent row so
//! that concurrent writers serialize and version numbers stay gapless.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as Json;

use flowplane_core::{AgentId, Page, UserId, VersionId};

use crate::error::{Result, StoreError};
use crate::types::{Agent, AgentFilter, AgentVersion};
use crate::CatalogStore;

use super::{agent_from_row, version_from_row, PgStore};

#[async_trait]
impl CatalogStore for PgStore {
    async fn create_agent_with_version(&self, agent: &Agent, version: &AgentVersion) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "INSERT INTO agents (id, owner_id, name, description, status, tags, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(agent.id.as_uuid())
        .bind(agent.owner_id.as_uuid())
        .bind(&agent.name)
        .bind(&agent.description)
        .bind(agent.status.as_str())
        .bind(&agent.tags)
        .bind(agent.created_at)
        .bind(agent.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO agent_versions
                 (id, agent_id, owner_id, version_number, config, changelog, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(version.id.as_uuid())
        .bind(version.agent_id.as_uuid())
        .bind(version.owner_id.as_uuid())
        .bind(version.version_number)
        .bind(&version.config)
        .bind(&version.changelog)
        .bind(version.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_agent(&self, agent_id: AgentId) -> Result<Option<Agent>> {
        sqlx::query("SELECT * FROM agents WHERE id = $1")
            .bind(agent_id.as_uuid())
            .fetch_optional(self.pool())
            .await?
            .map(|row| agent_from_row(&row))
            .transpose()
    }

    async fn list_agents(
        &self,
        owner: Option<UserId>,
        filter: &AgentFilter,
        page: Page,
    ) -> Result<Vec<Agent>> {
        #[allow(clippy::cast_possible_wrap)]
        let rows = sqlx::query(
            "SELECT * FROM agents
             WHERE ($1::uuid IS NULL OR owner_id = $1)
               AND ($2::text IS NULL OR status = $2)
               AND ($3::text IS NULL OR $3 = ANY(tags))
               AND ($4::text IS NULL OR name ILIKE '%' || $4 || '%')
             ORDER BY created_at DESC
             LIMIT $5 OFFSET $6",
        )
        .bind(owner.as_ref().map(UserId::as_uuid))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(&filter.tag)
        .bind(&filter.name_contains)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(agent_from_row).collect()
    }

    async fn update_agent(&self, agent: &Agent) -> Result<()> {
        let result = sqlx::query(
            "UPDATE agents SET description = $2, status = $3, tags = $4 WHERE id = $1",
        )
        .bind(agent.id.as_uuid())
        .bind(&agent.description)
        .bind(agent.status.as_str())
        .bind(&agent.tags)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn insert_next_version(
        &self,
        agent_id: AgentId,
        owner_id: UserId,
        config: &Json,
        changelog: Option<&str>,
    ) -> Result<AgentVersion> {
        let mut tx = self.pool().begin().await?;

        // Serialize concurrent version writers on the parent row.
        sqlx::query("SELECT id FROM agents WHERE id = $1 FOR UPDATE")
            .bind(agent_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound)?;

        let current: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version_number), 0) FROM agent_versions WHERE agent_id = $1",
        )
        .bind(agent_id.as_uuid())
        .fetch_one(&mut *tx)
        .await?;

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

        sqlx::query(
            "INSERT INTO agent_versions
                 (id, agent_id, owner_id, version_number, config, changelog, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(version.id.as_uuid())
        .bind(version.agent_id.as_uuid())
        .bind(version.owner_id.as_uuid())
        .bind(version.version_number)
        .bind(&version.config)
        .bind(&version.changelog)
        .bind(version.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE agents SET updated_at = now() WHERE id = $1")
            .bind(agent_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(version)
    }

    async fn get_version(&self, version_id: VersionId) -> Result<Option<AgentVersion>> {
        sqlx::query("SELECT * FROM agent_versions WHERE id = $1")
            .bind(version_id.as_uuid())
            .fetch_optional(self.pool())
            .await?
            .map(|row| version_from_row(&row))
            .transpose()
    }

    async fn latest_version(&self, agent_id: AgentId) -> Result<Option<AgentVersion>> {
        sqlx::query(
            "SELECT * FROM agent_versions WHERE agent_id = $1
             ORDER BY version_number DESC LIMIT 1",
        )
        .bind(agent_id.as_uuid())
        .fetch_optional(self.pool())
        .await?
        .map(|row| version_from_row(&row))
        .transpose()
    }

    async fn list_versions(&self, agent_id: AgentId, page: Page) -> Result<Vec<AgentVersion>> {
        #[allow(clippy::cast_possible_wrap)]
        let rows = sqlx::query(
            "SELECT * FROM agent_versions WHERE agent_id = $1
             ORDER BY version_number DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(agent_id.as_uuid())
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(version_from_row).collect()
    }

    async fn publish_version(&self, version_id: VersionId, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE agent_versions SET published_at = $2
             WHERE id = $1 AND published_at IS NULL",
        )
        .bind(version_id.as_uuid())
        .bind(at)
        .execute(self.pool())
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // Distinguish "already published" from "no such version".
        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM agent_versions WHERE id = $1")
            .bind(version_id.as_uuid())
            .fetch_optional(self.pool())
            .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }
        Ok(false)
    }
}
