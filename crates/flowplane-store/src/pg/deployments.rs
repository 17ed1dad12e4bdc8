//! Deployment queries: the durable job queue, lease management, and the
//! transition log.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as Json;

use flowplane_core::{AgentId, DeploymentId, Page, UserId};

use crate::error::{Result, StoreError};
use crate::types::{
    Deployment, DeploymentFilter, DeploymentPatch, DeploymentStatus, DeploymentTransition,
};
use crate::DeploymentStore;

use super::{deployment_from_row, lease_deadline, transition_from_row, PgStore};

#[async_trait]
impl DeploymentStore for PgStore {
    async fn insert_deployment(&self, deployment: &Deployment) -> Result<()> {
        sqlx::query(
            "INSERT INTO deployments
                 (id, owner_id, agent_id, agent_version_id, status, metadata,
                  build_strategy, deploy_strategy, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(deployment.id.as_uuid())
        .bind(deployment.owner_id.as_uuid())
        .bind(deployment.agent_id.as_uuid())
        .bind(deployment.agent_version_id.as_uuid())
        .bind(deployment.status.as_str())
        .bind(&deployment.metadata)
        .bind(deployment.build_strategy.as_str())
        .bind(deployment.deploy_strategy.as_str())
        .bind(deployment.created_at)
        .bind(deployment.updated_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_deployment(&self, id: DeploymentId) -> Result<Option<Deployment>> {
        sqlx::query("SELECT * FROM deployments WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(self.pool())
            .await?
            .map(|row| deployment_from_row(&row))
            .transpose()
    }

    async fn list_deployments(
        &self,
        owner: Option<UserId>,
        filter: &DeploymentFilter,
        page: Page,
    ) -> Result<Vec<Deployment>> {
        #[allow(clippy::cast_possible_wrap)]
        let rows = sqlx::query(
            "SELECT * FROM deployments
             WHERE ($1::uuid IS NULL OR owner_id = $1)
               AND ($2::uuid IS NULL OR agent_id = $2)
               AND ($3::text IS NULL OR status = $3)
             ORDER BY created_at DESC
             LIMIT $4 OFFSET $5",
        )
        .bind(owner.as_ref().map(UserId::as_uuid))
        .bind(filter.agent_id.as_ref().map(AgentId::as_uuid))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(deployment_from_row).collect()
    }

    async fn lease_next(&self, worker: &str, lease: Duration) -> Result<Option<Deployment>> {
        let mut tx = self.pool().begin().await?;

        // Pending rows have no lease; deploying rows with an expired lease
        // belonged to a crashed worker and become leasable again.
        let row = sqlx::query(
            "SELECT * FROM deployments
             WHERE status IN ('pending', 'deploying')
               AND (lease_expires_at IS NULL OR lease_expires_at < $1)
             ORDER BY created_at
             LIMIT 1
             FOR UPDATE SKIP LOCKED",
        )
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let mut deployment = deployment_from_row(&row)?;
        let expires = lease_deadline(lease);

        sqlx::query(
            "UPDATE deployments SET leased_by = $2, lease_expires_at = $3 WHERE id = $1",
        )
        .bind(deployment.id.as_uuid())
        .bind(worker)
        .bind(expires)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        deployment.leased_by = Some(worker.to_string());
        deployment.lease_expires_at = Some(expires);
        Ok(Some(deployment))
    }

    async fn renew_lease(&self, id: DeploymentId, worker: &str, lease: Duration) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE deployments SET lease_expires_at = $3
             WHERE id = $1 AND leased_by = $2",
        )
        .bind(id.as_uuid())
        .bind(worker)
        .bind(lease_deadline(lease))
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_lease(&self, id: DeploymentId, worker: &str) -> Result<()> {
        sqlx::query(
            "UPDATE deployments SET leased_by = NULL, lease_expires_at = NULL
             WHERE id = $1 AND leased_by = $2",
        )
        .bind(id.as_uuid())
        .bind(worker)
        .execute(self.pool())
        .await?;
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
        let mut tx = self.pool().begin().await?;

        let updated = sqlx::query(
            "UPDATE deployments SET
                 status = $3,
                 endpoint_url = COALESCE($4, endpoint_url),
                 error_message = COALESCE($5, error_message),
                 deployed_at = COALESCE($6, deployed_at),
                 stopped_at = COALESCE($7, stopped_at),
                 metadata = metadata || COALESCE($8, '{}'::jsonb)
             WHERE id = $1 AND status = $2
             RETURNING id",
        )
        .bind(id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(&patch.endpoint_url)
        .bind(&patch.error_message)
        .bind(patch.deployed_at)
        .bind(patch.stopped_at)
        .bind(&patch.metadata)
        .fetch_optional(&mut *tx)
        .await?;

        if updated.is_none() {
            tx.rollback().await?;

            let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM deployments WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(self.pool())
                .await?;
            if exists.is_none() {
                return Err(StoreError::NotFound);
            }
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO deployment_transitions (deployment_id, from_status, to_status, detail)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(detail)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn merge_metadata(&self, id: DeploymentId, patch: &Json) -> Result<()> {
        let result = sqlx::query(
            "UPDATE deployments SET metadata = metadata || $2 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(patch)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn request_stop(&self, id: DeploymentId) -> Result<()> {
        let result = sqlx::query("UPDATE deployments SET stop_requested = true WHERE id = $1")
            .bind(id.as_uuid())
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn stop_requested(&self, id: DeploymentId) -> Result<bool> {
        sqlx::query_scalar("SELECT stop_requested FROM deployments WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(self.pool())
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn transitions(&self, id: DeploymentId) -> Result<Vec<DeploymentTransition>> {
        sqlx::query(
            "SELECT * FROM deployment_transitions WHERE deployment_id = $1 ORDER BY id",
        )
        .bind(id.as_uuid())
        .fetch_all(self.pool())
        .await?
        .iter()
        .map(transition_from_row)
        .collect()
    }

    async fn running_deployment_for_agent(&self, agent_id: AgentId) -> Result<Option<Deployment>> {
        sqlx::query(
            "SELECT * FROM deployments
             WHERE agent_id = $1 AND status = 'running'
             ORDER BY deployed_at DESC NULLS LAST
             LIMIT 1",
        )
        .bind(agent_id.as_uuid())
        .fetch_optional(self.pool())
        .await?
        .map(|row| deployment_from_row(&row))
        .transpose()
    }
}
