//! Identity queries.

use async_trait::async_trait;
use uuid::Uuid;

use flowplane_core::{ClientId, UserId};

use crate::error::{Result, StoreError};
use crate::types::{MachineClient, Permission, Profile, Role};
use crate::IdentityStore;

use super::{machine_client_from_row, permission_from_row, profile_from_row, role_from_row, PgStore};

#[async_trait]
impl IdentityStore for PgStore {
    async fn register_user(&self, profile: &Profile, default_role: &str) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "INSERT INTO profiles (user_id, email, display_name, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(profile.user_id.as_uuid())
        .bind(&profile.email)
        .bind(&profile.display_name)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .execute(&mut *tx)
        .await?;

        let role_id: Uuid = sqlx::query_scalar("SELECT id FROM roles WHERE name = $1")
            .bind(default_role)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound)?;

        sqlx::query(
            "INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(profile.user_id.as_uuid())
        .bind(role_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_profile(&self, user_id: UserId) -> Result<Option<Profile>> {
        sqlx::query("SELECT * FROM profiles WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(self.pool())
            .await?
            .map(|row| profile_from_row(&row))
            .transpose()
    }

    async fn get_profile_by_email(&self, email: &str) -> Result<Option<Profile>> {
        sqlx::query("SELECT * FROM profiles WHERE email = $1")
            .bind(email)
            .fetch_optional(self.pool())
            .await?
            .map(|row| profile_from_row(&row))
            .transpose()
    }

    async fn update_display_name(&self, user_id: UserId, display_name: &str) -> Result<Profile> {
        let row = sqlx::query(
            "UPDATE profiles SET display_name = $2 WHERE user_id = $1 RETURNING *",
        )
        .bind(user_id.as_uuid())
        .bind(display_name)
        .fetch_optional(self.pool())
        .await?
        .ok_or(StoreError::NotFound)?;

        profile_from_row(&row)
    }

    async fn insert_role(&self, role: &Role) -> Result<()> {
        sqlx::query(
            "INSERT INTO roles (id, name, description, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(role.id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        sqlx::query("SELECT * FROM roles ORDER BY name")
            .fetch_all(self.pool())
            .await?
            .iter()
            .map(role_from_row)
            .collect()
    }

    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        sqlx::query("SELECT * FROM roles WHERE name = $1")
            .bind(name)
            .fetch_optional(self.pool())
            .await?
            .map(|row| role_from_row(&row))
            .transpose()
    }

    async fn delete_role(&self, role_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(role_id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn insert_permission(&self, permission: &Permission) -> Result<()> {
        sqlx::query(
            "INSERT INTO permissions (id, name, description, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(permission.id)
        .bind(&permission.name)
        .bind(&permission.description)
        .bind(permission.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>> {
        sqlx::query("SELECT * FROM permissions ORDER BY name")
            .fetch_all(self.pool())
            .await?
            .iter()
            .map(permission_from_row)
            .collect()
    }

    async fn get_permission_by_name(&self, name: &str) -> Result<Option<Permission>> {
        sqlx::query("SELECT * FROM permissions WHERE name = $1")
            .bind(name)
            .fetch_optional(self.pool())
            .await?
            .map(|row| permission_from_row(&row))
            .transpose()
    }

    async fn delete_permission(&self, permission_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(permission_id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn attach_permission(&self, role_id: Uuid, permission_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(role_id)
        .bind(permission_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn assign_user_role(&self, user_id: UserId, role_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(user_id.as_uuid())
        .bind(role_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn assign_client_role(&self, client_id: ClientId, role_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO client_roles (client_id, role_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(client_id.as_uuid())
        .bind(role_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn insert_machine_client(&self, client: &MachineClient) -> Result<()> {
        sqlx::query(
            "INSERT INTO machine_clients (client_id, name, secret_hash, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(client.client_id.as_uuid())
        .bind(&client.name)
        .bind(&client.secret_hash)
        .bind(client.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_machine_client(&self, client_id: ClientId) -> Result<Option<MachineClient>> {
        sqlx::query("SELECT * FROM machine_clients WHERE client_id = $1")
            .bind(client_id.as_uuid())
            .fetch_optional(self.pool())
            .await?
            .map(|row| machine_client_from_row(&row))
            .transpose()
    }

    async fn get_machine_client_by_name(&self, name: &str) -> Result<Option<MachineClient>> {
        sqlx::query("SELECT * FROM machine_clients WHERE name = $1")
            .bind(name)
            .fetch_optional(self.pool())
            .await?
            .map(|row| machine_client_from_row(&row))
            .transpose()
    }

    async fn revoke_machine_client(&self, client_id: ClientId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE machine_clients SET revoked_at = now()
             WHERE client_id = $1 AND revoked_at IS NULL",
        )
        .bind(client_id.as_uuid())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn roles_for_user(&self, user_id: UserId) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT r.name FROM roles r
             JOIN user_roles ur ON ur.role_id = r.id
             WHERE ur.user_id = $1
             ORDER BY r.name",
        )
        .bind(user_id.as_uuid())
        .fetch_all(self.pool())
        .await?;
        Ok(names)
    }

    async fn roles_for_client(&self, client_id: ClientId) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT r.name FROM roles r
             JOIN client_roles cr ON cr.role_id = r.id
             WHERE cr.client_id = $1
             ORDER BY r.name",
        )
        .bind(client_id.as_uuid())
        .fetch_all(self.pool())
        .await?;
        Ok(names)
    }

    async fn permissions_for_roles(&self, roles: &[String]) -> Result<Vec<String>> {
        if roles.is_empty() {
            return Ok(Vec::new());
        }
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT p.name FROM permissions p
             JOIN role_permissions rp ON rp.permission_id = p.id
             JOIN roles r ON r.id = rp.role_id
             WHERE r.name = ANY($1)
             ORDER BY p.name",
        )
        .bind(roles)
        .fetch_all(self.pool())
        .await?;
        Ok(names)
    }
}
