//! SQLite tenant repository implementation.

use sqlx::Row;
use tenantflow_core::repository::tenant::TenantRepository;
use tenantflow_types::error::RepositoryError;
use tenantflow_types::tenant::{Organization, OrganizationId, User, UserId};

use super::pool::DatabasePool;
use super::{format_datetime, is_foreign_key_violation, is_unique_violation, parse_datetime, query_error};

/// SQLite-backed implementation of `TenantRepository`.
#[derive(Clone)]
pub struct SqliteTenantRepository {
    pool: DatabasePool,
}

impl SqliteTenantRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn organization_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Organization, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_error)?;
    let created_at: String = row.try_get("created_at").map_err(query_error)?;
    Ok(Organization {
        id: id
            .parse::<OrganizationId>()
            .map_err(|e| RepositoryError::Query(format!("invalid organization id: {e}")))?,
        name: row.try_get("name").map_err(query_error)?,
        created_at: parse_datetime(&created_at)?,
    })
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<User, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_error)?;
    let created_at: String = row.try_get("created_at").map_err(query_error)?;
    Ok(User {
        id: id
            .parse::<UserId>()
            .map_err(|e| RepositoryError::Query(format!("invalid user id: {e}")))?,
        email: row.try_get("email").map_err(query_error)?,
        created_at: parse_datetime(&created_at)?,
    })
}

impl TenantRepository for SqliteTenantRepository {
    async fn create_organization(
        &self,
        organization: &Organization,
    ) -> Result<Organization, RepositoryError> {
        let result = sqlx::query("INSERT INTO organizations (id, name, created_at) VALUES (?, ?, ?)")
            .bind(organization.id.to_string())
            .bind(&organization.name)
            .bind(format_datetime(&organization.created_at))
            .execute(&self.pool.writer)
            .await;

        match result {
            Ok(_) => Ok(organization.clone()),
            Err(e) if is_unique_violation(&e) => Err(RepositoryError::Conflict(format!(
                "organization '{}' already exists",
                organization.name
            ))),
            Err(e) => Err(query_error(e)),
        }
    }

    async fn get_organization(
        &self,
        id: &OrganizationId,
    ) -> Result<Option<Organization>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM organizations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;
        row.as_ref().map(organization_from_row).transpose()
    }

    async fn get_organization_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Organization>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM organizations WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;
        row.as_ref().map(organization_from_row).transpose()
    }

    async fn list_organizations(&self) -> Result<Vec<Organization>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM organizations ORDER BY name")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;
        rows.iter().map(organization_from_row).collect()
    }

    async fn create_user(&self, user: &User) -> Result<User, RepositoryError> {
        let result = sqlx::query("INSERT INTO users (id, email, created_at) VALUES (?, ?, ?)")
            .bind(user.id.to_string())
            .bind(&user.email)
            .bind(format_datetime(&user.created_at))
            .execute(&self.pool.writer)
            .await;

        match result {
            Ok(_) => Ok(user.clone()),
            Err(e) if is_unique_violation(&e) => Err(RepositoryError::Conflict(format!(
                "user '{}' already exists",
                user.email
            ))),
            Err(e) => Err(query_error(e)),
        }
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn link_user(
        &self,
        organization_id: &OrganizationId,
        user_id: &UserId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO user_organizations (user_id, organization_id, created_at)
             VALUES (?, ?, ?)",
        )
        .bind(user_id.to_string())
        .bind(organization_id.to_string())
        .bind(format_datetime(&chrono::Utc::now()))
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() == 1),
            Err(e) if is_foreign_key_violation(&e) => Err(RepositoryError::NotFound),
            Err(e) => Err(query_error(e)),
        }
    }

    async fn is_member(
        &self,
        organization_id: &OrganizationId,
        user_id: &UserId,
    ) -> Result<bool, RepositoryError> {
        let row = sqlx::query(
            "SELECT 1 FROM user_organizations WHERE user_id = ? AND organization_id = ?",
        )
        .bind(user_id.to_string())
        .bind(organization_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;
        Ok(row.is_some())
    }
}
