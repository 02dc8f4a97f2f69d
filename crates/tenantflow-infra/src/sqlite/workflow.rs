//! SQLite workflow repository implementation.
//!
//! Live-name uniqueness is enforced by a partial unique index over
//! `(organization_id, name) WHERE deleted_at IS NULL`; creation order by the
//! `seq` rowid.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use sqlx::Row;
use tenantflow_core::repository::workflow::WorkflowRepository;
use tenantflow_types::error::RepositoryError;
use tenantflow_types::tenant::{OrganizationId, UserId};
use tenantflow_types::workflow::{EngineType, JobProgress, Workflow, WorkflowId, WorkflowStatus};

use super::pool::DatabasePool;
use super::{format_datetime, is_unique_violation, parse_datetime, query_error};

/// SQLite-backed implementation of `WorkflowRepository`.
#[derive(Clone)]
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

/// Internal row type for mapping SQLite rows to domain Workflow.
struct WorkflowRow {
    id: String,
    name: String,
    engine_type: String,
    parameters: String,
    specification: String,
    status: String,
    organization_id: String,
    user_id: String,
    workspace_path: String,
    logs: String,
    job_progress: String,
    created_at: String,
    updated_at: String,
    run_started_at: Option<String>,
    run_finished_at: Option<String>,
}

impl WorkflowRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            engine_type: row.try_get("engine_type")?,
            parameters: row.try_get("parameters")?,
            specification: row.try_get("specification")?,
            status: row.try_get("status")?,
            organization_id: row.try_get("organization_id")?,
            user_id: row.try_get("user_id")?,
            workspace_path: row.try_get("workspace_path")?,
            logs: row.try_get("logs")?,
            job_progress: row.try_get("job_progress")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            run_started_at: row.try_get("run_started_at")?,
            run_finished_at: row.try_get("run_finished_at")?,
        })
    }

    fn into_workflow(self) -> Result<Workflow, RepositoryError> {
        let id = self
            .id
            .parse::<WorkflowId>()
            .map_err(|e| RepositoryError::Query(format!("invalid workflow id: {e}")))?;
        let organization_id = self
            .organization_id
            .parse::<OrganizationId>()
            .map_err(|e| RepositoryError::Query(format!("invalid organization id: {e}")))?;
        let user_id = self
            .user_id
            .parse::<UserId>()
            .map_err(|e| RepositoryError::Query(format!("invalid user id: {e}")))?;
        let status: WorkflowStatus = self.status.parse().map_err(RepositoryError::Query)?;
        let parameters: BTreeMap<String, String> = serde_json::from_str(&self.parameters)
            .map_err(|e| RepositoryError::Query(format!("invalid parameters JSON: {e}")))?;
        let specification: serde_json::Value = serde_json::from_str(&self.specification)
            .map_err(|e| RepositoryError::Query(format!("invalid specification JSON: {e}")))?;
        let job_progress: JobProgress = serde_json::from_str(&self.job_progress)
            .map_err(|e| RepositoryError::Query(format!("invalid job progress JSON: {e}")))?;

        Ok(Workflow {
            id,
            name: self.name,
            engine_type: EngineType::new(&self.engine_type),
            parameters,
            specification,
            status,
            organization_id,
            user_id,
            workspace_path: PathBuf::from(self.workspace_path),
            logs: self.logs,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            run_started_at: self.run_started_at.as_deref().map(parse_datetime).transpose()?,
            run_finished_at: self.run_finished_at.as_deref().map(parse_datetime).transpose()?,
            job_progress,
        })
    }
}

fn encode_progress(progress: &JobProgress) -> Result<String, RepositoryError> {
    serde_json::to_string(progress).map_err(|e| RepositoryError::Query(e.to_string()))
}

fn workflow_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Workflow, RepositoryError> {
    WorkflowRow::from_row(row)
        .map_err(|e| RepositoryError::Query(e.to_string()))?
        .into_workflow()
}

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn insert(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let parameters = serde_json::to_string(&workflow.parameters)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let specification = serde_json::to_string(&workflow.specification)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let job_progress = encode_progress(&workflow.job_progress)?;

        let result = sqlx::query(
            "INSERT INTO workflows (id, name, engine_type, parameters, specification, status, organization_id, user_id, workspace_path, logs, job_progress, created_at, updated_at, run_started_at, run_finished_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(workflow.engine_type.as_str())
        .bind(&parameters)
        .bind(&specification)
        .bind(workflow.status.to_string())
        .bind(workflow.organization_id.to_string())
        .bind(workflow.user_id.to_string())
        .bind(workflow.workspace_path.to_string_lossy().into_owned())
        .bind(&workflow.logs)
        .bind(&job_progress)
        .bind(format_datetime(&workflow.created_at))
        .bind(format_datetime(&workflow.updated_at))
        .bind(workflow.run_started_at.as_ref().map(format_datetime))
        .bind(workflow.run_finished_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(RepositoryError::Conflict(format!(
                "workflow '{}' already exists",
                workflow.name
            ))),
            Err(e) => Err(query_error(e)),
        }
    }

    async fn get(&self, id: &WorkflowId) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = ? AND deleted_at IS NULL")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;
        row.as_ref().map(workflow_from_row).transpose()
    }

    async fn get_by_name(
        &self,
        organization_id: &OrganizationId,
        name: &str,
    ) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM workflows WHERE organization_id = ? AND name = ? AND deleted_at IS NULL",
        )
        .bind(organization_id.to_string())
        .bind(name)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;
        row.as_ref().map(workflow_from_row).transpose()
    }

    async fn list(
        &self,
        organization_id: &OrganizationId,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM workflows
                     WHERE organization_id = ? AND status = ? AND deleted_at IS NULL
                     ORDER BY seq",
                )
                .bind(organization_id.to_string())
                .bind(status.to_string())
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM workflows
                     WHERE organization_id = ? AND deleted_at IS NULL
                     ORDER BY seq",
                )
                .bind(organization_id.to_string())
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(query_error)?;

        rows.iter().map(workflow_from_row).collect()
    }

    async fn update(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let job_progress = encode_progress(&workflow.job_progress)?;
        let result = sqlx::query(
            "UPDATE workflows
             SET status = ?, logs = ?, job_progress = ?, updated_at = ?, run_started_at = ?, run_finished_at = ?
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(workflow.status.to_string())
        .bind(&workflow.logs)
        .bind(&job_progress)
        .bind(format_datetime(&workflow.updated_at))
        .bind(workflow.run_started_at.as_ref().map(format_datetime))
        .bind(workflow.run_finished_at.as_ref().map(format_datetime))
        .bind(workflow.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: &WorkflowId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn mark_deleted(&self, id: &WorkflowId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE workflows SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(format_datetime(&at))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn next_name_sequence(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<u64, RepositoryError> {
        let row = sqlx::query(
            "INSERT INTO name_sequences (organization_id, last_value) VALUES (?, 1)
             ON CONFLICT(organization_id) DO UPDATE SET last_value = last_value + 1
             RETURNING last_value",
        )
        .bind(organization_id.to_string())
        .fetch_one(&self.pool.writer)
        .await
        .map_err(query_error)?;

        let value: i64 = row.try_get("last_value").map_err(query_error)?;
        u64::try_from(value).map_err(|e| RepositoryError::Query(format!("invalid sequence value: {e}")))
    }
}
