use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tenant::{OrganizationId, UserId};

/// Unique identifier for a workflow, wrapping a UUID v7 (time-sortable).
///
/// Also names the workflow's workspace directory on the shared volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    /// Create a new WorkflowId using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkflowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Status state machine
// ---------------------------------------------------------------------------

/// Workflow lifecycle states.
///
/// ```text
/// created -> pending -> running -> finished | failed | stopped
///                    \-> failed | stopped
/// ```
///
/// - Created: submission validated, workspace not yet materialized
/// - Pending: record and workspace exist, queued for an execution engine
/// - Running: the engine acknowledged the start
/// - Finished / Failed: terminal outcomes reported by the engine
/// - Stopped: terminal, reached through operator cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Created,
    Pending,
    Running,
    Finished,
    Failed,
    Stopped,
}

impl WorkflowStatus {
    pub const ALL: [WorkflowStatus; 6] = [
        WorkflowStatus::Created,
        WorkflowStatus::Pending,
        WorkflowStatus::Running,
        WorkflowStatus::Finished,
        WorkflowStatus::Failed,
        WorkflowStatus::Stopped,
    ];

    /// No further transition is possible from a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Finished | WorkflowStatus::Failed | WorkflowStatus::Stopped
        )
    }

    /// Active workflows may be stopped and must not be deleted.
    pub fn is_active(&self) -> bool {
        matches!(self, WorkflowStatus::Pending | WorkflowStatus::Running)
    }

    /// Whether `self -> next` is an edge of the lifecycle state machine.
    ///
    /// `pending -> failed` is the explicit failure path for an engine that could
    /// not start the workflow. Self-transitions are not edges.
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Created, Pending)
                | (Pending, Running)
                | (Pending, Failed)
                | (Pending, Stopped)
                | (Running, Finished)
                | (Running, Failed)
                | (Running, Stopped)
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Created => write!(f, "created"),
            WorkflowStatus::Pending => write!(f, "pending"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Finished => write!(f, "finished"),
            WorkflowStatus::Failed => write!(f, "failed"),
            WorkflowStatus::Stopped => write!(f, "stopped"),
        }
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created" => Ok(WorkflowStatus::Created),
            "pending" => Ok(WorkflowStatus::Pending),
            "running" => Ok(WorkflowStatus::Running),
            "finished" => Ok(WorkflowStatus::Finished),
            "failed" => Ok(WorkflowStatus::Failed),
            "stopped" => Ok(WorkflowStatus::Stopped),
            other => Err(format!("invalid workflow status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine type
// ---------------------------------------------------------------------------

/// Name of the execution engine that interprets a workflow specification
/// (`cwl`, `yadage`, `serial`, ...).
///
/// The set is open: which engine types are accepted is decided by the
/// controller configuration, not by this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineType(String);

impl EngineType {
    /// Normalizes to trimmed lowercase.
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EngineType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ---------------------------------------------------------------------------
// Workflow record
// ---------------------------------------------------------------------------

/// A submitted workflow and its lifecycle bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    /// Unique among live workflows of the organization.
    pub name: String,
    pub engine_type: EngineType,
    pub parameters: BTreeMap<String, String>,
    /// Opaque document interpreted by the engine. Always a JSON object.
    pub specification: serde_json::Value,
    pub status: WorkflowStatus,
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    /// `<volume>/<organization>/<workflow id>/`
    pub workspace_path: PathBuf,
    /// Accumulated engine log output.
    #[serde(default)]
    pub logs: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_finished_at: Option<DateTime<Utc>>,
    /// Per-job progress reported by the engine while the workflow runs.
    #[serde(default)]
    pub job_progress: JobProgress,
}

impl Workflow {
    /// Build a fresh record in `created` state.
    pub fn from_new(new: NewWorkflow, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            name: new.name,
            engine_type: new.engine_type,
            parameters: new.parameters,
            specification: new.specification,
            status: WorkflowStatus::Created,
            organization_id: new.organization_id,
            user_id: new.user_id,
            workspace_path: new.workspace_path,
            logs: String::new(),
            created_at: now,
            updated_at: now,
            run_started_at: None,
            run_finished_at: None,
            job_progress: JobProgress::default(),
        }
    }

    /// Set the status and stamp run timestamps. Legality is checked by the caller.
    pub fn apply_status(&mut self, status: WorkflowStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
        if status == WorkflowStatus::Running && self.run_started_at.is_none() {
            self.run_started_at = Some(now);
        }
        if status.is_terminal() && self.run_finished_at.is_none() {
            self.run_finished_at = Some(now);
        }
    }

    /// Append a chunk of engine output. Empty chunks are ignored.
    pub fn append_logs(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        if !self.logs.is_empty() && !self.logs.ends_with('\n') {
            self.logs.push('\n');
        }
        self.logs.push_str(chunk);
    }
}

// ---------------------------------------------------------------------------
// Job progress
// ---------------------------------------------------------------------------

/// Number of jobs in one progress bucket and the ids of the jobs seen so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCount {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub job_ids: BTreeSet<String>,
}

/// Accumulated job progress of a workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobProgress {
    /// Number of jobs the engine planned. Fixed by the first non-zero report.
    pub total: JobCount,
    pub running: JobCount,
    pub finished: JobCount,
    pub failed: JobCount,
}

impl JobProgress {
    /// Fold an engine progress report into the accumulated progress.
    ///
    /// `total` is only taken while no total is known yet. The other buckets
    /// collect the union of reported job ids and count them.
    pub fn merge(&mut self, update: &ProgressUpdate) {
        if let Some(total) = &update.total {
            if self.total.total == 0 {
                self.total = total.clone();
            }
        }
        for (bucket, reported) in [
            (&mut self.running, &update.running),
            (&mut self.finished, &update.finished),
            (&mut self.failed, &update.failed),
        ] {
            if let Some(reported) = reported {
                bucket.job_ids.extend(reported.job_ids.iter().cloned());
                bucket.total = bucket.job_ids.len() as u64;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Progress section of a status report. Absent buckets leave the
/// accumulated progress untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<JobCount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<JobCount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<JobCount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<JobCount>,
}

/// Input to the workflow store's `create`.
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub id: WorkflowId,
    pub name: String,
    pub engine_type: EngineType,
    pub parameters: BTreeMap<String, String>,
    pub specification: serde_json::Value,
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub workspace_path: PathBuf,
}

/// Submission payload.
///
/// ```json
/// {"name": "", "type": "cwl", "parameters": {"min_year": "1991"}, "specification": {...}}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitWorkflowRequest {
    /// May be empty, in which case a name is generated.
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub engine_type: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    pub specification: serde_json::Value,
}

/// A status callback from an execution engine.
///
/// Every field may be absent: a report with only `logs` appends output
/// without touching the status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(alias = "workflow_uuid")]
    pub workflow_id: WorkflowId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkflowStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressUpdate>,
}

impl StatusReport {
    pub fn status(workflow_id: WorkflowId, status: WorkflowStatus) -> Self {
        Self {
            workflow_id,
            status: Some(status),
            logs: None,
            progress: None,
        }
    }

    /// A report carrying only log output.
    pub fn logs(workflow_id: WorkflowId, logs: impl Into<String>) -> Self {
        Self {
            workflow_id,
            status: None,
            logs: Some(logs.into()),
            progress: None,
        }
    }

    pub fn with_logs(mut self, logs: impl Into<String>) -> Self {
        self.logs = Some(logs.into());
        self
    }

    pub fn with_progress(mut self, progress: ProgressUpdate) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// A regular file inside a workflow workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceFile {
    /// Path relative to the workspace root, `/`-separated.
    pub name: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Logs view of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowLogs {
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub status: WorkflowStatus,
    pub logs: String,
}

/// Outcome of deleting a workflow.
///
/// The record is gone once this is returned. If the workspace could not be
/// removed, `cleanup_error` says why and the cleanup can be retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionReport {
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub workspace_path: PathBuf,
    pub workspace_released: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_error: Option<String>,
}
