//! Execution engine seam.
//!
//! The controller hands admitted workflows to an `EngineDispatcher` and learns
//! about their progress through `StatusReport`s applied to a `StatusSink`.
//! The child-process dispatcher lives in tenantflow-infra.

pub mod consumer;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use tenantflow_types::error::ControllerError;
use tenantflow_types::workflow::{EngineType, StatusReport, Workflow, WorkflowId};

pub use consumer::StatusConsumer;

/// Everything an engine needs to run one workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchRequest {
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub organization: String,
    pub engine_type: EngineType,
    /// Queue the engine consumes from, taken from the engine configuration.
    pub queue: String,
    pub parameters: BTreeMap<String, String>,
    pub specification: serde_json::Value,
    pub workspace_path: PathBuf,
}

impl DispatchRequest {
    pub fn for_workflow(workflow: &Workflow, organization: &str, queue: &str) -> Self {
        Self {
            workflow_id: workflow.id,
            workflow_name: workflow.name.clone(),
            organization: organization.to_string(),
            engine_type: workflow.engine_type.clone(),
            queue: queue.to_string(),
            parameters: workflow.parameters.clone(),
            specification: workflow.specification.clone(),
            workspace_path: workflow.workspace_path.clone(),
        }
    }
}

/// Hands workflows to execution engines.
///
/// Callers bound both methods with a timeout; implementations should return
/// once the engine accepted the request, not when the workflow completes.
pub trait EngineDispatcher: Send + Sync {
    fn dispatch(
        &self,
        request: DispatchRequest,
    ) -> impl std::future::Future<Output = Result<(), ControllerError>> + Send;

    /// Ask the engine to cancel a workflow. Best-effort.
    fn stop(
        &self,
        workflow_id: &WorkflowId,
    ) -> impl std::future::Future<Output = Result<(), ControllerError>> + Send;
}

/// Receiver of engine status reports.
pub trait StatusSink: Send + Sync {
    fn apply_report(
        &self,
        report: StatusReport,
    ) -> impl std::future::Future<Output = Result<Workflow, ControllerError>> + Send;
}
