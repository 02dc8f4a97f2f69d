//! Child-process engine dispatcher.
//!
//! Launches the command configured for an engine once per workflow, inside
//! the workflow's workspace, with the workflow passed as arguments:
//!
//! ```text
//! <command> --workflow-uuid <id> --workflow-workspace <path>
//!           --workflow-json <specification> --workflow-parameters <parameters>
//! ```
//!
//! Engine stdout/stderr go to `engine.log` in the workspace. `dispatch`
//! returns as soon as the process is spawned; a supervisor task then reports
//! `running` and, when the process exits, `finished`/`failed` with the
//! collected output. Engines without a configured command are left to an
//! external runner that reports on its own.
//!
//! `stop` kills the process and returns once it is gone. Processes are also
//! killed when their supervisor is dropped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use dashmap::DashMap;
use tenantflow_core::engine::{DispatchRequest, EngineDispatcher};
use tenantflow_types::config::ControllerConfig;
use tenantflow_types::error::ControllerError;
use tenantflow_types::workflow::{EngineType, StatusReport, WorkflowId, WorkflowStatus};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

pub const ENGINE_LOG_FILE: &str = "engine.log";

/// Handle on a supervised engine process.
#[derive(Debug, Clone, Default)]
struct Supervised {
    /// Cancelled to kill the process.
    kill: CancellationToken,
    /// Cancelled by the supervisor once the process is gone.
    exited: CancellationToken,
}

pub struct ProcessDispatcher {
    /// Engine type -> argv prefix. Commands are split on whitespace, never
    /// passed through a shell.
    commands: HashMap<EngineType, Vec<String>>,
    reports: mpsc::Sender<StatusReport>,
    running: Arc<DashMap<WorkflowId, Supervised>>,
    tasks: TaskTracker,
}

impl ProcessDispatcher {
    pub fn new(config: &ControllerConfig, reports: mpsc::Sender<StatusReport>) -> Self {
        let commands = config
            .engines
            .iter()
            .filter_map(|engine| {
                let argv: Vec<String> = engine
                    .command
                    .as_deref()?
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
                (!argv.is_empty()).then(|| (EngineType::new(&engine.name), argv))
            })
            .collect();
        Self {
            commands,
            reports,
            running: Arc::new(DashMap::new()),
            tasks: TaskTracker::new(),
        }
    }

    pub fn has_command(&self, engine_type: &EngineType) -> bool {
        self.commands.contains_key(engine_type)
    }

    /// Number of engine processes currently supervised.
    pub fn running(&self) -> usize {
        self.running.len()
    }

    /// Wait for every supervised process to exit and report.
    pub async fn wait(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Kill every supervised process and wait for the supervisors to finish.
    pub async fn shutdown(&self) {
        for entry in self.running.iter() {
            entry.value().kill.cancel();
        }
        self.wait().await;
    }
}

/// Report `running`, then wait for the process to exit or be killed.
async fn supervise(
    id: WorkflowId,
    mut child: Child,
    log_path: PathBuf,
    handle: Supervised,
    running: Arc<DashMap<WorkflowId, Supervised>>,
    reports: mpsc::Sender<StatusReport>,
) {
    let _exited = handle.exited.drop_guard();
    let kill = handle.kill;

    // A full status channel must not keep a stop from killing the process.
    let exit = tokio::select! {
        biased;
        _ = kill.cancelled() => None,
        sent = reports.send(StatusReport::status(id, WorkflowStatus::Running)) => {
            if sent.is_err() {
                debug!(workflow_id = %id, "status channel closed, report dropped");
            }
            tokio::select! {
                biased;
                _ = kill.cancelled() => None,
                status = child.wait() => Some(status),
            }
        }
    };
    running.remove(&id);

    let Some(exit) = exit else {
        if let Err(e) = child.kill().await {
            warn!(workflow_id = %id, error = %e, "failed to kill engine process");
        }
        debug!(workflow_id = %id, "engine process killed");
        return;
    };

    let mut logs = tokio::fs::read_to_string(&log_path).await.unwrap_or_default();
    let status = match exit {
        Ok(status) if status.success() => WorkflowStatus::Finished,
        Ok(status) => {
            logs.push_str(&format!("\nengine exited with {status}"));
            WorkflowStatus::Failed
        }
        Err(e) => {
            logs.push_str(&format!("\nfailed to wait for engine: {e}"));
            WorkflowStatus::Failed
        }
    };
    info!(workflow_id = %id, %status, "engine process exited");
    let report = StatusReport::status(id, status).with_logs(logs.trim().to_string());
    if reports.send(report).await.is_err() {
        debug!(workflow_id = %id, "status channel closed, report dropped");
    }
}

/// Arguments describing one workflow run.
pub fn engine_arguments(request: &DispatchRequest) -> Result<Vec<String>, ControllerError> {
    let specification = serde_json::to_string(&request.specification)
        .map_err(|e| ControllerError::Engine(format!("cannot encode specification: {e}")))?;
    let parameters = serde_json::to_string(&request.parameters)
        .map_err(|e| ControllerError::Engine(format!("cannot encode parameters: {e}")))?;
    Ok(vec![
        "--workflow-uuid".to_string(),
        request.workflow_id.to_string(),
        "--workflow-workspace".to_string(),
        request.workspace_path.display().to_string(),
        "--workflow-json".to_string(),
        specification,
        "--workflow-parameters".to_string(),
        parameters,
    ])
}

impl EngineDispatcher for ProcessDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> Result<(), ControllerError> {
        let id = request.workflow_id;
        let Some((program, base_args)) = self
            .commands
            .get(&request.engine_type)
            .and_then(|argv| argv.split_first())
        else {
            debug!(workflow_id = %id, engine = %request.engine_type, "no engine command, waiting for external engine");
            return Ok(());
        };

        let log_path = request.workspace_path.join(ENGINE_LOG_FILE);
        let stdout = tokio::fs::File::create(&log_path)
            .await
            .map_err(|e| ControllerError::storage_io(&log_path, e))?
            .into_std()
            .await;
        let stderr = stdout
            .try_clone()
            .map_err(|e| ControllerError::storage_io(&log_path, e))?;

        let child = tokio::process::Command::new(program)
            .args(base_args)
            .args(engine_arguments(&request)?)
            .current_dir(&request.workspace_path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ControllerError::Engine(format!("failed to launch '{program}': {e}")))?;

        info!(workflow_id = %id, engine = %request.engine_type, pid = ?child.id(), "engine process started");
        let handle = Supervised::default();
        self.running.insert(id, handle.clone());
        self.tasks.spawn(supervise(
            id,
            child,
            log_path,
            handle,
            Arc::clone(&self.running),
            self.reports.clone(),
        ));
        Ok(())
    }

    async fn stop(&self, workflow_id: &WorkflowId) -> Result<(), ControllerError> {
        match self.running.remove(workflow_id) {
            Some((_, handle)) => {
                handle.kill.cancel();
                handle.exited.cancelled().await;
                info!(%workflow_id, "engine process stopped");
            }
            None => debug!(%workflow_id, "no supervised engine process to stop"),
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::collections::BTreeMap;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::Duration;

    use tenantflow_types::config::EngineConfig;

    use super::*;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn dispatcher(command: &Path) -> (ProcessDispatcher, mpsc::Receiver<StatusReport>) {
        let (tx, rx) = mpsc::channel(16);
        (ProcessDispatcher::new(&engine_config(command), tx), rx)
    }

    fn engine_config(command: &Path) -> ControllerConfig {
        ControllerConfig {
            engines: vec![
                EngineConfig {
                    name: "serial".to_string(),
                    queue: "serial-default-queue".to_string(),
                    command: Some(command.display().to_string()),
                },
                EngineConfig {
                    name: "cwl".to_string(),
                    queue: "cwl-default-queue".to_string(),
                    command: None,
                },
            ],
            ..ControllerConfig::default()
        }
    }

    fn request(engine: &str, workspace: &Path) -> DispatchRequest {
        DispatchRequest {
            workflow_id: WorkflowId::new(),
            workflow_name: "serial-1".to_string(),
            organization: "default".to_string(),
            engine_type: EngineType::new(engine),
            queue: format!("{engine}-default-queue"),
            parameters: BTreeMap::from([("min_year".to_string(), "1991".to_string())]),
            specification: serde_json::json!({"steps": [{"commands": ["echo hello"]}]}),
            workspace_path: workspace.to_path_buf(),
        }
    }

    #[test]
    fn test_engine_arguments() {
        let req = request("serial", Path::new("/volume/default/x"));
        let args = engine_arguments(&req).unwrap();
        assert_eq!(args[0], "--workflow-uuid");
        assert_eq!(args[1], req.workflow_id.to_string());
        assert_eq!(args[3], "/volume/default/x");
        assert_eq!(args[7], r#"{"min_year":"1991"}"#);
    }

    #[tokio::test]
    async fn test_successful_process_reports_running_then_finished() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "engine.sh", "echo \"running $2\"");
        let workspace = dir.path().join("ws");
        std::fs::create_dir(&workspace).unwrap();
        let (dispatcher, mut rx) = dispatcher(&script);

        let req = request("serial", &workspace);
        let id = req.workflow_id;
        dispatcher.dispatch(req).await.unwrap();
        dispatcher.wait().await;

        let running = rx.recv().await.unwrap();
        assert_eq!(running, StatusReport::status(id, WorkflowStatus::Running));
        let finished = rx.recv().await.unwrap();
        assert_eq!(finished.status, Some(WorkflowStatus::Finished));
        assert_eq!(finished.logs.as_deref(), Some(format!("running {id}").as_str()));
        assert!(workspace.join(ENGINE_LOG_FILE).exists());
        assert_eq!(dispatcher.running(), 0);
    }

    #[tokio::test]
    async fn test_failing_process_reports_failed() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "engine.sh", "echo boom >&2\nexit 3");
        let (dispatcher, mut rx) = dispatcher(&script);

        dispatcher.dispatch(request("serial", dir.path())).await.unwrap();
        dispatcher.wait().await;

        rx.recv().await.unwrap();
        let failed = rx.recv().await.unwrap();
        assert_eq!(failed.status, Some(WorkflowStatus::Failed));
        let logs = failed.logs.unwrap();
        assert!(logs.starts_with("boom"));
        assert!(logs.contains("exit status: 3"));
    }

    #[tokio::test]
    async fn test_stop_kills_process_without_report() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "engine.sh", "sleep 30");
        let (dispatcher, mut rx) = dispatcher(&script);

        let req = request("serial", dir.path());
        let id = req.workflow_id;
        dispatcher.dispatch(req).await.unwrap();
        assert_eq!(dispatcher.running(), 1);

        dispatcher.stop(&id).await.unwrap();
        assert_eq!(dispatcher.running(), 0);
        dispatcher.wait().await;

        drop(dispatcher);
        while let Some(report) = rx.recv().await {
            assert_eq!(report, StatusReport::status(id, WorkflowStatus::Running));
        }
    }

    #[tokio::test]
    async fn test_full_status_channel_does_not_block_dispatch_or_stop() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "engine.sh", "sleep 30");
        let (tx, mut rx) = mpsc::channel(1);
        let backlog = StatusReport::status(WorkflowId::new(), WorkflowStatus::Running);
        tx.send(backlog.clone()).await.unwrap();
        let dispatcher = ProcessDispatcher::new(&engine_config(&script), tx);

        let req = request("serial", dir.path());
        let id = req.workflow_id;
        tokio::time::timeout(Duration::from_secs(1), dispatcher.dispatch(req))
            .await
            .expect("dispatch blocked on the status channel")
            .unwrap();
        assert_eq!(dispatcher.running(), 1);

        tokio::time::timeout(Duration::from_secs(5), dispatcher.stop(&id))
            .await
            .expect("stop did not kill the engine process")
            .unwrap();
        assert_eq!(dispatcher.running(), 0);
        tokio::time::timeout(Duration::from_secs(5), dispatcher.wait())
            .await
            .unwrap();

        drop(dispatcher);
        assert_eq!(rx.recv().await, Some(backlog));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_unknown_workflow_is_noop() {
        let (dispatcher, _rx) = dispatcher(Path::new("/bin/true"));
        dispatcher.stop(&WorkflowId::new()).await.unwrap();
        assert_eq!(dispatcher.running(), 0);
    }

    #[tokio::test]
    async fn test_engine_without_command_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, mut rx) = dispatcher(Path::new("/bin/true"));
        assert!(!dispatcher.has_command(&EngineType::new("cwl")));

        dispatcher.dispatch(request("cwl", dir.path())).await.unwrap();
        assert_eq!(dispatcher.running(), 0);
        drop(dispatcher);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_program_is_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, _rx) = dispatcher(&dir.path().join("does-not-exist"));
        let err = dispatcher
            .dispatch(request("serial", dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Engine(_)));
    }
}
