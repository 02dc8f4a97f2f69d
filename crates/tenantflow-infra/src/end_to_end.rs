//! Full controller over SQLite, the local volume and a child-process engine.

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tenantflow_core::engine::StatusConsumer;
use tenantflow_core::service::lifecycle::LifecycleController;
use tenantflow_types::config::{ControllerConfig, EngineConfig};
use tenantflow_types::workflow::{StatusReport, SubmitWorkflowRequest, Workflow, WorkflowStatus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::engine::ProcessDispatcher;
use crate::sqlite::pool::test_pool;
use crate::sqlite::tenant::SqliteTenantRepository;
use crate::sqlite::workflow::SqliteWorkflowRepository;
use crate::storage::LocalWorkspaceAllocator;

type Controller = LifecycleController<
    SqliteTenantRepository,
    SqliteWorkflowRepository,
    LocalWorkspaceAllocator,
    ProcessDispatcher,
>;

fn engine_script(dir: &Path, body: &str) -> String {
    let path = dir.join("serial-engine");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.display().to_string()
}

async fn controller(
    dir: &Path,
    engine_body: &str,
) -> (Controller, Arc<ProcessDispatcher>, mpsc::Receiver<StatusReport>) {
    let config = ControllerConfig {
        engines: vec![EngineConfig {
            name: "serial".to_string(),
            queue: "serial-default-queue".to_string(),
            command: Some(engine_script(dir, engine_body)),
        }],
        ..ControllerConfig::default()
    };

    let pool = test_pool(dir).await;
    let (reports_tx, reports_rx) = mpsc::channel(64);
    let dispatcher = Arc::new(ProcessDispatcher::new(&config, reports_tx));
    let controller = LifecycleController::new(
        SqliteTenantRepository::new(pool.clone()),
        SqliteWorkflowRepository::new(pool),
        LocalWorkspaceAllocator::new(dir.join("volume")),
        Arc::clone(&dispatcher),
        &config,
    );
    controller.provision_organization("default").await.unwrap();
    controller.link_user("default", "jane@example.org").await.unwrap();
    (controller, dispatcher, reports_rx)
}

async fn submit(controller: &Controller) -> Workflow {
    controller
        .submit(
            "default",
            "jane@example.org",
            SubmitWorkflowRequest {
                name: String::new(),
                engine_type: "serial".to_string(),
                parameters: BTreeMap::new(),
                specification: serde_json::json!({"steps": []}),
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_submitted_workflow_runs_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, dispatcher, reports_rx) = controller(
        dir.path(),
        "echo \"workflow $2\"\necho done > output.txt",
    )
    .await;

    let workflow = submit(&controller).await;
    assert_eq!(workflow.name, "serial-1");
    assert_eq!(workflow.status, WorkflowStatus::Pending);
    assert!(workflow.workspace_path.is_dir());

    let shutdown = CancellationToken::new();
    let consumer = StatusConsumer::new(reports_rx, shutdown.clone());
    let driver = async {
        controller.wait_for_dispatches().await;
        dispatcher.wait().await;
        tokio::time::timeout(Duration::from_secs(10), async {
            while !controller.get(&workflow.id).await.unwrap().status.is_terminal() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        shutdown.cancel();
    };
    let (stats, ()) = tokio::join!(consumer.run(&controller), driver);
    assert_eq!(stats.applied, 2);

    let finished = controller.get(&workflow.id).await.unwrap();
    assert_eq!(finished.status, WorkflowStatus::Finished);
    assert!(finished.logs.contains(&format!("workflow {}", workflow.id)));

    let files: Vec<String> = controller
        .workspace_files("default", "serial-1")
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(files, vec!["engine.log", "output.txt"]);

    let report = controller.delete(&workflow.id).await.unwrap();
    assert!(report.workspace_released);
    assert!(!workflow.workspace_path.exists());
    assert!(controller.get(&workflow.id).await.is_err());
}

#[tokio::test]
async fn test_stop_leaves_no_engine_process_behind() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, dispatcher, _reports) = controller(dir.path(), "sleep 30").await;

    // Stopped right after submit, racing the dispatch.
    let early = submit(&controller).await;
    let stopped = controller.stop(&early.id).await.unwrap();
    assert_eq!(stopped.status, WorkflowStatus::Stopped);
    controller.wait_for_dispatches().await;
    assert_eq!(dispatcher.running(), 0);

    // Stopped once the engine process is up.
    let late = submit(&controller).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while dispatcher.running() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    controller.stop(&late.id).await.unwrap();
    assert_eq!(dispatcher.running(), 0);

    tokio::time::timeout(Duration::from_secs(5), dispatcher.wait())
        .await
        .expect("engine process outlived stop");
    for workflow in [early, late] {
        assert_eq!(
            controller.get(&workflow.id).await.unwrap().status,
            WorkflowStatus::Stopped
        );
        let report = controller.delete(&workflow.id).await.unwrap();
        assert!(report.workspace_released);
        assert!(!workflow.workspace_path.exists());
    }
}
