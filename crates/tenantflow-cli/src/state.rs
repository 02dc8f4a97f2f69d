//! Application state wiring the controller to its infrastructure.
//!
//! The controller is generic over repositories, allocator and dispatcher;
//! `AppState` pins it to SQLite, the local shared volume and child-process
//! engines.

use std::path::PathBuf;
use std::sync::Arc;

use tenantflow_core::service::lifecycle::LifecycleController;
use tenantflow_infra::config::{load_controller_config, volume_root};
use tenantflow_infra::engine::ProcessDispatcher;
use tenantflow_infra::sqlite::pool::{DatabasePool, database_url};
use tenantflow_infra::sqlite::tenant::SqliteTenantRepository;
use tenantflow_infra::sqlite::workflow::SqliteWorkflowRepository;
use tenantflow_infra::storage::{LocalWorkspaceAllocator, resolve_data_dir};
use tenantflow_types::config::ControllerConfig;
use tenantflow_types::workflow::StatusReport;
use tokio::sync::{Mutex, mpsc};

/// Buffered status reports between engine supervisors and the consumer.
const REPORT_CHANNEL_CAPACITY: usize = 256;

pub type ConcreteController = LifecycleController<
    SqliteTenantRepository,
    SqliteWorkflowRepository,
    LocalWorkspaceAllocator,
    ProcessDispatcher,
>;

pub struct AppState {
    pub controller: Arc<ConcreteController>,
    pub dispatcher: Arc<ProcessDispatcher>,
    pub config: ControllerConfig,
    pub data_dir: PathBuf,
    pub volume: PathBuf,
    /// Receiving end of the engine report channel; taken by whoever runs
    /// the status consumer.
    reports: Mutex<Option<mpsc::Receiver<StatusReport>>>,
}

impl AppState {
    /// Load configuration, open the database and wire the controller.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_controller_config(&data_dir).await;
        let volume = volume_root(&config, &data_dir);
        tokio::fs::create_dir_all(&volume).await?;

        let db_pool = DatabasePool::new(&database_url(&data_dir)).await?;

        let (report_tx, report_rx) = mpsc::channel(REPORT_CHANNEL_CAPACITY);
        let dispatcher = Arc::new(ProcessDispatcher::new(&config, report_tx));

        let controller = LifecycleController::new(
            SqliteTenantRepository::new(db_pool.clone()),
            SqliteWorkflowRepository::new(db_pool),
            LocalWorkspaceAllocator::new(volume.clone()),
            Arc::clone(&dispatcher),
            &config,
        );

        for organization in &config.default_organizations {
            controller.provision_organization(organization).await?;
        }
        tracing::debug!(
            data_dir = %data_dir.display(),
            volume = %volume.display(),
            "controller ready"
        );

        Ok(Self {
            controller: Arc::new(controller),
            dispatcher,
            config,
            data_dir,
            volume,
            reports: Mutex::new(Some(report_rx)),
        })
    }

    /// Take the report receiver. Only the first caller gets it.
    pub async fn take_reports(&self) -> Option<mpsc::Receiver<StatusReport>> {
        self.reports.lock().await.take()
    }

    /// Let in-flight dispatches settle before the process exits.
    pub async fn shutdown(&self) {
        self.controller.wait_for_dispatches().await;
        self.dispatcher.shutdown().await;
    }
}
