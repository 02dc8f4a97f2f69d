//! Workflow commands: submit, list, show, logs, files, report, stop, delete,
//! purge, watch.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use tenantflow_core::engine::consumer::StatusConsumer;
use tenantflow_types::workflow::{
    JobProgress, ProgressUpdate, StatusReport, SubmitWorkflowRequest, Workflow, WorkflowId,
    WorkflowStatus,
};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// How often `watch` re-reads the workflow record.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Read a submission payload. YAML for `.yaml`/`.yml`, JSON otherwise;
/// `-` reads JSON from stdin.
pub async fn read_submission(path: &Path) -> Result<SubmitWorkflowRequest> {
    if path == Path::new("-") {
        let mut content = String::new();
        tokio::io::stdin().read_to_string(&mut content).await?;
        return serde_json::from_str(&content).context("invalid JSON submission on stdin");
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    let is_yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml" | "yml")
    );
    if is_yaml {
        serde_yaml_ng::from_str(&content)
            .with_context(|| format!("invalid YAML submission in {}", path.display()))
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("invalid JSON submission in {}", path.display()))
    }
}

fn parse_workflow_id(raw: &str) -> Result<WorkflowId> {
    raw.parse::<WorkflowId>()
        .map_err(|e| anyhow::anyhow!("'{raw}' is not a workflow UUID: {e}"))
}

/// Parse a `--progress` argument, e.g. `{"running": {"total": 1, "job_ids": ["a"]}}`.
fn parse_progress(raw: &str) -> Result<ProgressUpdate> {
    serde_json::from_str(raw).context("invalid progress JSON")
}

/// `done/total` line for `show`; `None` before the engine reported any jobs.
fn progress_summary(progress: &JobProgress) -> Option<String> {
    if progress.is_empty() {
        return None;
    }
    let done = progress.finished.total + progress.failed.total;
    Some(format!(
        "{done}/{} jobs done ({} running, {} finished, {} failed)",
        progress.total.total,
        progress.running.total,
        progress.finished.total,
        progress.failed.total
    ))
}

fn parse_status(raw: &str) -> Result<WorkflowStatus> {
    raw.parse::<WorkflowStatus>().map_err(|e| anyhow::anyhow!(e))
}

fn spinner(message: String) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(80));
    Ok(spinner)
}

/// Submit a workflow. Workflows whose engine runs as a child process are
/// always followed to completion; the process is supervised by this command.
pub async fn submit_workflow(
    state: &AppState,
    file: &Path,
    organization: &str,
    user: &str,
    name: Option<String>,
    watch: bool,
    json: bool,
) -> Result<()> {
    let mut request = read_submission(file).await?;
    if let Some(name) = name {
        request.name = name;
    }

    let workflow = state.controller.submit(organization, user, request).await?;

    if !json {
        println!(
            "  {} Submitted {} ({})",
            style("✓").green().bold(),
            style(&workflow.name).cyan(),
            style(workflow.id).dim()
        );
    }

    let workflow = if watch || state.dispatcher.has_command(&workflow.engine_type) {
        follow(state, workflow.id, !json).await?
    } else {
        state.controller.wait_for_dispatches().await;
        state.controller.get(&workflow.id).await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
    } else {
        print_summary(&workflow);
    }
    Ok(())
}

pub async fn list_workflows(
    state: &AppState,
    organization: &str,
    status: Option<String>,
    json: bool,
) -> Result<()> {
    let status = status.as_deref().map(parse_status).transpose()?;
    let workflows = state.controller.list(organization, status).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflows)?);
        return Ok(());
    }

    if workflows.is_empty() {
        println!();
        println!(
            "  {} No workflows in {}. Submit one with: {}",
            style("i").blue().bold(),
            style(organization).bold(),
            style("tflow submit <file> --user <email>").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Name").fg(Color::White),
        Cell::new("Engine").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Created").fg(Color::White),
        Cell::new("ID").fg(Color::White),
    ]);
    for workflow in &workflows {
        table.add_row(vec![
            Cell::new(&workflow.name).fg(Color::Cyan),
            Cell::new(&workflow.engine_type),
            status_cell(workflow.status),
            Cell::new(workflow.created_at.format("%Y-%m-%d %H:%M UTC")),
            Cell::new(workflow.id).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} workflow{}",
        style(workflows.len()).bold(),
        if workflows.len() == 1 { "" } else { "s" }
    );
    println!();
    Ok(())
}

pub async fn show_workflow(
    state: &AppState,
    organization: &str,
    workflow: &str,
    json: bool,
) -> Result<()> {
    let workflow = state.controller.find(organization, workflow).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
        return Ok(());
    }

    println!();
    println!("  {}", style(&workflow.name).cyan().bold());
    println!();
    println!("  {}", style("── Details ──").dim());
    println!("  {}         {}", style("ID:").bold(), style(workflow.id).dim());
    println!("  {}     {}", style("Engine:").bold(), workflow.engine_type);
    println!("  {}     {}", style("Status:").bold(), format_status(workflow.status));
    println!("  {}  {}", style("Workspace:").bold(), workflow.workspace_path.display());
    if !workflow.parameters.is_empty() {
        println!("  {}", style("Parameters:").bold());
        for (key, value) in &workflow.parameters {
            println!("    {} {key} = {value}", style("•").dim());
        }
    }
    println!();

    println!("  {}", style("── Timestamps ──").dim());
    println!(
        "  {}    {}",
        style("Created:").bold(),
        workflow.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(started) = &workflow.run_started_at {
        println!(
            "  {}    {}",
            style("Started:").bold(),
            started.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    if let Some(finished) = &workflow.run_finished_at {
        println!(
            "  {}      {}",
            style("Ended:").bold(),
            finished.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    println!();

    if let Some(summary) = progress_summary(&workflow.job_progress) {
        println!("  {}", style("── Progress ──").dim());
        println!("  {}       {summary}", style("Jobs:").bold());
        println!();
    }
    Ok(())
}

pub async fn show_logs(
    state: &AppState,
    organization: &str,
    workflow: &str,
    json: bool,
) -> Result<()> {
    let logs = state.controller.logs(organization, workflow).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&logs)?);
        return Ok(());
    }

    if logs.logs.is_empty() {
        println!(
            "  {} No logs yet for {} ({}).",
            style("i").blue().bold(),
            style(&logs.workflow_name).cyan(),
            format_status(logs.status)
        );
    } else {
        println!("{}", logs.logs);
    }
    Ok(())
}

pub async fn list_files(
    state: &AppState,
    organization: &str,
    workflow: &str,
    json: bool,
) -> Result<()> {
    let files = state.controller.workspace_files(organization, workflow).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&files)?);
        return Ok(());
    }

    if files.is_empty() {
        println!("  {} Workspace is empty.", style("i").blue().bold());
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("File").fg(Color::White),
        Cell::new("Size").fg(Color::White),
        Cell::new("Modified").fg(Color::White),
    ]);
    for file in &files {
        table.add_row(vec![
            Cell::new(&file.name).fg(Color::Cyan),
            Cell::new(format_size(file.size)),
            Cell::new(file.last_modified.format("%Y-%m-%d %H:%M UTC")).fg(Color::DarkGrey),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn report_status(
    state: &AppState,
    workflow_id: &str,
    status: Option<String>,
    logs: Option<String>,
    progress: Option<String>,
    json: bool,
) -> Result<()> {
    if status.is_none() && logs.is_none() && progress.is_none() {
        bail!("nothing to report: pass --status, --logs and/or --progress");
    }
    let report = StatusReport {
        workflow_id: parse_workflow_id(workflow_id)?,
        status: status.as_deref().map(parse_status).transpose()?,
        logs,
        progress: progress.as_deref().map(parse_progress).transpose()?,
    };
    let workflow = state.controller.report_status(report).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
    } else {
        println!(
            "  {} {} is {}",
            style("✓").green().bold(),
            style(&workflow.name).cyan(),
            format_status(workflow.status)
        );
    }
    Ok(())
}

pub async fn stop_workflow(
    state: &AppState,
    organization: &str,
    workflow: &str,
    json: bool,
) -> Result<()> {
    let workflow = state.controller.find(organization, workflow).await?;
    let workflow = state.controller.stop(&workflow.id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
    } else {
        println!(
            "  {} {} stopped.",
            style("■").yellow().bold(),
            style(&workflow.name).cyan()
        );
    }
    Ok(())
}

pub async fn delete_workflow(
    state: &AppState,
    organization: &str,
    workflow: &str,
    force: bool,
    json: bool,
) -> Result<()> {
    let workflow = state.controller.find(organization, workflow).await?;

    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete workflow '{}' and its workspace?",
                style(&workflow.name).red().bold()
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    let report = state.controller.delete(&workflow.id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "  {} Workflow '{}' deleted.",
        style("✓").red().bold(),
        report.workflow_name
    );
    if let Some(error) = &report.cleanup_error {
        println!(
            "  {} Workspace {} was not removed: {error}",
            style("!").yellow().bold(),
            report.workspace_path.display()
        );
        println!(
            "    Retry with: {}",
            style(format!("tflow purge {} --org {organization}", report.workflow_id)).yellow()
        );
    }
    Ok(())
}

pub async fn purge_workspace(
    state: &AppState,
    organization: &str,
    workflow_id: &str,
    json: bool,
) -> Result<()> {
    let id = parse_workflow_id(workflow_id)?;
    state.controller.purge_workspace(organization, &id).await?;

    if json {
        println!("{}", serde_json::json!({"purged": true, "workflow_id": id}));
    } else {
        println!("  {} Workspace of {} removed.", style("✓").green().bold(), style(id).dim());
    }
    Ok(())
}

pub async fn watch_workflow(
    state: &AppState,
    organization: &str,
    workflow: &str,
    json: bool,
) -> Result<()> {
    let workflow = state.controller.find(organization, workflow).await?;
    let workflow = follow(state, workflow.id, !json).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
    } else {
        print_summary(&workflow);
    }
    Ok(())
}

/// Apply engine reports while polling the record until it is terminal.
///
/// Ctrl+C stops the workflow when this process supervises its engine and
/// otherwise just detaches.
async fn follow(state: &AppState, id: WorkflowId, show_progress: bool) -> Result<Workflow> {
    let shutdown = CancellationToken::new();
    let consumer = state
        .take_reports()
        .await
        .map(|reports| StatusConsumer::new(reports, shutdown.clone()));

    let progress = if show_progress {
        Some(spinner(format!("Waiting for {id}..."))?)
    } else {
        None
    };

    let poll = async {
        let outcome = poll_until_terminal(state, &id, progress.as_ref()).await;
        shutdown.cancel();
        outcome
    };
    let consume = async {
        if let Some(consumer) = consumer {
            consumer.run(state.controller.as_ref()).await;
        }
    };
    let (outcome, ()) = tokio::join!(poll, consume);

    if let Some(progress) = &progress {
        progress.finish_and_clear();
    }

    match outcome? {
        Some(workflow) => Ok(workflow),
        None if state.dispatcher.running() > 0 => {
            tracing::info!(workflow_id = %id, "interrupted, stopping supervised workflow");
            Ok(state.controller.stop(&id).await?)
        }
        None => Ok(state.controller.get(&id).await?),
    }
}

/// `Some(workflow)` once terminal, `None` when interrupted.
async fn poll_until_terminal(
    state: &AppState,
    id: &WorkflowId,
    progress: Option<&ProgressBar>,
) -> Result<Option<Workflow>> {
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut interrupt => return Ok(None),
            _ = ticker.tick() => {
                let workflow = state.controller.get(id).await?;
                if let Some(progress) = progress {
                    progress.set_message(format!("{} is {}", workflow.name, workflow.status));
                }
                if workflow.status.is_terminal() {
                    return Ok(Some(workflow));
                }
            }
        }
    }
}

fn print_summary(workflow: &Workflow) {
    println!(
        "  {} {}  {}",
        style(&workflow.name).cyan().bold(),
        format_status(workflow.status),
        style(workflow.id).dim()
    );
    if workflow.status == WorkflowStatus::Pending {
        println!(
            "    Queued for {}; follow with: {}",
            workflow.engine_type,
            style(format!("tflow watch {}", workflow.name)).yellow()
        );
    }
}

fn format_status(status: WorkflowStatus) -> String {
    match status {
        WorkflowStatus::Created | WorkflowStatus::Pending => style(status).blue().to_string(),
        WorkflowStatus::Running => style(status).cyan().to_string(),
        WorkflowStatus::Finished => style(status).green().to_string(),
        WorkflowStatus::Failed => style(status).red().to_string(),
        WorkflowStatus::Stopped => style(status).yellow().to_string(),
    }
}

fn status_cell(status: WorkflowStatus) -> Cell {
    let color = match status {
        WorkflowStatus::Created | WorkflowStatus::Pending => Color::Blue,
        WorkflowStatus::Running => Color::Cyan,
        WorkflowStatus::Finished => Color::Green,
        WorkflowStatus::Failed => Color::Red,
        WorkflowStatus::Stopped => Color::Yellow,
    };
    Cell::new(status).fg(color)
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_yaml_submission() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wf.yaml");
        std::fs::write(
            &path,
            "type: yadage\nparameters:\n  min_year: \"1991\"\nspecification:\n  stages: []\n",
        )
        .unwrap();

        let request = read_submission(&path).await.unwrap();
        assert_eq!(request.engine_type, "yadage");
        assert_eq!(request.name, "");
        assert_eq!(request.parameters["min_year"], "1991");
        assert_eq!(request.specification, serde_json::json!({"stages": []}));
    }

    #[tokio::test]
    async fn test_read_json_submission() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wf.json");
        std::fs::write(
            &path,
            r#"{"name": "analysis", "type": "cwl", "specification": {"first": "do this"}}"#,
        )
        .unwrap();

        let request = read_submission(&path).await.unwrap();
        assert_eq!(request.name, "analysis");
        assert_eq!(request.engine_type, "cwl");
        assert!(request.parameters.is_empty());
    }

    #[tokio::test]
    async fn test_read_submission_rejects_missing_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wf.json");
        std::fs::write(&path, r#"{"specification": {}}"#).unwrap();
        let err = read_submission(&path).await.unwrap_err();
        assert!(err.to_string().contains("invalid JSON submission"));
    }

    #[tokio::test]
    async fn test_read_submission_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_submission(&dir.path().join("nope.yml")).await.unwrap_err();
        assert!(err.to_string().starts_with("cannot read"));
    }

    #[test]
    fn test_parse_workflow_id() {
        let id = WorkflowId::new();
        assert_eq!(parse_workflow_id(&id.to_string()).unwrap(), id);
        let err = parse_workflow_id("analysis").unwrap_err();
        assert!(err.to_string().contains("not a workflow UUID"));
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("Running").unwrap(), WorkflowStatus::Running);
        assert!(parse_status("done").is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn test_parse_progress_argument() {
        let progress =
            parse_progress(r#"{"total": {"total": 4}, "running": {"total": 1, "job_ids": ["a"]}}"#)
                .unwrap();
        assert_eq!(progress.total.unwrap().total, 4);
        assert_eq!(progress.running.unwrap().job_ids.len(), 1);
        assert!(progress.failed.is_none());
        assert!(parse_progress("running").is_err());
    }

    #[test]
    fn test_progress_summary() {
        let mut progress = JobProgress::default();
        assert!(progress_summary(&progress).is_none());

        progress.merge(&parse_progress(
            r#"{"total": {"total": 4}, "finished": {"job_ids": ["a", "b"]}, "failed": {"job_ids": ["c"]}}"#,
        )
        .unwrap());
        assert_eq!(
            progress_summary(&progress).unwrap(),
            "3/4 jobs done (0 running, 2 finished, 1 failed)"
        );
    }
}
