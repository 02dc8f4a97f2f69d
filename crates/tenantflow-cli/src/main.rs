//! tenantflow command-line entry point.
//!
//! Binary name: `tflow`
//!
//! Parses CLI arguments, initializes tracing, wires the controller to its
//! SQLite database and shared volume, then dispatches to a command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use tenantflow_observe::tracing_setup::{TracingOptions, verbosity_filter};

use cli::{Cli, Commands, OrgCommand, UserCommand};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tenantflow_observe::init_tracing(&TracingOptions {
        default_filter: verbosity_filter(cli.verbose, cli.quiet).to_string(),
        json: cli.log_json,
        otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "tflow", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;
    let result = run(&state, cli.command, cli.json).await;

    state.shutdown().await;
    tenantflow_observe::shutdown_tracing();
    result
}

async fn run(state: &AppState, command: Commands, json: bool) -> anyhow::Result<()> {
    match command {
        Commands::Org { action } => match action {
            OrgCommand::Create { name } => cli::org::create_org(state, &name, json).await,
            OrgCommand::List => cli::org::list_orgs(state, json).await,
        },

        Commands::User { action } => match action {
            UserCommand::Link { email, scope } => {
                cli::org::link_user(state, &scope.organization, &email, json).await
            }
        },

        Commands::Submit {
            file,
            scope,
            user,
            name,
            watch,
        } => {
            cli::workflow::submit_workflow(
                state,
                &file,
                &scope.organization,
                &user,
                name,
                watch,
                json,
            )
            .await
        }

        Commands::List { scope, status } => {
            cli::workflow::list_workflows(state, &scope.organization, status, json).await
        }

        Commands::Show { workflow, scope } => {
            cli::workflow::show_workflow(state, &scope.organization, &workflow, json).await
        }

        Commands::Logs { workflow, scope } => {
            cli::workflow::show_logs(state, &scope.organization, &workflow, json).await
        }

        Commands::Files { workflow, scope } => {
            cli::workflow::list_files(state, &scope.organization, &workflow, json).await
        }

        Commands::Report {
            workflow_id,
            status,
            logs,
            progress,
        } => cli::workflow::report_status(state, &workflow_id, status, logs, progress, json).await,

        Commands::Stop { workflow, scope } => {
            cli::workflow::stop_workflow(state, &scope.organization, &workflow, json).await
        }

        Commands::Delete {
            workflow,
            scope,
            force,
        } => {
            cli::workflow::delete_workflow(state, &scope.organization, &workflow, force, json)
                .await
        }

        Commands::Purge { workflow_id, scope } => {
            cli::workflow::purge_workspace(state, &scope.organization, &workflow_id, json).await
        }

        Commands::Watch { workflow, scope } => {
            cli::workflow::watch_workflow(state, &scope.organization, &workflow, json).await
        }

        Commands::Status => cli::org::show_status(state, json).await,

        Commands::Completions { .. } => unreachable!("handled above"),
    }
}
