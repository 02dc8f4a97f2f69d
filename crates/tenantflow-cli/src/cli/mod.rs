//! CLI command definitions for the `tflow` binary.
//!
//! Workflow commands act inside one organization (`--org`, default
//! `default`) and accept either a workflow UUID or its name.

pub mod org;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Multi-tenant workflow controller.
#[derive(Parser)]
#[command(name = "tflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage organizations.
    Org {
        #[command(subcommand)]
        action: OrgCommand,
    },

    /// Manage users.
    User {
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Submit a workflow from a JSON or YAML file.
    Submit {
        /// Submission file (`.json`, `.yaml` or `.yml`); `-` reads JSON from stdin.
        file: PathBuf,

        #[command(flatten)]
        scope: Scope,

        /// Submitting user.
        #[arg(long, env = "TFLOW_USER")]
        user: String,

        /// Workflow name; overrides the file's `name`. Generated when empty.
        #[arg(long)]
        name: Option<String>,

        /// Follow the workflow until it reaches a terminal status.
        #[arg(long)]
        watch: bool,
    },

    /// List workflows of an organization.
    #[command(alias = "ls")]
    List {
        #[command(flatten)]
        scope: Scope,

        /// Only workflows in this status.
        #[arg(long)]
        status: Option<String>,
    },

    /// Show a workflow.
    Show {
        /// Workflow UUID or name.
        workflow: String,

        #[command(flatten)]
        scope: Scope,
    },

    /// Print the accumulated engine logs of a workflow.
    Logs {
        /// Workflow UUID or name.
        workflow: String,

        #[command(flatten)]
        scope: Scope,
    },

    /// List the files in a workflow's workspace.
    Files {
        /// Workflow UUID or name.
        workflow: String,

        #[command(flatten)]
        scope: Scope,
    },

    /// Record a status report on behalf of an external engine.
    Report {
        /// Workflow UUID.
        workflow_id: String,

        /// New status.
        #[arg(long)]
        status: Option<String>,

        /// Log output to append.
        #[arg(long)]
        logs: Option<String>,

        /// Job progress as JSON, e.g. '{"running": {"total": 1, "job_ids": ["a"]}}'.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Stop an active workflow.
    Stop {
        /// Workflow UUID or name.
        workflow: String,

        #[command(flatten)]
        scope: Scope,
    },

    /// Delete a finished, failed or stopped workflow and its workspace.
    #[command(alias = "rm")]
    Delete {
        /// Workflow UUID or name.
        workflow: String,

        #[command(flatten)]
        scope: Scope,

        /// Skip confirmation prompt.
        #[arg(long)]
        force: bool,
    },

    /// Remove the leftover workspace of an already deleted workflow.
    Purge {
        /// Workflow UUID.
        workflow_id: String,

        #[command(flatten)]
        scope: Scope,
    },

    /// Follow a workflow until it reaches a terminal status.
    Watch {
        /// Workflow UUID or name.
        workflow: String,

        #[command(flatten)]
        scope: Scope,
    },

    /// Controller status: data directory, shared volume, engines.
    Status,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Organization a workflow command acts in.
#[derive(clap::Args)]
pub struct Scope {
    /// Organization name.
    #[arg(long = "org", env = "TFLOW_ORG", default_value = "default")]
    pub organization: String,
}

#[derive(Subcommand)]
pub enum OrgCommand {
    /// Provision an organization (idempotent).
    Create {
        /// Organization name.
        name: String,
    },

    /// List organizations.
    #[command(alias = "ls")]
    List,
}

#[derive(Subcommand)]
pub enum UserCommand {
    /// Link a user to an organization, creating the user if needed.
    Link {
        /// User email.
        email: String,

        #[command(flatten)]
        scope: Scope,
    },
}
