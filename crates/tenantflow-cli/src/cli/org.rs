//! Tenant commands: organizations, user links, controller status.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use crate::state::AppState;

pub async fn create_org(state: &AppState, name: &str, json: bool) -> Result<()> {
    let organization = state.controller.provision_organization(name).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&organization)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Organization {} ready.",
        style("✓").green().bold(),
        style(&organization.name).cyan()
    );
    println!("  {}  {}", style("ID:").bold(), style(organization.id).dim());
    println!();
    Ok(())
}

pub async fn list_orgs(state: &AppState, json: bool) -> Result<()> {
    let organizations = state.controller.registry().list_organizations().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&organizations)?);
        return Ok(());
    }

    if organizations.is_empty() {
        println!();
        println!(
            "  {} No organizations. Create one with: {}",
            style("i").blue().bold(),
            style("tflow org create <name>").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Name").fg(Color::White),
        Cell::new("ID").fg(Color::White),
        Cell::new("Created").fg(Color::White),
    ]);
    for organization in &organizations {
        table.add_row(vec![
            Cell::new(&organization.name).fg(Color::Cyan),
            Cell::new(organization.id).fg(Color::DarkGrey),
            Cell::new(organization.created_at.format("%Y-%m-%d %H:%M UTC")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn link_user(state: &AppState, organization: &str, email: &str, json: bool) -> Result<()> {
    let user = state.controller.link_user(organization, email).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({"organization": organization, "user": user})
        );
        return Ok(());
    }

    println!(
        "  {} {} can now submit workflows in {}.",
        style("✓").green().bold(),
        style(&user.email).cyan(),
        style(organization).bold()
    );
    Ok(())
}

/// Where the controller keeps its state and which engines it knows.
pub async fn show_status(state: &AppState, json: bool) -> Result<()> {
    let organizations = state.controller.registry().list_organizations().await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "data_dir": state.data_dir,
                "shared_volume": state.volume,
                "deletion_policy": state.config.deletion_policy,
                "organizations": organizations.len(),
                "engines": state.config.engines,
            }))?
        );
        return Ok(());
    }

    println!();
    println!("  {}", style("── Controller ──").dim());
    println!("  {}      {}", style("Data dir:").bold(), state.data_dir.display());
    println!("  {} {}", style("Shared volume:").bold(), state.volume.display());
    println!(
        "  {}      {:?}",
        style("Deletion:").bold(),
        state.config.deletion_policy
    );
    println!("  {} {}", style("Organizations:").bold(), organizations.len());
    println!();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Engine").fg(Color::White),
        Cell::new("Queue").fg(Color::White),
        Cell::new("Runner").fg(Color::White),
    ]);
    for engine in &state.config.engines {
        let runner = match &engine.command {
            Some(command) => Cell::new(command).fg(Color::Green),
            None => Cell::new("external").fg(Color::DarkGrey),
        };
        table.add_row(vec![
            Cell::new(&engine.name).fg(Color::Cyan),
            Cell::new(&engine.queue),
            runner,
        ]);
    }
    println!("{table}");
    println!();
    Ok(())
}
