//! `snaplicator clone` commands

use super::{print_timings, print_warnings, Context};
use anyhow::Result;
use colored::Colorize;
use snaplicator_core::{CloneOrchestrator, CloneResult};
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct CloneRow {
    #[tabled(rename = "CONTAINER")]
    container: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "PORT")]
    port: String,
    #[tabled(rename = "STARTED")]
    started: String,
    #[tabled(rename = "VOLUME")]
    volume: String,
    #[tabled(rename = "DESCRIPTION")]
    description: String,
}

fn print_result(ctx: &Context, verb: &str, result: &CloneResult) -> Result<()> {
    if ctx.json {
        return ctx.print_json(result);
    }

    println!("{} Clone {}: {}", "✓".green().bold(), verb, result.container_name.bold());
    println!("  Port:     {}", result.host_port);
    println!("  Volume:   {}", result.clone_subvolume.display());
    println!("  PGDATA:   {}", result.data_dir_in_container);
    println!("  Metadata: {}", result.metadata_path.display());
    if let Some(desc) = &result.description {
        println!("  Description: {}", desc);
    }
    if !result.disabled_subscriptions.is_empty() {
        println!("  Disabled subscriptions: {}", result.disabled_subscriptions.join(", "));
    }
    if result.anonymize.ran {
        println!("  Anonymized: {}", "yes".green());
    }
    print_warnings(&result.warnings);
    print_timings(&result.timings);
    Ok(())
}

/// Create a clone from a snapshot, or from main when no snapshot is given
pub async fn create(ctx: &Context, snapshot: Option<&str>, description: Option<String>) -> Result<()> {
    let config = ctx.settings.clone_config()?;
    let orchestrator = CloneOrchestrator::new(&ctx.backends);

    let result = match snapshot {
        Some(name) => orchestrator.create_from_snapshot(name, &config, description).await?,
        None => orchestrator.create_from_main(&config, description).await?,
    };
    print_result(ctx, "created", &result)
}

/// Refresh a clone in place
pub async fn refresh(ctx: &Context, container: &str, description: Option<String>) -> Result<()> {
    let config = ctx.settings.clone_config()?;
    let result = CloneOrchestrator::new(&ctx.backends)
        .refresh_in_place(container, &config, description)
        .await?;
    print_result(ctx, "refreshed", &result)
}

/// Delete a clone
pub async fn delete(ctx: &Context, name: &str) -> Result<()> {
    let (root, main) = ctx.settings.volume_location()?;
    let result = CloneOrchestrator::new(&ctx.backends).delete(&root, Some(&main), name).await?;

    if ctx.json {
        return ctx.print_json(&result);
    }
    println!("{} Clone deleted: {}", "✓".green().bold(), result.deleted_path.display());
    for container in &result.removed_containers {
        println!("  {} removed container {}", "•".dimmed(), container);
    }
    Ok(())
}

/// List clone containers
pub async fn list(ctx: &Context) -> Result<()> {
    let clones = CloneOrchestrator::new(&ctx.backends).list_clones().await?;

    if ctx.json {
        return ctx.print_json(&clones);
    }
    if clones.is_empty() {
        println!("No clones found");
        return Ok(());
    }

    let rows: Vec<CloneRow> = clones
        .into_iter()
        .map(|c| CloneRow {
            container: c.container_name,
            status: if c.running { "running".green().to_string() } else { "stopped".red().to_string() },
            port: c.host_port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            started: c.started_at.unwrap_or_else(|| "-".to_string()),
            volume: c.volume_path.map(|p| p.display().to_string()).unwrap_or_else(|| "-".to_string()),
            description: c.description.unwrap_or_default(),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::modern());
    println!("{}", table);

    Ok(())
}
