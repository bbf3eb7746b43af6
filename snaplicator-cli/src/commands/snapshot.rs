//! `snaplicator snapshot` commands

use super::{human_bytes, print_warnings, Context};
use anyhow::Result;
use colored::Colorize;
use snaplicator_core::SnapshotManager;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "READ-ONLY")]
    readonly: String,
    #[tabled(rename = "SIZE")]
    size: String,
    #[tabled(rename = "DESCRIPTION")]
    description: String,
}

fn manager(ctx: &Context) -> Result<SnapshotManager> {
    let (root, main) = ctx.settings.volume_location()?;
    Ok(SnapshotManager::new(
        ctx.backends.volumes.clone(),
        ctx.backends.clock.clone(),
        root,
        main,
    ))
}

/// List snapshots
pub async fn list(ctx: &Context, usage: bool) -> Result<()> {
    let snapshots = manager(ctx)?.list(usage).await?;

    if ctx.json {
        return ctx.print_json(&snapshots);
    }
    if snapshots.is_empty() {
        println!("No snapshots found");
        return Ok(());
    }

    let rows: Vec<SnapshotRow> = snapshots
        .into_iter()
        .map(|s| SnapshotRow {
            name: s.name,
            readonly: if s.readonly { "yes".to_string() } else { "no".yellow().to_string() },
            size: s.size_bytes.map(human_bytes).unwrap_or_else(|| "-".to_string()),
            description: s.description.unwrap_or_default(),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::modern());
    println!("{}", table);

    Ok(())
}

/// Snapshot the main volume
pub async fn create(ctx: &Context, description: Option<String>) -> Result<()> {
    let snapshot = manager(ctx)?.create(description).await?;

    if ctx.json {
        return ctx.print_json(&snapshot);
    }
    println!("{} Snapshot created: {}", "✓".green().bold(), snapshot.name.bold());
    println!("  Path: {}", snapshot.path.display());
    print_warnings(&snapshot.warnings);
    Ok(())
}

/// Delete a snapshot
pub async fn delete(ctx: &Context, name: &str) -> Result<()> {
    let path = manager(ctx)?.delete(name).await?;

    if ctx.json {
        return ctx.print_json(&serde_json::json!({ "deleted_path": path }));
    }
    println!("{} Snapshot deleted: {}", "✓".green().bold(), path.display());
    Ok(())
}
