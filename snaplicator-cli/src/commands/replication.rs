//! `snaplicator replication` commands

use super::{human_bytes, Context};
use anyhow::Result;
use colored::Colorize;
use snaplicator_core::{CopyStatus, ReplicationMonitor, SqlTarget};
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct TableStateRow {
    #[tabled(rename = "TABLE")]
    table: String,
    #[tabled(rename = "STATE")]
    state: String,
}

fn target(ctx: &Context) -> Result<SqlTarget> {
    let replica = ctx.settings.replica_target()?;
    Ok(SqlTarget::new(replica.container_name, replica.postgres_user, replica.postgres_db))
}

/// Show replication lag
pub async fn lag(ctx: &Context) -> Result<()> {
    let lag = ReplicationMonitor::new(ctx.backends.sql.clone()).lag(&target(ctx)?).await?;

    if ctx.json {
        return ctx.print_json(&lag);
    }
    println!("Network lag: {:.3}s", lag.network_lag_seconds);
    println!("Apply lag:   {:.3}s", lag.apply_lag_seconds);
    Ok(())
}

/// Show initial copy progress
pub async fn progress(ctx: &Context) -> Result<()> {
    let progress =
        ReplicationMonitor::new(ctx.backends.sql.clone()).copy_progress(&target(ctx)?).await?;

    if ctx.json {
        return ctx.print_json(&progress);
    }

    let status = match progress.status {
        CopyStatus::Idle => progress.status.to_string().dimmed(),
        CopyStatus::Copying => progress.status.to_string().yellow(),
        CopyStatus::Complete => progress.status.to_string().green(),
    };
    println!(
        "Status: {} ({}/{} tables, {:.1}%)",
        status, progress.finished_tables, progress.total_tables, progress.percent
    );

    for copy in progress.active.iter().flatten() {
        println!(
            "  {} {} {} / {} ({} tuples)",
            "→".cyan().bold(),
            copy.table,
            human_bytes(copy.bytes_processed),
            human_bytes(copy.bytes_total),
            copy.tuples_processed
        );
    }

    if let Some(details) = progress.details.filter(|d| !d.is_empty()) {
        let rows: Vec<TableStateRow> = details
            .into_iter()
            .map(|d| TableStateRow { table: d.table, state: format!("{} ({})", d.state_label, d.state) })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::modern());
        println!("{}", table);
    }

    Ok(())
}
