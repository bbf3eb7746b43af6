//! CLI command implementations

pub mod clone;
pub mod replication;
pub mod snapshot;

use anyhow::{Context as _, Result};
use colored::Colorize;
use serde::Serialize;
use snaplicator_core::{Backends, Settings, StepOutcome, StepTiming};
use std::path::Path;

/// Loaded settings and adapters shared by every command.
pub struct Context {
    pub settings: Settings,
    pub backends: Backends,
    pub json: bool,
}

impl Context {
    pub fn load(config: Option<&Path>, json: bool) -> Result<Self> {
        let settings = Settings::load(config).context("Failed to load configuration")?;
        let backends = Backends::system(settings.use_sudo);
        tracing::debug!(root = %settings.root_data_dir.display(), main = %settings.main_data_dir, "Settings loaded");
        Ok(Self { settings, backends, json })
    }

    /// Print `value` as pretty JSON.
    pub fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// `12.3 MiB`-style size.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Print swallowed best-effort failures.
pub fn print_warnings(warnings: &[StepOutcome]) {
    for w in warnings.iter().filter(|w| w.ignored_failure) {
        println!(
            "  {} {}: {}",
            "⚠".yellow().bold(),
            w.step,
            w.detail.as_deref().unwrap_or("failed")
        );
    }
}

/// Print per-step durations.
pub fn print_timings(timings: &[StepTiming]) {
    for t in timings {
        let mark = if t.succeeded { "•".dimmed() } else { "✗".red() };
        println!("  {} {:<24} {:>8.2}s", mark, t.step, t.seconds);
    }
}
