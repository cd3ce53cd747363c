//! Output formatting for CLI commands

use anyhow::{Context, Result};
use serde::Serialize;

use super::RenderSummary;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Json,
    Toml,
    Table,
}

/// Print data in the specified format
pub fn print_output<T: Serialize>(data: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(data),
        OutputFormat::Toml => print_toml(data),
        OutputFormat::Table => {
            anyhow::bail!("Table format requires custom implementation per data type")
        }
    }
}

/// Print data as JSON
pub fn print_json<T: Serialize>(data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data).context("Failed to serialize to JSON")?;
    println!("{}", json);
    Ok(())
}

/// Print data as TOML
pub fn print_toml<T: Serialize>(data: &T) -> Result<()> {
    let rendered = toml::to_string_pretty(data).context("Failed to serialize to TOML")?;
    println!("{}", rendered);
    Ok(())
}

pub fn print_render_summary(summary: &RenderSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            print!("{}", render_table(summary));
            Ok(())
        }
        other => print_output(summary, other),
    }
}

fn render_table(summary: &RenderSummary) -> String {
    let mut out = format!(
        "Listener {}: {} record(s), {} intercepted, {} skipped\n",
        summary.listener,
        summary.records,
        summary.intercepted_hosts.len(),
        summary.skipped.len()
    );

    if !summary.intercepted_hosts.is_empty() {
        out.push_str(&format!("\n{:<48} {}\n", "HOST", "STATUS"));
        out.push_str(&format!("{}\n", "-".repeat(60)));
        for host in &summary.intercepted_hosts {
            out.push_str(&format!("{:<48} intercepted\n", host));
        }
    }
    for skipped in &summary.skipped {
        out.push_str(&format!("{:<48} skipped: {}\n", skipped.sni, skipped.reason));
    }

    out.push_str(&format!("\nClusters: {}\n", summary.clusters.join(", ")));
    out
}
