//! # Command Line Interface
//!
//! `sniplane` runs the control plane by default. The other subcommands are
//! one-shot operator tools over the same configuration.

pub mod output;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::certstore::{CertificateRegistry, RecordStore};
use crate::config::{AppConfig, SignerKind};
use crate::observability::{init_observability, log_config_info};
use crate::startup::{build_coordinator, run_with_snapshot_cache};
use crate::xds::ConfigSynthesizer;
use output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "sniplane")]
#[command(about = "Control plane for a TLS-intercepting egress Envoy proxy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding certificate records
    #[arg(long, global = true)]
    pub records_dir: Option<PathBuf>,

    /// Signer used for new certificates
    #[arg(long, global = true, value_enum)]
    pub signer: Option<SignerKind>,

    /// Node id snapshots are published for
    #[arg(long, global = true)]
    pub node_id: Option<String>,

    /// Log level filter, overridden by RUST_LOG
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control plane (default)
    Serve,

    /// Make sure a certificate exists for one hostname
    Issue {
        /// Hostname to issue for
        sni: String,
    },

    /// Synthesize the configuration for the records on disk and print a summary
    Render {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Toml)]
        output: OutputFormat,
    },

    /// Write the default configuration to a file
    Init {
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.records_dir {
            config.registry.records_dir = dir.clone();
        }
        if let Some(signer) = self.signer {
            config.issuance.signer = signer;
        }
        if let Some(node_id) = &self.node_id {
            config.reconciler.node_id = node_id.clone();
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
        if self.json_logs {
            config.observability.json_logging = true;
        }
    }

    /// Load, override and validate configuration.
    pub fn resolve_config(&self) -> anyhow::Result<AppConfig> {
        let mut config = AppConfig::load(self.config.as_deref()).context("Failed to load configuration")?;
        self.apply_overrides(&mut config);
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

/// Hostname left out of a rendered configuration
#[derive(Debug, Serialize)]
pub struct SkippedHost {
    pub sni: String,
    pub reason: String,
}

/// Printable summary of one synthesis
#[derive(Debug, Serialize)]
pub struct RenderSummary {
    pub listener: String,
    pub records: usize,
    pub intercepted_hosts: Vec<String>,
    pub skipped: Vec<SkippedHost>,
    pub clusters: Vec<String>,
    pub secrets: Vec<String>,
}

/// Parse arguments and run the selected command
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Config { command: ConfigCommands::Init { path, force } }) = &cli.command {
        return init_config(path, *force);
    }

    let config = cli.resolve_config()?;
    init_observability(&config.observability)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            log_config_info(&config);
            run_with_snapshot_cache(config, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                }
            })
            .await?;
        }
        Commands::Issue { sni } => {
            let coordinator = build_coordinator(&config)?;
            let outcome = coordinator.ensure_certificate(&sni).await?;
            println!("{}: {:?}", sni, outcome);
        }
        Commands::Render { output } => {
            let summary = render(&config).await?;
            output::print_render_summary(&summary, output)?;
        }
        Commands::Config { command: ConfigCommands::Show { output } } => {
            output::print_output(&config, output)?;
        }
        Commands::Config { command: ConfigCommands::Init { .. } } => {}
    }

    Ok(())
}

/// Synthesize once from the records currently on disk.
pub async fn render(config: &AppConfig) -> anyhow::Result<RenderSummary> {
    let registry = CertificateRegistry::new(RecordStore::new(&config.registry.records_dir));
    let records = registry.load().await?;

    let synthesis = ConfigSynthesizer::new(config.proxy.clone()).build(&registry.snapshot())?;
    let graph = &synthesis.graph;

    Ok(RenderSummary {
        listener: graph.listener.name.clone(),
        records,
        intercepted_hosts: graph.intercepted_hosts().into_iter().map(str::to_string).collect(),
        skipped: synthesis
            .warnings
            .iter()
            .map(|w| SkippedHost { sni: w.sni.clone(), reason: w.reason.to_string() })
            .collect(),
        clusters: graph.clusters.iter().map(|c| c.name.clone()).collect(),
        secrets: graph.secrets.iter().map(|s| s.name.clone()).collect(),
    })
}

fn init_config(path: &std::path::Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at: {}\nUse --force to overwrite",
            path.display()
        );
    }

    let rendered = AppConfig::default().to_toml()?;
    std::fs::write(path, rendered)
        .with_context(|| format!("Failed to write configuration to {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win_over_loaded_config() {
        let cli = Cli::parse_from([
            "sniplane",
            "--records-dir",
            "/srv/certs",
            "--signer",
            "local",
            "--node-id",
            "egress-1",
            "--json-logs",
        ]);
        let mut config = AppConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.registry.records_dir, PathBuf::from("/srv/certs"));
        assert_eq!(config.issuance.signer, SignerKind::Local);
        assert_eq!(config.reconciler.node_id, "egress-1");
        assert!(config.observability.json_logging);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::parse_from(["sniplane", "issue", "api.example.com"]);
        assert!(matches!(cli.command, Some(Commands::Issue { ref sni }) if sni == "api.example.com"));

        let cli = Cli::parse_from(["sniplane", "render", "--output", "json"]);
        assert!(matches!(cli.command, Some(Commands::Render { output: OutputFormat::Json })));
    }

    #[test]
    fn test_init_config_refuses_to_overwrite() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sniplane.toml");

        init_config(&path, false).unwrap();
        assert!(init_config(&path, false).is_err());
        assert!(init_config(&path, true).is_ok());

        let loaded = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.proxy.listener_name, "listener_0");
    }

    #[tokio::test]
    async fn test_render_empty_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.registry.records_dir = dir.path().to_path_buf();

        let summary = render(&config).await.unwrap();
        assert_eq!(summary.records, 0);
        assert!(summary.intercepted_hosts.is_empty());
        assert_eq!(summary.clusters.len(), 2);
        assert!(summary.secrets.is_empty());
    }
}
