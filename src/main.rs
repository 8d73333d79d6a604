use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use beaker_journald::types::Severity;
use beaker_journald::{config, daemon, renderer, xml};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "beaker-journald",
    version,
    about = "Journalling daemon for the BeakerLib shell test harness"
)]
enum Cli {
    /// Run the long-lived daemon: validate the environment, install signal
    /// handlers, and service the command pipe until the parent exits.
    Daemon {
        /// Config file path
        #[arg(long, default_value = "beaker-journald.toml")]
        config: PathBuf,
    },

    /// Print a journal file's XML, bypassing the pipe (operator convenience).
    Dump {
        /// Path to the journal XML file
        journal: PathBuf,

        /// Pretty-print with 2-space indentation
        #[arg(long)]
        pretty: bool,
    },

    /// Render a journal file's TEST PROTOCOL report, bypassing the pipe.
    Printlog {
        /// Path to the journal XML file
        journal: PathBuf,

        /// Minimum severity to include
        #[arg(long, default_value = "LOG")]
        severity: String,

        /// Include the full (hardware-detail) header block
        #[arg(long)]
        full: bool,
    },

    /// Show the resolved daemon configuration
    Info {
        /// Config file path
        #[arg(long, default_value = "beaker-journald.toml")]
        config: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("beaker_journald=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli {
        Cli::Daemon {
            config: config_path,
        } => {
            let cfg = config::build_config(&config_path)?;
            tracing::info!(level = %cfg.log_level, "starting daemon");
            if let Err(e) = daemon::run() {
                eprintln!("beaker-journald: {e}");
                std::process::exit(1);
            }
        }

        Cli::Dump { journal, pretty } => {
            let contents = std::fs::read_to_string(&journal)
                .with_context(|| format!("reading {}", journal.display()))?;
            let doc = xml::parse_document(&contents)
                .map_err(|e| anyhow::anyhow!("parsing {}: {e}", journal.display()))?;
            println!("{}", doc.to_xml_string(pretty));
        }

        Cli::Printlog {
            journal,
            severity,
            full,
        } => {
            let contents = std::fs::read_to_string(&journal)
                .with_context(|| format!("reading {}", journal.display()))?;
            let doc = xml::parse_document(&contents)
                .map_err(|e| anyhow::anyhow!("parsing {}: {e}", journal.display()))?;
            let threshold: Severity = severity
                .parse()
                .map_err(|e| anyhow::anyhow!("bad --severity: {e}"))?;
            println!("{}", renderer::create_log(&doc, threshold, full, true));
        }

        Cli::Info {
            config: config_path,
        } => {
            let cfg = config::build_config(&config_path)?;
            println!("beaker-journald v{}", env!("CARGO_PKG_VERSION"));
            println!("  log level: {}", cfg.log_level);
            println!("  pretty dump by default: {}", cfg.pretty_dump_default);
            println!("  pipe open retry: {}ms", cfg.pipe_open_retry_ms);
        }
    }

    Ok(())
}
