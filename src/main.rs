//! # Document Analyst CLI (`analyst`)
//!
//! The `analyst` binary drives the forensic pipeline: it manages cases,
//! ingests chat exports and documents, runs the local/cloud analysis,
//! produces tamper-evident reports and serves the case control API.
//!
//! ## Usage
//!
//! ```bash
//! analyst --config ./config/analyst.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `analyst init` | Create the SQLite database and run schema migrations |
//! | `analyst case create <name>` | Create a case and print its id |
//! | `analyst case list` | List cases with status and risk level |
//! | `analyst case show <id>` | Show a case, its files and finding counts |
//! | `analyst case rename <id> <name>` | Rename a case |
//! | `analyst case consent <id> on\|off` | Grant or revoke cloud escalation |
//! | `analyst case delete <id>` | Delete a case and everything it owns |
//! | `analyst upload <case> <path>...` | Ingest files into a case |
//! | `analyst analyze <case> [--reset] [--force]` | Run an analysis and wait for it |
//! | `analyst findings <case>` | Print the latest run's findings |
//! | `analyst report <case>` | Print or write the report artifact |
//! | `analyst verify <file>` | Check an exported report's integrity hash |
//! | `analyst serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! analyst init
//! CASE=$(analyst case create "Household 12")
//! analyst upload "$CASE" ./exports/whatsapp.txt ./exports/notes.pdf
//! analyst case consent "$CASE" on
//! analyst analyze "$CASE"
//! analyst report "$CASE" --output ./report.md
//! analyst verify ./report.md
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use doc_analyst::orchestrator::AnalyzeOptions;
use doc_analyst::progress::ProgressMode;
use doc_analyst::{case_cmd, config, ingest, migrate, orchestrator, report_cmd, server};

/// Confidential Document Analyst: local-first forensic analysis of chat
/// exports and documents.
///
/// All commands except `verify` read a TOML configuration file given by
/// `--config`. See `config/analyst.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "analyst",
    about = "Confidential Document Analyst: local-first forensic analysis of chat exports",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/analyst.toml")]
    config: PathBuf,

    /// Progress output on stderr for `analyze`.
    ///
    /// Defaults to `human` when stderr is a terminal, otherwise `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Safe to
    /// run repeatedly.
    Init,

    /// Manage cases.
    Case {
        #[command(subcommand)]
        action: CaseAction,
    },

    /// Ingest one or more files into a case.
    ///
    /// The format (chat export, email, iMessage, transcript, PDF or plain
    /// text) is detected from the content. Files that cannot be parsed are
    /// reported and skipped.
    Upload {
        /// Case id.
        case: String,
        /// Files to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Analyze a case and wait for the run to finish.
    ///
    /// Findings from earlier runs are kept as history unless `--reset`
    /// is given. Exits non-zero unless the run completes.
    Analyze {
        /// Case id.
        case: String,
        /// Discard every earlier finding of the case first.
        #[arg(long)]
        reset: bool,
        /// Take over a case left `analyzing` by a process that died.
        #[arg(long)]
        force: bool,
    },

    /// Print the findings of a case's latest run.
    Findings {
        /// Case id.
        case: String,
        /// Include findings from earlier runs.
        #[arg(long)]
        all: bool,
    },

    /// Generate the case report.
    ///
    /// Prints the artifact (markdown plus integrity trailer) to stdout, or
    /// writes it to `--output`.
    Report {
        /// Case id.
        case: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Verify an exported report artifact.
    ///
    /// Recomputes the SHA-256 of the markdown and compares it with the
    /// trailer. Exits non-zero on any mismatch.
    Verify {
        /// Path to the exported report.
        file: PathBuf,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum CaseAction {
    /// Create a case and print its id.
    Create {
        /// Display name.
        name: String,
    },
    /// List all cases.
    List,
    /// Show one case.
    Show {
        /// Case id.
        id: String,
    },
    /// Rename a case.
    Rename {
        /// Case id.
        id: String,
        /// New display name.
        name: String,
    },
    /// Grant or revoke consent to escalate windows to the cloud tier.
    Consent {
        /// Case id.
        id: String,
        #[arg(value_enum)]
        value: Toggle,
    },
    /// Delete a case with its files, findings and report.
    Delete {
        /// Case id.
        id: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Verification needs no database.
    if let Commands::Verify { file } = &cli.command {
        return report_cmd::run_verify(file);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Case { action } => match action {
            CaseAction::Create { name } => case_cmd::run_create(&cfg, &name).await?,
            CaseAction::List => case_cmd::run_list(&cfg).await?,
            CaseAction::Show { id } => case_cmd::run_show(&cfg, &id).await?,
            CaseAction::Rename { id, name } => case_cmd::run_rename(&cfg, &id, &name).await?,
            CaseAction::Consent { id, value } => {
                case_cmd::run_consent(&cfg, &id, matches!(value, Toggle::On)).await?
            }
            CaseAction::Delete { id } => case_cmd::run_delete(&cfg, &id).await?,
        },
        Commands::Upload { case, paths } => {
            ingest::run_upload(&cfg, &case, &paths).await?;
        }
        Commands::Analyze { case, reset, force } => {
            let mode = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
            let options = AnalyzeOptions {
                reset_findings: reset,
                force,
            };
            orchestrator::run_analyze(&cfg, &case, options, mode).await?;
        }
        Commands::Findings { case, all } => {
            case_cmd::run_findings(&cfg, &case, all).await?;
        }
        Commands::Report { case, output } => {
            report_cmd::run_report(&cfg, &case, output.as_deref()).await?;
        }
        Commands::Verify { .. } => {}
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
