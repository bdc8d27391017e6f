// Copyright 2026 Webfetch Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use webfetch_runtime::cli;
use webfetch_runtime::cli::fetch_cmd::FetchArgs;
use webfetch_runtime::orchestrator::FatalFailure;

#[derive(Parser)]
#[command(
    name = "webfetch",
    about = "Webfetch: resilient fetching with strategy fallback",
    version,
    after_help = "Run 'webfetch <command> --help' for details on each command."
)]
struct Cli {
    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a URL and print the document
    Fetch {
        /// URL to fetch
        url: String,
        /// Skip backend health checks (re-verified if the backend is unreachable)
        #[arg(long)]
        trust_session: bool,
        /// Routing rule file (overrides WF_ROUTES)
        #[arg(long)]
        routes: Option<PathBuf>,
        /// Overall time budget in seconds (overrides WF_FETCH_BUDGET_SECS)
        #[arg(long)]
        budget: Option<u64>,
        /// Append an audit record to this JSONL file (overrides WF_AUDIT_LOG)
        #[arg(long)]
        audit: Option<PathBuf>,
    },
    /// Show the strategy order a URL resolves to
    Resolve {
        /// URL to resolve
        url: String,
        /// Routing rule file (overrides WF_ROUTES)
        #[arg(long)]
        routes: Option<PathBuf>,
    },
    /// Manage the browser backend
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Check environment and diagnose issues
    Doctor,
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Report backend health
    Status,
    /// Start the backend, or reuse a healthy one
    Start,
    /// Stop the recorded backend
    Stop,
}

fn init_logging(verbose: bool, log_json: bool) {
    let default = if verbose {
        "webfetch_runtime=debug,webfetch=debug"
    } else {
        "webfetch_runtime=info,webfetch=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log_json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli::output::init(cli.json, cli.quiet);
    init_logging(cli.verbose, cli.log_json);

    let result = match cli.command {
        Commands::Fetch {
            url,
            trust_session,
            routes,
            budget,
            audit,
        } => {
            cli::fetch_cmd::run(FetchArgs {
                url,
                trust_session,
                routes,
                budget_secs: budget,
                audit,
            })
            .await
        }
        Commands::Resolve { url, routes } => cli::resolve_cmd::run(&url, routes).await,
        Commands::Session { action } => match action {
            SessionAction::Status => cli::session_cmd::status().await,
            SessionAction::Start => cli::session_cmd::start().await,
            SessionAction::Stop => cli::session_cmd::stop().await,
        },
        Commands::Doctor => cli::doctor::run().await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "webfetch", &mut std::io::stdout());
            Ok(())
        }
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        let failure = e.downcast_ref::<FatalFailure>();
        if cli::output::is_json() {
            match failure {
                Some(failure) => cli::output::print_json(&serde_json::json!({
                    "error": true,
                    "message": failure.to_string(),
                    "failure": failure,
                })),
                None => cli::output::print_json(&serde_json::json!({
                    "error": true,
                    "message": format!("{e:#}"),
                })),
            }
        } else if !cli::output::is_quiet() {
            if let Some(failure) = failure {
                cli::fetch_cmd::print_attempts(&failure.attempts);
            }
            eprintln!("  Error: {e:#}");
        }
        std::process::exit(1);
    }

    result
}
