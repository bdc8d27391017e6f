//! `webfetch fetch <url>`.

use crate::audit::AuditLogger;
use crate::cli::output::{is_json, is_quiet, note, print_json};
use crate::config::{parse_fetch_budget, FetchConfig};
use crate::orchestrator::{AttemptOutcome, FetchAttempt, FetchOrchestrator, OrchestratorConfig};
use crate::routing::Router;
use crate::session::SessionSupervisor;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Options for one fetch from the command line.
#[derive(Debug, Default)]
pub struct FetchArgs {
    pub url: String,
    pub trust_session: bool,
    pub routes: Option<PathBuf>,
    pub budget_secs: Option<u64>,
    pub audit: Option<PathBuf>,
}

/// Fetch a URL and write the document body to stdout.
///
/// With `--json` the whole report (content and attempt log) is printed
/// instead.
pub async fn run(args: FetchArgs) -> Result<()> {
    let mut config = FetchConfig::from_env();
    if args.routes.is_some() {
        config.routes_path = args.routes;
    }
    if let Some(secs) = args.budget_secs {
        config.fetch_budget = parse_fetch_budget(secs).context("invalid --budget")?;
    }
    if args.audit.is_some() {
        config.audit_log = args.audit;
    }

    let router =
        Router::load(config.routes_path.as_deref()).context("failed to load routing rules")?;
    let supervisor = Arc::new(SessionSupervisor::new(config.session.clone()));
    if args.trust_session {
        supervisor.force_trust();
    }

    let mut orchestrator = FetchOrchestrator::standard(
        Arc::new(router),
        supervisor,
        OrchestratorConfig::from(&config),
    );
    if let Some(path) = &config.audit_log {
        orchestrator = orchestrator.with_audit(AuditLogger::open(path)?);
    }

    let report = orchestrator.fetch(&args.url).await?;

    if is_json() {
        print_json(&report);
        return Ok(());
    }

    if !is_quiet() {
        print_attempts(&report.attempts);
        eprintln!(
            "Fetched {} via {} ({} attempt(s), {} bytes)",
            report.content.final_url,
            report.strategy,
            report.attempts.len(),
            report.content.body.len()
        );
    }
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(report.content.body.as_bytes())
        .context("failed to write document")?;
    stdout.flush()?;
    Ok(())
}

/// Attempt log on stderr.
pub fn print_attempts(attempts: &[FetchAttempt]) {
    for a in attempts {
        let ms = a.duration.as_millis();
        match &a.outcome {
            AttemptOutcome::Success { status } => {
                note(format!("  [OK] {} #{} {status} ({ms}ms)", a.strategy, a.attempt));
            }
            AttemptOutcome::Failure {
                fault,
                category,
                action,
                cached,
                ..
            } => {
                let source = if *cached { ", cached" } else { "" };
                note(format!(
                    "  [!!] {} #{} {category} -> {action:?}{source} ({ms}ms): {fault}",
                    a.strategy, a.attempt
                ));
            }
        }
    }
}
