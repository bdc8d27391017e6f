//! The per-URL fetch state machine.
//!
//! For one URL: resolve the strategy order, try each strategy in turn,
//! classify every failure (through the shared cache), and decide between
//! retrying the same strategy, falling back to the next one, or aborting.
//! This is the only place retry and backoff policy lives.

pub mod backoff;

use crate::audit::{AuditLogger, AuditRecord};
use crate::classify::cache::ClassificationCache;
use crate::classify::{
    ErrorClassifier, Fault, FaultCategory, FaultClassifier, FaultSignature, Severity,
    SuggestedAction,
};
use crate::config::{deadline_after, FetchConfig};
use crate::routing::{Router, StrategyId};
use crate::session::SessionSupervisor;
use crate::strategy::{BrowserStrategy, Content, DirectStrategy, FetchStrategy};
use backoff::{backoff_delay, RetryPlan};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

/// Unknown faults get exactly one retry.
pub const UNKNOWN_ATTEMPTS: u32 = 2;

/// One recorded attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchAttempt {
    pub strategy: StrategyId,
    /// 1-based attempt number within this strategy.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success {
        status: u16,
    },
    Failure {
        fault: Fault,
        category: FaultCategory,
        severity: Severity,
        action: SuggestedAction,
        /// Classification came from the cache.
        cached: bool,
    },
}

impl FetchAttempt {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success { .. })
    }
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis().min(u64::MAX as u128) as u64)
}

/// Successful fetch: the content plus how it was obtained.
#[derive(Debug, Clone, Serialize)]
pub struct FetchReport {
    pub fetch_id: Uuid,
    pub url: String,
    pub strategy: StrategyId,
    pub content: Content,
    pub attempts: Vec<FetchAttempt>,
}

/// Why a fetch ended without content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// A fault no strategy can fix.
    Aborted {
        strategy: StrategyId,
        category: FaultCategory,
    },
    /// Every strategy failed.
    Exhausted,
    DeadlineExceeded,
    InvalidUrl { message: String },
    /// None of the resolved strategies is registered.
    NoStrategies,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aborted { strategy, category } => {
                write!(f, "aborted after {category} from {strategy}")
            }
            Self::Exhausted => f.write_str("all strategies failed"),
            Self::DeadlineExceeded => f.write_str("fetch budget exhausted"),
            Self::InvalidUrl { message } => write!(f, "invalid URL: {message}"),
            Self::NoStrategies => f.write_str("no registered strategy for this URL"),
        }
    }
}

/// Terminal failure of one fetch, with the full attempt log.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("fetch of {url} failed: {reason} ({} attempts)", .attempts.len())]
pub struct FatalFailure {
    pub fetch_id: Uuid,
    pub url: String,
    pub reason: FailureReason,
    pub attempts: Vec<FetchAttempt>,
}

/// Retry and time budgets.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub retry: RetryPlan,
    /// Upper bound for a single attempt.
    pub attempt_timeout: Duration,
    /// Upper bound for a whole `fetch`.
    pub fetch_budget: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

impl From<&FetchConfig> for OrchestratorConfig {
    fn from(cfg: &FetchConfig) -> Self {
        Self {
            retry: cfg.retry.clone(),
            attempt_timeout: cfg.attempt_timeout,
            fetch_budget: cfg.fetch_budget,
        }
    }
}

/// Drives fetches for any number of concurrent callers.
///
/// The router is read-only; the classification cache is shared and safe
/// for concurrent use. Each call owns its attempt log and timers.
pub struct FetchOrchestrator {
    router: Arc<Router>,
    cache: Arc<ClassificationCache>,
    classifier: Arc<dyn FaultClassifier>,
    strategies: HashMap<StrategyId, Arc<dyn FetchStrategy>>,
    audit: Option<Arc<Mutex<AuditLogger>>>,
    config: OrchestratorConfig,
}

impl FetchOrchestrator {
    /// Orchestrator with no strategies registered yet.
    pub fn new(router: Arc<Router>, config: OrchestratorConfig) -> Self {
        Self {
            router,
            cache: Arc::new(ClassificationCache::new()),
            classifier: Arc::new(ErrorClassifier),
            strategies: HashMap::new(),
            audit: None,
            config,
        }
    }

    /// Orchestrator with the direct and browser strategies.
    pub fn standard(
        router: Arc<Router>,
        supervisor: Arc<SessionSupervisor>,
        config: OrchestratorConfig,
    ) -> Self {
        Self::new(router, config)
            .with_strategy(Arc::new(DirectStrategy::new()))
            .with_strategy(Arc::new(BrowserStrategy::new(supervisor)))
    }

    /// Register a strategy, replacing any with the same id.
    pub fn with_strategy(mut self, strategy: Arc<dyn FetchStrategy>) -> Self {
        self.strategies.insert(strategy.id(), strategy);
        self
    }

    pub fn with_cache(mut self, cache: Arc<ClassificationCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn FaultClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_audit(mut self, logger: AuditLogger) -> Self {
        self.audit = Some(Arc::new(Mutex::new(logger)));
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn cache(&self) -> &Arc<ClassificationCache> {
        &self.cache
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Fetch within the configured overall budget.
    pub async fn fetch(&self, url: &str) -> Result<FetchReport, FatalFailure> {
        self.fetch_with_deadline(url, deadline_after(self.config.fetch_budget))
            .await
    }

    /// Fetch, giving up cleanly at `deadline`.
    pub async fn fetch_with_deadline(
        &self,
        url: &str,
        deadline: Instant,
    ) -> Result<FetchReport, FatalFailure> {
        let fetch_id = Uuid::new_v4();
        let span = info_span!("fetch", %fetch_id, url = %url);
        let started = Instant::now();
        let result = self.run(fetch_id, url, deadline).instrument(span).await;
        self.record_audit(&result, started.elapsed());
        result
    }

    async fn run(
        &self,
        fetch_id: Uuid,
        raw_url: &str,
        deadline: Instant,
    ) -> Result<FetchReport, FatalFailure> {
        let mut attempts = Vec::new();
        let fail = |reason: FailureReason, attempts: Vec<FetchAttempt>| FatalFailure {
            fetch_id,
            url: raw_url.to_string(),
            reason,
            attempts,
        };

        let url = match Url::parse(raw_url) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "rejecting unparsable URL");
                return Err(fail(
                    FailureReason::InvalidUrl {
                        message: e.to_string(),
                    },
                    attempts,
                ));
            }
        };
        let host = url.host_str().unwrap_or_default().to_string();
        let order = self.router.resolve(&url);
        debug!(order = ?order, "resolved strategy order");

        let plan = &self.config.retry;
        let mut tried_any = false;

        for &strategy_id in order {
            let Some(strategy) = self.strategies.get(&strategy_id) else {
                warn!(strategy = %strategy_id, "strategy not registered, skipping");
                continue;
            };
            tried_any = true;

            let mut attempt_no = 0u32;
            loop {
                let now = Instant::now();
                if now >= deadline {
                    warn!(strategy = %strategy_id, "fetch budget exhausted");
                    return Err(fail(FailureReason::DeadlineExceeded, attempts));
                }
                let bound = self.config.attempt_timeout.min(deadline - now);
                attempt_no += 1;

                let started_at = Utc::now();
                let clock = Instant::now();
                let result = match tokio::time::timeout(bound, strategy.attempt(&url, bound)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(Fault::new(format!(
                        "attempt timed out after {}ms",
                        bound.as_millis()
                    ))),
                };
                let duration = clock.elapsed();

                let fault = match result {
                    Ok(content) => {
                        info!(
                            strategy = %strategy_id,
                            attempt = attempt_no,
                            status = content.status,
                            "fetched"
                        );
                        attempts.push(FetchAttempt {
                            strategy: strategy_id,
                            attempt: attempt_no,
                            started_at,
                            duration,
                            outcome: AttemptOutcome::Success {
                                status: content.status,
                            },
                        });
                        return Ok(FetchReport {
                            fetch_id,
                            url: raw_url.to_string(),
                            strategy: strategy_id,
                            content,
                            attempts,
                        });
                    }
                    Err(fault) => fault,
                };

                let category = self.classifier.categorize(&fault);
                let signature = FaultSignature::new(&host, category);
                let (classification, cached) = match self.cache.get(&signature) {
                    Some(hit) => (hit, true),
                    None => {
                        let fresh = self.classifier.classify(&fault);
                        self.cache.put(signature, fresh);
                        (fresh, false)
                    }
                };
                let action = classification.suggested_action;
                let severity = classification.severity;
                warn!(
                    strategy = %strategy_id,
                    attempt = attempt_no,
                    %category,
                    ?severity,
                    ?action,
                    cached,
                    error = %fault,
                    "attempt failed"
                );

                let retry_after = fault.retry_after_secs;
                attempts.push(FetchAttempt {
                    strategy: strategy_id,
                    attempt: attempt_no,
                    started_at,
                    duration,
                    outcome: AttemptOutcome::Failure {
                        fault,
                        category,
                        severity,
                        action,
                        cached,
                    },
                });

                match action {
                    SuggestedAction::Abort => {
                        return Err(fail(
                            FailureReason::Aborted {
                                strategy: strategy_id,
                                category,
                            },
                            attempts,
                        ));
                    }
                    SuggestedAction::Fallback => break,
                    SuggestedAction::Retry => {
                        if attempt_no >= attempt_budget(severity, plan) {
                            debug!(strategy = %strategy_id, "retry budget spent, falling back");
                            break;
                        }
                        let mut delay = backoff_delay(plan, attempt_no - 1);
                        if let Some(secs) = retry_after {
                            delay = delay.max(Duration::from_secs(secs).min(plan.max_delay()));
                        }
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        if delay >= remaining {
                            debug!(?delay, ?remaining, "no budget left for backoff, falling back");
                            break;
                        }
                        debug!(?delay, "backing off before retry");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let reason = if !tried_any {
            FailureReason::NoStrategies
        } else if Instant::now() >= deadline {
            FailureReason::DeadlineExceeded
        } else {
            FailureReason::Exhausted
        };
        Err(fail(reason, attempts))
    }

    fn record_audit(&self, result: &Result<FetchReport, FatalFailure>, elapsed: Duration) {
        let Some(audit) = &self.audit else {
            return;
        };
        let record = match result {
            Ok(report) => AuditRecord::from_report(report, elapsed),
            Err(failure) => AuditRecord::from_failure(failure, elapsed),
        };
        let mut logger = audit.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = logger.log(&record) {
            warn!(error = %e, "failed to write audit record");
        }
    }
}

/// Attempts allowed for one strategy, the first one included.
fn attempt_budget(severity: Severity, plan: &RetryPlan) -> u32 {
    match severity {
        Severity::Permanent => 1,
        Severity::Temporary => plan.max_attempts.max(1),
        Severity::Unknown => UNKNOWN_ATTEMPTS,
    }
}
