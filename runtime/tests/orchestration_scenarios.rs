//! End-to-end orchestrator behavior with scripted strategies.

use assert_json_diff::assert_json_include;
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use url::Url;
use webfetch_runtime::audit::AuditLogger;
use webfetch_runtime::classify::cache::ClassificationCache;
use webfetch_runtime::classify::{
    Classification, ErrorClassifier, Fault, FaultCategory, FaultClassifier, FaultSignature,
    Severity, SuggestedAction,
};
use webfetch_runtime::orchestrator::backoff::RetryPlan;
use webfetch_runtime::orchestrator::{
    AttemptOutcome, FailureReason, FetchOrchestrator, OrchestratorConfig,
};
use webfetch_runtime::routing::{PatternKind, Router, RoutingRule, StrategyId};
use webfetch_runtime::strategy::{Content, FetchStrategy};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Replays a fixed list of outcomes, then repeats the last one.
struct ScriptedStrategy {
    id: StrategyId,
    script: Mutex<VecDeque<Result<Content, Fault>>>,
    fallback: Result<Content, Fault>,
    calls: AtomicUsize,
}

impl ScriptedStrategy {
    fn new(id: StrategyId, script: Vec<Result<Content, Fault>>) -> Arc<Self> {
        let fallback = script
            .last()
            .cloned()
            .unwrap_or_else(|| Err(Fault::new("script exhausted")));
        Arc::new(Self {
            id,
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FetchStrategy for ScriptedStrategy {
    fn id(&self) -> StrategyId {
        self.id
    }

    async fn attempt(&self, _url: &Url, _timeout: Duration) -> Result<Content, Fault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Never answers within any reasonable timeout.
struct StalledStrategy;

#[async_trait]
impl FetchStrategy for StalledStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Static
    }

    async fn attempt(&self, _url: &Url, _timeout: Duration) -> Result<Content, Fault> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(Fault::new("unreachable"))
    }
}

/// Counts calls to `classify`.
#[derive(Default)]
struct CountingClassifier {
    classified: AtomicUsize,
}

impl FaultClassifier for CountingClassifier {
    fn categorize(&self, fault: &Fault) -> FaultCategory {
        ErrorClassifier.categorize(fault)
    }

    fn classify(&self, fault: &Fault) -> Classification {
        self.classified.fetch_add(1, Ordering::SeqCst);
        ErrorClassifier.classify(fault)
    }
}

fn page(url: &str) -> Content {
    Content {
        url: url.to_string(),
        final_url: url.to_string(),
        status: 200,
        content_type: Some("text/html".to_string()),
        body: "<html><body>ok</body></html>".to_string(),
    }
}

fn config(plan: RetryPlan) -> OrchestratorConfig {
    OrchestratorConfig {
        retry: plan,
        attempt_timeout: Duration::from_secs(5),
        fetch_budget: Duration::from_secs(30),
    }
}

fn router_with(rules: Vec<RoutingRule>) -> Arc<Router> {
    Arc::new(Router::new(rules, vec![StrategyId::Static, StrategyId::Browser]).unwrap())
}

fn default_orchestrator(plan: RetryPlan) -> FetchOrchestrator {
    FetchOrchestrator::new(router_with(Vec::new()), config(plan))
}

fn host_rule(host: &str, order: Vec<StrategyId>) -> RoutingRule {
    RoutingRule {
        pattern: host.to_string(),
        pattern_kind: PatternKind::Host,
        priority: 10,
        strategy_order: order,
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_not_found_aborts_without_trying_browser() {
    let url = "https://docs.example.test/missing";
    let router = router_with(vec![host_rule(
        "docs.example.test",
        vec![StrategyId::Static, StrategyId::Browser],
    )]);
    let direct = ScriptedStrategy::new(
        StrategyId::Static,
        vec![Err(Fault::with_status(404, "HTTP 404 Not Found"))],
    );
    let browser = ScriptedStrategy::new(StrategyId::Browser, vec![Ok(page(url))]);
    let orchestrator = FetchOrchestrator::new(router, config(RetryPlan::immediate(2)))
        .with_strategy(direct.clone())
        .with_strategy(browser.clone());

    let failure = orchestrator.fetch(url).await.unwrap_err();

    assert_eq!(
        failure.reason,
        FailureReason::Aborted {
            strategy: StrategyId::Static,
            category: FaultCategory::NotFound,
        }
    );
    assert_eq!(failure.attempts.len(), 1);
    assert_eq!(direct.calls(), 1);
    assert_eq!(browser.calls(), 0);
}

#[tokio::test]
async fn test_timeouts_retry_then_fall_back_to_browser() {
    let url = "https://unrouted.example.test/story";
    let router = router_with(Vec::new());
    let direct = ScriptedStrategy::new(
        StrategyId::Static,
        vec![
            Err(Fault::new("operation timed out")),
            Err(Fault::new("operation timed out")),
        ],
    );
    let browser = ScriptedStrategy::new(StrategyId::Browser, vec![Ok(page(url))]);
    let orchestrator = FetchOrchestrator::new(router, config(RetryPlan::immediate(2)))
        .with_strategy(direct.clone())
        .with_strategy(browser.clone());

    let report = orchestrator.fetch(url).await.unwrap();

    assert_eq!(report.strategy, StrategyId::Browser);
    assert_eq!(report.attempts.len(), 3);
    assert_eq!(direct.calls(), 2);
    assert_eq!(browser.calls(), 1);
    assert!(report.attempts.last().unwrap().is_success());

    let actual = serde_json::to_value(&report).unwrap();
    assert_json_include!(
        actual: actual,
        expected: json!({
            "url": url,
            "strategy": "browser",
            "content": { "status": 200 },
            "attempts": [
                {
                    "strategy": "static",
                    "attempt": 1,
                    "outcome": {
                        "result": "failure",
                        "category": "timeout",
                        "severity": "temporary",
                        "action": "retry",
                        "cached": false
                    }
                },
                {
                    "strategy": "static",
                    "attempt": 2,
                    "outcome": { "result": "failure", "category": "timeout", "cached": true }
                },
                {
                    "strategy": "browser",
                    "attempt": 1,
                    "outcome": { "result": "success", "status": 200 }
                }
            ]
        })
    );
}

#[tokio::test]
async fn test_cached_classification_skips_classifier() {
    let url = "https://legacy-tls.example.test/";
    let cache = Arc::new(ClassificationCache::new());
    let signature = FaultSignature::new("legacy-tls.example.test", FaultCategory::TlsHandshake);
    let ten_seconds_ago = Instant::now()
        .checked_sub(Duration::from_secs(10))
        .unwrap_or_else(Instant::now);
    cache.put_at(
        signature,
        Classification::new(
            Severity::Permanent,
            SuggestedAction::Fallback,
            Duration::from_secs(3600),
        ),
        ten_seconds_ago,
    );

    let classifier = Arc::new(CountingClassifier::default());
    let direct = ScriptedStrategy::new(
        StrategyId::Static,
        vec![Err(Fault::new("received fatal alert: HandshakeFailure"))],
    );
    let browser = ScriptedStrategy::new(StrategyId::Browser, vec![Ok(page(url))]);
    let orchestrator = default_orchestrator(RetryPlan::immediate(2))
        .with_cache(cache)
        .with_classifier(classifier.clone())
        .with_strategy(direct.clone())
        .with_strategy(browser);

    let report = orchestrator.fetch(url).await.unwrap();

    assert_eq!(classifier.classified.load(Ordering::SeqCst), 0);
    assert_eq!(report.strategy, StrategyId::Browser);
    assert_eq!(direct.calls(), 1);
    match &report.attempts[0].outcome {
        AttemptOutcome::Failure {
            category, cached, ..
        } => {
            assert_eq!(*category, FaultCategory::TlsHandshake);
            assert!(*cached);
        }
        other => panic!("expected a failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_fault_is_retried_exactly_once() {
    let url = "https://odd.example.test/";
    let direct = ScriptedStrategy::new(
        StrategyId::Static,
        vec![Err(Fault::new("the printer is on fire"))],
    );
    let browser = ScriptedStrategy::new(StrategyId::Browser, vec![Ok(page(url))]);
    let orchestrator = default_orchestrator(RetryPlan::immediate(5))
        .with_strategy(direct.clone())
        .with_strategy(browser);

    let report = orchestrator.fetch(url).await.unwrap();

    assert_eq!(direct.calls(), 2);
    assert_eq!(report.attempts.len(), 3);
}

#[tokio::test]
async fn test_permanent_fallback_is_not_retried() {
    let url = "https://guarded.example.test/";
    let direct = ScriptedStrategy::new(
        StrategyId::Static,
        vec![Err(Fault::with_status(403, "HTTP 403 Forbidden"))],
    );
    let browser = ScriptedStrategy::new(StrategyId::Browser, vec![Ok(page(url))]);
    let orchestrator = default_orchestrator(RetryPlan::immediate(3))
        .with_strategy(direct.clone())
        .with_strategy(browser);

    let report = orchestrator.fetch(url).await.unwrap();

    assert_eq!(direct.calls(), 1);
    assert_eq!(report.strategy, StrategyId::Browser);
}

#[tokio::test]
async fn test_all_strategies_failing_is_exhausted() {
    let url = "https://down.example.test/";
    let busy = || Err(Fault::with_status(503, "HTTP 503 Service Unavailable"));
    let direct = ScriptedStrategy::new(StrategyId::Static, vec![busy()]);
    let browser = ScriptedStrategy::new(StrategyId::Browser, vec![busy()]);
    let orchestrator = default_orchestrator(RetryPlan::immediate(2))
        .with_strategy(direct.clone())
        .with_strategy(browser.clone());

    let failure = orchestrator.fetch(url).await.unwrap_err();

    assert_eq!(failure.reason, FailureReason::Exhausted);
    assert_eq!(failure.attempts.len(), 4);
    assert_eq!(direct.calls(), 2);
    assert_eq!(browser.calls(), 2);
    assert!(failure.to_string().contains("all strategies failed"));
}

#[tokio::test]
async fn test_strategies_run_in_resolved_order() {
    let url = "https://app.example.test/";
    let router = router_with(vec![host_rule(
        "app.example.test",
        vec![StrategyId::Browser, StrategyId::Static],
    )]);
    let direct = ScriptedStrategy::new(StrategyId::Static, vec![Ok(page(url))]);
    let browser = ScriptedStrategy::new(
        StrategyId::Browser,
        vec![Err(Fault::new("anti-bot challenge page detected (title: just a moment)"))],
    );
    let orchestrator = FetchOrchestrator::new(router, config(RetryPlan::immediate(2)))
        .with_strategy(direct.clone())
        .with_strategy(browser.clone());

    let report = orchestrator.fetch(url).await.unwrap();

    let order: Vec<StrategyId> = report.attempts.iter().map(|a| a.strategy).collect();
    assert_eq!(order, vec![StrategyId::Browser, StrategyId::Static]);
    assert_eq!(report.strategy, StrategyId::Static);
}

#[tokio::test]
async fn test_unregistered_strategy_is_skipped() {
    let url = "https://plain.example.test/";
    let direct = ScriptedStrategy::new(StrategyId::Static, vec![Ok(page(url))]);
    let router = router_with(vec![host_rule(
        "plain.example.test",
        vec![StrategyId::Browser, StrategyId::Static],
    )]);
    let orchestrator =
        FetchOrchestrator::new(router, config(RetryPlan::immediate(2))).with_strategy(direct);

    let report = orchestrator.fetch(url).await.unwrap();

    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.strategy, StrategyId::Static);
}

#[tokio::test]
async fn test_no_registered_strategy() {
    let router = Arc::new(Router::new(Vec::new(), vec![StrategyId::Browser]).unwrap());
    let orchestrator = FetchOrchestrator::new(router, config(RetryPlan::immediate(2)));

    let failure = orchestrator.fetch("https://example.test/").await.unwrap_err();

    assert_eq!(failure.reason, FailureReason::NoStrategies);
    assert!(failure.attempts.is_empty());
}

#[tokio::test]
async fn test_invalid_url_has_empty_attempt_log() {
    let orchestrator = default_orchestrator(RetryPlan::immediate(2));

    let failure = orchestrator.fetch("not a url").await.unwrap_err();

    assert!(matches!(failure.reason, FailureReason::InvalidUrl { .. }));
    assert!(failure.attempts.is_empty());
}

#[tokio::test]
async fn test_unbounded_budget_does_not_overflow() {
    let url = "https://patient.example.test/";
    let direct = ScriptedStrategy::new(StrategyId::Static, vec![Ok(page(url))]);
    let orchestrator = FetchOrchestrator::new(
        router_with(Vec::new()),
        OrchestratorConfig {
            retry: RetryPlan::immediate(2),
            attempt_timeout: Duration::MAX,
            fetch_budget: Duration::MAX,
        },
    )
    .with_strategy(direct);

    let failure = orchestrator.fetch("not a url").await.unwrap_err();
    assert!(matches!(failure.reason, FailureReason::InvalidUrl { .. }));

    let report = orchestrator.fetch(url).await.unwrap();
    assert_eq!(report.strategy, StrategyId::Static);
}

#[tokio::test]
async fn test_budget_bounds_stalled_strategy() {
    let orchestrator = FetchOrchestrator::new(
        Arc::new(Router::new(Vec::new(), vec![StrategyId::Static]).unwrap()),
        OrchestratorConfig {
            retry: RetryPlan::immediate(10),
            attempt_timeout: Duration::from_millis(150),
            fetch_budget: Duration::from_millis(400),
        },
    )
    .with_strategy(Arc::new(StalledStrategy));

    let started = Instant::now();
    let failure = orchestrator.fetch("https://slow.example.test/").await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(failure.reason, FailureReason::DeadlineExceeded);
    assert!(!failure.attempts.is_empty());
    for attempt in &failure.attempts {
        match &attempt.outcome {
            AttemptOutcome::Failure { category, .. } => {
                assert_eq!(*category, FaultCategory::Timeout)
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_cache_is_shared_across_fetches() {
    let cache = Arc::new(ClassificationCache::new());
    let classifier = Arc::new(CountingClassifier::default());
    let direct = ScriptedStrategy::new(
        StrategyId::Static,
        vec![Err(Fault::with_status(403, "HTTP 403 Forbidden"))],
    );
    let browser = ScriptedStrategy::new(
        StrategyId::Browser,
        vec![Ok(page("https://shared.example.test/"))],
    );
    let orchestrator = Arc::new(
        default_orchestrator(RetryPlan::immediate(2))
            .with_cache(Arc::clone(&cache))
            .with_classifier(classifier.clone())
            .with_strategy(direct)
            .with_strategy(browser),
    );

    let first = orchestrator.fetch("https://shared.example.test/a").await.unwrap();
    let second = orchestrator.fetch("https://shared.example.test/b").await.unwrap();

    assert_eq!(classifier.classified.load(Ordering::SeqCst), 1);
    assert_ne!(first.fetch_id, second.fetch_id);
    assert!(matches!(
        second.attempts[0].outcome,
        AttemptOutcome::Failure { cached: true, .. }
    ));
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_completed_fetches_are_audited() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let direct = ScriptedStrategy::new(
        StrategyId::Static,
        vec![Err(Fault::with_status(410, "HTTP 410 Gone"))],
    );
    let orchestrator = default_orchestrator(RetryPlan::immediate(2))
        .with_strategy(direct)
        .with_audit(AuditLogger::open(&path).unwrap());

    let failure = orchestrator.fetch("https://gone.example.test/").await.unwrap_err();

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 1);
    let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_json_include!(
        actual: record,
        expected: json!({
            "fetch_id": failure.fetch_id.to_string(),
            "url": "https://gone.example.test/",
            "outcome": "failure",
            "strategy": "static",
            "attempts": 1
        })
    );
}
