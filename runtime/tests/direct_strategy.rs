//! Direct strategy under the orchestrator, against a mock HTTP server.

use std::sync::Arc;
use std::time::Duration;
use webfetch_runtime::classify::FaultCategory;
use webfetch_runtime::orchestrator::backoff::RetryPlan;
use webfetch_runtime::orchestrator::{
    AttemptOutcome, FailureReason, FetchOrchestrator, OrchestratorConfig,
};
use webfetch_runtime::routing::{Router, StrategyId};
use webfetch_runtime::strategy::DirectStrategy;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn article() -> String {
    format!(
        "<html><head><title>Field notes</title><script>track()</script></head>\
         <body><article>{}</article></body></html>",
        "A complete sentence of article text. ".repeat(20)
    )
}

fn static_only() -> FetchOrchestrator {
    let router = Router::new(Vec::new(), vec![StrategyId::Static]).unwrap();
    FetchOrchestrator::new(
        Arc::new(router),
        OrchestratorConfig {
            retry: RetryPlan::immediate(3),
            attempt_timeout: Duration::from_secs(5),
            fetch_budget: Duration::from_secs(20),
        },
    )
    .with_strategy(Arc::new(DirectStrategy::new()))
}

#[tokio::test]
async fn test_fetches_article() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/notes"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(article()),
        )
        .mount(&server)
        .await;

    let report = static_only()
        .fetch(&format!("{}/notes", server.uri()))
        .await
        .unwrap();

    assert_eq!(report.strategy, StrategyId::Static);
    assert_eq!(report.attempts.len(), 1);
    assert!(report.content.body.contains("Field notes"));
}

#[tokio::test]
async fn test_not_found_aborts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let failure = static_only()
        .fetch(&format!("{}/gone", server.uri()))
        .await
        .unwrap_err();

    assert_eq!(
        failure.reason,
        FailureReason::Aborted {
            strategy: StrategyId::Static,
            category: FaultCategory::NotFound,
        }
    );
    assert_eq!(failure.attempts.len(), 1);
}

#[tokio::test]
async fn test_transient_503_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(article()),
        )
        .mount(&server)
        .await;

    let report = static_only()
        .fetch(&format!("{}/flaky", server.uri()))
        .await
        .unwrap();

    assert_eq!(report.attempts.len(), 2);
    assert!(matches!(
        report.attempts[0].outcome,
        AttemptOutcome::Failure {
            category: FaultCategory::ServiceUnavailable,
            ..
        }
    ));
    assert!(report.attempts[1].is_success());
}

#[tokio::test]
async fn test_challenge_page_falls_back() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(
                    "<html><head><title>Just a moment...</title></head>\
                     <body><div id=\"cf-browser-verification\"></div></body></html>",
                    "text/html",
                ),
        )
        .mount(&server)
        .await;

    let failure = static_only()
        .fetch(&format!("{}/protected", server.uri()))
        .await
        .unwrap_err();

    // Fallback with nothing left to fall back to.
    assert_eq!(failure.reason, FailureReason::Exhausted);
    assert_eq!(failure.attempts.len(), 1);
    assert!(matches!(
        failure.attempts[0].outcome,
        AttemptOutcome::Failure {
            category: FaultCategory::AntiBotChallenge,
            ..
        }
    ));
}
