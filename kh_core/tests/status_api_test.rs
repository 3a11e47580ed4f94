mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use common::{scripted_tokens, TrackingExecutor};
use kh_core::checks::{CheckDefinition, CheckSpec};
use kh_core::cluster::ClusterStore;
use kh_core::orchestrator::OrchestratorSettings;
use kh_core::status::CheckState;
use kh_core::{
    create_app, AppState, CheckRegistry, MemoryClusterStore, Orchestrator, StaticMasterMonitor, UuidWhitelist,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct Harness {
    app: Router,
    store: Arc<MemoryClusterStore>,
    monitor: Arc<StaticMasterMonitor>,
    orchestrator: Orchestrator,
}

impl Harness {
    async fn new(tokens: &[&str]) -> Self {
        let store = Arc::new(MemoryClusterStore::new());
        store.upsert_external_check(CheckDefinition::external(
            "dns-check",
            "registry.local/dns-check:1.0",
            Duration::from_secs(60),
            Duration::from_secs(10),
        ));

        let whitelist = UuidWhitelist::new(store.clone()).with_generator(scripted_tokens(tokens));
        let mut registry = CheckRegistry::new(
            Arc::new(TrackingExecutor::new()),
            whitelist.clone(),
            Duration::from_secs(1),
        );
        registry
            .register(CheckDefinition::new(
                "dns-status-internal",
                CheckSpec::Dns { endpoints: vec!["kubernetes.default".to_string()] },
            ))
            .unwrap();

        let monitor = Arc::new(StaticMasterMonitor::new(true));
        let (mut orchestrator, handle) =
            Orchestrator::new(registry, monitor.clone(), store.clone(), OrchestratorSettings::default());
        orchestrator.poll_master().await;

        let app = create_app(AppState::new("kh-0", store.clone(), whitelist, handle));
        Self {
            app,
            store,
            monitor,
            orchestrator,
        }
    }

    /// Loses and regains mastership, which re-activates every check with fresh tokens.
    async fn reactivate(&mut self) {
        self.monitor.set_master(false);
        self.orchestrator.poll_master().await;
        self.monitor.set_master(true);
        self.orchestrator.poll_master().await;
    }

    async fn post_report(&self, body: String) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/externalCheckStatus")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();

        self.send(request).await
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }
}

fn report(uuid: &str, ok: bool, errors: &[&str]) -> String {
    json!({
        "checkName": "dns-check",
        "uuid": uuid,
        "status": { "ok": ok, "errors": errors },
        "details": { "resolver": "10.96.0.10" }
    })
    .to_string()
}

#[tokio::test]
async fn test_stale_token_is_rejected_after_reactivation() {
    let mut harness = Harness::new(&["abc-123", "xyz-789"]).await;

    let (status, _) = harness.post_report(report("abc-123", true, &[])).await;
    assert_eq!(status, StatusCode::OK);

    let recorded = harness.store.get_check_state("dns-check").await.unwrap().unwrap();
    assert!(recorded.ok);
    assert_eq!(recorded.run_uuid.as_deref(), Some("abc-123"));
    assert_eq!(recorded.details, Some(json!({ "resolver": "10.96.0.10" })));

    harness.reactivate().await;
    assert_eq!(harness.store.whitelist_entry("dns-check").unwrap().current_uuid, "xyz-789");

    let (status, body) = harness
        .post_report(report("abc-123", false, &["forged failure"]))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["status"], 403);

    let unchanged = harness.store.get_check_state("dns-check").await.unwrap().unwrap();
    assert_eq!(unchanged, recorded);

    let (status, _) = harness
        .post_report(report("xyz-789", false, &["NXDOMAIN for kubernetes.default"]))
        .await;
    assert_eq!(status, StatusCode::OK);

    let latest = harness.store.get_check_state("dns-check").await.unwrap().unwrap();
    assert!(!latest.ok);
    assert_eq!(latest.errors, vec!["NXDOMAIN for kubernetes.default".to_string()]);
    assert_eq!(latest.run_uuid.as_deref(), Some("xyz-789"));
}

#[tokio::test]
async fn test_malformed_reports_are_bad_requests() {
    let harness = Harness::new(&["abc-123"]).await;

    let cases = [
        "{not json".to_string(),
        "".to_string(),
        json!({ "checkName": "dns-check", "status": { "ok": true } }).to_string(),
        json!({ "checkName": "dns-check", "uuid": "", "status": { "ok": true } }).to_string(),
        json!({ "checkName": "Not_A_Name", "uuid": "abc-123", "status": { "ok": true } }).to_string(),
        report("abc-123", true, &["ok but with errors"]),
        report("abc-123", false, &[]),
    ];

    for body in cases {
        let (status, response) = harness.post_report(body.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {}", body);
        assert_eq!(response["status"], 400);
    }

    assert!(harness.store.get_check_state("dns-check").await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_content_type_is_bad_request() {
    let harness = Harness::new(&["abc-123"]).await;

    let request = Request::builder()
        .method("POST")
        .uri("/externalCheckStatus")
        .body(Body::from(report("abc-123", true, &[])))
        .unwrap();
    let (status, _) = harness.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_report_for_unknown_check_is_forbidden() {
    let harness = Harness::new(&["abc-123"]).await;

    let body = json!({
        "checkName": "ghost-check",
        "uuid": "abc-123",
        "status": { "ok": true, "errors": [] }
    })
    .to_string();
    let (status, _) = harness.post_report(body).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(harness.store.get_check_state("ghost-check").await.unwrap().is_none());
}

#[tokio::test]
async fn test_status_aggregates_recorded_checks() {
    let harness = Harness::new(&["abc-123"]).await;

    harness
        .store
        .put_check_state(
            "dns-status-internal",
            &CheckState::unhealthy("kh-0", true, vec!["lookup of kubernetes.default timed out".to_string()]),
        )
        .await
        .unwrap();
    harness.post_report(report("abc-123", true, &[])).await;

    for uri in ["/", "/status"] {
        let (status, body) = harness.get(uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], false);
        assert_eq!(body["currentMaster"], "kh-0");
        assert_eq!(
            body["errors"],
            json!(["dns-status-internal: lookup of kubernetes.default timed out"])
        );
        assert_eq!(body["checkDetails"]["dns-check"]["ok"], true);
        assert_eq!(body["checkDetails"]["dns-check"]["mandatory"], false);
        assert_eq!(body["checkDetails"]["dns-status-internal"]["mandatory"], true);
    }
}

#[tokio::test]
async fn test_status_read_has_no_side_effects() {
    let harness = Harness::new(&["abc-123"]).await;

    let (_, first) = harness.get("/status").await;
    let (_, second) = harness.get("/status").await;

    assert_eq!(first, second);
    assert_eq!(harness.store.whitelist_entry("dns-check").unwrap().current_uuid, "abc-123");
}

#[tokio::test]
async fn test_healthz_reports_instance() {
    let harness = Harness::new(&["abc-123"]).await;

    let (status, body) = harness.get("/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["instance"], "kh-0");
    assert_eq!(body["isMaster"], true);
}
