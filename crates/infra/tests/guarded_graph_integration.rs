//! Integration tests for the guarded graph client
//!
//! A scripted in-memory backend stands in for the embedding model and the
//! graph database. Tokio's paused clock makes the backoff sleeps instant.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use graphguard_common::resilience::{
    CircuitState, ErrorCategory, ResilienceContext, DATABASE_BREAKER, EMBEDDER_BREAKER,
};
use graphguard_infra::{EntityNode, GraphBackend, GuardedGraph, HealthState};

#[derive(Debug, Clone)]
struct BackendError(String);

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BackendError {}

/// Backend that fails a scripted number of times before succeeding
#[derive(Debug, Default)]
struct ScriptedBackend {
    embed_failures: AtomicU32,
    embed_error: &'static str,
    persist_failures: AtomicU32,
    persist_error: &'static str,
    ping_failures: AtomicU32,
    embed_calls: AtomicU32,
    persist_calls: AtomicU32,
    ping_calls: AtomicU32,
    stored: Mutex<Vec<EntityNode>>,
}

impl ScriptedBackend {
    fn failing_embeds(count: u32, error: &'static str) -> Self {
        Self { embed_failures: AtomicU32::new(count), embed_error: error, ..Self::default() }
    }

    fn failing_persists(count: u32, error: &'static str) -> Self {
        Self { persist_failures: AtomicU32::new(count), persist_error: error, ..Self::default() }
    }

    fn failing_pings(count: u32) -> Self {
        Self { ping_failures: AtomicU32::new(count), ..Self::default() }
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
    }
}

#[async_trait]
impl GraphBackend for ScriptedBackend {
    type Error = BackendError;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, Self::Error> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.embed_failures) {
            return Err(BackendError(self.embed_error.to_string()));
        }
        Ok(vec![text.len() as f32, 1.0])
    }

    async fn persist(&self, node: &EntityNode) -> Result<(), Self::Error> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.persist_failures) {
            return Err(BackendError(self.persist_error.to_string()));
        }
        self.stored.lock().expect("lock poisoned").push(node.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), Self::Error> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.ping_failures) {
            return Err(BackendError("connection refused by neo4j".to_string()));
        }
        Ok(())
    }
}

fn guarded(backend: ScriptedBackend) -> GuardedGraph<ScriptedBackend> {
    GuardedGraph::new(backend, ResilienceContext::with_standard_breakers())
}

/// Validates that transient embedding failures are retried and the node is
/// persisted with its embedding attached.
#[tokio::test(start_paused = true)]
async fn test_save_entity_survives_transient_embedding_failures() {
    let graph = guarded(ScriptedBackend::failing_embeds(2, "embedding model overloaded"));
    let node = EntityNode::new("n-1", "Ada", "people");

    let saved = graph.save_entity(node).await.expect("third embedding attempt succeeds");

    assert_eq!(saved.name_embedding, Some(vec![3.0, 1.0]));
    assert_eq!(graph.backend().embed_calls.load(Ordering::SeqCst), 3);
    assert_eq!(graph.backend().persist_calls.load(Ordering::SeqCst), 1);
    assert_eq!(graph.backend().stored.lock().expect("lock poisoned")[0], saved);

    let summary = graph.status().metrics;
    assert_eq!(summary.total_calls, 2, "one embed call and one persist call");
    assert_eq!(summary.success_count, 2);
    assert_eq!(summary.total_retries, 2);
    assert_eq!(summary.categories[&ErrorCategory::Embedding].retries, 2);
}

/// Validates that an embedding outage trips the embedder breaker, keeps the
/// database untouched and short-circuits later calls.
#[tokio::test(start_paused = true)]
async fn test_embedding_outage_opens_embedder_breaker() {
    let graph = guarded(ScriptedBackend::failing_embeds(u32::MAX, "embedding model overloaded"));

    let err = graph
        .save_entity(EntityNode::new("n-2", "Grace", "people"))
        .await
        .expect_err("embedding never recovers");
    assert!(err.is_circuit_open());
    // Three failed attempts opened the breaker before the fourth ran
    assert_eq!(err.attempts(), 3);
    assert_eq!(err.operation(), "embedding_n-2");
    assert_eq!(graph.backend().embed_calls.load(Ordering::SeqCst), 3);
    assert_eq!(graph.backend().persist_calls.load(Ordering::SeqCst), 0);

    let rejected = graph.embed("query").await.expect_err("breaker is open");
    assert!(rejected.is_circuit_open());
    assert_eq!(graph.backend().embed_calls.load(Ordering::SeqCst), 3);

    let status = graph.status();
    assert_eq!(status.circuit_breakers[EMBEDDER_BREAKER].state, CircuitState::Open);
    assert_eq!(status.circuit_breakers[DATABASE_BREAKER].state, CircuitState::Closed);
}

/// Validates that database failures are retried under the database budget.
#[tokio::test(start_paused = true)]
async fn test_persist_retries_database_failures() {
    let graph = guarded(ScriptedBackend::failing_persists(2, "neo4j deadlock detected"));
    let node = EntityNode::new("n-3", "Linus", "people");

    graph.persist(&node).await.expect("third attempt succeeds");

    assert_eq!(graph.backend().persist_calls.load(Ordering::SeqCst), 3);
    let breaker = graph.context().breakers().get(DATABASE_BREAKER).expect("registered");
    // Each closed-state success forgives one failure
    assert_eq!(breaker.status().failure_count, 1);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

/// Validates that client errors from the database are not retried.
#[tokio::test(start_paused = true)]
async fn test_persist_client_error_fails_fast() {
    let graph = guarded(ScriptedBackend::failing_persists(1, "400 bad request: missing group_id"));

    let err = graph
        .persist(&EntityNode::new("n-4", "", "people"))
        .await
        .expect_err("client errors are terminal");

    assert_eq!(err.category(), ErrorCategory::ClientError);
    assert_eq!(err.attempts(), 0);
    assert_eq!(err.operation(), "database_n-4");
    assert_eq!(graph.backend().persist_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        err.last_error().map(ToString::to_string).as_deref(),
        Some("400 bad request: missing group_id")
    );
}

/// Validates that a health check of working dependencies reports every
/// component healthy and counts the probes in the shared metrics.
#[tokio::test(start_paused = true)]
async fn test_health_check_all_healthy() {
    let graph = guarded(ScriptedBackend::default());

    let report = graph.health_check().await;

    assert_eq!(report.status, HealthState::Healthy);
    assert_eq!(report.components["database"].status, HealthState::Healthy);
    assert_eq!(report.components["embedder"].status, HealthState::Healthy);
    assert_eq!(report.resilience.metrics.total_calls, 2);
    assert_eq!(graph.backend().ping_calls.load(Ordering::SeqCst), 1);
    assert_eq!(graph.backend().embed_calls.load(Ordering::SeqCst), 1);
}

/// Validates that a database outage degrades the report after exactly one
/// retry, while the embedder stays healthy.
#[tokio::test(start_paused = true)]
async fn test_health_check_database_down_is_degraded() {
    let graph = guarded(ScriptedBackend::failing_pings(u32::MAX));

    let report = graph.health_check().await;

    assert_eq!(report.status, HealthState::Degraded);
    let database = &report.components["database"];
    assert_eq!(database.status, HealthState::Unhealthy);
    let error = database.error.as_deref().expect("error recorded");
    assert!(error.contains("connection refused by neo4j"), "{error}");
    assert_eq!(report.components["embedder"].status, HealthState::Healthy);
    // The first attempt plus one retry
    assert_eq!(graph.backend().ping_calls.load(Ordering::SeqCst), 2);

    let json = serde_json::to_value(&report).expect("report should serialize");
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["components"]["database"]["status"], "unhealthy");
}

/// Validates that an open embedder breaker makes the embedder unhealthy
/// without the probe reaching the embedding service.
#[tokio::test(start_paused = true)]
async fn test_health_check_respects_open_embedder_breaker() {
    let graph = guarded(ScriptedBackend::failing_embeds(u32::MAX, "embedding model overloaded"));
    graph.embed("warm up").await.expect_err("breaker opens");
    let calls_before = graph.backend().embed_calls.load(Ordering::SeqCst);

    let report = graph.health_check().await;

    assert_eq!(report.status, HealthState::Degraded);
    assert_eq!(report.components["database"].status, HealthState::Healthy);
    let embedder = &report.components["embedder"];
    assert_eq!(embedder.status, HealthState::Unhealthy);
    let error = embedder.error.as_deref().expect("error recorded");
    assert!(error.contains("circuit breaker 'embedder' is open"), "{error}");
    assert_eq!(graph.backend().embed_calls.load(Ordering::SeqCst), calls_before);
    assert_eq!(report.resilience.circuit_breakers[EMBEDDER_BREAKER].state, CircuitState::Open);
}
