//! Guarded access to the knowledge-graph service
//!
//! [`GraphBackend`] is the port a concrete graph client implements.
//! [`GuardedGraph`] wraps one and runs every call through the resilience
//! core:
//!
//! | Call | Retry policy | Breaker |
//! |------|--------------|---------|
//! | [`GuardedGraph::embed`] | `RetryPolicy::embedding()` | `embedder` |
//! | [`GuardedGraph::persist`] | `RetryPolicy::database()` | `database` |
//! | [`GuardedGraph::health_check`] | one retry, 500 ms base | `embedder` for the embedding probe |
//!
//! Both executors share the context's breakers and metrics, so a failing
//! embedding service trips the `embedder` breaker for every caller holding
//! the same context.

mod health;

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use graphguard_common::resilience::{
    OperationKind, ResilienceContext, ResilienceStatus, RetryError, RetryExecutor, RetryPolicy,
    DATABASE_BREAKER, EMBEDDER_BREAKER,
};
use serde::{Deserialize, Serialize};

pub use health::{
    ComponentHealth, HealthReport, HealthState, DATABASE_COMPONENT, EMBEDDER_COMPONENT,
    SERVICE_NAME,
};

/// Text embedded by the embedder health probe
const HEALTH_PROBE_TEXT: &str = "health check test";

/// Retry count and base delay of the health probes
const HEALTH_PROBE: OperationKind =
    OperationKind::General { retries: 1, base_delay: Duration::from_millis(500) };

/// An entity node as stored in the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityNode {
    pub uuid: String,
    pub name: String,
    pub group_id: String,
    #[serde(default)]
    pub summary: String,
    /// Embedding of `name`, filled in by [`GuardedGraph::save_entity`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_embedding: Option<Vec<f32>>,
}

impl EntityNode {
    pub fn new(
        uuid: impl Into<String>,
        name: impl Into<String>,
        group_id: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            group_id: group_id.into(),
            summary: String::new(),
            name_embedding: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }
}

/// Client for the embedding model and graph database behind the service
#[async_trait]
pub trait GraphBackend: Send + Sync {
    type Error: StdError + Send + Sync + 'static;

    /// Embed `text` into a vector
    async fn embed(&self, text: &str) -> Result<Vec<f32>, Self::Error>;

    /// Write `node` to the graph database
    async fn persist(&self, node: &EntityNode) -> Result<(), Self::Error>;

    /// Run a trivial query against the graph database
    async fn ping(&self) -> Result<(), Self::Error>;
}

/// A [`GraphBackend`] behind retries and circuit breakers
#[derive(Debug)]
pub struct GuardedGraph<B> {
    backend: B,
    context: ResilienceContext,
    embedder: RetryExecutor,
    database: RetryExecutor,
}

impl<B: GraphBackend> GuardedGraph<B> {
    /// Wrap `backend`, sharing breakers and metrics with `context`
    ///
    /// Breakers missing from the context are created with its default
    /// breaker policy on first use; contexts built with
    /// `ResilienceContext::with_standard_breakers` or from
    /// `ResilienceSettings` already carry tuned ones.
    pub fn new(backend: B, context: ResilienceContext) -> Self {
        let embedder = context.executor_with(RetryPolicy::embedding());
        let database = context.executor_with(RetryPolicy::database());
        Self { backend, context, embedder, database }
    }

    /// Use explicit policies instead of the presets
    pub fn with_policies(
        backend: B,
        context: ResilienceContext,
        embedding: RetryPolicy,
        database: RetryPolicy,
    ) -> Self {
        let embedder = context.executor_with(embedding);
        let database = context.executor_with(database);
        Self { backend, context, embedder, database }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn context(&self) -> &ResilienceContext {
        &self.context
    }

    /// Embed `text` through the `embedder` breaker
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, RetryError<B::Error>> {
        self.embedder
            .execute("embed_text", Some(EMBEDDER_BREAKER), || self.backend.embed(text))
            .await
    }

    /// Persist `node` through the `database` breaker
    pub async fn persist(&self, node: &EntityNode) -> Result<(), RetryError<B::Error>> {
        let operation = OperationKind::Database.operation_name(&node.uuid);
        self.database
            .execute(&operation, Some(DATABASE_BREAKER), || self.backend.persist(node))
            .await
    }

    /// Embed the node's name, then persist it with the embedding attached
    ///
    /// Each step retries independently; a failed embedding never reaches
    /// the database.
    pub async fn save_entity(&self, mut node: EntityNode) -> Result<EntityNode, RetryError<B::Error>> {
        let operation = OperationKind::Embedding.operation_name(&node.uuid);
        let embedding = self
            .embedder
            .execute(&operation, Some(EMBEDDER_BREAKER), || self.backend.embed(&node.name))
            .await?;

        node.name_embedding = Some(embedding);
        self.persist(&node).await?;
        tracing::debug!(uuid = %node.uuid, group_id = %node.group_id, "Entity node saved");
        Ok(node)
    }

    /// Breaker, metrics and policy snapshot for a health endpoint
    pub fn status(&self) -> ResilienceStatus {
        self.context.status()
    }

    /// Probe the database and the embedder and report per-component health
    ///
    /// Each probe gets one retry. The embedding probe goes through the
    /// `embedder` breaker, so an open breaker reports the embedder unhealthy
    /// without calling it. Probe outcomes land in the shared metrics.
    pub async fn health_check(&self) -> HealthReport {
        let probes = self.context.executor_with(HEALTH_PROBE.policy());
        let mut components = BTreeMap::new();

        let database =
            match probes.execute("database_health_check", None, || self.backend.ping()).await {
                Ok(()) => ComponentHealth::healthy(),
                Err(err) => ComponentHealth::unhealthy(err.to_string()),
            };
        components.insert(DATABASE_COMPONENT.to_string(), database);

        let embedder = match probes
            .execute("embedder_health_check", Some(EMBEDDER_BREAKER), || {
                self.backend.embed(HEALTH_PROBE_TEXT)
            })
            .await
        {
            Ok(vector) if vector.is_empty() => {
                ComponentHealth::unhealthy("embedder returned an empty vector")
            }
            Ok(_) => ComponentHealth::healthy(),
            Err(err) => ComponentHealth::unhealthy(err.to_string()),
        };
        components.insert(EMBEDDER_COMPONENT.to_string(), embedder);

        let report = HealthReport::new(components, self.context.status());
        if !report.is_healthy() {
            tracing::warn!(components = ?report.components, "Graph service degraded");
        }
        report
    }
}
