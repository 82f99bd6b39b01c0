//! Backend readiness checks and the capabilities that survive a failing
//! backend.
//!
//! Each check issues one cheap request under a timeout. A slow answer is
//! `Degraded`, a failed one `Unhealthy`. A backend that could not even be
//! constructed (missing API key, unopenable table) is reported with
//! [`ServiceHealth::unavailable`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use gridrag_core::error::{Error, Result};
use gridrag_core::filter::SearchFilter;
use gridrag_core::traits::{EmbeddingProvider, FullTextIndex, VectorIndex};

pub const EMBEDDING: &str = "embedding";
pub const VECTOR_INDEX: &str = "vector_index";
pub const TEXT_INDEX: &str = "text_index";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceHealth {
    pub name: String,
    pub status: ServiceStatus,
    pub latency_ms: Option<u64>,
    pub message: String,
    pub checked_at: DateTime<Utc>,
}

impl ServiceHealth {
    fn new(name: &str, status: ServiceStatus, latency: Option<Duration>, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            latency_ms: latency.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            message: message.into(),
            checked_at: Utc::now(),
        }
    }

    /// A backend that failed to initialise.
    pub fn unavailable(name: &str, error: impl fmt::Display) -> Self {
        Self::new(name, ServiceStatus::Unhealthy, None, error.to_string())
    }

    pub fn is_usable(&self) -> bool { self.status != ServiceStatus::Unhealthy }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckLimits {
    /// A check that takes longer fails.
    pub timeout: Duration,
    /// A check that takes longer succeeds as `Degraded`.
    pub slow: Duration,
}

impl CheckLimits {
    pub fn embedding() -> Self { Self { timeout: Duration::from_secs(10), slow: Duration::from_secs(2) } }

    pub fn index() -> Self { Self { timeout: Duration::from_secs(5), slow: Duration::from_millis(200) } }
}

async fn timed<T>(name: &str, limits: CheckLimits, check: impl Future<Output = Result<T>>) -> ServiceHealth {
    let start = Instant::now();
    let outcome = tokio::time::timeout(limits.timeout, check).await;
    let latency = start.elapsed();
    match outcome {
        Err(_) => ServiceHealth::new(name, ServiceStatus::Unhealthy, None, format!("no answer within {:?}", limits.timeout)),
        Ok(Ok(_)) if latency > limits.slow => ServiceHealth::new(name, ServiceStatus::Degraded, Some(latency), "slow response"),
        Ok(Ok(_)) => ServiceHealth::new(name, ServiceStatus::Healthy, Some(latency), "ok"),
        // Rate limits and flaky networks recover on their own.
        Ok(Err(e)) if e.is_transient() => ServiceHealth::new(name, ServiceStatus::Degraded, Some(latency), e.to_string()),
        Ok(Err(e)) => ServiceHealth::new(name, ServiceStatus::Unhealthy, Some(latency), e.to_string()),
    }
}

/// Embed a short sample text.
pub async fn check_embedder(embedder: &dyn EmbeddingProvider, limits: CheckLimits) -> ServiceHealth {
    timed(EMBEDDING, limits, async {
        let vector = embedder.embed("readiness check").await?;
        if vector.len() != embedder.dim() {
            return Err(Error::DimensionMismatch { expected: embedder.dim(), actual: vector.len() });
        }
        Ok(())
    })
    .await
}

/// Run a one-hit search with a unit vector.
pub async fn check_vector_index(vectors: &dyn VectorIndex, limits: CheckLimits) -> ServiceHealth {
    let mut unit = vec![0.0f32; vectors.dim()];
    if let Some(first) = unit.first_mut() {
        *first = 1.0;
    }
    timed(VECTOR_INDEX, limits, vectors.search(&unit, 1, &SearchFilter::none())).await
}

/// Run a one-hit keyword search.
pub async fn check_text_index(text: &dyn FullTextIndex, limits: CheckLimits) -> ServiceHealth {
    timed(TEXT_INDEX, limits, text.search("readiness", 1, &SearchFilter::none())).await
}

/// What still works given the backend statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub hybrid_retrieval: bool,
    pub semantic_retrieval: bool,
    pub keyword_retrieval: bool,
    pub document_ingestion: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemHealth {
    pub status: ServiceStatus,
    pub services: Vec<ServiceHealth>,
    pub capabilities: Capabilities,
    pub checked_at: DateTime<Utc>,
}

impl SystemHealth {
    /// Healthy when every service is, unhealthy when any is, degraded otherwise.
    pub fn from_services(services: Vec<ServiceHealth>) -> Self {
        let status = if services.iter().all(|s| s.status == ServiceStatus::Healthy) {
            ServiceStatus::Healthy
        } else if services.iter().any(|s| s.status == ServiceStatus::Unhealthy) {
            ServiceStatus::Unhealthy
        } else {
            ServiceStatus::Degraded
        };
        let usable = |name: &str| services.iter().any(|s| s.name == name && s.is_usable());
        let (embedding, vectors, text) = (usable(EMBEDDING), usable(VECTOR_INDEX), usable(TEXT_INDEX));
        let capabilities = Capabilities {
            hybrid_retrieval: embedding && vectors && text,
            semantic_retrieval: embedding && vectors,
            keyword_retrieval: text,
            document_ingestion: embedding && vectors && text,
        };
        Self { status, services, capabilities, checked_at: Utc::now() }
    }

    pub fn service(&self, name: &str) -> Option<&ServiceHealth> { self.services.iter().find(|s| s.name == name) }
}

/// Check all three backends concurrently.
pub async fn check_all(
    embedder: &dyn EmbeddingProvider,
    vectors: &dyn VectorIndex,
    text: &dyn FullTextIndex,
) -> SystemHealth {
    let (e, v, t) = tokio::join!(
        check_embedder(embedder, CheckLimits::embedding()),
        check_vector_index(vectors, CheckLimits::index()),
        check_text_index(text, CheckLimits::index()),
    );
    SystemHealth::from_services(vec![e, v, t])
}
