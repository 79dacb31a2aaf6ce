//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 when ready to serve traffic)
//! - `/metrics` - Prometheus metrics endpoint

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

/// Labels for per-pair synchronization metrics (kind + name)
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct SyncLabels {
    pub kind: String,
    pub name: String,
}

impl EncodeLabelSet for SyncLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for authority-switch metrics (kind + new authority)
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct AuthorityLabels {
    pub kind: String,
    pub authority: String,
}

impl EncodeLabelSet for AuthorityLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        ("authority", self.authority.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the operator
pub struct Metrics {
    /// Total synchronization passes counter
    pub syncs_total: Family<SyncLabels, Counter>,
    /// Failed synchronization passes counter
    pub sync_errors_total: Family<SyncLabels, Counter>,
    /// Synchronization pass duration histogram
    pub sync_duration_seconds: Family<SyncLabels, Histogram>,
    /// Completed authority switches counter
    pub authority_switches_total: Family<AuthorityLabels, Counter>,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let syncs_total = Family::<SyncLabels, Counter>::default();
        registry.register(
            "machinesync_syncs",
            "Total number of synchronization passes",
            syncs_total.clone(),
        );

        let sync_errors_total = Family::<SyncLabels, Counter>::default();
        registry.register(
            "machinesync_sync_errors",
            "Total number of failed synchronization passes",
            sync_errors_total.clone(),
        );

        let sync_duration_seconds = Family::<SyncLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.001, 2.0, 15))
        });
        registry.register(
            "machinesync_sync_duration_seconds",
            "Duration of a synchronization pass in seconds",
            sync_duration_seconds.clone(),
        );

        let authority_switches_total = Family::<AuthorityLabels, Counter>::default();
        registry.register(
            "machinesync_authority_switches",
            "Total number of completed authority switches",
            authority_switches_total.clone(),
        );

        Self {
            syncs_total,
            sync_errors_total,
            sync_duration_seconds,
            authority_switches_total,
            registry,
        }
    }

    /// Record a successful synchronization pass
    pub fn record_sync(&self, kind: &str, name: &str, duration_secs: f64) {
        let labels = SyncLabels {
            kind: kind.to_string(),
            name: name.to_string(),
        };
        self.syncs_total.get_or_create(&labels).inc();
        self.sync_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed synchronization pass
    pub fn record_error(&self, kind: &str, name: &str) {
        let labels = SyncLabels {
            kind: kind.to_string(),
            name: name.to_string(),
        };
        self.sync_errors_total.get_or_create(&labels).inc();
    }

    /// Record a completed authority switch
    pub fn record_authority_switch(&self, kind: &str, authority: &str) {
        let labels = AuthorityLabels {
            kind: kind.to_string(),
            authority: authority.to_string(),
        };
        self.authority_switches_total.get_or_create(&labels).inc();
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready (acquired leadership and running controllers)
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
        }
    }

    /// Mark the operator as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 200 OK if the operator is ready to serve.
/// Returns 503 Service Unavailable if not ready.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server
///
/// Binds to 0.0.0.0:8080 and serves health/metrics endpoints.
pub async fn run_health_server(state: Arc<HealthState>) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], 8080));
    info!(port = 8080, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
