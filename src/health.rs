//! Health server for probes and Prometheus metrics
//!
//! Provides HTTP endpoints for:
//! - `/healthz` - Liveness probe (is the process alive?)
//! - `/readyz` - Readiness probe (is the unit's broker active?)
//! - `/metrics` - Prometheus metrics

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

use crate::controller::status::{ALL_STATUSES, Status};

/// Labels for per-unit metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct UnitLabels {
    pub unit: String,
}

impl prometheus_client::encoding::EncodeLabelSet for UnitLabels {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("unit", self.unit.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for status metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct StatusLabels {
    pub unit: String,
    pub status: String,
}

impl prometheus_client::encoding::EncodeLabelSet for StatusLabels {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("unit", self.unit.as_str()).encode(encoder.encode_label())?;
        ("status", self.status.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics state
pub struct Metrics {
    /// Completed passes
    pub passes_total: Family<UnitLabels, Counter>,
    /// Passes that ended in an error
    pub pass_errors_total: Family<UnitLabels, Counter>,
    /// Passes stopped by a missing prerequisite
    pub deferred_total: Family<StatusLabels, Counter>,
    /// Pass duration histogram
    pub pass_duration_seconds: Family<UnitLabels, Histogram>,
    /// 1 for the unit's current status, 0 for every other
    pub unit_status: Family<StatusLabels, Gauge>,
    /// Restarts requested after a configuration change
    pub restarts_requested_total: Family<UnitLabels, Counter>,

    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let passes_total = Family::<UnitLabels, Counter>::default();
        registry.register(
            "kafka_operator_passes",
            "Total number of reconciliation passes",
            passes_total.clone(),
        );

        let pass_errors_total = Family::<UnitLabels, Counter>::default();
        registry.register(
            "kafka_operator_pass_errors",
            "Total number of failed reconciliation passes",
            pass_errors_total.clone(),
        );

        let deferred_total = Family::<StatusLabels, Counter>::default();
        registry.register(
            "kafka_operator_deferred",
            "Total number of passes deferred on a missing prerequisite",
            deferred_total.clone(),
        );

        let pass_duration_seconds = Family::<UnitLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.001, 2.0, 15))
        });
        registry.register(
            "kafka_operator_pass_duration_seconds",
            "Duration of a reconciliation pass in seconds",
            pass_duration_seconds.clone(),
        );

        let unit_status = Family::<StatusLabels, Gauge>::default();
        registry.register(
            "kafka_operator_unit_status",
            "Current status of the unit",
            unit_status.clone(),
        );

        let restarts_requested_total = Family::<UnitLabels, Counter>::default();
        registry.register(
            "kafka_operator_restarts_requested",
            "Total number of broker restarts requested",
            restarts_requested_total.clone(),
        );

        Self {
            passes_total,
            pass_errors_total,
            deferred_total,
            pass_duration_seconds,
            unit_status,
            restarts_requested_total,
            registry,
        }
    }

    /// Record a completed pass
    pub fn record_pass(&self, unit: &str, duration_secs: f64) {
        let labels = UnitLabels {
            unit: unit.to_string(),
        };
        self.passes_total.get_or_create(&labels).inc();
        self.pass_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed pass
    pub fn record_error(&self, unit: &str) {
        let labels = UnitLabels {
            unit: unit.to_string(),
        };
        self.pass_errors_total.get_or_create(&labels).inc();
    }

    /// Record a pass stopped at `status`
    pub fn record_deferred(&self, unit: &str, status: Status) {
        let labels = StatusLabels {
            unit: unit.to_string(),
            status: status.as_str().to_string(),
        };
        self.deferred_total.get_or_create(&labels).inc();
    }

    pub fn record_restart_requested(&self, unit: &str) {
        let labels = UnitLabels {
            unit: unit.to_string(),
        };
        self.restarts_requested_total.get_or_create(&labels).inc();
    }

    /// Set the status gauge so exactly one status reads 1
    pub fn set_status(&self, unit: &str, current: Status) {
        for status in ALL_STATUSES {
            let labels = StatusLabels {
                unit: unit.to_string(),
                status: status.as_str().to_string(),
            };
            self.unit_status
                .get_or_create(&labels)
                .set(i64::from(status == current));
        }
    }

    /// Encode metrics to Prometheus text format
    ///
    /// Returns an empty string if encoding fails.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the unit's broker is active
    pub ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
    /// Unix time of the last successful pass
    pub last_pass: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_pass: AtomicU64::new(0),
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }

    /// Publish the evaluated status; only an active unit is ready
    pub async fn set_status(&self, unit: &str, status: Status) {
        self.metrics.set_status(unit, status);
        self.set_ready(status.is_active()).await;
    }

    /// Stamp the time of a successful pass
    pub fn touch(&self) {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.last_pass.store(now, Ordering::Relaxed);
    }
}

/// Liveness probe handler
///
/// Returns 200 OK if the process is alive.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 Service Unavailable until a pass finds the unit active.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
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
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve health and metrics endpoints on all interfaces
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Health server listening on {}", addr);

    axum::serve(listener, app).await
}
