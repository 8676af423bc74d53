pub mod broker;
pub mod config;
pub mod controller;
pub mod health;
pub mod resources;
pub mod state;
pub mod tls;

#[cfg(any(test, feature = "test-utilities"))]
pub mod testing;

pub use config::{AgentConfig, AgentEnvironment};
pub use controller::{
    BackoffConfig, Context, Error, PassOutcome, Result, Status, error_policy, evaluate_status,
    reconcile,
};
pub use health::{HealthState, Metrics};
pub use state::{ClusterState, SecurityMechanism, Substrate, UnitIdentity};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Run reconciliation passes until `shutdown` resolves.
///
/// Passes run every `reconcile-interval-secs`. A failed pass is retried
/// after a backoff that grows per consecutive failure, capped at the interval.
pub async fn run_agent(ctx: Arc<Context>, shutdown: impl Future<Output = ()>) {
    let interval = Duration::from_secs(ctx.config.reconcile_interval_secs);
    let backoff = BackoffConfig::default();
    let mut failures = 0u32;

    tracing::info!(
        unit = %ctx.unit_name(),
        interval_secs = interval.as_secs(),
        "Starting reconciliation loop"
    );

    tokio::pin!(shutdown);
    loop {
        let delay = match reconcile(ctx.clone()).await {
            Ok(_) => {
                failures = 0;
                interval
            }
            Err(e) => {
                let delay = error_policy(&e, failures, &backoff).min(interval);
                failures = failures.saturating_add(1);
                delay
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = &mut shutdown => {
                tracing::info!("Reconciliation loop stopped");
                return;
            }
        }
    }
}
