use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tracing::{error, info, warn};

use kafka_operator::broker::LocalWorkload;
use kafka_operator::health::{HealthState, run_health_server};
use kafka_operator::resources::KubeClusterApi;
use kafka_operator::state::FileRelationStore;
use kafka_operator::tls::ProcessToolRunner;
use kafka_operator::{AgentConfig, AgentEnvironment, Context, Substrate, run_agent};

/// Lease configuration
const LEASE_TTL_SECS: u64 = 15;
const LEASE_RENEW_INTERVAL_SECS: u64 = 5;

/// Leadership flag for machines, set by whatever elects the leader unit
const LEADER_ENV: &str = "UNIT_IS_LEADER";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install the TLS crypto provider before any TLS operations
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err("Failed to install rustls crypto provider and no provider is available".into());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kafka_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .init();

    info!("Starting kafka-operator");

    let config = AgentConfig::load()?;
    let environment = AgentEnvironment::from_env()?;
    let unit_name = environment.identity.unit_name();

    info!(
        unit = %unit_name,
        namespace = %environment.namespace,
        substrate = %config.substrate,
        "Loaded agent configuration"
    );

    let health_state = Arc::new(HealthState::new());
    let is_leader = Arc::new(AtomicBool::new(false));

    // Start health server immediately (probes should work before the first pass)
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let mut ctx = Context::new(
        config.clone(),
        environment.clone(),
        Arc::new(FileRelationStore::new(&config.relation_data_path)),
        Arc::new(LocalWorkload),
        Arc::new(ProcessToolRunner),
    )
    .with_health_state(health_state.clone())
    .with_leadership(is_leader.clone());

    let lease_handle = match config.substrate {
        Substrate::K8s => {
            let client = Client::try_default().await?;
            info!("Connected to Kubernetes cluster");

            ctx = ctx.with_cluster_api(Arc::new(KubeClusterApi::new(
                client.clone(),
                &environment.namespace,
            )));

            let lease_name = format!("{}-leader", environment.identity.app_name);
            info!(
                holder_id = %environment.identity.pod_name(),
                lease_name = %lease_name,
                "Initializing leader election"
            );
            let lease_lock = LeaseLock::new(
                client,
                &environment.namespace,
                LeaseLockParams {
                    holder_id: environment.identity.pod_name(),
                    lease_name,
                    lease_ttl: Duration::from_secs(LEASE_TTL_SECS),
                },
            );
            let is_leader = is_leader.clone();
            Some(tokio::spawn(async move {
                track_leadership(lease_lock, is_leader).await;
            }))
        }
        Substrate::Vm => {
            let leader = std::env::var(LEADER_ENV).is_ok_and(|v| v == "true");
            info!(leader, "Leadership taken from {}", LEADER_ENV);
            is_leader.store(leader, Ordering::SeqCst);
            None
        }
    };

    let lease_future = async {
        match lease_handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!("Lease renewal task panicked: {}", e);
                }
            }
            None => std::future::pending::<()>().await,
        }
    };

    let agent_handle = tokio::spawn(run_agent(Arc::new(ctx), shutdown_signal()));

    tokio::select! {
        result = agent_handle => {
            if let Err(e) = result {
                error!("Reconciliation task panicked: {}", e);
            }
            // The loop only returns between passes, after a shutdown signal
            health_state.set_ready(false).await;
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        _ = lease_future => {}
    }

    info!("Agent stopped");
    Ok(())
}

/// Keep `is_leader` in step with the lease
///
/// Every unit runs passes; losing the lease only drops the leader duties.
async fn track_leadership(lease_lock: LeaseLock, is_leader: Arc<AtomicBool>) {
    loop {
        match lease_lock.try_acquire_or_renew().await {
            Ok(result) => {
                let was_leader = is_leader.swap(result.acquired_lease, Ordering::SeqCst);
                match (was_leader, result.acquired_lease) {
                    (false, true) => info!("Acquired leadership"),
                    (true, false) => warn!("Lost leadership"),
                    _ => {}
                }
            }
            Err(e) => {
                if is_leader.swap(false, Ordering::SeqCst) {
                    error!("Failed to renew lease: {}, dropping leadership", e);
                } else {
                    warn!("Failed to acquire lease: {}, retrying...", e);
                }
            }
        }
        tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal, initiating graceful shutdown...");
}
