//! Reconciliation pass for the local broker unit
//!
//! A pass reads a fresh snapshot of the relation data, performs the leader's
//! writes and the unit's own writes, evaluates the unit status and, once the
//! unit is active, converges exposure, TLS material and broker properties.
//! Every step is idempotent; an interrupted pass is completed by the next one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use crate::broker::properties::server_properties;
use crate::broker::workload::WorkloadPaths;
use crate::controller::context::Context;
use crate::controller::credentials::{PASSWORD_LENGTH, generate_password};
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::leader::{publish_client_data, reconcile_cluster_record};
use crate::controller::status::{Status, evaluate_status};
use crate::resources::api::discover_node_ip;
use crate::resources::service::{
    ApplyOutcome, ExposureSpec, ServiceReconciler, bootstrap_exposure, bootstrap_service_name,
    listener_exposure, listener_service_name,
};
use crate::state::cluster::ClusterState;
use crate::state::models::{SECURITY_MECHANISMS, Substrate};
use crate::state::relation::{BagChanges, pending_changes};
use crate::tls::{SanInputs, TlsManager, build_sans};

/// Unit bag key carrying the time of the last restart request
pub const RESTART_REQUESTED_KEY: &str = "restart-requested";

/// Unit bag key carrying the address of the node hosting the broker
pub const NODE_IP_KEY: &str = "node-ip";

/// Client bag key carrying a certificate to trust for mutual TLS
pub const MTLS_CERT_KEY: &str = "mtls-cert";

/// Result of a single pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// Everything the snapshot asks for is in place
    Completed {
        /// `server.properties` changed and the broker must be restarted
        restart_required: bool,
        /// The certificate on disk does not carry the unit's current SANs
        certificate_refresh_required: bool,
    },
    /// A prerequisite is missing; the next pass picks up from here
    Deferred { status: Status, reason: String },
}

impl PassOutcome {
    pub fn status(&self) -> Status {
        match self {
            PassOutcome::Completed { .. } => Status::Active,
            PassOutcome::Deferred { status, .. } => *status,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, PassOutcome::Completed { .. })
    }

    pub fn restart_required(&self) -> bool {
        matches!(
            self,
            PassOutcome::Completed {
                restart_required: true,
                ..
            }
        )
    }
}

/// Run one pass and record its result
#[instrument(skip(ctx), fields(unit = %ctx.unit_name()))]
pub async fn reconcile(ctx: Arc<Context>) -> Result<PassOutcome> {
    let start = Instant::now();
    let unit = ctx.unit_name();
    debug!(leader = ctx.is_leader(), "Starting pass");

    let result = run_pass(&ctx).await;
    let duration = start.elapsed().as_secs_f64();

    if let Some(health) = &ctx.health_state {
        match &result {
            Ok(outcome @ PassOutcome::Completed { .. }) => {
                health.metrics.record_pass(&unit, duration);
                if outcome.restart_required() {
                    health.metrics.record_restart_requested(&unit);
                }
                health.set_status(&unit, Status::Active).await;
                health.touch();
            }
            Ok(PassOutcome::Deferred { status, .. }) => {
                health.metrics.record_pass(&unit, duration);
                health.metrics.record_deferred(&unit, *status);
                health.metrics.set_status(&unit, *status);
                health.set_ready(false).await;
            }
            Err(_) => {
                health.metrics.record_error(&unit);
                health.set_ready(false).await;
            }
        }
    }

    match &result {
        Ok(PassOutcome::Completed {
            restart_required,
            certificate_refresh_required,
        }) => info!(
            restart_required,
            certificate_refresh_required, "Pass completed"
        ),
        Ok(PassOutcome::Deferred { status, reason }) => {
            info!(status = status.as_str(), "Pass deferred: {}", reason)
        }
        Err(e) => error!("Pass failed: {}", e),
    }

    result
}

/// Delay before the next pass after `error`
pub fn error_policy(error: &Error, attempt: u32, backoff: &BackoffConfig) -> Duration {
    let delay = backoff.delay_for_error(error, attempt);

    if error.is_retryable() {
        warn!(
            "Retryable error (attempt {}): {:?}, retrying in {:?}",
            attempt, error, delay
        );
    } else {
        error!(
            "Non-retryable error: {:?}, retrying in {:?} for manual intervention",
            error, delay
        );
    }

    delay
}

async fn load_state(ctx: &Context) -> Result<ClusterState> {
    ClusterState::load(
        ctx.relations.as_ref(),
        &ctx.environment.identity,
        &ctx.config,
    )
    .await
}

async fn run_pass(ctx: &Context) -> Result<PassOutcome> {
    let mut state = load_state(ctx).await?;

    if ctx.is_leader() && reconcile_cluster_record(ctx.relations.as_ref(), &state).await? {
        state = load_state(ctx).await?;
    }

    let node_ip = unit_node_ip(ctx, &state).await?;
    if unit_duties(ctx, &state, node_ip.as_deref()).await? {
        state = load_state(ctx).await?;
    }

    let status = evaluate_status(&state);
    status.emit();
    if !status.is_active() {
        return Ok(PassOutcome::Deferred {
            status,
            reason: status.message().to_string(),
        });
    }

    match converge(ctx, &state, node_ip.as_deref()).await {
        Err(Error::MissingPrerequisite(reason)) => Ok(PassOutcome::Deferred { status, reason }),
        other => other,
    }
}

/// Writes to the unit's own peer bag; returns whether anything changed
///
/// `node-ip` is only published while brokers are exposed through node ports.
async fn unit_duties(ctx: &Context, state: &ClusterState, node_ip: Option<&str>) -> Result<bool> {
    let Some(peer) = &state.peer_relation else {
        return Ok(false);
    };
    let unit = state.identity.unit_name();
    let broker = &state.unit_broker;

    let mut desired = BagChanges::new();
    if broker.keystore_password.is_none() {
        desired.insert(
            "keystore-password".to_string(),
            Some(generate_password(PASSWORD_LENGTH)),
        );
    }
    if broker.truststore_password.is_none() {
        desired.insert(
            "truststore-password".to_string(),
            Some(generate_password(PASSWORD_LENGTH)),
        );
    }
    if let Some(node_ip) = node_ip.filter(|_| state.expose_nodeport) {
        desired.insert(NODE_IP_KEY.to_string(), Some(node_ip.to_string()));
    }

    let changes = pending_changes(&peer.bag(&unit), desired);
    if changes.is_empty() {
        return Ok(false);
    }

    debug!(keys = ?changes.keys().collect::<Vec<_>>(), "Updating unit data");
    ctx.relations.update(peer.id, &unit, changes).await?;
    Ok(true)
}

/// Address of the node hosting the broker pod; k8s only
async fn unit_node_ip(ctx: &Context, state: &ClusterState) -> Result<Option<String>> {
    if state.substrate != Substrate::K8s {
        return Ok(None);
    }
    let Some(api) = &ctx.cluster_api else {
        if state.expose_nodeport {
            warn!("Node port exposure is enabled but no cluster API is available");
        }
        return Ok(None);
    };

    match discover_node_ip(api.as_ref(), &state.identity.pod_name()).await {
        Ok(ip) => Ok(Some(ip)),
        Err(Error::MissingPrerequisite(reason)) => {
            warn!("Node address not known yet: {}", reason);
            Ok(None)
        }
        Err(e) if e.is_forbidden() && !state.expose_nodeport => {
            warn!("Node address lookup denied: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn converge(
    ctx: &Context,
    state: &ClusterState,
    node_ip: Option<&str>,
) -> Result<PassOutcome> {
    reconcile_exposure(ctx, state).await?;
    let certificate_refresh_required = reconcile_tls(ctx, state, node_ip).await?;
    let restart_required = reconcile_properties(ctx, state).await?;

    if ctx.is_leader() {
        let updated = publish_client_data(ctx.relations.as_ref(), state).await?;
        if updated > 0 {
            debug!(updated, "Client relations updated");
        }
    }

    Ok(PassOutcome::Completed {
        restart_required,
        certificate_refresh_required,
    })
}

/// Node port services of the unit, plus the shared bootstrap services
async fn reconcile_exposure(ctx: &Context, state: &ClusterState) -> Result<()> {
    if state.substrate != Substrate::K8s {
        return Ok(());
    }
    let Some(api) = &ctx.cluster_api else {
        return Ok(());
    };
    let services = ServiceReconciler::new(api.as_ref());
    let pod_name = state.identity.pod_name();
    let app_name = &state.identity.app_name;

    if !state.expose_nodeport {
        for mechanism in SECURITY_MECHANISMS {
            services
                .remove(&listener_service_name(&pod_name, mechanism))
                .await?;
            if ctx.is_leader() {
                services
                    .remove(&bootstrap_service_name(app_name, mechanism))
                    .await?;
            }
        }
        return Ok(());
    }

    let pod = api.get_pod(&pod_name).await?;
    let enabled = state.enabled_mechanisms();

    for mechanism in SECURITY_MECHANISMS {
        if !enabled.contains(&mechanism) {
            services
                .remove(&listener_service_name(&pod_name, mechanism))
                .await?;
            continue;
        }

        let listener = listener_exposure(&pod, app_name, state.identity.unit_id, mechanism)?;
        ensure_exposure(&services, &listener).await?;
        ensure_exposure(&services, &bootstrap_exposure(&pod, app_name, mechanism)).await?;
    }

    Ok(())
}

async fn ensure_exposure(services: &ServiceReconciler<'_>, spec: &ExposureSpec) -> Result<()> {
    match services.ensure(spec).await? {
        ApplyOutcome::Applied | ApplyOutcome::AlreadyAllocated => {}
        ApplyOutcome::PermissionDenied => {
            warn!(service = %spec.name, "Exposure skipped, permission denied")
        }
    }
    Ok(())
}

/// Keys, certificates and stores; returns whether the certificate needs refreshing
async fn reconcile_tls(ctx: &Context, state: &ClusterState, node_ip: Option<&str>) -> Result<bool> {
    let tls = TlsManager::new(
        state,
        ctx.workload.as_ref(),
        ctx.tools.as_ref(),
        &ctx.config,
    );

    if !state.security_protocol().requires_tls() {
        if ctx.workload.exists(&tls.paths().keystore()).await? {
            info!("TLS is disabled, removing key material");
            tls.remove_stores().await?;
        }
        return Ok(false);
    }

    if !tls.is_current().await? {
        tls.remove_stores().await?;
        tls.provision().await?;
    }

    if state.cluster.mtls_enabled {
        reconcile_client_certs(state, &tls).await?;
    }

    let desired = build_sans(&san_inputs(ctx, state, node_ip));
    tls.certificate_refresh_needed(&desired).await
}

/// Trust the certificate each client published for mutual TLS
async fn reconcile_client_certs(state: &ClusterState, tls: &TlsManager<'_>) -> Result<()> {
    for relation in &state.client_relations {
        let Some(app) = relation.remote_app.as_deref() else {
            continue;
        };
        let alias = TlsManager::generate_alias(app, relation.id);

        match relation.field(app, MTLS_CERT_KEY) {
            Some(pem) => tls.add_trusted_cert(&alias, pem).await?,
            None if tls.has_trusted_cert(&alias).await? => tls.remove_cert(&alias).await?,
            None => {}
        }
    }
    Ok(())
}

fn san_inputs(ctx: &Context, state: &ClusterState, node_ip: Option<&str>) -> SanInputs {
    let environment = &ctx.environment;
    SanInputs {
        substrate: state.substrate,
        unit_id: state.identity.unit_id,
        unit_name: state.identity.unit_name(),
        bind_address: environment.bind_address.clone(),
        node_ip: node_ip
            .map(str::to_string)
            .or_else(|| state.unit_broker.node_ip.clone()),
        host: environment.host.clone(),
        internal_address: state.unit_broker.internal_address.clone(),
        fqdn: environment.fqdn.clone(),
        extra_sans: ctx.config.extra_sans(state.identity.unit_id),
    }
}

/// Write `server.properties` when it differs; returns whether a restart was requested
async fn reconcile_properties(ctx: &Context, state: &ClusterState) -> Result<bool> {
    let paths = WorkloadPaths::new(&ctx.config.conf_path);
    let desired = server_properties(state, &paths)?;
    let current = ctx
        .workload
        .read(&paths.server_properties())
        .await?
        .unwrap_or_default();

    let diff = desired.diff(&current);
    if diff.is_empty() {
        return Ok(false);
    }

    info!(changed = ?diff.changed_keys(), "Broker properties changed");
    ctx.workload
        .write(&paths.server_properties(), &desired.render())
        .await?;
    request_restart(ctx, state).await?;
    Ok(true)
}

/// Stamp a restart request into the unit bag for the restart coordinator
async fn request_restart(ctx: &Context, state: &ClusterState) -> Result<()> {
    let Some(peer) = &state.peer_relation else {
        return Ok(());
    };
    let requested_at = chrono::Utc::now().to_rfc3339();
    ctx.relations
        .update(
            peer.id,
            &state.identity.unit_name(),
            BagChanges::from([(RESTART_REQUESTED_KEY.to_string(), Some(requested_at))]),
        )
        .await
}
