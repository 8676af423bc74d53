//! NodePort services exposing brokers outside the cluster network
//!
//! In order to discover all brokers, a client needs one reachable
//! `bootstrap-server`; from there each broker advertises its own
//! `<node-ip>:<node-port>` listener. Every broker therefore gets one NodePort
//! service per enabled mechanism, selecting only its own pod, plus one
//! application-wide bootstrap service per mechanism.
//!
//! Services are applied as whole objects with server-side apply, so applying
//! the same [`ExposureSpec`] twice leaves the cluster unchanged.

use k8s_openapi::api::core::v1::{Pod, Service, ServicePort, ServiceSpec as K8sServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use crate::controller::error::{Error, Result};
use crate::resources::api::ClusterApi;
use crate::resources::common::{
    app_selector, pod_owner_reference, pod_selector, standard_labels, workload_owner_references,
};
use crate::resources::nodeport::{bootstrap_node_port, listener_node_port};
use crate::state::models::SecurityMechanism;

/// Desired shape of one exposure object
#[derive(Clone, Debug, PartialEq)]
pub struct ExposureSpec {
    pub name: String,
    pub namespace: Option<String>,
    pub app_name: String,
    pub selector: BTreeMap<String, String>,
    /// Listener port inside the pod
    pub port: i32,
    pub node_port: i32,
    pub mechanism: SecurityMechanism,
    pub owner_references: Vec<OwnerReference>,
}

/// Service name of a broker's listener for `mechanism` (e.g. `kafka-0-sasl-ssl`)
pub fn listener_service_name(pod_name: &str, mechanism: SecurityMechanism) -> String {
    format!("{}-{}", pod_name, mechanism.dns_label())
}

/// Service name of the bootstrap service for `mechanism` (e.g. `kafka-sasl-ssl-bootstrap`)
pub fn bootstrap_service_name(app_name: &str, mechanism: SecurityMechanism) -> String {
    format!("{}-{}-bootstrap", app_name, mechanism.dns_label())
}

/// Exposure of a single broker pod, owned by that pod
pub fn listener_exposure(
    pod: &Pod,
    app_name: &str,
    unit_id: u32,
    mechanism: SecurityMechanism,
) -> Result<ExposureSpec> {
    let pod_name = pod.name_any();

    Ok(ExposureSpec {
        name: listener_service_name(&pod_name, mechanism),
        namespace: pod.namespace(),
        app_name: app_name.to_string(),
        selector: pod_selector(&pod_name),
        port: i32::from(mechanism.ports().external),
        node_port: listener_node_port(unit_id, mechanism)?,
        mechanism,
        owner_references: vec![pod_owner_reference(pod)?],
    })
}

/// Exposure of the whole application for initial client connections
///
/// Owned by the pod's StatefulSet so it outlives any single unit.
pub fn bootstrap_exposure(pod: &Pod, app_name: &str, mechanism: SecurityMechanism) -> ExposureSpec {
    ExposureSpec {
        name: bootstrap_service_name(app_name, mechanism),
        namespace: pod.namespace(),
        app_name: app_name.to_string(),
        selector: app_selector(app_name),
        port: i32::from(mechanism.ports().external),
        node_port: bootstrap_node_port(mechanism),
        mechanism,
        owner_references: workload_owner_references(pod),
    }
}

/// Render the full Service object for an exposure
pub fn generate_service(spec: &ExposureSpec) -> Service {
    let mut labels = standard_labels(&spec.app_name);
    labels.insert(
        "kafka-operator/security-mechanism".to_string(),
        spec.mechanism.dns_label(),
    );

    Service {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: spec.namespace.clone(),
            labels: Some(labels),
            owner_references: if spec.owner_references.is_empty() {
                None
            } else {
                Some(spec.owner_references.clone())
            },
            ..Default::default()
        },
        spec: Some(K8sServiceSpec {
            type_: Some("NodePort".to_string()),
            // Keep the client source address and only route to the local pod
            external_traffic_policy: Some("Local".to_string()),
            selector: Some(spec.selector.clone()),
            ports: Some(vec![ServicePort {
                name: Some(format!("{}-port", spec.name)),
                protocol: Some("TCP".to_string()),
                port: spec.port,
                target_port: Some(IntOrString::Int(spec.port)),
                node_port: Some(spec.node_port),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Node port currently held by a service's first port
pub fn allocated_node_port(service: &Service) -> Option<i32> {
    service
        .spec
        .as_ref()?
        .ports
        .as_ref()?
        .first()?
        .node_port
}

/// What happened when an exposure was applied
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The object now matches its `ExposureSpec`
    Applied,
    /// The agent lacks permission to manage services; nothing changed
    PermissionDenied,
    /// The create clashed on the node port, but the port is already ours
    AlreadyAllocated,
}

/// Idempotent create/update of exposure objects
pub struct ServiceReconciler<'a> {
    api: &'a dyn ClusterApi,
}

impl<'a> ServiceReconciler<'a> {
    pub fn new(api: &'a dyn ClusterApi) -> Self {
        Self { api }
    }

    /// Ensure the service described by `spec` exists with exactly that shape
    pub async fn ensure(&self, spec: &ExposureSpec) -> Result<ApplyOutcome> {
        let service = generate_service(spec);

        match self.api.apply_service(&service).await {
            Ok(_) => {
                debug!(
                    service = %spec.name,
                    node_port = spec.node_port,
                    "Exposure applied"
                );
                Ok(ApplyOutcome::Applied)
            }
            Err(e) if e.is_forbidden() => {
                error!(
                    service = %spec.name,
                    "Could not apply service, the agent needs permission to manage services: {}",
                    e
                );
                Ok(ApplyOutcome::PermissionDenied)
            }
            Err(e) if e.is_port_allocated() => self.resolve_port_clash(spec, e).await,
            Err(e) => Err(e),
        }
    }

    /// A port clash is benign only if the existing object already holds our port
    async fn resolve_port_clash(&self, spec: &ExposureSpec, clash: Error) -> Result<ApplyOutcome> {
        let existing = self.api.get_service(&spec.name).await?;
        let existing_port = existing.as_ref().and_then(allocated_node_port);

        if existing_port == Some(spec.node_port) {
            warn!(
                service = %spec.name,
                node_port = spec.node_port,
                "Node port already allocated to this service: {}",
                clash
            );
            return Ok(ApplyOutcome::AlreadyAllocated);
        }

        error!(
            service = %spec.name,
            node_port = spec.node_port,
            "Node port is held by another service: {}",
            clash
        );
        Err(Error::PortConflict {
            service: spec.name.clone(),
            port: spec.node_port,
        })
    }

    /// Delete a service if present; returns whether anything was removed
    pub async fn remove(&self, name: &str) -> Result<bool> {
        match self.api.delete_service(name).await {
            Ok(()) => {
                info!(service = %name, "Removed exposure");
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) if e.is_forbidden() => {
                error!(service = %name, "Could not delete service: {}", e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
