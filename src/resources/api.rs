//! Access to the cluster object API
//!
//! The reconciler talks to Kubernetes through [`ClusterApi`] so conflict
//! handling can be exercised against an in-memory fake. [`KubeClusterApi`] is
//! the production implementation on top of `kube`.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::resources::common::FIELD_MANAGER;

/// Node address types in order of preference for external access
pub const NODE_ADDRESS_PREFERENCE: [&str; 3] = ["ExternalIP", "InternalIP", "Hostname"];

/// Object API operations the agent needs
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Get a pod in the agent's namespace
    async fn get_pod(&self, name: &str) -> Result<Pod>;

    /// Get a cluster node
    async fn get_node(&self, name: &str) -> Result<Node>;

    /// Get a service in the agent's namespace, `None` if absent
    async fn get_service(&self, name: &str) -> Result<Option<Service>>;

    /// Upsert the full service object keyed by its name
    async fn apply_service(&self, service: &Service) -> Result<Service>;

    /// Delete a service in the agent's namespace
    async fn delete_service(&self, name: &str) -> Result<()>;
}

/// [`ClusterApi`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
    namespace: String,
}

impl KubeClusterApi {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_pod(&self, name: &str) -> Result<Pod> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        Ok(pods.get(name).await?)
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        Ok(nodes.get(name).await?)
    }

    async fn get_service(&self, name: &str) -> Result<Option<Service>> {
        Ok(self.services().get_opt(name).await?)
    }

    async fn apply_service(&self, service: &Service) -> Result<Service> {
        let name = service.name_any();
        let params = PatchParams::apply(FIELD_MANAGER).force();

        let applied = self
            .services()
            .patch(&name, &params, &Patch::Apply(service))
            .await?;
        debug!("Applied Service: {}", name);

        Ok(applied)
    }

    async fn delete_service(&self, name: &str) -> Result<()> {
        self.services()
            .delete(name, &DeleteParams::default())
            .await?;
        debug!("Deleted Service: {}", name);
        Ok(())
    }
}

/// Name of the node a pod is scheduled on
pub fn pod_node_name(pod: &Pod) -> Result<String> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.node_name.clone())
        .ok_or_else(|| {
            Error::MissingPrerequisite(format!("pod {} is not scheduled yet", pod.name_any()))
        })
}

/// Address of `node` reachable from outside the cluster network
pub fn node_address(node: &Node) -> Option<String> {
    let addresses = node.status.as_ref()?.addresses.as_ref()?;

    NODE_ADDRESS_PREFERENCE.iter().find_map(|wanted| {
        addresses
            .iter()
            .find(|a| a.type_ == *wanted)
            .map(|a| a.address.clone())
    })
}

/// Resolve the address of the node hosting `pod_name`
pub async fn discover_node_ip(api: &dyn ClusterApi, pod_name: &str) -> Result<String> {
    let pod = api.get_pod(pod_name).await?;
    let node_name = pod_node_name(&pod)?;
    let node = api.get_node(&node_name).await?;

    node_address(&node).ok_or_else(|| {
        Error::MissingPrerequisite(format!("node {} has no usable address", node_name))
    })
}
