//! In-memory collaborators for testing.
//!
//! Every seam the reconciler talks through has a fake here, so a whole pass
//! can run without a cluster, a filesystem or crypto tools.
//!
//! # Usage
//!
//! This module is available when the `test-utilities` feature is enabled,
//! or during unit tests:
//!
//! ```toml
//! [dev-dependencies]
//! kafka-operator = { path = ".", features = ["test-utilities"] }
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, NodeAddress, NodeStatus, Pod, PodSpec, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::broker::workload::Workload;
use crate::controller::error::{
    CODE_FORBIDDEN, CODE_NOT_FOUND, CODE_UNPROCESSABLE, Error, Result,
};
use crate::resources::api::ClusterApi;
use crate::resources::common::{APP_NAME_LABEL, POD_NAME_LABEL};
use crate::state::relation::{BagChanges, Relation, RelationDataStore};
use crate::tls::toolchain::{ToolCommand, ToolOutput, ToolRunner};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A broker pod as the StatefulSet controller creates it
pub fn broker_pod(name: &str, app_name: &str, node_name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("kafka".to_string()),
            uid: Some(format!("{}-uid", name)),
            labels: Some(BTreeMap::from([
                (APP_NAME_LABEL.to_string(), app_name.to_string()),
                (POD_NAME_LABEL.to_string(), name.to_string()),
            ])),
            owner_references: Some(vec![OwnerReference {
                api_version: "apps/v1".to_string(),
                kind: "StatefulSet".to_string(),
                name: app_name.to_string(),
                uid: format!("{}-sts-uid", app_name),
                controller: Some(true),
                block_owner_deletion: Some(true),
            }]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node_name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A cluster node with the given `(type, address)` pairs
pub fn cluster_node(name: &str, addresses: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        status: Some(NodeStatus {
            addresses: Some(
                addresses
                    .iter()
                    .map(|(type_, address)| NodeAddress {
                        type_: type_.to_string(),
                        address: address.to_string(),
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// In-memory relation data
#[derive(Debug, Default)]
pub struct MemoryRelationStore {
    relations: Mutex<Vec<Relation>>,
}

impl MemoryRelationStore {
    pub fn new(relations: Vec<Relation>) -> Self {
        Self {
            relations: Mutex::new(relations),
        }
    }

    /// Add or replace a relation
    pub fn put(&self, relation: Relation) {
        let mut relations = lock(&self.relations);
        relations.retain(|r| r.id != relation.id);
        relations.push(relation);
    }

    /// Drop a relation, as when the remote application departs
    pub fn remove(&self, relation_id: u32) {
        lock(&self.relations).retain(|r| r.id != relation_id);
    }

    pub fn relation(&self, relation_id: u32) -> Option<Relation> {
        lock(&self.relations)
            .iter()
            .find(|r| r.id == relation_id)
            .cloned()
    }

    /// Non-empty field value from a bag
    pub fn field(&self, relation_id: u32, entity: &str, key: &str) -> Option<String> {
        self.relation(relation_id)?
            .field(entity, key)
            .map(str::to_string)
    }
}

#[async_trait]
impl RelationDataStore for MemoryRelationStore {
    async fn relations(&self, endpoint: &str) -> Result<Vec<Relation>> {
        let mut found: Vec<Relation> = lock(&self.relations)
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.id);
        Ok(found)
    }

    async fn update(&self, relation_id: u32, entity: &str, changes: BagChanges) -> Result<()> {
        let mut relations = lock(&self.relations);
        let relation = relations
            .iter_mut()
            .find(|r| r.id == relation_id)
            .ok_or_else(|| Error::NotFound(format!("relation {}", relation_id)))?;
        relation.apply(entity, &changes);
        Ok(())
    }
}

/// In-memory cluster object API with injectable failures
#[derive(Debug, Default)]
pub struct FakeClusterApi {
    pods: Mutex<HashMap<String, Pod>>,
    nodes: Mutex<HashMap<String, Node>>,
    services: Mutex<BTreeMap<String, Service>>,
    denied: Mutex<bool>,
    apply_failures: Mutex<VecDeque<Error>>,
    apply_calls: Mutex<usize>,
}

impl FakeClusterApi {
    pub fn with_pod(self, pod: Pod) -> Self {
        lock(&self.pods).insert(pod.name_any(), pod);
        self
    }

    pub fn with_node(self, node: Node) -> Self {
        lock(&self.nodes).insert(node.name_any(), node);
        self
    }

    /// Store a service as if another party created it
    pub fn with_service(self, service: Service) -> Self {
        lock(&self.services).insert(service.name_any(), service);
        self
    }

    /// Refuse every service write with 403
    pub fn deny_services(&self) {
        *lock(&self.denied) = true;
    }

    /// Fail the next apply with a node port clash
    pub fn reject_next_apply_with_port_clash(&self) {
        self.fail_next_apply(Error::api(
            CODE_UNPROCESSABLE,
            "Invalid",
            "Service is invalid: spec.ports[0].nodePort: Invalid value: provided port is already allocated",
        ));
    }

    pub fn fail_next_apply(&self, error: Error) {
        lock(&self.apply_failures).push_back(error);
    }

    pub fn service(&self, name: &str) -> Option<Service> {
        lock(&self.services).get(name).cloned()
    }

    pub fn service_names(&self) -> Vec<String> {
        lock(&self.services).keys().cloned().collect()
    }

    pub fn service_count(&self) -> usize {
        lock(&self.services).len()
    }

    pub fn apply_calls(&self) -> usize {
        *lock(&self.apply_calls)
    }

    fn forbidden(&self) -> Option<Error> {
        lock(&self.denied)
            .then(|| Error::api(CODE_FORBIDDEN, "Forbidden", "services is forbidden"))
    }
}

#[async_trait]
impl ClusterApi for FakeClusterApi {
    async fn get_pod(&self, name: &str) -> Result<Pod> {
        lock(&self.pods).get(name).cloned().ok_or_else(|| {
            Error::api(CODE_NOT_FOUND, "NotFound", format!("pods \"{}\" not found", name))
        })
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        lock(&self.nodes).get(name).cloned().ok_or_else(|| {
            Error::api(CODE_NOT_FOUND, "NotFound", format!("nodes \"{}\" not found", name))
        })
    }

    async fn get_service(&self, name: &str) -> Result<Option<Service>> {
        Ok(self.service(name))
    }

    async fn apply_service(&self, service: &Service) -> Result<Service> {
        *lock(&self.apply_calls) += 1;
        if let Some(err) = self.forbidden() {
            return Err(err);
        }
        if let Some(err) = lock(&self.apply_failures).pop_front() {
            return Err(err);
        }
        lock(&self.services).insert(service.name_any(), service.clone());
        Ok(service.clone())
    }

    async fn delete_service(&self, name: &str) -> Result<()> {
        if let Some(err) = self.forbidden() {
            return Err(err);
        }
        lock(&self.services)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| {
                Error::api(
                    CODE_NOT_FOUND,
                    "NotFound",
                    format!("services \"{}\" not found", name),
                )
            })
    }
}

/// Records tool invocations and answers with canned output
///
/// Unanswered commands succeed with empty output.
#[derive(Debug, Default)]
pub struct FakeToolRunner {
    commands: Mutex<Vec<ToolCommand>>,
    responses: Mutex<HashMap<(String, Option<String>), ToolOutput>>,
}

impl FakeToolRunner {
    /// Answer every run of `program`
    pub fn respond(&self, program: &str, output: ToolOutput) {
        lock(&self.responses).insert((program.to_string(), None), output);
    }

    /// Answer runs of `program` whose first argument is `subcommand`
    pub fn respond_to(&self, program: &str, subcommand: &str, output: ToolOutput) {
        lock(&self.responses).insert(
            (program.to_string(), Some(subcommand.to_string())),
            output,
        );
    }

    pub fn commands(&self) -> Vec<ToolCommand> {
        lock(&self.commands).clone()
    }

    pub fn count_program(&self, program: &str) -> usize {
        lock(&self.commands)
            .iter()
            .filter(|c| c.program == program)
            .count()
    }
}

#[async_trait]
impl ToolRunner for FakeToolRunner {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput> {
        lock(&self.commands).push(command.clone());

        let responses = lock(&self.responses);
        let specific = (command.program.clone(), command.args.first().cloned());
        let general = (command.program.clone(), None);
        Ok(responses
            .get(&specific)
            .or_else(|| responses.get(&general))
            .cloned()
            .unwrap_or_else(|| ToolOutput::ok("")))
    }
}

/// In-memory unit filesystem
#[derive(Debug, Default)]
pub struct MemoryWorkload {
    files: Mutex<BTreeMap<PathBuf, String>>,
    writes: Mutex<usize>,
}

impl MemoryWorkload {
    /// Place a file without counting it as a write
    pub fn seed(&self, path: impl AsRef<Path>, content: &str) {
        lock(&self.files).insert(path.as_ref().to_path_buf(), content.to_string());
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        lock(&self.files).get(path.as_ref()).cloned()
    }

    pub fn writes(&self) -> usize {
        *lock(&self.writes)
    }
}

#[async_trait]
impl Workload for MemoryWorkload {
    async fn read(&self, path: &Path) -> Result<Option<String>> {
        Ok(self.file(path))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(lock(&self.files).contains_key(path))
    }

    async fn write(&self, path: &Path, content: &str) -> Result<()> {
        *lock(&self.writes) += 1;
        self.seed(path, content);
        Ok(())
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        lock(&self.files).remove(path);
        Ok(())
    }

    async fn remove_matching(&self, dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
        let mut files = lock(&self.files);
        let matching: Vec<PathBuf> = files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| extensions.contains(&ext))
            })
            .cloned()
            .collect();
        for path in &matching {
            files.remove(path);
        }
        Ok(matching)
    }
}
