//! Common utilities for Kubernetes resource generation
//!
//! Shared labels, selectors and owner references used by every generated
//! exposure object.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::controller::error::{Error, Result};

/// Operator field manager name for server-side apply
pub const FIELD_MANAGER: &str = "kafka-operator";

/// Label every broker pod carries with its application name
pub const APP_NAME_LABEL: &str = "app.kubernetes.io/name";

/// Label the StatefulSet controller sets with the pod's own name
pub const POD_NAME_LABEL: &str = "statefulset.kubernetes.io/pod-name";

/// Generate standard labels for objects managed on behalf of an application
pub fn standard_labels(app_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_NAME_LABEL.to_string(), app_name.to_string()),
        (
            "app.kubernetes.io/component".to_string(),
            "kafka".to_string(),
        ),
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
    ])
}

/// Selector matching exactly one broker pod
pub fn pod_selector(pod_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(POD_NAME_LABEL.to_string(), pod_name.to_string())])
}

/// Selector matching every broker pod of the application
pub fn app_selector(app_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_NAME_LABEL.to_string(), app_name.to_string())])
}

/// Owner reference to a broker pod
///
/// Objects owned by the pod are garbage collected when the unit is removed.
/// The pod does not block on its dependents being deleted first.
pub fn pod_owner_reference(pod: &Pod) -> Result<OwnerReference> {
    let uid = pod
        .metadata
        .uid
        .clone()
        .ok_or_else(|| {
            Error::MissingPrerequisite(format!("pod {} has no uid", pod.name_any()))
        })?;

    Ok(OwnerReference {
        api_version: "v1".to_string(),
        kind: "Pod".to_string(),
        name: pod.name_any(),
        uid,
        controller: None,
        block_owner_deletion: Some(false),
    })
}

/// Owner references of the pod itself (its StatefulSet)
///
/// Application-wide objects share the lifecycle of the whole StatefulSet
/// rather than that of any single unit.
pub fn workload_owner_references(pod: &Pod) -> Vec<OwnerReference> {
    pod.metadata.owner_references.clone().unwrap_or_default()
}
