pub mod api;
pub mod common;
pub mod nodeport;
pub mod service;

pub use api::{ClusterApi, KubeClusterApi, discover_node_ip, node_address};
pub use common::{FIELD_MANAGER, pod_owner_reference, standard_labels, workload_owner_references};
pub use nodeport::{MAX_BROKER_ORDINALS, bootstrap_node_port, listener_node_port};
pub use service::{
    ApplyOutcome, ExposureSpec, ServiceReconciler, bootstrap_exposure, generate_service,
    listener_exposure,
};
