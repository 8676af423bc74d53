pub mod context;
pub mod credentials;
pub mod error;
pub mod leader;
pub mod reconciler;
pub mod status;

pub use context::Context;
pub use credentials::{PASSWORD_LENGTH, generate_password};
pub use error::{BackoffConfig, Error, Result};
pub use leader::{cluster_record_changes, publish_client_data, reconcile_cluster_record};
pub use reconciler::{
    MTLS_CERT_KEY, NODE_IP_KEY, PassOutcome, RESTART_REQUESTED_KEY, error_policy, reconcile,
};
pub use status::{ALL_STATUSES, LogLevel, STATUS_CHAIN, Status, StatusKind, evaluate_status};
