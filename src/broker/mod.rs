//! Broker workload: files on the unit and the broker's own configuration

pub mod properties;
pub mod workload;

pub use properties::{PropertiesDiff, ServerProperties, server_properties};
pub use workload::{LocalWorkload, Workload, WorkloadPaths};
