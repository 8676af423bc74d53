pub mod cluster;
pub mod models;
pub mod relation;

pub use cluster::ClusterState;
pub use models::{
    BrokerRecord, ClientRecord, ClusterRecord, CoordinationServiceRecord, INTERNAL_USERS,
    MechanismPorts, SECURITY_MECHANISMS, SecurityMechanism, Substrate, UnitIdentity,
};
pub use relation::{
    BagChanges, CERTIFICATES, DataBag, FileRelationStore, PEER, REL_NAME, Relation,
    RelationDataStore, RelationDocument, ZK, pending_changes,
};
