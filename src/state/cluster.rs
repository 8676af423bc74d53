//! Snapshot of the whole cluster as seen by the local unit
//!
//! [`ClusterState`] is assembled from relation data at the start of a pass and
//! dropped at its end. All derived values are computed from the snapshot on
//! demand; nothing is memoized across passes.

use tracing::debug;

use crate::config::AgentConfig;
use crate::controller::error::Result;
use crate::resources::nodeport::listener_node_port;
use crate::state::models::{
    BrokerRecord, ClientRecord, ClusterRecord, CoordinationServiceRecord, INTERNAL_USERS,
    SecurityMechanism, Substrate, UnitIdentity,
};
use crate::state::relation::{CERTIFICATES, PEER, REL_NAME, Relation, RelationDataStore, ZK};

/// Consistent view of every record relevant to one reconciliation pass
#[derive(Clone, Debug)]
pub struct ClusterState {
    pub identity: UnitIdentity,
    pub substrate: Substrate,
    /// Whether brokers are advertised through node ports
    pub expose_nodeport: bool,
    /// Storage mount points backing `log.dirs`
    pub storage_locations: Vec<String>,
    pub peer_relation: Option<Relation>,
    pub zookeeper_relation: Option<Relation>,
    pub client_relations: Vec<Relation>,
    pub certificates_relation: Option<Relation>,
    pub unit_broker: BrokerRecord,
    pub peer_brokers: Vec<BrokerRecord>,
    pub cluster: ClusterRecord,
    pub zookeeper: Option<CoordinationServiceRecord>,
    pub clients: Vec<ClientRecord>,
}

impl ClusterState {
    /// Read every relation once and build the snapshot
    pub async fn load(
        store: &dyn RelationDataStore,
        identity: &UnitIdentity,
        config: &AgentConfig,
    ) -> Result<Self> {
        let peer = store.relations(PEER).await?.into_iter().next();
        let zookeeper = store.relations(ZK).await?.into_iter().next();
        let clients = store.relations(REL_NAME).await?;
        let certificates = store.relations(CERTIFICATES).await?.into_iter().next();

        debug!(
            peer = peer.is_some(),
            zookeeper = zookeeper.is_some(),
            clients = clients.len(),
            certificates = certificates.is_some(),
            "Loaded relation data"
        );

        Ok(Self::from_relations(
            identity,
            config,
            peer,
            zookeeper,
            clients,
            certificates,
        ))
    }

    /// Build the snapshot from already fetched relations
    pub fn from_relations(
        identity: &UnitIdentity,
        config: &AgentConfig,
        peer_relation: Option<Relation>,
        zookeeper_relation: Option<Relation>,
        client_relations: Vec<Relation>,
        certificates_relation: Option<Relation>,
    ) -> Self {
        let substrate = config.substrate;
        let unit_name = identity.unit_name();

        let unit_bag = peer_relation
            .as_ref()
            .map(|r| r.bag(&unit_name))
            .unwrap_or_default();
        let unit_broker = BrokerRecord::from_bag(identity.clone(), &unit_bag, substrate);

        let peer_brokers = peer_relation
            .as_ref()
            .map(|rel| {
                rel.remote_units
                    .iter()
                    .filter(|unit| **unit != unit_name)
                    .filter_map(|unit| {
                        let peer_identity = UnitIdentity::from_unit_name(unit).ok()?;
                        Some(BrokerRecord::from_bag(
                            peer_identity,
                            &rel.bag(unit),
                            substrate,
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let cluster = peer_relation
            .as_ref()
            .map(|r| ClusterRecord::from_bag(&r.bag(&identity.app_name)))
            .unwrap_or_default();

        let zookeeper = zookeeper_relation.as_ref().map(|rel| {
            let bag = rel
                .remote_app
                .as_deref()
                .map(|app| rel.bag(app))
                .unwrap_or_default();
            CoordinationServiceRecord::from_bag(rel.id, &bag)
        });

        let clients = client_relations
            .iter()
            .filter_map(|rel| {
                let app = rel.remote_app.as_deref()?;
                let password = cluster
                    .client_passwords
                    .get(&format!("relation-{}", rel.id))
                    .cloned();
                Some(ClientRecord::from_bag(rel.id, app, &rel.bag(app), password))
            })
            .collect();

        Self {
            identity: identity.clone(),
            substrate,
            expose_nodeport: config.expose_nodeport,
            storage_locations: config.log_dirs.clone(),
            peer_relation,
            zookeeper_relation,
            client_relations,
            certificates_relation,
            unit_broker,
            peer_brokers,
            cluster,
            zookeeper,
            clients,
        }
    }

    /// Every broker in the peer group including the local one, ordered by unit id
    pub fn brokers(&self) -> Vec<&BrokerRecord> {
        let mut brokers: Vec<&BrokerRecord> = self
            .peer_brokers
            .iter()
            .chain(std::iter::once(&self.unit_broker))
            .collect();
        brokers.sort_by_key(|b| b.unit_id());
        brokers
    }

    /// Mechanism advertised for bootstrap.
    ///
    /// TLS is only advertised once the local unit holds its signed certificate.
    pub fn security_protocol(&self) -> SecurityMechanism {
        if self.cluster.tls_enabled && self.unit_broker.certificate.is_some() {
            SecurityMechanism::SaslSsl
        } else {
            SecurityMechanism::SaslPlaintext
        }
    }

    /// Mechanisms that currently get a listener
    pub fn enabled_mechanisms(&self) -> Vec<SecurityMechanism> {
        let mut mechanisms = vec![self.security_protocol()];
        if self.cluster.mtls_enabled && self.security_protocol().requires_tls() {
            mechanisms.push(SecurityMechanism::Ssl);
        }
        mechanisms
    }

    /// `bootstrap-server` value for clients: sorted, comma separated `host:port`
    pub fn bootstrap_server(&self) -> String {
        if self.peer_relation.is_none() {
            return String::new();
        }

        if self.expose_nodeport {
            return self.bootstrap_servers_external();
        }

        let port = self.security_protocol().ports().client;
        let mut servers: Vec<String> = self
            .brokers()
            .into_iter()
            .filter_map(|b| b.internal_address.as_ref())
            .map(|address| format!("{}:{}", address, port))
            .collect();
        servers.sort();
        servers.join(",")
    }

    /// Externally reachable `node-ip:node-port` of every broker that published its node
    pub fn bootstrap_servers_external(&self) -> String {
        let mechanism = self.security_protocol();
        let mut servers: Vec<String> = self
            .brokers()
            .into_iter()
            .filter_map(|b| {
                let node_ip = b.node_ip.as_ref()?;
                let port = listener_node_port(b.unit_id(), mechanism).ok()?;
                Some(format!("{}:{}", node_ip, port))
            })
            .collect();
        servers.sort();
        servers.join(",")
    }

    /// Semicolon separated `User:<name>` list for the `super.users` property
    pub fn super_users(&self) -> String {
        let mut users: Vec<String> = INTERNAL_USERS.iter().map(|u| u.to_string()).collect();

        // Admin clients only count once their password exists
        users.extend(
            self.clients
                .iter()
                .filter(|c| c.is_admin() && c.password.is_some())
                .map(ClientRecord::username),
        );

        let mut formatted: Vec<String> = users.iter().map(|u| format!("User:{}", u)).collect();
        formatted.sort();
        formatted.dedup();
        formatted.join(";")
    }

    /// `log.dirs` property value
    pub fn log_dirs(&self) -> String {
        self.storage_locations.join(",")
    }
}
