//! Typed records built from relation data
//!
//! Each record is a view over one or more relation bags, built once per pass.
//! Absent fields are `None`; nothing here fails because data has not arrived.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::controller::error::{Error, Result};
use crate::state::relation::DataBag;

/// Internal service accounts that always hold super-user rights
pub const INTERNAL_USERS: [&str; 2] = ["admin", "sync"];

/// Where the brokers run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Substrate {
    /// Brokers are pods in a StatefulSet
    #[default]
    K8s,
    /// Brokers are machines addressed by their host address
    Vm,
}

impl fmt::Display for Substrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Substrate::K8s => write!(f, "k8s"),
            Substrate::Vm => write!(f, "vm"),
        }
    }
}

/// Ports a listener binds for one security mechanism
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MechanismPorts {
    /// In-cluster client listener
    pub client: u16,
    /// Inter-broker listener
    pub internal: u16,
    /// Listener reached through node port exposure
    pub external: u16,
}

/// Authentication/encryption mode of a listener
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SecurityMechanism {
    #[serde(rename = "SASL_PLAINTEXT")]
    SaslPlaintext,
    #[serde(rename = "SASL_SSL")]
    SaslSsl,
    #[serde(rename = "SSL")]
    Ssl,
}

/// Every supported mechanism in its fixed order.
///
/// The position in this list is part of each broker's node port, so new
/// mechanisms must only ever be appended.
pub const SECURITY_MECHANISMS: [SecurityMechanism; 3] = [
    SecurityMechanism::SaslPlaintext,
    SecurityMechanism::SaslSsl,
    SecurityMechanism::Ssl,
];

impl SecurityMechanism {
    /// Protocol name as used in Kafka listener configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityMechanism::SaslPlaintext => "SASL_PLAINTEXT",
            SecurityMechanism::SaslSsl => "SASL_SSL",
            SecurityMechanism::Ssl => "SSL",
        }
    }

    /// Position in [`SECURITY_MECHANISMS`]
    pub fn index(&self) -> usize {
        match self {
            SecurityMechanism::SaslPlaintext => 0,
            SecurityMechanism::SaslSsl => 1,
            SecurityMechanism::Ssl => 2,
        }
    }

    pub fn ports(&self) -> MechanismPorts {
        match self {
            SecurityMechanism::SaslPlaintext => MechanismPorts {
                client: 9092,
                internal: 19092,
                external: 29092,
            },
            SecurityMechanism::SaslSsl => MechanismPorts {
                client: 9093,
                internal: 19093,
                external: 29093,
            },
            SecurityMechanism::Ssl => MechanismPorts {
                client: 9094,
                internal: 19094,
                external: 29094,
            },
        }
    }

    /// Lowercase, dash separated form used in Kubernetes object names
    pub fn dns_label(&self) -> String {
        self.as_str().to_lowercase().replace('_', "-")
    }

    /// Whether listeners of this mechanism need the unit's TLS stores
    pub fn requires_tls(&self) -> bool {
        matches!(self, SecurityMechanism::SaslSsl | SecurityMechanism::Ssl)
    }
}

impl fmt::Display for SecurityMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityMechanism {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SECURITY_MECHANISMS
            .iter()
            .find(|m| m.as_str() == s)
            .copied()
            .ok_or_else(|| Error::InvalidConfig(format!("unknown security mechanism: {}", s)))
    }
}

/// Identity of the unit running this agent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitIdentity {
    /// Application name (e.g. `kafka`)
    pub app_name: String,
    /// Stable ordinal of the unit within the application
    pub unit_id: u32,
}

impl UnitIdentity {
    pub fn new(app_name: &str, unit_id: u32) -> Self {
        Self {
            app_name: app_name.to_string(),
            unit_id,
        }
    }

    /// Parse a unit name such as `kafka/1`
    pub fn from_unit_name(unit_name: &str) -> Result<Self> {
        let (app, id) = unit_name
            .split_once('/')
            .ok_or_else(|| Error::InvalidConfig(format!("invalid unit name: {}", unit_name)))?;
        Self::parse_parts(app, id, unit_name)
    }

    /// Parse a StatefulSet pod name such as `kafka-1`
    pub fn from_pod_name(pod_name: &str) -> Result<Self> {
        let (app, id) = pod_name
            .rsplit_once('-')
            .ok_or_else(|| Error::InvalidConfig(format!("invalid pod name: {}", pod_name)))?;
        Self::parse_parts(app, id, pod_name)
    }

    fn parse_parts(app: &str, id: &str, original: &str) -> Result<Self> {
        if app.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "missing application in {}",
                original
            )));
        }
        let unit_id = id
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("invalid unit ordinal in {}", original)))?;
        Ok(Self::new(app, unit_id))
    }

    /// Unit name (`kafka/1`), the key of the unit's relation bags
    pub fn unit_name(&self) -> String {
        format!("{}/{}", self.app_name, self.unit_id)
    }

    /// Pod name (`kafka-1`) of the unit on Kubernetes
    pub fn pod_name(&self) -> String {
        format!("{}-{}", self.app_name, self.unit_id)
    }
}

/// One broker of the peer group
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerRecord {
    pub identity: UnitIdentity,
    /// Address other brokers and in-cluster clients use
    pub internal_address: Option<String>,
    pub private_key: Option<String>,
    pub certificate: Option<String>,
    pub ca: Option<String>,
    pub keystore_password: Option<String>,
    pub truststore_password: Option<String>,
    /// Address of the node hosting the broker, published for external access
    pub node_ip: Option<String>,
}

impl BrokerRecord {
    /// Build a broker from the unit's peer bag
    pub fn from_bag(identity: UnitIdentity, bag: &DataBag, substrate: Substrate) -> Self {
        let field = |key: &str| bag.get(key).filter(|v| !v.is_empty()).cloned();

        let internal_address = match substrate {
            Substrate::K8s => Some(format!(
                "{}.{}-endpoints",
                identity.pod_name(),
                identity.app_name
            )),
            Substrate::Vm => field("private-address"),
        };

        Self {
            identity,
            internal_address,
            private_key: field("private-key"),
            certificate: field("certificate"),
            ca: field("ca-cert").or_else(|| field("ca")),
            keystore_password: field("keystore-password"),
            truststore_password: field("truststore-password"),
            node_ip: field("node-ip"),
        }
    }

    pub fn unit_name(&self) -> String {
        self.identity.unit_name()
    }

    pub fn unit_id(&self) -> u32 {
        self.identity.unit_id
    }
}

/// Cluster-wide fields kept in the peer application bag
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterRecord {
    pub tls_enabled: bool,
    pub mtls_enabled: bool,
    /// Passwords of internal users that have been generated so far
    pub internal_user_credentials: BTreeMap<String, String>,
    /// Generated client passwords keyed by client username (`relation-<id>`)
    pub client_passwords: BTreeMap<String, String>,
}

impl ClusterRecord {
    pub fn from_bag(bag: &DataBag) -> Self {
        let internal_user_credentials = INTERNAL_USERS
            .iter()
            .filter_map(|user| {
                bag.get(&format!("{}-password", user))
                    .filter(|p| !p.is_empty())
                    .map(|p| (user.to_string(), p.clone()))
            })
            .collect();

        let client_passwords = bag
            .iter()
            .filter(|(key, value)| key.starts_with("relation-") && !value.is_empty())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Self {
            tls_enabled: bag.get("tls").is_some_and(|v| v == "enabled"),
            mtls_enabled: bag.get("mtls").is_some_and(|v| v == "enabled"),
            internal_user_credentials,
            client_passwords,
        }
    }

    /// True once every internal user has a password
    pub fn has_internal_credentials(&self) -> bool {
        INTERNAL_USERS
            .iter()
            .all(|user| self.internal_user_credentials.contains_key(*user))
    }
}

/// Connection data published by the coordination service
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoordinationServiceRecord {
    pub relation_id: u32,
    pub username: Option<String>,
    pub password: Option<String>,
    pub endpoints: Option<String>,
    pub chroot: Option<String>,
    pub uris: Option<String>,
    pub tls: bool,
}

impl CoordinationServiceRecord {
    pub fn from_bag(relation_id: u32, bag: &DataBag) -> Self {
        let field = |key: &str| bag.get(key).filter(|v| !v.is_empty()).cloned();
        Self {
            relation_id,
            username: field("username"),
            password: field("password"),
            endpoints: field("endpoints"),
            chroot: field("chroot"),
            uris: field("uris"),
            tls: bag.get("tls").is_some_and(|v| v == "enabled"),
        }
    }

    /// All connection fields have been published
    pub fn connected(&self) -> bool {
        self.username.is_some()
            && self.password.is_some()
            && self.endpoints.is_some()
            && self.chroot.is_some()
            && self.uris.is_some()
    }

    /// `zookeeper.connect` value: endpoints with the chroot appended
    pub fn connect_string(&self) -> Option<String> {
        let uris = self.uris.as_ref()?;
        let chroot = self.chroot.as_deref().unwrap_or("");
        if chroot.is_empty() || uris.ends_with(chroot) {
            return Some(uris.clone());
        }
        Some(format!("{}{}", uris, chroot))
    }
}

/// One related client application
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientRecord {
    pub relation_id: u32,
    pub app_name: String,
    pub extra_user_roles: String,
    pub topic: Option<String>,
    requested_consumer_group_prefix: Option<String>,
    /// Password generated by the leader, if any yet
    pub password: Option<String>,
}

impl ClientRecord {
    pub fn from_bag(
        relation_id: u32,
        app_name: &str,
        bag: &DataBag,
        password: Option<String>,
    ) -> Self {
        let field = |key: &str| bag.get(key).filter(|v| !v.is_empty()).cloned();
        Self {
            relation_id,
            app_name: app_name.to_string(),
            extra_user_roles: field("extra-user-roles").unwrap_or_default(),
            topic: field("topic"),
            requested_consumer_group_prefix: field("consumer-group-prefix"),
            password,
        }
    }

    /// Username assigned to the client
    pub fn username(&self) -> String {
        format!("relation-{}", self.relation_id)
    }

    pub fn is_admin(&self) -> bool {
        self.extra_user_roles.contains("admin")
    }

    /// Consumer group namespace granted to the client
    pub fn consumer_group_prefix(&self) -> String {
        if let Some(prefix) = &self.requested_consumer_group_prefix {
            return prefix.clone();
        }
        if self.extra_user_roles.contains("consumer") {
            return format!("{}-", self.username());
        }
        String::new()
    }
}
