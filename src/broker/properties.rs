//! `server.properties` generation
//!
//! Every listener is named `<SCOPE>_<MECHANISM>` so that the protocol map,
//! the bind list and the advertised list stay aligned by construction:
//!
//! - `INTERNAL_*` carries inter-broker traffic on the internal port
//! - `CLIENT_*` serves in-cluster clients on the client port
//! - `EXTERNAL_*` binds the external port and advertises `<node-ip>:<node-port>`

use std::collections::BTreeSet;
use std::fmt;

use crate::broker::workload::WorkloadPaths;
use crate::controller::error::{Error, Result};
use crate::resources::nodeport::listener_node_port;
use crate::state::cluster::ClusterState;
use crate::state::models::{SecurityMechanism, Substrate};

/// SASL mechanism used for every SASL listener
pub const SCRAM_MECHANISM: &str = "SCRAM-SHA-512";

/// Internal user brokers authenticate each other with
pub const INTER_BROKER_USER: &str = "sync";

const SCRAM_LOGIN_MODULE: &str = "org.apache.kafka.common.security.scram.ScramLoginModule";

/// Who a listener serves
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerScope {
    Internal,
    Client,
    External,
}

impl fmt::Display for ListenerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerScope::Internal => write!(f, "INTERNAL"),
            ListenerScope::Client => write!(f, "CLIENT"),
            ListenerScope::External => write!(f, "EXTERNAL"),
        }
    }
}

/// One broker listener
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Listener {
    pub scope: ListenerScope,
    pub mechanism: SecurityMechanism,
    /// Port the broker binds
    pub port: u16,
    /// Host clients are told to connect to
    pub advertised_host: String,
    /// Port clients are told to connect to
    pub advertised_port: i32,
}

impl Listener {
    pub fn name(&self) -> String {
        format!("{}_{}", self.scope, self.mechanism)
    }

    pub fn bind_address(&self) -> String {
        format!("{}://0.0.0.0:{}", self.name(), self.port)
    }

    pub fn advertised_address(&self) -> String {
        format!(
            "{}://{}:{}",
            self.name(),
            self.advertised_host,
            self.advertised_port
        )
    }

    pub fn protocol_map_entry(&self) -> String {
        format!("{}:{}", self.name(), self.mechanism)
    }
}

/// Listeners the local broker should run in the current cluster state
pub fn listeners(state: &ClusterState) -> Result<Vec<Listener>> {
    let internal_address = state.unit_broker.internal_address.clone().ok_or_else(|| {
        Error::MissingPrerequisite(format!(
            "{} has not published its address",
            state.identity.unit_name()
        ))
    })?;

    let protocol = state.security_protocol();
    let mut listeners = vec![Listener {
        scope: ListenerScope::Internal,
        mechanism: protocol,
        port: protocol.ports().internal,
        advertised_host: internal_address.clone(),
        advertised_port: i32::from(protocol.ports().internal),
    }];

    let mechanisms = state.enabled_mechanisms();
    listeners.extend(mechanisms.iter().map(|mechanism| Listener {
        scope: ListenerScope::Client,
        mechanism: *mechanism,
        port: mechanism.ports().client,
        advertised_host: internal_address.clone(),
        advertised_port: i32::from(mechanism.ports().client),
    }));

    if state.expose_nodeport && state.substrate == Substrate::K8s {
        let node_ip = state.unit_broker.node_ip.clone().ok_or_else(|| {
            Error::MissingPrerequisite("node address not discovered yet".to_string())
        })?;

        for mechanism in &mechanisms {
            listeners.push(Listener {
                scope: ListenerScope::External,
                mechanism: *mechanism,
                port: mechanism.ports().external,
                advertised_host: node_ip.clone(),
                advertised_port: listener_node_port(state.identity.unit_id, *mechanism)?,
            });
        }
    }

    Ok(listeners)
}

/// Rendered broker configuration, one `key=value` per line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerProperties {
    lines: Vec<String>,
}

impl ServerProperties {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Value of `key`, if set
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| {
            line.split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }

    pub fn render(&self) -> String {
        let mut rendered = self.lines.join("\n");
        rendered.push('\n');
        rendered
    }

    /// Compare against the contents of the file currently on disk
    pub fn diff(&self, current: &str) -> PropertiesDiff {
        let current: BTreeSet<&str> = current
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect();
        let desired: BTreeSet<&str> = self.lines.iter().map(String::as_str).collect();

        PropertiesDiff {
            removed: current.difference(&desired).map(|s| s.to_string()).collect(),
            added: desired.difference(&current).map(|s| s.to_string()).collect(),
        }
    }
}

/// Lines that differ between two property sets
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropertiesDiff {
    pub removed: BTreeSet<String>,
    pub added: BTreeSet<String>,
}

impl PropertiesDiff {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }

    /// Keys touched by the change; values are left out since some are secrets
    pub fn changed_keys(&self) -> BTreeSet<String> {
        self.removed
            .iter()
            .chain(self.added.iter())
            .filter_map(|line| line.split_once('=').map(|(k, _)| k.to_string()))
            .collect()
    }
}

fn scram_jaas(credentials: Option<(&str, &str)>) -> String {
    match credentials {
        Some((username, password)) => format!(
            "{} required username=\"{}\" password=\"{}\";",
            SCRAM_LOGIN_MODULE, username, password
        ),
        None => format!("{} required;", SCRAM_LOGIN_MODULE),
    }
}

/// Build `server.properties` for the local broker
pub fn server_properties(state: &ClusterState, paths: &WorkloadPaths) -> Result<ServerProperties> {
    let sync_password = state
        .cluster
        .internal_user_credentials
        .get(INTER_BROKER_USER)
        .ok_or_else(|| {
            Error::MissingPrerequisite("internal broker credentials not yet added".to_string())
        })?;
    let zookeeper = state
        .zookeeper
        .as_ref()
        .filter(|zk| zk.connected())
        .ok_or_else(|| {
            Error::MissingPrerequisite("zookeeper credentials not created yet".to_string())
        })?;
    let zookeeper_connect = zookeeper.connect_string().ok_or_else(|| {
        Error::MissingPrerequisite("zookeeper uris not published yet".to_string())
    })?;

    let listeners = listeners(state)?;
    let internal = listeners
        .iter()
        .find(|l| l.scope == ListenerScope::Internal)
        .ok_or_else(|| Error::ValidationError("no internal listener".to_string()))?;

    let join = |f: fn(&Listener) -> String| listeners.iter().map(f).collect::<Vec<_>>().join(",");

    let mut lines = vec![
        format!("broker.id={}", state.identity.unit_id),
        format!("log.dirs={}", state.log_dirs()),
        format!("listeners={}", join(Listener::bind_address)),
        format!("advertised.listeners={}", join(Listener::advertised_address)),
        format!(
            "listener.security.protocol.map={}",
            join(Listener::protocol_map_entry)
        ),
        format!("inter.broker.listener.name={}", internal.name()),
        format!("sasl.enabled.mechanisms={}", SCRAM_MECHANISM),
        format!("sasl.mechanism.inter.broker.protocol={}", SCRAM_MECHANISM),
        "authorizer.class.name=kafka.security.authorizer.AclAuthorizer".to_string(),
        "allow.everyone.if.no.acl.found=false".to_string(),
        format!("super.users={}", state.super_users()),
        format!("zookeeper.connect={}", zookeeper_connect),
        "zookeeper.set.acl=true".to_string(),
    ];

    for listener in &listeners {
        let prefix = format!("listener.name.{}", listener.name().to_lowercase());
        match listener.mechanism {
            SecurityMechanism::SaslPlaintext | SecurityMechanism::SaslSsl => {
                let credentials = (listener.scope == ListenerScope::Internal)
                    .then_some((INTER_BROKER_USER, sync_password.as_str()));
                lines.push(format!(
                    "{}.{}.sasl.jaas.config={}",
                    prefix,
                    SCRAM_MECHANISM.to_lowercase(),
                    scram_jaas(credentials)
                ));
            }
            SecurityMechanism::Ssl => {
                lines.push(format!("{}.ssl.client.auth=required", prefix));
            }
        }
    }

    if state.security_protocol().requires_tls() {
        let keystore_password = state.unit_broker.keystore_password.as_deref().ok_or_else(|| {
            Error::MissingPrerequisite("keystore password not generated yet".to_string())
        })?;
        let truststore_password =
            state.unit_broker.truststore_password.as_deref().ok_or_else(|| {
                Error::MissingPrerequisite("truststore password not generated yet".to_string())
            })?;

        lines.extend([
            format!("ssl.keystore.location={}", paths.keystore().display()),
            format!("ssl.keystore.password={}", keystore_password),
            "ssl.keystore.type=PKCS12".to_string(),
            format!("ssl.truststore.location={}", paths.truststore().display()),
            format!("ssl.truststore.password={}", truststore_password),
            "ssl.truststore.type=JKS".to_string(),
            "ssl.endpoint.identification.algorithm=".to_string(),
        ]);

        if zookeeper.tls {
            lines.extend([
                "zookeeper.ssl.client.enable=true".to_string(),
                "zookeeper.clientCnxnSocket=org.apache.zookeeper.ClientCnxnSocketNetty"
                    .to_string(),
                format!(
                    "zookeeper.ssl.truststore.location={}",
                    paths.truststore().display()
                ),
                format!("zookeeper.ssl.truststore.password={}", truststore_password),
                "zookeeper.ssl.truststore.type=JKS".to_string(),
            ]);
        }
    }

    Ok(ServerProperties { lines })
}
