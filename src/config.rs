//! Agent configuration
//!
//! Operator-facing options come from an optional JSON document named by
//! `KAFKA_AGENT_CONFIG`; the unit's own identity comes from the environment
//! the workload is started with.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::controller::error::{Error, Result};
use crate::state::models::{Substrate, UnitIdentity};

/// Environment variable naming the configuration document
pub const CONFIG_ENV: &str = "KAFKA_AGENT_CONFIG";

/// Placeholder in extra SANs replaced by the unit ordinal
pub const UNIT_PLACEHOLDER: &str = "{unit}";

pub const DEFAULT_CONF_PATH: &str = "/etc/kafka";
pub const DEFAULT_LOG_DIR: &str = "/var/lib/kafka/data";
pub const DEFAULT_RELATION_DATA_PATH: &str = "/var/lib/kafka-operator/relations.json";
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

/// Operator-facing options
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AgentConfig {
    /// Advertise brokers through per-broker node port services
    pub expose_nodeport: bool,
    /// Comma separated extra DNS SANs; `{unit}` is replaced by the unit ordinal
    pub certificate_extra_sans: Option<String>,
    /// Storage mount points backing `log.dirs`
    pub log_dirs: Vec<String>,
    /// Directory holding the broker configuration and TLS material
    pub conf_path: PathBuf,
    pub substrate: Substrate,
    pub reconcile_interval_secs: u64,
    /// JSON document the relation data is exchanged through
    pub relation_data_path: PathBuf,
    /// Owner of written TLS material
    pub user: String,
    pub group: String,
    /// Override for the certificate store tool
    pub keytool: Option<String>,
    /// Port of the probe and metrics server
    pub health_port: u16,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            expose_nodeport: false,
            certificate_extra_sans: None,
            log_dirs: vec![DEFAULT_LOG_DIR.to_string()],
            conf_path: PathBuf::from(DEFAULT_CONF_PATH),
            substrate: Substrate::default(),
            reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            relation_data_path: PathBuf::from(DEFAULT_RELATION_DATA_PATH),
            user: "kafka".to_string(),
            group: "kafka".to_string(),
            keytool: None,
            health_port: DEFAULT_HEALTH_PORT,
        }
    }
}

impl AgentConfig {
    /// Load from the document named by `KAFKA_AGENT_CONFIG`, or defaults
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::load_from(Path::new(&path)),
            _ => {
                info!("{} not set, using default configuration", CONFIG_ENV);
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&contents)?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Certificate store tool for the substrate
    pub fn keytool(&self) -> &str {
        match (&self.keytool, self.substrate) {
            (Some(tool), _) => tool,
            (None, Substrate::Vm) => "charmed-kafka.keytool",
            (None, Substrate::K8s) => "keytool",
        }
    }

    /// Extra SANs with the `{unit}` placeholder substituted
    pub fn extra_sans(&self, unit_id: u32) -> Vec<String> {
        self.certificate_extra_sans
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|san| !san.is_empty())
            .map(|san| san.replace(UNIT_PLACEHOLDER, &unit_id.to_string()))
            .collect()
    }
}

/// Validate operator-facing options
pub fn validate_config(config: &AgentConfig) -> Result<()> {
    validate_extra_sans(config)?;

    if !config.conf_path.is_absolute() {
        return Err(Error::ValidationError(format!(
            "conf-path must be absolute: {}",
            config.conf_path.display()
        )));
    }

    if config.log_dirs.is_empty() || config.log_dirs.iter().any(|d| d.trim().is_empty()) {
        return Err(Error::ValidationError(
            "log-dirs must list at least one non-empty directory".to_string(),
        ));
    }

    if config.reconcile_interval_secs == 0 {
        return Err(Error::ValidationError(
            "reconcile-interval-secs must be positive".to_string(),
        ));
    }

    Ok(())
}

fn validate_extra_sans(config: &AgentConfig) -> Result<()> {
    let Some(raw) = config.certificate_extra_sans.as_deref() else {
        return Ok(());
    };
    if raw.trim().is_empty() {
        return Ok(());
    }

    for san in raw.split(',').map(str::trim) {
        if san.is_empty() {
            return Err(Error::ValidationError(format!(
                "certificate-extra-sans contains an empty entry: {:?}",
                raw
            )));
        }

        let without_placeholder = san.replace(UNIT_PLACEHOLDER, "");
        if without_placeholder.contains('{') || without_placeholder.contains('}') {
            return Err(Error::ValidationError(format!(
                "certificate-extra-sans entry {} has an unknown placeholder, only {} is supported",
                san, UNIT_PLACEHOLDER
            )));
        }
    }

    Ok(())
}

/// Where and as whom the agent runs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentEnvironment {
    pub identity: UnitIdentity,
    pub namespace: String,
    /// Address the broker binds inside the cluster network
    pub bind_address: Option<String>,
    /// Plain host address, used off the cluster network
    pub host: Option<String>,
    pub fqdn: String,
}

impl AgentEnvironment {
    /// Read the unit's environment
    ///
    /// `UNIT_NAME` (`kafka/1`) wins over `POD_NAME` (`kafka-1`); without
    /// either the hostname is parsed as a pod name.
    pub fn from_env() -> Result<Self> {
        let identity = match (std::env::var("UNIT_NAME"), std::env::var("POD_NAME")) {
            (Ok(unit), _) => UnitIdentity::from_unit_name(&unit)?,
            (_, Ok(pod)) => UnitIdentity::from_pod_name(&pod)?,
            _ => {
                warn!("UNIT_NAME and POD_NAME not set, using hostname");
                UnitIdentity::from_pod_name(&local_hostname())?
            }
        };

        let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
            warn!("POD_NAMESPACE not set, using 'default'");
            "default".to_string()
        });

        let fqdn = std::env::var("UNIT_FQDN").unwrap_or_else(|_| local_hostname());

        Ok(Self {
            identity,
            namespace,
            bind_address: std::env::var("BIND_ADDRESS").ok().filter(|a| !a.is_empty()),
            host: std::env::var("UNIT_HOST").ok().filter(|h| !h.is_empty()),
            fqdn,
        })
    }
}

fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
