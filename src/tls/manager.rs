//! TLS material lifecycle for the local unit
//!
//! Provisioning walks a fixed sequence of phases. Every step can be replayed:
//! file writes overwrite, and a trust store import that finds its alias
//! already present counts as done. A crash between steps is recovered by
//! running the whole sequence again.

use std::fmt;
use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::broker::workload::{Workload, WorkloadPaths};
use crate::config::AgentConfig;
use crate::controller::error::{Error, Result};
use crate::state::cluster::ClusterState;
use crate::tls::sans::{SanSet, parse_current_sans};
use crate::tls::toolchain::{ToolCommand, ToolOutcome, ToolRunner};

/// Extensions of every artifact [`TlsManager::remove_stores`] deletes
pub const STORE_EXTENSIONS: [&str; 4] = ["pem", "key", "p12", "jks"];

/// Alias of the unit's CA in the trust store
pub const CA_ALIAS: &str = "ca";

const FILE_MODE: &str = "770";

/// Provisioning phases, in order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsPhase {
    Unprovisioned,
    KeyWritten,
    CertWritten,
    CaImported,
    TruststoreBuilt,
    KeystoreBuilt,
    Provisioned,
}

impl TlsPhase {
    /// Phase reached after the next step succeeds
    pub fn next(self) -> Self {
        match self {
            TlsPhase::Unprovisioned => TlsPhase::KeyWritten,
            TlsPhase::KeyWritten => TlsPhase::CertWritten,
            TlsPhase::CertWritten => TlsPhase::CaImported,
            TlsPhase::CaImported => TlsPhase::TruststoreBuilt,
            TlsPhase::TruststoreBuilt => TlsPhase::KeystoreBuilt,
            TlsPhase::KeystoreBuilt | TlsPhase::Provisioned => TlsPhase::Provisioned,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == TlsPhase::Provisioned
    }
}

impl fmt::Display for TlsPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsPhase::Unprovisioned => write!(f, "Unprovisioned"),
            TlsPhase::KeyWritten => write!(f, "KeyWritten"),
            TlsPhase::CertWritten => write!(f, "CertWritten"),
            TlsPhase::CaImported => write!(f, "CaImported"),
            TlsPhase::TruststoreBuilt => write!(f, "TruststoreBuilt"),
            TlsPhase::KeystoreBuilt => write!(f, "KeystoreBuilt"),
            TlsPhase::Provisioned => write!(f, "Provisioned"),
        }
    }
}

/// Key material the unit must hold before provisioning starts
struct TlsMaterial<'s> {
    private_key: &'s str,
    certificate: &'s str,
    ca: &'s str,
    truststore_password: &'s str,
    keystore_password: &'s str,
}

/// Builds and maintains the unit's key, certificates and stores
pub struct TlsManager<'a> {
    state: &'a ClusterState,
    workload: &'a dyn Workload,
    tools: &'a dyn ToolRunner,
    config: &'a AgentConfig,
    paths: WorkloadPaths,
}

impl<'a> TlsManager<'a> {
    pub fn new(
        state: &'a ClusterState,
        workload: &'a dyn Workload,
        tools: &'a dyn ToolRunner,
        config: &'a AgentConfig,
    ) -> Self {
        Self {
            state,
            workload,
            tools,
            config,
            paths: WorkloadPaths::new(&config.conf_path),
        }
    }

    pub fn paths(&self) -> &WorkloadPaths {
        &self.paths
    }

    /// Alias identifying a certificate imported for a relation
    pub fn generate_alias(app_name: &str, relation_id: u32) -> String {
        format!("{}-{}", app_name, relation_id)
    }

    fn material(&self) -> Result<TlsMaterial<'a>> {
        let state: &'a ClusterState = self.state;
        let broker = &state.unit_broker;
        let mut missing = Vec::new();
        let mut take = |value: &'a Option<String>, name: &'static str| -> &'a str {
            value.as_deref().unwrap_or_else(|| {
                missing.push(name);
                ""
            })
        };

        let material = TlsMaterial {
            private_key: take(&broker.private_key, "private-key"),
            certificate: take(&broker.certificate, "certificate"),
            ca: take(&broker.ca, "ca"),
            truststore_password: take(&broker.truststore_password, "truststore-password"),
            keystore_password: take(&broker.keystore_password, "keystore-password"),
        };

        if !missing.is_empty() {
            return Err(Error::MissingPrerequisite(format!(
                "{} missing TLS material: {}",
                broker.unit_name(),
                missing.join(", ")
            )));
        }
        Ok(material)
    }

    /// Run every step from scratch; returns the terminal phase
    ///
    /// All inputs are checked before the first write so a pass never leaves
    /// a key without its certificate.
    pub async fn provision(&self) -> Result<TlsPhase> {
        let material = self.material()?;
        let mut phase = TlsPhase::Unprovisioned;

        while !phase.is_terminal() {
            match phase {
                TlsPhase::Unprovisioned => {
                    self.write_secured(&self.paths.server_key(), material.private_key)
                        .await?
                }
                TlsPhase::KeyWritten => {
                    self.write_secured(&self.paths.server_pem(), material.certificate)
                        .await?
                }
                TlsPhase::CertWritten => {
                    self.import_ca(material.ca, material.truststore_password)
                        .await?
                }
                TlsPhase::CaImported => self.secure(&self.paths.truststore()).await?,
                TlsPhase::TruststoreBuilt => {
                    self.build_keystore(material.keystore_password).await?
                }
                TlsPhase::KeystoreBuilt | TlsPhase::Provisioned => {}
            }
            phase = phase.next();
            debug!(phase = %phase, "TLS provisioning advanced");
        }

        info!(
            unit = %self.state.identity.unit_name(),
            "TLS material provisioned"
        );
        Ok(phase)
    }

    /// Whether the files on disk already match the unit's relation data
    pub async fn is_current(&self) -> Result<bool> {
        let broker = &self.state.unit_broker;
        for (path, expected) in [
            (self.paths.server_key(), &broker.private_key),
            (self.paths.server_pem(), &broker.certificate),
            (self.paths.ca_pem(), &broker.ca),
        ] {
            if self.workload.read(&path).await? != *expected {
                return Ok(false);
            }
        }

        Ok(self.workload.exists(&self.paths.truststore()).await?
            && self.workload.exists(&self.paths.keystore()).await?)
    }

    fn required<'v>(&self, value: &'v Option<String>, name: &str) -> Result<&'v str> {
        value.as_deref().ok_or_else(|| {
            error!("Can't set {} on unit, missing {} in relation data", name, name);
            Error::MissingPrerequisite(format!("{} not in relation data", name))
        })
    }

    /// Write `ca.pem` and import it into the trust store
    async fn import_ca(&self, ca: &str, password: &str) -> Result<()> {
        self.write_secured(&self.paths.ca_pem(), ca).await?;
        self.import_with_password(CA_ALIAS, "ca.pem", password).await
    }

    async fn build_keystore(&self, password: &str) -> Result<()> {
        let pass = format!("pass:{}", password);
        let command = ToolCommand::new(
            "openssl",
            [
                "pkcs12",
                "-export",
                "-in",
                "server.pem",
                "-inkey",
                "server.key",
                "-passin",
                pass.as_str(),
                "-certfile",
                "server.pem",
                "-out",
                "keystore.p12",
                "-password",
                pass.as_str(),
            ],
        )
        .in_dir(&self.paths.conf_path);

        let outcome = self.tools.execute(&command).await?;
        if let ToolOutcome::Failure(detail) = &outcome {
            error!("{}", detail);
        }
        outcome.into_result(&command)?;

        self.secure(&self.paths.keystore()).await
    }

    /// Add a certificate file (relative to the conf dir) to the trust store
    pub async fn import_cert(&self, alias: &str, filename: &str) -> Result<()> {
        let password = self.required(
            &self.state.unit_broker.truststore_password,
            "truststore-password",
        )?;
        self.import_with_password(alias, filename, password).await
    }

    async fn import_with_password(
        &self,
        alias: &str,
        filename: &str,
        password: &str,
    ) -> Result<()> {
        let command = ToolCommand::new(
            self.config.keytool(),
            [
                "-import",
                "-v",
                "-alias",
                alias,
                "-file",
                filename,
                "-keystore",
                "truststore.jks",
                "-storepass",
                password,
                "-noprompt",
            ],
        )
        .in_dir(&self.paths.conf_path);

        match self.tools.execute(&command).await? {
            ToolOutcome::Success(_) => Ok(()),
            ToolOutcome::AlreadyExists(detail) => {
                debug!(alias, "{}", detail);
                Ok(())
            }
            other => {
                if let ToolOutcome::Failure(detail) | ToolOutcome::DoesNotExist(detail) = &other {
                    error!("{}", detail);
                }
                other.into_result(&command).map(|_| ())
            }
        }
    }

    /// Write a PEM under `<alias>.pem` and import it
    pub async fn add_trusted_cert(&self, alias: &str, pem: &str) -> Result<()> {
        let path = self.paths.trusted_cert(alias);
        if self.workload.read(&path).await?.as_deref() == Some(pem) {
            return Ok(());
        }
        self.workload.write(&path, pem).await?;
        self.import_cert(alias, &format!("{}.pem", alias)).await
    }

    /// Whether a certificate was imported under `alias` by this agent
    pub async fn has_trusted_cert(&self, alias: &str) -> Result<bool> {
        Ok(self
            .workload
            .read(&self.paths.trusted_cert(alias))
            .await?
            .is_some())
    }

    /// Remove a certificate from the trust store and delete its PEM
    pub async fn remove_cert(&self, alias: &str) -> Result<()> {
        let password = self.required(
            &self.state.unit_broker.truststore_password,
            "truststore-password",
        )?;
        let command = ToolCommand::new(
            self.config.keytool(),
            [
                "-delete",
                "-v",
                "-alias",
                alias,
                "-keystore",
                "truststore.jks",
                "-storepass",
                password,
                "-noprompt",
            ],
        )
        .in_dir(&self.paths.conf_path);

        match self.tools.execute(&command).await? {
            ToolOutcome::Success(_) => {}
            ToolOutcome::DoesNotExist(detail) => {
                warn!(alias, "{}", detail);
            }
            other => {
                if let ToolOutcome::Failure(detail) = &other {
                    error!("{}", detail);
                }
                other.into_result(&command)?;
            }
        }

        self.workload.remove(&self.paths.trusted_cert(alias)).await
    }

    /// SANs of the certificate currently on disk, `None` without a certificate
    pub async fn get_current_sans(&self) -> Result<Option<SanSet>> {
        if self.state.unit_broker.certificate.is_none() {
            return Ok(None);
        }

        let command = ToolCommand::new(
            "openssl",
            ["x509", "-noout", "-ext", "subjectAltName", "-in", "server.pem"],
        )
        .in_dir(&self.paths.conf_path);

        let stdout = self.tools.execute(&command).await?.into_result(&command)?;
        Ok(Some(parse_current_sans(&stdout)))
    }

    /// Whether the certificate on disk lacks or carries extra SANs
    pub async fn certificate_refresh_needed(&self, desired: &SanSet) -> Result<bool> {
        match self.get_current_sans().await? {
            Some(current) if current != *desired => {
                info!(
                    current_ip = ?current.sans_ip,
                    current_dns = ?current.sans_dns,
                    desired_ip = ?desired.sans_ip,
                    desired_dns = ?desired.sans_dns,
                    "Certificate SANs differ from the unit's addresses"
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Delete every key, certificate and store of the unit
    pub async fn remove_stores(&self) -> Result<()> {
        let removed = self
            .workload
            .remove_matching(&self.paths.conf_path, &STORE_EXTENSIONS)
            .await?;
        info!(count = removed.len(), "Removed TLS material");
        Ok(())
    }

    async fn write_secured(&self, path: &Path, content: &str) -> Result<()> {
        self.workload.write(path, content).await?;
        self.secure(path).await
    }

    /// Hand the file to the broker user and restrict its mode
    async fn secure(&self, path: &Path) -> Result<()> {
        let path = path.display().to_string();
        let owner = format!("{}:{}", self.config.user, self.config.group);

        for command in [
            ToolCommand::new("chown", [owner.as_str(), path.as_str()]),
            ToolCommand::new("chmod", [FILE_MODE, path.as_str()]),
        ] {
            self.tools.execute(&command).await?.into_result(&command)?;
        }
        Ok(())
    }
}
