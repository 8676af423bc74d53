//! Files owned by the broker process on the local unit

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::controller::error::Result;

/// Locations of every file the agent manages under the configuration directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadPaths {
    pub conf_path: PathBuf,
}

impl WorkloadPaths {
    pub fn new(conf_path: impl Into<PathBuf>) -> Self {
        Self {
            conf_path: conf_path.into(),
        }
    }

    pub fn server_properties(&self) -> PathBuf {
        self.conf_path.join("server.properties")
    }

    pub fn server_key(&self) -> PathBuf {
        self.conf_path.join("server.key")
    }

    pub fn server_pem(&self) -> PathBuf {
        self.conf_path.join("server.pem")
    }

    pub fn ca_pem(&self) -> PathBuf {
        self.conf_path.join("ca.pem")
    }

    pub fn truststore(&self) -> PathBuf {
        self.conf_path.join("truststore.jks")
    }

    pub fn keystore(&self) -> PathBuf {
        self.conf_path.join("keystore.p12")
    }

    /// PEM file holding an extra trusted certificate
    pub fn trusted_cert(&self, alias: &str) -> PathBuf {
        self.conf_path.join(format!("{}.pem", alias))
    }
}

/// Filesystem of the broker unit
#[async_trait]
pub trait Workload: Send + Sync {
    /// Read a file, `None` if it does not exist
    async fn read(&self, path: &Path) -> Result<Option<String>>;

    /// Whether a file exists, without reading it
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Write a file, creating parent directories
    async fn write(&self, path: &Path, content: &str) -> Result<()>;

    /// Remove a single file; missing files are ignored
    async fn remove(&self, path: &Path) -> Result<()>;

    /// Remove every file directly under `dir` with one of `extensions`
    async fn remove_matching(&self, dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>>;
}

/// [`Workload`] on the local filesystem
#[derive(Clone, Debug, Default)]
pub struct LocalWorkload;

#[async_trait]
impl Workload for LocalWorkload {
    async fn read(&self, path: &Path) -> Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn write(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        debug!("Wrote {}", path.display());
        Ok(())
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_matching(&self, dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.contains(&ext));
            if matches && entry.file_type().await?.is_file() {
                self.remove(&path).await?;
                removed.push(path);
            }
        }

        removed.sort();
        Ok(removed)
    }
}
