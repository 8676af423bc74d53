//! Relation data access
//!
//! A relation is a link between this application and another one (or with
//! itself, for the peer group). Every participating application and unit owns
//! a string key/value bag on the relation. Bags are eventually consistent:
//! a read may observe a remote write late, or not at all yet.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::controller::error::{Error, Result};

/// Peer relation endpoint shared by all brokers of the application
pub const PEER: &str = "cluster";
/// Coordination service (ZooKeeper) relation endpoint
pub const ZK: &str = "zookeeper";
/// Client application relation endpoint
pub const REL_NAME: &str = "kafka-client";
/// TLS certificate provider relation endpoint
pub const CERTIFICATES: &str = "certificates";

/// A single key/value bag owned by an application or unit
pub type DataBag = BTreeMap<String, String>;

/// Pending writes to a bag; `None` removes the key
pub type BagChanges = BTreeMap<String, Option<String>>;

/// One relation instance as seen by the local unit
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Relation {
    /// Relation id, unique across the model
    pub id: u32,
    /// Local endpoint name (e.g. `cluster`, `zookeeper`)
    pub endpoint: String,
    /// Remote application name, absent for the peer relation until joined
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_app: Option<String>,
    /// Remote units currently joined (for peers: the other brokers)
    #[serde(default)]
    pub remote_units: Vec<String>,
    /// Bags keyed by owning entity (application or unit name)
    #[serde(default)]
    pub bags: BTreeMap<String, DataBag>,
}

impl Relation {
    /// Create an empty relation
    pub fn new(id: u32, endpoint: &str) -> Self {
        Self {
            id,
            endpoint: endpoint.to_string(),
            ..Default::default()
        }
    }

    /// Read the bag owned by `entity`, empty if none was published
    pub fn bag(&self, entity: &str) -> DataBag {
        self.bags.get(entity).cloned().unwrap_or_default()
    }

    /// Read a single field from the bag owned by `entity`
    pub fn field(&self, entity: &str, key: &str) -> Option<&str> {
        self.bags
            .get(entity)
            .and_then(|bag| bag.get(key))
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Apply changes to the bag owned by `entity`
    pub fn apply(&mut self, entity: &str, changes: &BagChanges) {
        let bag = self.bags.entry(entity.to_string()).or_default();
        for (key, value) in changes {
            match value {
                Some(value) => {
                    bag.insert(key.clone(), value.clone());
                }
                None => {
                    bag.remove(key);
                }
            }
        }
    }
}

/// Keep only the entries of `desired` that would change `current`
pub fn pending_changes(current: &DataBag, desired: BagChanges) -> BagChanges {
    desired
        .into_iter()
        .filter(|(key, value)| current.get(key) != value.as_ref())
        .collect()
}

/// Access to relation data
///
/// Implementations must read fresh data on every call; the agent builds one
/// snapshot per pass and never keeps it across passes.
#[async_trait]
pub trait RelationDataStore: Send + Sync {
    /// All relations established on `endpoint`
    async fn relations(&self, endpoint: &str) -> Result<Vec<Relation>>;

    /// Write to the bag owned by `entity` on relation `relation_id`
    async fn update(&self, relation_id: u32, entity: &str, changes: BagChanges) -> Result<()>;
}

/// Serialized form of every relation visible to the unit
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RelationDocument {
    #[serde(default)]
    pub relations: Vec<Relation>,
}

/// Relation store backed by a JSON document on the unit's filesystem
///
/// The document is maintained by the agent framework that delivers relation
/// events; the agent reads it at the start of each pass and writes its own
/// bags back in place.
pub struct FileRelationStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileRelationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<RelationDocument> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(RelationDocument::default()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No relation document at {}", self.path.display());
                Ok(RelationDocument::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl RelationDataStore for FileRelationStore {
    async fn relations(&self, endpoint: &str) -> Result<Vec<Relation>> {
        let doc = self.load().await?;
        Ok(doc
            .relations
            .into_iter()
            .filter(|r| r.endpoint == endpoint)
            .collect())
    }

    async fn update(&self, relation_id: u32, entity: &str, changes: BagChanges) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load().await?;

        let relation = doc
            .relations
            .iter_mut()
            .find(|r| r.id == relation_id)
            .ok_or_else(|| Error::NotFound(format!("relation {}", relation_id)))?;
        relation.apply(entity, &changes);

        let rendered = serde_json::to_string_pretty(&doc)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, rendered).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(relation_id, entity, "Updated relation data");
        Ok(())
    }
}
