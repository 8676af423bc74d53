use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::broker::workload::Workload;
use crate::config::{AgentConfig, AgentEnvironment};
use crate::health::HealthState;
use crate::resources::api::ClusterApi;
use crate::state::relation::RelationDataStore;
use crate::tls::toolchain::ToolRunner;

/// Shared context for every pass
#[derive(Clone)]
pub struct Context {
    pub config: AgentConfig,
    pub environment: AgentEnvironment,
    /// Relation data the unit exchanges with its peers and related applications
    pub relations: Arc<dyn RelationDataStore>,
    /// Cluster object API; absent off Kubernetes
    pub cluster_api: Option<Arc<dyn ClusterApi>>,
    pub workload: Arc<dyn Workload>,
    pub tools: Arc<dyn ToolRunner>,
    pub health_state: Option<Arc<HealthState>>,
    /// Whether this unit currently holds leadership
    pub is_leader: Arc<AtomicBool>,
}

impl Context {
    pub fn new(
        config: AgentConfig,
        environment: AgentEnvironment,
        relations: Arc<dyn RelationDataStore>,
        workload: Arc<dyn Workload>,
        tools: Arc<dyn ToolRunner>,
    ) -> Self {
        Self {
            config,
            environment,
            relations,
            cluster_api: None,
            workload,
            tools,
            health_state: None,
            is_leader: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_cluster_api(mut self, api: Arc<dyn ClusterApi>) -> Self {
        self.cluster_api = Some(api);
        self
    }

    pub fn with_health_state(mut self, health_state: Arc<HealthState>) -> Self {
        self.health_state = Some(health_state);
        self
    }

    /// Share a leadership flag maintained elsewhere
    pub fn with_leadership(mut self, is_leader: Arc<AtomicBool>) -> Self {
        self.is_leader = is_leader;
        self
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    pub fn unit_name(&self) -> String {
        self.environment.identity.unit_name()
    }
}
