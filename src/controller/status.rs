//! Unit status evaluation
//!
//! The current status is the first rule of [`STATUS_CHAIN`] whose predicate
//! holds, or [`Status::Active`] when none does. The order of the chain is the
//! precedence between conditions: a missing peer group hides every other
//! problem, and a TLS mismatch is reported before missing certificates or
//! credentials.

use std::fmt;

use tracing::{debug, error, info, warn};

use crate::state::cluster::ClusterState;

/// Category of a status as shown to the operator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusKind {
    Active,
    /// The agent is working towards a state without operator action
    Maintenance,
    /// The agent waits on data another party will publish
    Waiting,
    /// The operator must act
    Blocked,
}

/// Level a status message is logged at
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Readiness of the local unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Active,
    NoPeerRelation,
    ZkNotRelated,
    ZkNoData,
    ZkTlsMismatch,
    NoCert,
    NoBrokerCreds,
}

/// Every status, for exporting one gauge per value
pub const ALL_STATUSES: [Status; 7] = [
    Status::Active,
    Status::NoPeerRelation,
    Status::ZkNotRelated,
    Status::ZkNoData,
    Status::ZkTlsMismatch,
    Status::NoCert,
    Status::NoBrokerCreds,
];

impl Status {
    pub fn kind(&self) -> StatusKind {
        match self {
            Status::Active => StatusKind::Active,
            Status::NoPeerRelation => StatusKind::Maintenance,
            Status::ZkNotRelated | Status::ZkTlsMismatch => StatusKind::Blocked,
            Status::ZkNoData | Status::NoCert | Status::NoBrokerCreds => StatusKind::Waiting,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Status::Active => "",
            Status::NoPeerRelation => "no peer relation yet",
            Status::ZkNotRelated => "missing required zookeeper relation",
            Status::ZkNoData => "zookeeper credentials not created yet",
            Status::ZkTlsMismatch => "tls must be enabled on both kafka and zookeeper",
            Status::NoCert => "unit waiting for signed certificates",
            Status::NoBrokerCreds => "internal broker credentials not yet added",
        }
    }

    pub fn log_level(&self) -> LogLevel {
        match self {
            Status::Active | Status::NoPeerRelation | Status::ZkNotRelated | Status::ZkNoData => {
                LogLevel::Debug
            }
            Status::NoCert | Status::NoBrokerCreds => LogLevel::Info,
            Status::ZkTlsMismatch => LogLevel::Error,
        }
    }

    /// Snake case name used as a metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::NoPeerRelation => "no_peer_relation",
            Status::ZkNotRelated => "zk_not_related",
            Status::ZkNoData => "zk_no_data",
            Status::ZkTlsMismatch => "zk_tls_mismatch",
            Status::NoCert => "no_cert",
            Status::NoBrokerCreds => "no_broker_creds",
        }
    }

    pub fn is_active(&self) -> bool {
        *self == Status::Active
    }

    /// Log the status message at the status' own level
    pub fn emit(&self) {
        let message = self.message();
        let status = self.as_str();
        match self.log_level() {
            LogLevel::Debug => debug!(status, "{}", message),
            LogLevel::Info => info!(status, "{}", message),
            LogLevel::Warning => warn!(status, "{}", message),
            LogLevel::Error => error!(status, "{}", message),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_active() {
            write!(f, "{:?}", self.kind())
        } else {
            write!(f, "{:?}: {}", self.kind(), self.message())
        }
    }
}

/// A condition and the status it produces
pub struct StatusRule {
    pub status: Status,
    pub applies: fn(&ClusterState) -> bool,
}

/// Ordered status rules; first match wins
pub const STATUS_CHAIN: [StatusRule; 6] = [
    StatusRule {
        status: Status::NoPeerRelation,
        applies: |state| state.peer_relation.is_none(),
    },
    StatusRule {
        status: Status::ZkNotRelated,
        applies: |state| state.zookeeper_relation.is_none(),
    },
    StatusRule {
        status: Status::ZkNoData,
        applies: |state| !state.zookeeper.as_ref().is_some_and(|zk| zk.connected()),
    },
    StatusRule {
        status: Status::ZkTlsMismatch,
        applies: |state| {
            let zk_tls = state.zookeeper.as_ref().is_some_and(|zk| zk.tls);
            state.cluster.tls_enabled ^ zk_tls
        },
    },
    StatusRule {
        status: Status::NoCert,
        applies: |state| state.cluster.tls_enabled && state.unit_broker.certificate.is_none(),
    },
    StatusRule {
        status: Status::NoBrokerCreds,
        applies: |state| !state.cluster.has_internal_credentials(),
    },
];

/// Evaluate the unit's status; pure and cheap
pub fn evaluate_status(state: &ClusterState) -> Status {
    STATUS_CHAIN
        .iter()
        .find(|rule| (rule.applies)(state))
        .map(|rule| rule.status)
        .unwrap_or(Status::Active)
}
