use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Position of a mutation in a partition's total order.
pub type Decree = i64;

/// Primary election term. Pairs with decree to detect stale primaries.
pub type Ballot = i64;

pub const INVALID_DECREE: Decree = -1;
pub const INVALID_BALLOT: Ballot = -1;
pub const INVALID_OFFSET: i64 = -1;

/// Gpid is the global partition identifier `(app_id, partition_index)`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Gpid {
    pub app_id: i32,
    pub partition_index: i32,
}

impl Gpid {
    pub fn new(app_id: i32, partition_index: i32) -> Self {
        Gpid {
            app_id,
            partition_index,
        }
    }
}

impl fmt::Debug for Gpid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_id, self.partition_index)
    }
}

impl fmt::Display for Gpid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_id, self.partition_index)
    }
}

/// NodeAddress identifies a replica server. For the gRPC transport it is a `host:port` pair,
/// for the in-process transport any unique string will do.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress(String);

impl NodeAddress {
    pub fn new<S: Into<String>>(address: S) -> Self {
        NodeAddress(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionStatus {
    Inactive,
    Error,
    Primary,
    Secondary,
    PotentialSecondary,
    PartitionSplit,
}

impl PartitionStatus {
    pub fn as_i32(&self) -> i32 {
        match self {
            PartitionStatus::Inactive => 1,
            PartitionStatus::Error => 2,
            PartitionStatus::Primary => 3,
            PartitionStatus::Secondary => 4,
            PartitionStatus::PotentialSecondary => 5,
            PartitionStatus::PartitionSplit => 6,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(PartitionStatus::Inactive),
            2 => Some(PartitionStatus::Error),
            3 => Some(PartitionStatus::Primary),
            4 => Some(PartitionStatus::Secondary),
            5 => Some(PartitionStatus::PotentialSecondary),
            6 => Some(PartitionStatus::PartitionSplit),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LearnerStatus {
    LearningWithoutPrepare,
    LearningWithPrepareTransient,
    LearningWithPrepare,
    LearningSucceeded,
    LearningFailed,
}

impl LearnerStatus {
    pub fn as_i32(&self) -> i32 {
        match self {
            LearnerStatus::LearningWithoutPrepare => 1,
            LearnerStatus::LearningWithPrepareTransient => 2,
            LearnerStatus::LearningWithPrepare => 3,
            LearnerStatus::LearningSucceeded => 4,
            LearnerStatus::LearningFailed => 5,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(LearnerStatus::LearningWithoutPrepare),
            2 => Some(LearnerStatus::LearningWithPrepareTransient),
            3 => Some(LearnerStatus::LearningWithPrepare),
            4 => Some(LearnerStatus::LearningSucceeded),
            5 => Some(LearnerStatus::LearningFailed),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SplitStatus {
    NotSplit,
    Splitting,
}

/// PartitionConfiguration is owned by the meta server. Replicas cache the latest one they have
/// seen and only ever move to a configuration with a higher ballot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartitionConfiguration {
    pub pid: Gpid,
    pub ballot: Ballot,
    pub max_replica_count: u32,
    pub primary: Option<NodeAddress>,
    pub secondaries: Vec<NodeAddress>,
    pub last_committed_decree: Decree,
    pub last_drops: Vec<NodeAddress>,
}

impl PartitionConfiguration {
    pub fn new(pid: Gpid, max_replica_count: u32) -> Self {
        PartitionConfiguration {
            pid,
            ballot: 0,
            max_replica_count,
            primary: None,
            secondaries: Vec::new(),
            last_committed_decree: 0,
            last_drops: Vec::new(),
        }
    }

    /// Status the given node should have under this configuration.
    pub fn status_of(&self, node: &NodeAddress) -> PartitionStatus {
        if self.primary.as_ref() == Some(node) {
            PartitionStatus::Primary
        } else if self.secondaries.contains(node) {
            PartitionStatus::Secondary
        } else {
            PartitionStatus::Inactive
        }
    }

    pub fn is_member(&self, node: &NodeAddress) -> bool {
        self.primary.as_ref() == Some(node) || self.secondaries.contains(node)
    }

    pub fn is_valid(&self) -> bool {
        let member_count = self.secondaries.len() + if self.primary.is_some() { 1 } else { 0 };
        member_count <= self.max_replica_count as usize
    }
}

/// ReplicaConfiguration is the per-member view of a partition configuration that the primary
/// sends along with prepare, group check and learn traffic.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicaConfiguration {
    pub pid: Gpid,
    pub ballot: Ballot,
    pub primary: Option<NodeAddress>,
    pub status: PartitionStatus,
    pub learner_signature: u64,
}

/// AppInfo is the table level metadata every replica keeps next to its data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppInfo {
    pub app_id: i32,
    pub app_name: String,
    pub app_type: String,
    pub partition_count: i32,
    pub max_replica_count: u32,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
}

impl AppInfo {
    pub fn new(app_id: i32, app_name: &str, app_type: &str, partition_count: i32, max_replica_count: u32) -> Self {
        AppInfo {
            app_id,
            app_name: app_name.to_string(),
            app_type: app_type.to_string(),
            partition_count,
            max_replica_count,
            envs: BTreeMap::new(),
        }
    }
}
