use crate::common::{
    AppInfo, Ballot, Decree, ErrorCode, Gpid, LearnerStatus, Mutation, NodeAddress, PartitionConfiguration,
    ReplicaConfiguration, INVALID_DECREE,
};
use bytes::Bytes;
use tokio::time::error::Elapsed;

/// Failures of the transport itself. Protocol level failures travel inside the replies as
/// an `ErrorCode`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    #[error("Node {0} is unreachable")]
    Unreachable(NodeAddress),
    #[error("Replica {0} is not hosted by the target node")]
    ReplicaNotFound(Gpid),
    #[error("Timed out")]
    Timeout,
    #[error("Transport failure: {0}")]
    Transport(String),
    #[error("Replica actor has exited")]
    ActorExited,
}

impl From<Elapsed> for RpcError {
    fn from(_: Elapsed) -> Self {
        RpcError::Timeout
    }
}

impl RpcError {
    /// Errors worth retrying with the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcError::Unreachable(_) | RpcError::Timeout | RpcError::Transport(_)
        )
    }
}

// -- 2PC --

#[derive(Debug, Clone)]
pub struct PrepareRequest {
    pub config: ReplicaConfiguration,
    pub mutation: Mutation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrepareAck {
    pub pid: Gpid,
    pub err: ErrorCode,
    pub ballot: Ballot,
    pub decree: Decree,
    pub last_committed_decree_in_app: Decree,
    pub last_committed_decree_in_prepare_list: Decree,
}

// -- Group check --

#[derive(Debug, Clone)]
pub struct GroupCheckRequest {
    pub app: AppInfo,
    pub node: NodeAddress,
    pub config: ReplicaConfiguration,
    pub last_committed_decree: Decree,
    /// Set while the primary is splitting, so secondaries start their own child.
    pub child_gpid: Option<Gpid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupCheckResponse {
    pub pid: Gpid,
    pub err: ErrorCode,
    pub node: NodeAddress,
    pub last_committed_decree_in_app: Decree,
    pub last_committed_decree_in_prepare_list: Decree,
    pub learner_status: Option<LearnerStatus>,
    pub learner_signature: u64,
}

// -- Learn --

#[derive(Debug, Clone)]
pub struct LearnRequest {
    pub pid: Gpid,
    pub learner: NodeAddress,
    pub signature: u64,
    pub last_committed_decree_in_app: Decree,
    pub last_committed_decree_in_prepare_list: Decree,
    pub app_specific_learn_request: Bytes,
    pub max_gced_decree: Decree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnType {
    /// Mutations straight from the learnee's prepare list.
    Cache,
    /// Mutations read back from the learnee's private log.
    Log,
    /// Storage engine checkpoint files.
    App,
}

impl LearnType {
    pub fn as_i32(&self) -> i32 {
        match self {
            LearnType::Cache => 1,
            LearnType::Log => 2,
            LearnType::App => 3,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(LearnType::Cache),
            2 => Some(LearnType::Log),
            3 => Some(LearnType::App),
            _ => None,
        }
    }
}

/// A file a remote node offers for download, along with what it must look like once fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub size: u64,
    pub crc32: u32,
}

#[derive(Debug, Clone)]
pub struct LearnResponse {
    pub err: ErrorCode,
    pub config: ReplicaConfiguration,
    pub learnee: NodeAddress,
    pub last_committed_decree: Decree,
    /// First decree the learnee will send as a prepare. `INVALID_DECREE` when the learner has to
    /// learn again before it may receive prepares.
    pub prepare_start_decree: Decree,
    pub learn_type: LearnType,
    pub from_decree_excluded: Decree,
    pub to_decree_included: Decree,
    pub meta: Bytes,
    pub base_local_dir: String,
    pub files: Vec<RemoteFile>,
    pub mutations: Vec<Mutation>,
}

impl LearnResponse {
    pub fn error(err: ErrorCode, config: ReplicaConfiguration, learnee: NodeAddress) -> Self {
        LearnResponse {
            err,
            config,
            learnee,
            last_committed_decree: INVALID_DECREE,
            prepare_start_decree: INVALID_DECREE,
            learn_type: LearnType::Cache,
            from_decree_excluded: INVALID_DECREE,
            to_decree_included: INVALID_DECREE,
            meta: Bytes::new(),
            base_local_dir: String::new(),
            files: Vec::new(),
            mutations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LearnNotification {
    pub pid: Gpid,
    pub learner: NodeAddress,
    pub signature: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LearnNotificationResponse {
    pub err: ErrorCode,
}

// -- Checkpoint copy and file transfer --

#[derive(Debug, Clone)]
pub struct CopyCheckpointRequest {
    pub pid: Gpid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CopyCheckpointResponse {
    pub err: ErrorCode,
    pub checkpoint_decree: Decree,
    pub base_local_dir: String,
    pub files: Vec<RemoteFile>,
}

impl CopyCheckpointResponse {
    pub fn error(err: ErrorCode) -> Self {
        CopyCheckpointResponse {
            err,
            checkpoint_decree: INVALID_DECREE,
            base_local_dir: String::new(),
            files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchFileRequest {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchFileResponse {
    pub err: ErrorCode,
    pub data: Bytes,
}

// -- Configuration --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigType {
    AssignPrimary,
    AddSecondary,
    UpgradeToSecondary,
    DowngradeToInactive,
    Remove,
}

impl ConfigType {
    pub fn as_i32(&self) -> i32 {
        match self {
            ConfigType::AssignPrimary => 1,
            ConfigType::AddSecondary => 2,
            ConfigType::UpgradeToSecondary => 3,
            ConfigType::DowngradeToInactive => 4,
            ConfigType::Remove => 5,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(ConfigType::AssignPrimary),
            2 => Some(ConfigType::AddSecondary),
            3 => Some(ConfigType::UpgradeToSecondary),
            4 => Some(ConfigType::DowngradeToInactive),
            5 => Some(ConfigType::Remove),
            _ => None,
        }
    }
}

/// Meta server asks a replica to change its group, e.g. a primary to add a secondary.
#[derive(Debug, Clone)]
pub struct ConfigProposal {
    pub app: AppInfo,
    pub config: PartitionConfiguration,
    pub config_type: ConfigType,
    pub node: NodeAddress,
}

/// Replica asks the meta server to apply a change to its group.
#[derive(Debug, Clone)]
pub struct ConfigUpdateRequest {
    pub app: AppInfo,
    pub config: PartitionConfiguration,
    pub config_type: ConfigType,
    pub node: NodeAddress,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigUpdateResponse {
    pub err: ErrorCode,
    pub config: PartitionConfiguration,
}

/// Meta server pushes the latest configuration of a partition to a member.
#[derive(Debug, Clone)]
pub struct ConfigurationUpdate {
    pub app: AppInfo,
    pub config: PartitionConfiguration,
}

// -- Split --

#[derive(Debug, Clone)]
pub struct AddChildRequest {
    pub app: AppInfo,
    pub parent_config: PartitionConfiguration,
    pub child_gpid: Gpid,
}

#[derive(Debug, Clone)]
pub struct RegisterChildRequest {
    pub app: AppInfo,
    pub parent_config: PartitionConfiguration,
    pub child_config: PartitionConfiguration,
    pub primary: NodeAddress,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterChildResponse {
    pub err: ErrorCode,
    pub app: AppInfo,
    pub parent_config: PartitionConfiguration,
    pub child_config: PartitionConfiguration,
}
