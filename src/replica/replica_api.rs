use crate::common::{
    Ballot, Decree, ErrorCode, Gpid, LearnerStatus, Mutation, NodeAddress, PartitionStatus,
    SplitStatus, UpdateRecord,
};
use crate::mutation_log::LogError;
use crate::storage::{AppError, InitInfoError, StorageError};
use crate::transport::{
    ConfigType, ConfigUpdateResponse, GroupCheckResponse, LearnResponse, PrepareAck, RegisterChildResponse, RpcError,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

// -- Client surface --

#[derive(Debug, Clone)]
pub struct ClientWriteInput {
    pub updates: Vec<UpdateRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientWriteOutput {
    pub ballot: Ballot,
    pub decree: Decree,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientWriteError {
    #[error("Replica is {0:?} and cannot take writes")]
    InvalidState(PartitionStatus),
    // Retry later with backoff.
    #[error("Replica is throttling writes")]
    Busy,
    #[error("Replica is syncing a split child and blocks writes")]
    Splitting,
    #[error("Replica {0} is not hosted here")]
    ReplicaNotFound(Gpid),
    #[error("Replica actor has exited")]
    ActorExited,
}

impl ClientWriteError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ClientWriteError::InvalidState(_) => ErrorCode::InvalidState,
            ClientWriteError::Busy => ErrorCode::Busy,
            ClientWriteError::Splitting => ErrorCode::Splitting,
            ClientWriteError::ReplicaNotFound(_) => ErrorCode::ObjectNotFound,
            ClientWriteError::ActorExited => ErrorCode::InvalidState,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientReadInput {
    pub key: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientReadOutput {
    pub value: Option<Bytes>,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientReadError {
    #[error("Replica is {0:?} and cannot serve reads")]
    InvalidState(PartitionStatus),
    // Retry later with backoff.
    #[error("Replica is throttling reads")]
    Busy,
    #[error("Storage engine failure: {0}")]
    Storage(#[from] StorageError),
    #[error("Replica {0} is not hosted here")]
    ReplicaNotFound(Gpid),
    #[error("Replica actor has exited")]
    ActorExited,
}

// -- Faults --

/// ReplicaFault is an invariant violation or unrecoverable local failure. The replica that hits
/// one moves to `ERROR` and keeps the fault for inspection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReplicaFault {
    #[error("Failed to log mutation {decree}: {reason}")]
    LogWriteFailed { decree: Decree, reason: String },
    #[error("Storage engine failed to apply mutation {decree}: {reason}")]
    ApplyFailed { decree: Decree, reason: String },
    #[error("Prepare list invariant broken: {0}")]
    PrepareList(String),
    #[error("Learned state could not be applied: {0}")]
    LearnFailed(String),
    #[error("Partition split failed: {0}")]
    SplitFailed(String),
    #[error("Checkpoint failure on the write path: {0}")]
    CheckpointFailed(String),
}

// -- Admin surface --

/// Point-in-time view of one replica, for operators and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaStateSnapshot {
    pub pid: Gpid,
    pub status: PartitionStatus,
    pub ballot: Ballot,
    pub primary: Option<NodeAddress>,
    pub secondaries: Vec<NodeAddress>,
    pub learners: Vec<NodeAddress>,
    pub last_committed_decree: Decree,
    pub last_prepared_decree: Decree,
    pub max_prepared_decree: Decree,
    pub app_last_committed_decree: Decree,
    pub last_durable_decree: Decree,
    pub learner_status: Option<LearnerStatus>,
    pub split_status: SplitStatus,
    pub partition_count: i32,
    pub write_throttling_enabled: bool,
    pub read_throttling_enabled: bool,
    pub fault: Option<ReplicaFault>,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Replica is {0:?}")]
    InvalidState(PartitionStatus),
    #[error("Storage engine failure: {0}")]
    Storage(#[from] StorageError),
    #[error("Checkpoint IO failure: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid checkpoint metadata: {0}")]
    InvalidMetadata(String),
    #[error("Checkpoint file {file} is damaged: {reason}")]
    Corruption { file: String, reason: String },
    #[error("Replica {0} is not hosted here")]
    ReplicaNotFound(Gpid),
    #[error("Replica actor has exited")]
    ActorExited,
}

/// One file of a backed up checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointFileInfo {
    pub name: String,
    pub size: u64,
    pub crc32: u32,
}

/// Content of the `backup_metadata` file written next to a backed up checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub checkpoint_decree: Decree,
    pub files: Vec<CheckpointFileInfo>,
}

// -- Replies to calls a replica made, routed back through its actor --

#[derive(Debug)]
pub(crate) struct PrepareReply {
    pub(crate) node: NodeAddress,
    pub(crate) ballot: Ballot,
    pub(crate) decree: Decree,
    pub(crate) result: Result<PrepareAck, RpcError>,
}

/// Outcome of handing one mutation to every enabled log.
#[derive(Debug)]
pub(crate) struct LogAppended {
    pub(crate) decree: Decree,
    pub(crate) ballot: Ballot,
    pub(crate) result: Result<(), String>,
}

#[derive(Debug)]
pub(crate) struct GroupCheckReply {
    pub(crate) node: NodeAddress,
    pub(crate) ballot: Ballot,
    pub(crate) result: Result<GroupCheckResponse, RpcError>,
}

#[derive(Debug)]
pub(crate) struct LearnReply {
    pub(crate) signature: u64,
    pub(crate) result: Result<LearnResponse, RpcError>,
}

#[derive(Debug)]
pub(crate) struct LearnFilesFetched {
    pub(crate) signature: u64,
    pub(crate) response: LearnResponse,
    pub(crate) result: Result<Vec<PathBuf>, ErrorCode>,
}

#[derive(Debug)]
pub(crate) struct CopyCheckpointFetched {
    pub(crate) result: Result<(Decree, Vec<PathBuf>), ErrorCode>,
}

#[derive(Debug)]
pub(crate) struct MetaConfigUpdateReply {
    pub(crate) config_type: ConfigType,
    pub(crate) node: NodeAddress,
    pub(crate) result: Result<ConfigUpdateResponse, RpcError>,
}

#[derive(Debug)]
pub(crate) struct RegisterChildReply {
    pub(crate) child: Gpid,
    pub(crate) result: Result<RegisterChildResponse, RpcError>,
}

// -- Split traffic between colocated parent and child --

/// Everything a child needs to reach its parent's committed state.
#[derive(Debug)]
pub(crate) struct ParentStateBundle {
    pub(crate) parent: Gpid,
    pub(crate) checkpoint_decree: Decree,
    pub(crate) checkpoint_files: Vec<PathBuf>,
    pub(crate) log_mutations: Vec<Mutation>,
    pub(crate) cache_mutations: Vec<Arc<Mutation>>,
}

#[derive(Debug)]
pub(crate) enum SplitNotice {
    ChildCaughtUp { child: Gpid, decree: Decree },
    ChildSyncDone { child: Gpid, decree: Decree },
    ChildFailed { child: Gpid, reason: String },
}

#[derive(Debug)]
pub(crate) enum ChildSyncMessage {
    ParentState(ParentStateBundle),
    Mutation(Arc<Mutation>),
    SyncPoint(Decree),
}

// -- Replica lifecycle --

#[derive(Debug, thiserror::Error)]
pub enum OpenReplicaError {
    #[error("Replica {0} already exists on this node")]
    AlreadyExists(Gpid),
    #[error("Replica {0} has no data on this node")]
    NotFound(Gpid),
    #[error("Replica directory {0:?} is not named <app_id>.<partition_index>.<app_type>")]
    BadDirectoryName(PathBuf),
    #[error("Replica app failure: {0}")]
    App(#[from] AppError),
    #[error("Storage engine failure: {0}")]
    Storage(#[from] StorageError),
    #[error("Private log failure: {0}")]
    Log(#[from] LogError),
    #[error("Replica metadata failure: {0}")]
    InitInfo(#[from] InitInfoError),
    #[error("Replica IO failure: {0}")]
    Io(#[from] io::Error),
    #[error("Replica state is inconsistent: {0}")]
    Inconsistent(String),
    #[error("Node is shutting down")]
    NodeStopped,
}

#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("Backup of {gpid} is damaged: {reason}")]
    Corruption { gpid: Gpid, reason: String },
    /// The backup was damaged and the replica was opened empty instead.
    #[error("Backup of {0} is damaged; replica opened empty")]
    IgnoreBadData(Gpid),
    #[error("Backup checkpoint failure: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("Failed to open restored replica: {0}")]
    Open(#[from] OpenReplicaError),
}

impl RestoreError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            RestoreError::Corruption { .. } => ErrorCode::Corruption,
            RestoreError::IgnoreBadData(_) => ErrorCode::IgnoreBadData,
            RestoreError::Checkpoint(_) | RestoreError::Open(_) => ErrorCode::LocalAppFailure,
        }
    }
}
