use crate::common::{Decree, Mutation};
use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};

/// Update code of a mutation that carries no client data. New primaries use it to push the
/// committed watermark forward; engines ignore it.
pub const WRITE_EMPTY_CODE: u32 = 0;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage IO failure: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid storage data: {0}")]
    InvalidData(String),
    #[error("Storage engine is not open")]
    NotOpen,
    #[error("Storage engine does not support {0}")]
    NotSupported(&'static str),
    #[error("No storage engine registered for app type {0:?}")]
    UnknownEngine(String),
    #[error("Storage engine failure: {0}")]
    AppFailure(String),
}

/// How `storage_apply_checkpoint` treats the incoming checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChkptApplyMode {
    /// Adopt a checkpoint copied from a peer as our own durable point. In-memory state is
    /// already ahead of it.
    Copy,
    /// Replace local state with the learned checkpoint.
    Learn,
}

/// Result of an asynchronous checkpoint request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncCheckpointOutcome {
    Done,
    /// Memory was flushed but the checkpoint is not ready yet; ask again later.
    TryAgain,
    WrongTiming,
    NoNeedOperate,
}

/// LearnState describes a storage-engine checkpoint: the decree range it covers, an opaque meta
/// blob, and the files that make it up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LearnState {
    pub from_decree_excluded: Decree,
    pub to_decree_included: Decree,
    pub meta: Bytes,
    pub files: Vec<PathBuf>,
}

/// StorageEngine is the contract every storage plugin implements. Engines lock internally so a
/// replica can call into them from its actor as well as from background checkpoint tasks.
pub trait StorageEngine: Send + Sync {
    fn open(&self) -> Result<(), StorageError>;

    fn close(&self, clear_state: bool) -> Result<(), StorageError>;

    /// Applies one committed mutation. Called strictly in decree order.
    fn apply_mutation(&self, mutation: &Mutation) -> Result<(), StorageError>;

    fn last_committed_decree(&self) -> Decree;

    fn last_durable_decree(&self) -> Decree;

    /// Makes everything applied so far durable before returning.
    fn sync_checkpoint(&self) -> Result<(), StorageError>;

    fn async_checkpoint(&self, is_emergency: bool) -> Result<AsyncCheckpointOutcome, StorageError>;

    fn supports_async_checkpoint(&self) -> bool;

    /// Engine specific blob a learner attaches to its learn request.
    fn prepare_get_checkpoint(&self) -> Result<Bytes, StorageError>;

    fn get_checkpoint(&self, learn_start: Decree, request: &[u8]) -> Result<LearnState, StorageError>;

    fn storage_apply_checkpoint(&self, mode: ChkptApplyMode, state: &LearnState) -> Result<(), StorageError>;

    /// Writes a checkpoint of the current state into `dir` and returns the decree it covers.
    fn copy_checkpoint_to_dir(&self, dir: &Path) -> Result<Decree, StorageError>;

    /// Application read. `None` when the key is absent.
    fn query(&self, key: &[u8]) -> Result<Option<Bytes>, StorageError>;
}
