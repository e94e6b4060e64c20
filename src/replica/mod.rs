mod checkpoint;
mod context;
mod group_check;
mod learn;
mod quorum;
mod replica;
mod replica_api;
mod replica_config;
mod restore;
mod split;
mod states;
mod two_phase_commit;
mod write_queue;

pub use quorum::AllSecondaries;
pub use quorum::Majority;
pub use quorum::QuorumPolicy;
pub use replica::WRITE_THROTTLING_ENV_KEY;
pub use replica_api::CheckpointError;
pub use replica_api::CheckpointFileInfo;
pub use replica_api::CheckpointMetadata;
pub use replica_api::ClientReadError;
pub use replica_api::ClientReadInput;
pub use replica_api::ClientReadOutput;
pub use replica_api::ClientWriteError;
pub use replica_api::ClientWriteInput;
pub use replica_api::ClientWriteOutput;
pub use replica_api::OpenReplicaError;
pub use replica_api::ReplicaFault;
pub use replica_api::ReplicaStateSnapshot;
pub use replica_api::RestoreError;
pub(crate) use context::ReplicaContext;
pub(crate) use replica::Replica;
pub(crate) use replica::ReplicaConfig;
pub(crate) use replica_api::ChildSyncMessage;
pub(crate) use replica_api::CopyCheckpointFetched;
pub(crate) use replica_api::GroupCheckReply;
pub(crate) use replica_api::LearnFilesFetched;
pub(crate) use replica_api::LearnReply;
pub(crate) use replica_api::LogAppended;
pub(crate) use replica_api::MetaConfigUpdateReply;
pub(crate) use replica_api::PrepareReply;
pub(crate) use replica_api::RegisterChildReply;
pub(crate) use replica_api::SplitNotice;
pub(crate) use restore::load_checkpoint_metadata;
pub(crate) use restore::verify_checkpoint_files;
