mod actor;
mod api;
mod common;
mod mutation_log;
mod prepare_list;
mod replica;
mod replica_stub;
mod server;
mod storage;
mod throttling;
mod timers;
mod transport;
mod grpc {
    include!("../generated/replication.rs");
}

pub use api::try_create_node;
pub use api::NodeCreationError;
pub use api::NodeTransport;
pub use api::ReplicaNode;
pub use api::ReplicaNodeConfig;
pub use api::ReplicationOptions;
pub use common::AppInfo;
pub use common::Ballot;
pub use common::Decree;
pub use common::ErrorCode;
pub use common::Gpid;
pub use common::LearnerStatus;
pub use common::Mutation;
pub use common::MutationDecodeError;
pub use common::MutationHeader;
pub use common::NodeAddress;
pub use common::PartitionConfiguration;
pub use common::PartitionStatus;
pub use common::ReplicaConfiguration;
pub use common::SplitStatus;
pub use common::UpdateRecord;
pub use common::INVALID_BALLOT;
pub use common::INVALID_DECREE;
pub use mutation_log::LogAppendCallback;
pub use mutation_log::LogAppendResult;
pub use mutation_log::LogError;
pub use mutation_log::LogLearnState;
pub use mutation_log::LogWriter;
pub use mutation_log::MutationLog;
pub use prepare_list::CommitMode;
pub use prepare_list::PrepareList;
pub use prepare_list::PrepareListError;
pub use prepare_list::PreparedMutation;
pub use replica::AllSecondaries;
pub use replica::CheckpointError;
pub use replica::CheckpointFileInfo;
pub use replica::CheckpointMetadata;
pub use replica::ClientReadError;
pub use replica::ClientReadOutput;
pub use replica::ClientWriteError;
pub use replica::ClientWriteOutput;
pub use replica::Majority;
pub use replica::OpenReplicaError;
pub use replica::QuorumPolicy;
pub use replica::ReplicaFault;
pub use replica::ReplicaStateSnapshot;
pub use replica::RestoreError;
pub use replica::WRITE_THROTTLING_ENV_KEY;
pub use storage::append_update;
pub use storage::put_update;
pub use storage::remove_update;
pub use storage::AsyncCheckpointOutcome;
pub use storage::ChkptApplyMode;
pub use storage::InitInfoError;
pub use storage::LearnState;
pub use storage::ReplicaInitInfo;
pub use storage::SimpleKvFactory;
pub use storage::StorageEngine;
pub use storage::StorageEngineFactory;
pub use storage::StorageEngineRegistry;
pub use storage::StorageError;
pub use storage::INIT_INFO_FILE_NAME;
pub use storage::LEGACY_INIT_INFO_FILE_NAME;
pub use storage::SIMPLE_KV_APP_TYPE;
pub use storage::SIMPLE_KV_SYNC_APP_TYPE;
pub use storage::WRITE_EMPTY_CODE;
pub use throttling::EnvChange;
pub use throttling::ThrottlingController;
pub use throttling::ThrottlingDecision;
pub use throttling::ThrottlingParseError;
pub use transport::AddChildRequest;
pub use transport::ConfigProposal;
pub use transport::ConfigType;
pub use transport::ConfigUpdateRequest;
pub use transport::ConfigUpdateResponse;
pub use transport::ConfigurationUpdate;
pub use transport::CopyCheckpointRequest;
pub use transport::CopyCheckpointResponse;
pub use transport::FetchFileRequest;
pub use transport::FetchFileResponse;
pub use transport::GroupCheckRequest;
pub use transport::GroupCheckResponse;
pub use transport::GrpcTransport;
pub use transport::InProcessNetwork;
pub use transport::LearnNotification;
pub use transport::LearnNotificationResponse;
pub use transport::LearnRequest;
pub use transport::LearnResponse;
pub use transport::LearnType;
pub use transport::LocalMetaServer;
pub use transport::MetaServerClient;
pub use transport::PrepareAck;
pub use transport::PrepareRequest;
pub use transport::RegisterChildRequest;
pub use transport::RegisterChildResponse;
pub use transport::RemoteFile;
pub use transport::ReplicaService;
pub use transport::ReplicaTransport;
pub use transport::RpcError;

// Learning 1: `create::{root_mod}` should not have any code. Just `mod` and `pub use` statements.
// Learning 2: All `mod` statements, anywhere, should not be `pub`. Only export `pub` via individual
//             use statements.
//
// This keeps the `crate::{root_mod}` root_mod only responsible for exporting types to the rest of
// crate, and allows me to organize my root_mod impl however I want.
