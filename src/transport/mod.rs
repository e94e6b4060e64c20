mod api;
mod grpc_convert;
mod grpc_transport;
mod in_process;
mod local_meta;
mod messages;

pub use api::MetaServerClient;
pub use api::ReplicaService;
pub use api::ReplicaTransport;
pub use grpc_transport::GrpcTransport;
pub use in_process::InProcessNetwork;
pub use local_meta::LocalMetaServer;
pub use messages::AddChildRequest;
pub use messages::ConfigProposal;
pub use messages::ConfigType;
pub use messages::ConfigUpdateRequest;
pub use messages::ConfigUpdateResponse;
pub use messages::ConfigurationUpdate;
pub use messages::CopyCheckpointRequest;
pub use messages::CopyCheckpointResponse;
pub use messages::FetchFileRequest;
pub use messages::FetchFileResponse;
pub use messages::GroupCheckRequest;
pub use messages::GroupCheckResponse;
pub use messages::LearnNotification;
pub use messages::LearnNotificationResponse;
pub use messages::LearnRequest;
pub use messages::LearnResponse;
pub use messages::LearnType;
pub use messages::PrepareAck;
pub use messages::PrepareRequest;
pub use messages::RegisterChildRequest;
pub use messages::RegisterChildResponse;
pub use messages::RemoteFile;
pub use messages::RpcError;

// So the gRPC server shares the wire conversions with the client.
pub(crate) use grpc_convert::status_to_rpc_error;
pub(crate) use grpc_convert::rpc_error_to_status;
