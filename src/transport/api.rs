use crate::common::NodeAddress;
use crate::transport::{
    AddChildRequest, ConfigProposal, ConfigUpdateRequest, ConfigUpdateResponse, ConfigurationUpdate,
    CopyCheckpointRequest, CopyCheckpointResponse, FetchFileRequest, FetchFileResponse, GroupCheckRequest,
    GroupCheckResponse, LearnNotification, LearnNotificationResponse, LearnRequest, LearnResponse, PrepareAck,
    PrepareRequest, RegisterChildRequest, RegisterChildResponse, RpcError,
};

/// ReplicaService is what a node serves to its peers and to the meta server. The replica stub
/// implements it; transports deliver requests to it.
#[async_trait::async_trait]
pub trait ReplicaService: Send + Sync {
    async fn on_prepare(&self, request: PrepareRequest) -> Result<PrepareAck, RpcError>;
    async fn on_group_check(&self, request: GroupCheckRequest) -> Result<GroupCheckResponse, RpcError>;
    async fn on_learn(&self, request: LearnRequest) -> Result<LearnResponse, RpcError>;
    async fn on_learn_completion_notification(
        &self,
        request: LearnNotification,
    ) -> Result<LearnNotificationResponse, RpcError>;
    async fn on_copy_checkpoint(&self, request: CopyCheckpointRequest) -> Result<CopyCheckpointResponse, RpcError>;
    async fn on_fetch_file(&self, request: FetchFileRequest) -> Result<FetchFileResponse, RpcError>;
    async fn on_config_proposal(&self, request: ConfigProposal) -> Result<(), RpcError>;
    async fn on_update_configuration(&self, request: ConfigurationUpdate) -> Result<(), RpcError>;
    async fn on_add_child(&self, request: AddChildRequest) -> Result<(), RpcError>;
}

/// ReplicaTransport is the client side of `ReplicaService`, addressed by node.
#[async_trait::async_trait]
pub trait ReplicaTransport: Send + Sync {
    async fn prepare(&self, target: &NodeAddress, request: PrepareRequest) -> Result<PrepareAck, RpcError>;
    async fn group_check(
        &self,
        target: &NodeAddress,
        request: GroupCheckRequest,
    ) -> Result<GroupCheckResponse, RpcError>;
    async fn learn(&self, target: &NodeAddress, request: LearnRequest) -> Result<LearnResponse, RpcError>;
    async fn learn_completion_notification(
        &self,
        target: &NodeAddress,
        request: LearnNotification,
    ) -> Result<LearnNotificationResponse, RpcError>;
    async fn copy_checkpoint(
        &self,
        target: &NodeAddress,
        request: CopyCheckpointRequest,
    ) -> Result<CopyCheckpointResponse, RpcError>;
    async fn fetch_file(&self, target: &NodeAddress, request: FetchFileRequest) -> Result<FetchFileResponse, RpcError>;
    async fn config_proposal(&self, target: &NodeAddress, request: ConfigProposal) -> Result<(), RpcError>;
    async fn update_configuration(&self, target: &NodeAddress, request: ConfigurationUpdate) -> Result<(), RpcError>;
    async fn add_child(&self, target: &NodeAddress, request: AddChildRequest) -> Result<(), RpcError>;
}

/// MetaServerClient is the replica side of the meta server contract.
#[async_trait::async_trait]
pub trait MetaServerClient: Send + Sync {
    async fn update_partition_configuration(
        &self,
        request: ConfigUpdateRequest,
    ) -> Result<ConfigUpdateResponse, RpcError>;
    async fn register_child(&self, request: RegisterChildRequest) -> Result<RegisterChildResponse, RpcError>;
}
