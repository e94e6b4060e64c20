use crate::common::NodeAddress;
use crate::transport::{
    AddChildRequest, ConfigProposal, ConfigurationUpdate, CopyCheckpointRequest, CopyCheckpointResponse,
    FetchFileRequest, FetchFileResponse, GroupCheckRequest, GroupCheckResponse, LearnNotification,
    LearnNotificationResponse, LearnRequest, LearnResponse, PrepareAck, PrepareRequest, ReplicaService,
    ReplicaTransport, RpcError,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// InProcessNetwork routes peer RPCs between nodes living in the same process. Nodes register
/// themselves under their address; a node that deregistered (or was dropped) is unreachable.
#[derive(Default)]
pub struct InProcessNetwork {
    nodes: RwLock<HashMap<NodeAddress, Weak<dyn ReplicaService>>>,
}

impl InProcessNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(InProcessNetwork::default())
    }

    pub fn register(&self, address: NodeAddress, service: Weak<dyn ReplicaService>) {
        self.nodes.write().insert(address, service);
    }

    pub fn deregister(&self, address: &NodeAddress) {
        self.nodes.write().remove(address);
    }

    pub fn is_registered(&self, address: &NodeAddress) -> bool {
        self.nodes
            .read()
            .get(address)
            .map_or(false, |node| node.strong_count() > 0)
    }

    fn node(&self, target: &NodeAddress) -> Result<Arc<dyn ReplicaService>, RpcError> {
        self.nodes
            .read()
            .get(target)
            .and_then(Weak::upgrade)
            .ok_or_else(|| RpcError::Unreachable(target.clone()))
    }
}

#[async_trait::async_trait]
impl ReplicaTransport for InProcessNetwork {
    async fn prepare(&self, target: &NodeAddress, request: PrepareRequest) -> Result<PrepareAck, RpcError> {
        self.node(target)?.on_prepare(request).await
    }

    async fn group_check(
        &self,
        target: &NodeAddress,
        request: GroupCheckRequest,
    ) -> Result<GroupCheckResponse, RpcError> {
        self.node(target)?.on_group_check(request).await
    }

    async fn learn(&self, target: &NodeAddress, request: LearnRequest) -> Result<LearnResponse, RpcError> {
        self.node(target)?.on_learn(request).await
    }

    async fn learn_completion_notification(
        &self,
        target: &NodeAddress,
        request: LearnNotification,
    ) -> Result<LearnNotificationResponse, RpcError> {
        self.node(target)?.on_learn_completion_notification(request).await
    }

    async fn copy_checkpoint(
        &self,
        target: &NodeAddress,
        request: CopyCheckpointRequest,
    ) -> Result<CopyCheckpointResponse, RpcError> {
        self.node(target)?.on_copy_checkpoint(request).await
    }

    async fn fetch_file(&self, target: &NodeAddress, request: FetchFileRequest) -> Result<FetchFileResponse, RpcError> {
        self.node(target)?.on_fetch_file(request).await
    }

    async fn config_proposal(&self, target: &NodeAddress, request: ConfigProposal) -> Result<(), RpcError> {
        self.node(target)?.on_config_proposal(request).await
    }

    async fn update_configuration(&self, target: &NodeAddress, request: ConfigurationUpdate) -> Result<(), RpcError> {
        self.node(target)?.on_update_configuration(request).await
    }

    async fn add_child(&self, target: &NodeAddress, request: AddChildRequest) -> Result<(), RpcError> {
        self.node(target)?.on_add_child(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ErrorCode, Gpid};
    use bytes::Bytes;

    struct FileServer;

    #[async_trait::async_trait]
    impl ReplicaService for FileServer {
        async fn on_prepare(&self, _: PrepareRequest) -> Result<PrepareAck, RpcError> {
            Err(RpcError::ReplicaNotFound(Gpid::new(1, 0)))
        }
        async fn on_group_check(&self, _: GroupCheckRequest) -> Result<GroupCheckResponse, RpcError> {
            Err(RpcError::ReplicaNotFound(Gpid::new(1, 0)))
        }
        async fn on_learn(&self, _: LearnRequest) -> Result<LearnResponse, RpcError> {
            Err(RpcError::ReplicaNotFound(Gpid::new(1, 0)))
        }
        async fn on_learn_completion_notification(
            &self,
            _: LearnNotification,
        ) -> Result<LearnNotificationResponse, RpcError> {
            Err(RpcError::ReplicaNotFound(Gpid::new(1, 0)))
        }
        async fn on_copy_checkpoint(&self, _: CopyCheckpointRequest) -> Result<CopyCheckpointResponse, RpcError> {
            Err(RpcError::ReplicaNotFound(Gpid::new(1, 0)))
        }
        async fn on_fetch_file(&self, request: FetchFileRequest) -> Result<FetchFileResponse, RpcError> {
            Ok(FetchFileResponse {
                err: ErrorCode::Ok,
                data: Bytes::from(request.path),
            })
        }
        async fn on_config_proposal(&self, _: ConfigProposal) -> Result<(), RpcError> {
            Ok(())
        }
        async fn on_update_configuration(&self, _: ConfigurationUpdate) -> Result<(), RpcError> {
            Ok(())
        }
        async fn on_add_child(&self, _: AddChildRequest) -> Result<(), RpcError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn routes_to_registered_nodes_only() {
        let network = InProcessNetwork::new();
        let addr = NodeAddress::new("node-1");
        let server: Arc<dyn ReplicaService> = Arc::new(FileServer);
        network.register(addr.clone(), Arc::downgrade(&server));
        assert!(network.is_registered(&addr));

        let reply = network
            .fetch_file(&addr, FetchFileRequest { path: "a/b".into() })
            .await
            .unwrap();
        assert_eq!(reply.data, Bytes::from("a/b"));

        let missing = NodeAddress::new("node-2");
        assert_eq!(
            network.fetch_file(&missing, FetchFileRequest { path: "x".into() }).await,
            Err(RpcError::Unreachable(missing))
        );

        drop(server);
        assert!(!network.is_registered(&addr));
        assert!(matches!(
            network.config_proposal(&addr, sample_proposal()).await,
            Err(RpcError::Unreachable(_))
        ));
    }

    fn sample_proposal() -> ConfigProposal {
        use crate::common::{AppInfo, PartitionConfiguration};
        use crate::transport::ConfigType;

        ConfigProposal {
            app: AppInfo::new(1, "t", "simple_kv", 1, 3),
            config: PartitionConfiguration::new(Gpid::new(1, 0), 3),
            config_type: ConfigType::AddSecondary,
            node: NodeAddress::new("node-3"),
        }
    }
}
