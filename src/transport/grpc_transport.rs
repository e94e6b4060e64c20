use crate::common::NodeAddress;
use crate::grpc::grpc_replica_client::GrpcReplicaClient;
use crate::grpc::{
    ProtoAddChildRequest, ProtoConfigProposal, ProtoConfigurationUpdate, ProtoCopyCheckpointRequest,
    ProtoFetchFileRequest, ProtoGroupCheckRequest, ProtoLearnNotification, ProtoLearnRequest, ProtoPrepareRequest,
};
use crate::transport::grpc_convert::status_to_rpc_error;
use crate::transport::{
    AddChildRequest, ConfigProposal, ConfigurationUpdate, CopyCheckpointRequest, CopyCheckpointResponse,
    FetchFileRequest, FetchFileResponse, GroupCheckRequest, GroupCheckResponse, LearnNotification,
    LearnNotificationResponse, LearnRequest, LearnResponse, PrepareAck, PrepareRequest, ReplicaTransport, RpcError,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::future::Future;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Response, Status};

/// GrpcTransport sends peer RPCs over gRPC. Node addresses are `host:port`. Connections are made
/// on first use and dropped once the peer stops answering.
pub struct GrpcTransport {
    logger: slog::Logger,
    rpc_timeout: Duration,
    clients: Mutex<HashMap<NodeAddress, GrpcReplicaClient<Channel>>>,
}

impl GrpcTransport {
    pub fn new(logger: slog::Logger, rpc_timeout: Duration) -> Self {
        GrpcTransport {
            logger,
            rpc_timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client(&self, target: &NodeAddress) -> Result<GrpcReplicaClient<Channel>, RpcError> {
        if let Some(client) = self.clients.lock().get(target) {
            return Ok(client.clone());
        }

        let url = format!("http://{}", target);
        slog::debug!(self.logger, "Connecting to {} ...", url);
        let endpoint = Endpoint::from_shared(url)
            .map_err(|e| RpcError::Transport(format!("Invalid address {}: {}", target, e)))?
            .timeout(self.rpc_timeout);
        let connection = tokio::time::timeout(self.rpc_timeout, endpoint.connect())
            .await?
            .map_err(|e| {
                slog::debug!(self.logger, "Failed to connect to {}: {}", target, e);
                RpcError::Unreachable(target.clone())
            })?;

        let client = GrpcReplicaClient::new(connection);
        self.clients.lock().insert(target.clone(), client.clone());
        Ok(client)
    }

    async fn call<T, F, Fut>(&self, target: &NodeAddress, rpc: F) -> Result<T, RpcError>
    where
        F: FnOnce(GrpcReplicaClient<Channel>) -> Fut,
        Fut: Future<Output = Result<Response<T>, Status>>,
    {
        let client = self.client(target).await?;
        let result = tokio::time::timeout(self.rpc_timeout, rpc(client)).await?;
        match result {
            Ok(response) => Ok(response.into_inner()),
            Err(status) => {
                if status.code() == Code::Unavailable {
                    self.clients.lock().remove(target);
                }
                slog::debug!(self.logger, "ClientWire - {} replied {:?}", target, status);
                Err(status_to_rpc_error(target, status))
            }
        }
    }
}

#[async_trait::async_trait]
impl ReplicaTransport for GrpcTransport {
    async fn prepare(&self, target: &NodeAddress, request: PrepareRequest) -> Result<PrepareAck, RpcError> {
        let rpc_request = ProtoPrepareRequest::from(request);
        let rpc_reply = self
            .call(target, |mut client| async move { client.prepare(rpc_request).await })
            .await?;
        PrepareAck::try_from(rpc_reply).map_err(|status| status_to_rpc_error(target, status))
    }

    async fn group_check(
        &self,
        target: &NodeAddress,
        request: GroupCheckRequest,
    ) -> Result<GroupCheckResponse, RpcError> {
        let rpc_request = ProtoGroupCheckRequest::from(request);
        let rpc_reply = self
            .call(target, |mut client| async move { client.group_check(rpc_request).await })
            .await?;
        GroupCheckResponse::try_from(rpc_reply).map_err(|status| status_to_rpc_error(target, status))
    }

    async fn learn(&self, target: &NodeAddress, request: LearnRequest) -> Result<LearnResponse, RpcError> {
        let rpc_request = ProtoLearnRequest::from(request);
        let rpc_reply = self
            .call(target, |mut client| async move { client.learn(rpc_request).await })
            .await?;
        LearnResponse::try_from(rpc_reply).map_err(|status| status_to_rpc_error(target, status))
    }

    async fn learn_completion_notification(
        &self,
        target: &NodeAddress,
        request: LearnNotification,
    ) -> Result<LearnNotificationResponse, RpcError> {
        let rpc_request = ProtoLearnNotification::from(request);
        let rpc_reply = self
            .call(target, |mut client| async move {
                client.learn_completion_notification(rpc_request).await
            })
            .await?;
        Ok(LearnNotificationResponse::from(rpc_reply))
    }

    async fn copy_checkpoint(
        &self,
        target: &NodeAddress,
        request: CopyCheckpointRequest,
    ) -> Result<CopyCheckpointResponse, RpcError> {
        let rpc_request = ProtoCopyCheckpointRequest::from(request);
        let rpc_reply = self
            .call(target, |mut client| async move { client.copy_checkpoint(rpc_request).await })
            .await?;
        Ok(CopyCheckpointResponse::from(rpc_reply))
    }

    async fn fetch_file(&self, target: &NodeAddress, request: FetchFileRequest) -> Result<FetchFileResponse, RpcError> {
        let rpc_request = ProtoFetchFileRequest::from(request);
        let rpc_reply = self
            .call(target, |mut client| async move { client.fetch_file(rpc_request).await })
            .await?;
        Ok(FetchFileResponse::from(rpc_reply))
    }

    async fn config_proposal(&self, target: &NodeAddress, request: ConfigProposal) -> Result<(), RpcError> {
        let rpc_request = ProtoConfigProposal::from(request);
        self.call(target, |mut client| async move { client.config_proposal(rpc_request).await })
            .await?;
        Ok(())
    }

    async fn update_configuration(&self, target: &NodeAddress, request: ConfigurationUpdate) -> Result<(), RpcError> {
        let rpc_request = ProtoConfigurationUpdate::from(request);
        self.call(target, |mut client| async move {
            client.update_configuration(rpc_request).await
        })
        .await?;
        Ok(())
    }

    async fn add_child(&self, target: &NodeAddress, request: AddChildRequest) -> Result<(), RpcError> {
        let rpc_request = ProtoAddChildRequest::from(request);
        self.call(target, |mut client| async move { client.add_child(rpc_request).await })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Gpid;

    #[tokio::test]
    async fn unreachable_peers_are_reported() {
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let transport = GrpcTransport::new(logger, Duration::from_millis(500));
        // Nothing listens on port 1.
        let target = NodeAddress::new("127.0.0.1:1");

        let result = transport
            .copy_checkpoint(&target, CopyCheckpointRequest { pid: Gpid::new(1, 0) })
            .await;
        assert!(matches!(result, Err(RpcError::Unreachable(_)) | Err(RpcError::Timeout)));
        assert!(transport.clients.lock().is_empty());
    }

    #[tokio::test]
    async fn malformed_addresses_are_rejected() {
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let transport = GrpcTransport::new(logger, Duration::from_millis(500));

        let result = transport
            .fetch_file(&NodeAddress::new("not a host"), FetchFileRequest { path: "x".into() })
            .await;
        assert!(matches!(result, Err(RpcError::Transport(_))));
    }
}
