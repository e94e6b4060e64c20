use crate::grpc::grpc_replica_server::{GrpcReplica, GrpcReplicaServer};
use crate::grpc::{
    ProtoAddChildRequest, ProtoConfigProposal, ProtoConfigurationUpdate, ProtoCopyCheckpointRequest,
    ProtoCopyCheckpointResponse, ProtoEmpty, ProtoFetchFileRequest, ProtoFetchFileResponse, ProtoGroupCheckRequest,
    ProtoGroupCheckResponse, ProtoLearnNotification, ProtoLearnNotificationResponse, ProtoLearnRequest,
    ProtoLearnResponse, ProtoPrepareAck, ProtoPrepareRequest,
};
use crate::transport::{
    rpc_error_to_status, AddChildRequest, ConfigProposal, ConfigurationUpdate, CopyCheckpointRequest,
    FetchFileRequest, GroupCheckRequest, LearnNotification, LearnRequest, PrepareRequest, ReplicaService,
};
use std::convert::TryFrom;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// Keeps a spawned `RpcServer` serving.
pub(crate) struct RpcServerHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RpcServerHandle {
    /// Stops accepting peer RPCs and waits until the server has exited.
    pub(crate) async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.task.await;
    }
}

/// RpcServer is the type that implements the replica gRPC interface on top of a node's
/// `ReplicaService`.
pub struct RpcServer {
    logger: slog::Logger,
    service: Arc<dyn ReplicaService>,
}

impl RpcServer {
    pub fn new(logger: slog::Logger, service: Arc<dyn ReplicaService>) -> Self {
        RpcServer { logger, service }
    }

    /// Serves on a background task until the returned handle is stopped or dropped.
    pub(crate) fn spawn(self, socket_addr: SocketAddr) -> RpcServerHandle {
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(self.run(socket_addr, async move {
            // A dropped handle stops the server too.
            let _ = stopped.await;
        }));
        RpcServerHandle { stop, task }
    }

    async fn run<F>(self, socket_addr: SocketAddr, shutdown: F)
    where
        F: std::future::Future<Output = ()>,
    {
        let logger = self.logger.clone();
        slog::info!(logger, "Listening on '{:?}'", socket_addr);

        let result = Server::builder()
            .add_service(GrpcReplicaServer::new(self))
            .serve_with_shutdown(socket_addr, shutdown)
            .await;

        slog::info!(logger, "Server run() has exited: {:?}", result);
    }

    async fn handle_prepare(&self, rpc_request: ProtoPrepareRequest) -> Result<ProtoPrepareAck, Status> {
        let app_input = PrepareRequest::try_from(rpc_request)?;
        let app_result = self.service.on_prepare(app_input).await;
        app_result.map(ProtoPrepareAck::from).map_err(|e| rpc_error_to_status(&e))
    }

    async fn handle_group_check(&self, rpc_request: ProtoGroupCheckRequest) -> Result<ProtoGroupCheckResponse, Status> {
        let app_input = GroupCheckRequest::try_from(rpc_request)?;
        let app_result = self.service.on_group_check(app_input).await;
        app_result
            .map(ProtoGroupCheckResponse::from)
            .map_err(|e| rpc_error_to_status(&e))
    }

    async fn handle_learn(&self, rpc_request: ProtoLearnRequest) -> Result<ProtoLearnResponse, Status> {
        let app_input = LearnRequest::try_from(rpc_request)?;
        let app_result = self.service.on_learn(app_input).await;
        app_result.map(ProtoLearnResponse::from).map_err(|e| rpc_error_to_status(&e))
    }

    async fn handle_learn_completion_notification(
        &self,
        rpc_request: ProtoLearnNotification,
    ) -> Result<ProtoLearnNotificationResponse, Status> {
        let app_input = LearnNotification::try_from(rpc_request)?;
        let app_result = self.service.on_learn_completion_notification(app_input).await;
        app_result
            .map(ProtoLearnNotificationResponse::from)
            .map_err(|e| rpc_error_to_status(&e))
    }

    async fn handle_copy_checkpoint(
        &self,
        rpc_request: ProtoCopyCheckpointRequest,
    ) -> Result<ProtoCopyCheckpointResponse, Status> {
        let app_input = CopyCheckpointRequest::try_from(rpc_request)?;
        let app_result = self.service.on_copy_checkpoint(app_input).await;
        app_result
            .map(ProtoCopyCheckpointResponse::from)
            .map_err(|e| rpc_error_to_status(&e))
    }

    async fn handle_fetch_file(&self, rpc_request: ProtoFetchFileRequest) -> Result<ProtoFetchFileResponse, Status> {
        let app_input = FetchFileRequest::from(rpc_request);
        let app_result = self.service.on_fetch_file(app_input).await;
        app_result
            .map(ProtoFetchFileResponse::from)
            .map_err(|e| rpc_error_to_status(&e))
    }

    async fn handle_config_proposal(&self, rpc_request: ProtoConfigProposal) -> Result<ProtoEmpty, Status> {
        let app_input = ConfigProposal::try_from(rpc_request)?;
        let app_result = self.service.on_config_proposal(app_input).await;
        app_result.map(|_| ProtoEmpty {}).map_err(|e| rpc_error_to_status(&e))
    }

    async fn handle_update_configuration(&self, rpc_request: ProtoConfigurationUpdate) -> Result<ProtoEmpty, Status> {
        let app_input = ConfigurationUpdate::try_from(rpc_request)?;
        let app_result = self.service.on_update_configuration(app_input).await;
        app_result.map(|_| ProtoEmpty {}).map_err(|e| rpc_error_to_status(&e))
    }

    async fn handle_add_child(&self, rpc_request: ProtoAddChildRequest) -> Result<ProtoEmpty, Status> {
        let app_input = AddChildRequest::try_from(rpc_request)?;
        let app_result = self.service.on_add_child(app_input).await;
        app_result.map(|_| ProtoEmpty {}).map_err(|e| rpc_error_to_status(&e))
    }
}

// Prepare bodies can be large, so only their outcome is logged.
#[async_trait::async_trait]
impl GrpcReplica for RpcServer {
    async fn prepare(
        &self,
        rpc_request_wrapped: Request<ProtoPrepareRequest>,
    ) -> Result<Response<ProtoPrepareAck>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        let rpc_result = self.handle_prepare(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn group_check(
        &self,
        rpc_request_wrapped: Request<ProtoGroupCheckRequest>,
    ) -> Result<Response<ProtoGroupCheckResponse>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_group_check(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn learn(&self, rpc_request_wrapped: Request<ProtoLearnRequest>) -> Result<Response<ProtoLearnResponse>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_learn(rpc_request).await;
        slog::debug!(
            self.logger,
            "ServerWire - learn reply ok: {:?}",
            rpc_result.as_ref().map(|reply| reply.err)
        );

        rpc_result.map(Response::new)
    }

    async fn learn_completion_notification(
        &self,
        rpc_request_wrapped: Request<ProtoLearnNotification>,
    ) -> Result<Response<ProtoLearnNotificationResponse>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_learn_completion_notification(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn copy_checkpoint(
        &self,
        rpc_request_wrapped: Request<ProtoCopyCheckpointRequest>,
    ) -> Result<Response<ProtoCopyCheckpointResponse>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_copy_checkpoint(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn fetch_file(
        &self,
        rpc_request_wrapped: Request<ProtoFetchFileRequest>,
    ) -> Result<Response<ProtoFetchFileResponse>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_fetch_file(rpc_request).await;
        slog::debug!(
            self.logger,
            "ServerWire - fetch_file reply: {:?}",
            rpc_result.as_ref().map(|reply| (reply.err, reply.data.len()))
        );

        rpc_result.map(Response::new)
    }

    async fn config_proposal(
        &self,
        rpc_request_wrapped: Request<ProtoConfigProposal>,
    ) -> Result<Response<ProtoEmpty>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_config_proposal(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn update_configuration(
        &self,
        rpc_request_wrapped: Request<ProtoConfigurationUpdate>,
    ) -> Result<Response<ProtoEmpty>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_update_configuration(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn add_child(&self, rpc_request_wrapped: Request<ProtoAddChildRequest>) -> Result<Response<ProtoEmpty>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_add_child(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }
}
