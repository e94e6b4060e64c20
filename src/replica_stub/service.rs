use crate::actor::ActorClient;
use crate::common::{ErrorCode, Gpid, PartitionStatus};
use crate::replica_stub::replica_stub::ReplicaStub;
use crate::transport::{
    AddChildRequest, ConfigProposal, ConfigType, ConfigurationUpdate, CopyCheckpointRequest, CopyCheckpointResponse,
    FetchFileRequest, FetchFileResponse, GroupCheckRequest, GroupCheckResponse, LearnNotification,
    LearnNotificationResponse, LearnRequest, LearnResponse, PrepareAck, PrepareRequest, ReplicaService, RpcError,
};
use bytes::Bytes;
use std::path::Path;

impl ReplicaStub {
    fn hosted(&self, gpid: Gpid) -> Result<ActorClient, RpcError> {
        self.replica_client(gpid).ok_or(RpcError::ReplicaNotFound(gpid))
    }

    /// A replica this node is told to host but does not have yet starts empty.
    fn hosted_or_created(&self, gpid: Gpid, app: &crate::common::AppInfo) -> Result<ActorClient, RpcError> {
        if let Some(client) = self.replica_client(gpid) {
            return Ok(client);
        }
        match self.create_new_replica(app.clone(), gpid) {
            Ok(client) => Ok(client),
            Err(crate::replica::OpenReplicaError::AlreadyExists(_)) => self.hosted(gpid),
            Err(e) => {
                slog::warn!(self.logger, "Failed to create replica {} on demand: {}", gpid, e);
                Err(RpcError::Transport(e.to_string()))
            }
        }
    }

    /// Serves files under the node's root directory only.
    async fn fetch_file(&self, request: FetchFileRequest) -> FetchFileResponse {
        let not_served = |err| FetchFileResponse {
            err,
            data: Bytes::new(),
        };
        let (root, path) = match (
            tokio::fs::canonicalize(&self.ctx.root_dir).await,
            tokio::fs::canonicalize(Path::new(&request.path)).await,
        ) {
            (Ok(root), Ok(path)) => (root, path),
            _ => return not_served(ErrorCode::ObjectNotFound),
        };
        if !path.starts_with(&root) {
            slog::warn!(self.logger, "Refusing to serve {:?} outside of {:?}", path, root);
            return not_served(ErrorCode::InvalidData);
        }

        match tokio::fs::read(&path).await {
            Ok(data) => FetchFileResponse {
                err: ErrorCode::Ok,
                data: Bytes::from(data),
            },
            Err(e) => {
                slog::warn!(self.logger, "Failed to read {:?}: {}", path, e);
                not_served(ErrorCode::ObjectNotFound)
            }
        }
    }
}

#[async_trait::async_trait]
impl ReplicaService for ReplicaStub {
    async fn on_prepare(&self, request: PrepareRequest) -> Result<PrepareAck, RpcError> {
        self.hosted(request.config.pid)?.prepare(request).await
    }

    async fn on_group_check(&self, request: GroupCheckRequest) -> Result<GroupCheckResponse, RpcError> {
        let gpid = request.config.pid;
        let client = if request.config.status == PartitionStatus::PotentialSecondary {
            self.hosted_or_created(gpid, &request.app)?
        } else {
            self.hosted(gpid)?
        };
        client.group_check(request).await
    }

    async fn on_learn(&self, request: LearnRequest) -> Result<LearnResponse, RpcError> {
        self.hosted(request.pid)?.learn(request).await
    }

    async fn on_learn_completion_notification(
        &self,
        request: LearnNotification,
    ) -> Result<LearnNotificationResponse, RpcError> {
        self.hosted(request.pid)?.learn_completion_notification(request).await
    }

    async fn on_copy_checkpoint(&self, request: CopyCheckpointRequest) -> Result<CopyCheckpointResponse, RpcError> {
        self.hosted(request.pid)?.copy_checkpoint(request).await
    }

    async fn on_fetch_file(&self, request: FetchFileRequest) -> Result<FetchFileResponse, RpcError> {
        Ok(self.fetch_file(request).await)
    }

    async fn on_config_proposal(&self, request: ConfigProposal) -> Result<(), RpcError> {
        let gpid = request.config.pid;
        let client = if request.config_type == ConfigType::AssignPrimary && &request.node == self.address() {
            self.hosted_or_created(gpid, &request.app)?
        } else {
            self.hosted(gpid)?
        };
        client.config_proposal(request).await
    }

    async fn on_update_configuration(&self, request: ConfigurationUpdate) -> Result<(), RpcError> {
        let gpid = request.config.pid;
        let client = if request.config.primary.as_ref() == Some(self.address()) {
            self.hosted_or_created(gpid, &request.app)?
        } else {
            self.hosted(gpid)?
        };
        client.update_configuration(request).await
    }

    async fn on_add_child(&self, request: AddChildRequest) -> Result<(), RpcError> {
        self.hosted(request.parent_config.pid)?.add_child(request).await
    }
}
