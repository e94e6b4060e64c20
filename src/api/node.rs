use crate::api::options::{ReplicationOptions, ReplicationOptionsValidated};
use crate::common::{AppInfo, Decree, Gpid, NodeAddress, UpdateRecord};
use crate::replica::{
    CheckpointError, CheckpointMetadata, ClientReadError, ClientReadInput, ClientReadOutput, ClientWriteError,
    ClientWriteInput, ClientWriteOutput, OpenReplicaError, ReplicaStateSnapshot, RestoreError,
};
use crate::replica_stub::{ReplicaStub, ReplicaStubConfig};
use crate::server::{RpcServer, RpcServerHandle};
use crate::storage::StorageEngineRegistry;
use crate::transport::{GrpcTransport, InProcessNetwork, MetaServerClient, ReplicaService, ReplicaTransport};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// How a node reaches its peers.
pub enum NodeTransport {
    /// Peers live in the same process and share `network`.
    InProcess(Arc<InProcessNetwork>),
    /// Peers are reached over gRPC at their `host:port` address, and this node serves on
    /// `listen_addr`.
    Grpc { listen_addr: SocketAddr, rpc_timeout: Duration },
}

pub struct ReplicaNodeConfig {
    /// How peers and the meta server address this node.
    pub address: NodeAddress,
    /// Directory holding the shared log and one directory per replica.
    pub root_dir: PathBuf,
    pub info_logger: slog::Logger,
    pub options: ReplicationOptions,
    pub transport: NodeTransport,
    pub meta: Arc<dyn MetaServerClient>,
    /// Engines this node can host. Defaults to the built-in ones.
    pub engines: Option<StorageEngineRegistry>,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeCreationError {
    #[error("Illegal options for configuring node: {0}")]
    IllegalOptions(String),
    #[error("Failed to open node: {0}")]
    Open(#[from] OpenReplicaError),
    #[error("Address {0} is already taken on the in-process network")]
    AddressInUse(NodeAddress),
}

pub async fn try_create_node(config: ReplicaNodeConfig) -> Result<ReplicaNode, NodeCreationError> {
    let root_logger = config
        .info_logger
        .new(slog::o!("Node" => config.address.to_string()));

    let options = ReplicationOptionsValidated::try_from(config.options)
        .map_err(|e| NodeCreationError::IllegalOptions(e.to_string()))?;

    let (transport, network): (Arc<dyn ReplicaTransport>, _) = match &config.transport {
        NodeTransport::InProcess(network) => {
            if network.is_registered(&config.address) {
                return Err(NodeCreationError::AddressInUse(config.address));
            }
            (network.clone(), Some(network.clone()))
        }
        NodeTransport::Grpc { rpc_timeout, .. } => (
            Arc::new(GrpcTransport::new(root_logger.clone(), *rpc_timeout)),
            None,
        ),
    };

    let stub = ReplicaStub::open(ReplicaStubConfig {
        logger: root_logger.clone(),
        address: config.address.clone(),
        root_dir: config.root_dir,
        options,
        transport,
        meta: config.meta,
        engines: config
            .engines
            .unwrap_or_else(StorageEngineRegistry::with_builtin_engines),
    })?;

    if let Some(network) = network.as_ref() {
        let service: Arc<dyn ReplicaService> = stub.clone();
        let weak: Weak<dyn ReplicaService> = Arc::downgrade(&service);
        network.register(config.address.clone(), weak);
    }

    let server = match config.transport {
        NodeTransport::Grpc { listen_addr, .. } => {
            Some(RpcServer::new(root_logger.clone(), stub.clone()).spawn(listen_addr))
        }
        NodeTransport::InProcess(_) => None,
    };

    stub.spawn_shared_log_gc();

    Ok(ReplicaNode {
        logger: root_logger,
        stub,
        network,
        server,
    })
}

/// ReplicaNode is a running replica server. Dropping it stops serving peers; `shutdown` also
/// closes every hosted replica.
pub struct ReplicaNode {
    logger: slog::Logger,
    stub: Arc<ReplicaStub>,
    network: Option<Arc<InProcessNetwork>>,
    server: Option<RpcServerHandle>,
}

impl ReplicaNode {
    pub fn address(&self) -> &NodeAddress {
        self.stub.address()
    }

    /// Every replica this node hosts, sorted by gpid.
    pub fn replicas(&self) -> Vec<Gpid> {
        self.stub.replicas()
    }

    /// Creates an empty, inactive replica. It becomes active once the meta server hands it a
    /// configuration.
    pub fn create_replica(&self, app_info: AppInfo, gpid: Gpid) -> Result<(), OpenReplicaError> {
        self.stub.create_new_replica(app_info, gpid).map(|_| ())
    }

    pub async fn client_write(
        &self,
        gpid: Gpid,
        updates: Vec<UpdateRecord>,
    ) -> Result<ClientWriteOutput, ClientWriteError> {
        let replica = self
            .stub
            .replica_client(gpid)
            .ok_or(ClientWriteError::ReplicaNotFound(gpid))?;
        replica.client_write(ClientWriteInput { updates }).await
    }

    /// Reads from the primary.
    pub async fn client_read(&self, gpid: Gpid, key: Bytes) -> Result<ClientReadOutput, ClientReadError> {
        let replica = self
            .stub
            .replica_client(gpid)
            .ok_or(ClientReadError::ReplicaNotFound(gpid))?;
        replica.client_read(ClientReadInput { key }).await
    }

    /// Reads whatever this replica has applied, regardless of its status.
    pub async fn local_read(&self, gpid: Gpid, key: Bytes) -> Result<ClientReadOutput, ClientReadError> {
        let replica = self
            .stub
            .replica_client(gpid)
            .ok_or(ClientReadError::ReplicaNotFound(gpid))?;
        replica.local_read(ClientReadInput { key }).await
    }

    pub async fn query_replica_state(&self, gpid: Gpid) -> Option<ReplicaStateSnapshot> {
        let replica = self.stub.replica_client(gpid)?;
        replica.query_state().await.ok()
    }

    /// Copies the latest checkpoint of `gpid` into `dir`, next to a `backup_metadata` file.
    pub async fn backup_checkpoint(&self, gpid: Gpid, dir: &Path) -> Result<CheckpointMetadata, CheckpointError> {
        let replica = self
            .stub
            .replica_client(gpid)
            .ok_or(CheckpointError::ReplicaNotFound(gpid))?;
        replica.backup_checkpoint(dir.to_path_buf()).await
    }

    /// Creates `gpid` from a backup made by `backup_checkpoint`. Returns the restored decree.
    pub fn restore_replica(&self, app_info: AppInfo, gpid: Gpid, backup_dir: &Path) -> Result<Decree, RestoreError> {
        self.stub.restore_replica(app_info, gpid, backup_dir)
    }

    /// Pushes app environments to every local replica of `app_id`.
    pub async fn apply_envs(&self, app_id: i32, envs: BTreeMap<String, String>) {
        self.stub.apply_envs(app_id, envs).await
    }

    /// Returns false if the replica was not hosted.
    pub async fn close_replica(&self, gpid: Gpid) -> bool {
        self.stub.close_replica(gpid).await
    }

    /// Returns the number of shared log files removed.
    pub async fn garbage_collect_shared_log(&self) -> usize {
        self.stub.garbage_collect_shared_log().await
    }

    /// Stops serving peers, closes every replica and waits for their logs to be written. Data
    /// stays on disk, so a node created over the same directory reopens them.
    pub async fn shutdown(mut self) {
        if let Some(network) = self.network.take() {
            network.deregister(self.stub.address());
        }
        if let Some(server) = self.server.take() {
            server.stop().await;
        }
        self.stub.shutdown().await;
        slog::info!(self.logger, "Replica node stopped");
    }
}
