use crate::actor::{ActorClient, Event};
use crate::api::ReplicationOptionsValidated;
use crate::common::{Gpid, NodeAddress};
use crate::mutation_log::{LogWriter, MutationLog};
use crate::replica_stub::ReplicaStub;
use crate::storage::StorageEngineRegistry;
use crate::transport::{MetaServerClient, ReplicaTransport};
use std::path::PathBuf;
use std::sync::{Arc, Weak};

/// ReplicaContext is what every replica of a node shares: who we are, how to reach peers and the
/// meta server, the shared log (with the writer all replicas append through) and the registered
/// storage engines.
pub(crate) struct ReplicaContext {
    pub(crate) address: NodeAddress,
    pub(crate) root_dir: PathBuf,
    pub(crate) options: ReplicationOptionsValidated,
    pub(crate) transport: Arc<dyn ReplicaTransport>,
    pub(crate) meta: Arc<dyn MetaServerClient>,
    pub(crate) shared_log: Option<Arc<MutationLog>>,
    pub(crate) shared_log_writer: Option<LogWriter>,
    pub(crate) engines: StorageEngineRegistry,
    pub(crate) stub: Weak<ReplicaStub>,
}

impl ReplicaContext {
    pub(crate) fn replica_client(&self, gpid: Gpid) -> Option<ActorClient> {
        self.stub.upgrade()?.replica_client(gpid)
    }

    /// Delivers `event` to a colocated replica without blocking the caller's event loop.
    pub(crate) fn notify_replica(&self, logger: &slog::Logger, gpid: Gpid, event: Event) {
        match self.replica_client(gpid) {
            Some(client) => {
                let logger = logger.clone();
                tokio::task::spawn(async move {
                    if client.notify(event).await.is_err() {
                        slog::warn!(logger, "Replica {} exited before it got our event", gpid);
                    }
                });
            }
            None => slog::warn!(logger, "Replica {} is not on this node; event dropped", gpid),
        }
    }
}
