use crate::actor::event::{Callback, Event};
use crate::replica::{
    CheckpointError, CheckpointMetadata, ClientReadError, ClientReadInput, ClientReadOutput, ClientWriteError,
    ClientWriteInput, ClientWriteOutput, ReplicaStateSnapshot,
};
use crate::transport::{
    AddChildRequest, ConfigProposal, ConfigurationUpdate, CopyCheckpointRequest, CopyCheckpointResponse,
    GroupCheckRequest, GroupCheckResponse, LearnNotification, LearnNotificationResponse, LearnRequest, LearnResponse,
    PrepareAck, PrepareRequest, RpcError,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};

/// The actor's event loop has stopped; the replica was closed.
#[derive(Debug, thiserror::Error)]
#[error("Replica actor has exited")]
pub(crate) struct ActorExited;

#[derive(Clone)]
pub(crate) struct ActorClient {
    sender: mpsc::Sender<Event>,
}

impl ActorClient {
    pub(crate) fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        (ActorClient { sender: tx }, rx)
    }

    pub(crate) fn weak(&self) -> WeakActorClient {
        WeakActorClient {
            sender: self.sender.downgrade(),
        }
    }

    pub(crate) async fn client_write(&self, input: ClientWriteInput) -> Result<ClientWriteOutput, ClientWriteError> {
        let (tx, rx) = oneshot::channel();
        self.notify(Event::ClientWrite(input, Callback(tx)))
            .await
            .map_err(|_| ClientWriteError::ActorExited)?;

        rx.await.map_err(|_| ClientWriteError::ActorExited)?
    }

    pub(crate) async fn client_read(&self, input: ClientReadInput) -> Result<ClientReadOutput, ClientReadError> {
        let (tx, rx) = oneshot::channel();
        self.notify(Event::ClientRead(input, Callback(tx)))
            .await
            .map_err(|_| ClientReadError::ActorExited)?;

        rx.await.map_err(|_| ClientReadError::ActorExited)?
    }

    pub(crate) async fn local_read(&self, input: ClientReadInput) -> Result<ClientReadOutput, ClientReadError> {
        let (tx, rx) = oneshot::channel();
        self.notify(Event::LocalRead(input, Callback(tx)))
            .await
            .map_err(|_| ClientReadError::ActorExited)?;

        rx.await.map_err(|_| ClientReadError::ActorExited)?
    }

    pub(crate) async fn prepare(&self, request: PrepareRequest) -> Result<PrepareAck, RpcError> {
        let (tx, rx) = oneshot::channel();
        self.notify(Event::Prepare(request, Callback(tx))).await?;

        rx.await.map_err(|_| RpcError::ActorExited)?
    }

    pub(crate) async fn group_check(&self, request: GroupCheckRequest) -> Result<GroupCheckResponse, RpcError> {
        let (tx, rx) = oneshot::channel();
        self.notify(Event::GroupCheck(request, Callback(tx))).await?;

        rx.await.map_err(|_| RpcError::ActorExited)?
    }

    pub(crate) async fn learn(&self, request: LearnRequest) -> Result<LearnResponse, RpcError> {
        let (tx, rx) = oneshot::channel();
        self.notify(Event::Learn(request, Callback(tx))).await?;

        rx.await.map_err(|_| RpcError::ActorExited)?
    }

    pub(crate) async fn learn_completion_notification(
        &self,
        request: LearnNotification,
    ) -> Result<LearnNotificationResponse, RpcError> {
        let (tx, rx) = oneshot::channel();
        self.notify(Event::LearnCompletionNotification(request, Callback(tx)))
            .await?;

        rx.await.map_err(|_| RpcError::ActorExited)?
    }

    pub(crate) async fn copy_checkpoint(
        &self,
        request: CopyCheckpointRequest,
    ) -> Result<CopyCheckpointResponse, RpcError> {
        let (tx, rx) = oneshot::channel();
        self.notify(Event::CopyCheckpoint(request, Callback(tx))).await?;

        rx.await.map_err(|_| RpcError::ActorExited)?
    }

    pub(crate) async fn config_proposal(&self, request: ConfigProposal) -> Result<(), RpcError> {
        Ok(self.notify(Event::ConfigProposal(request)).await?)
    }

    pub(crate) async fn update_configuration(&self, request: ConfigurationUpdate) -> Result<(), RpcError> {
        Ok(self.notify(Event::UpdateConfiguration(request)).await?)
    }

    pub(crate) async fn add_child(&self, request: AddChildRequest) -> Result<(), RpcError> {
        Ok(self.notify(Event::AddChild(request)).await?)
    }

    pub(crate) async fn query_state(&self) -> Result<ReplicaStateSnapshot, ActorExited> {
        let (tx, rx) = oneshot::channel();
        self.notify(Event::QueryState(tx)).await?;

        rx.await.map_err(|_| ActorExited)
    }

    pub(crate) async fn backup_checkpoint(&self, dir: PathBuf) -> Result<CheckpointMetadata, CheckpointError> {
        let (tx, rx) = oneshot::channel();
        self.notify(Event::BackupCheckpoint(dir, Callback(tx)))
            .await
            .map_err(|_| CheckpointError::ActorExited)?;

        rx.await.map_err(|_| CheckpointError::ActorExited)?
    }

    pub(crate) async fn apply_envs(&self, envs: BTreeMap<String, String>) -> Result<(), ActorExited> {
        self.notify(Event::ApplyEnvs(envs)).await
    }

    /// Stops the event loop once every event queued before it is handled.
    pub(crate) async fn close(&self) -> Result<(), ActorExited> {
        let (tx, rx) = oneshot::channel();
        self.notify(Event::Close(tx)).await?;

        rx.await.map_err(|_| ActorExited)
    }

    pub(crate) async fn notify(&self, event: Event) -> Result<(), ActorExited> {
        self.sender.send(event).await.map_err(|_| ActorExited)
    }
}

impl From<ActorExited> for RpcError {
    fn from(_: ActorExited) -> Self {
        RpcError::ActorExited
    }
}

/// WeakActorClient is what background tasks of a replica hold. It does not keep the actor alive,
/// so a closed replica's stragglers fail to deliver instead of resurrecting it.
#[derive(Clone)]
pub(crate) struct WeakActorClient {
    sender: mpsc::WeakSender<Event>,
}

impl WeakActorClient {
    pub(crate) fn upgrade(&self) -> Option<ActorClient> {
        self.sender.upgrade().map(|sender| ActorClient { sender })
    }

    pub(crate) async fn notify(&self, event: Event) -> Result<(), ActorExited> {
        match self.upgrade() {
            Some(client) => client.notify(event).await,
            None => Err(ActorExited),
        }
    }
}
