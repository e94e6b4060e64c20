use crate::replica::{
    CheckpointError, CheckpointMetadata, ChildSyncMessage, ClientReadError, ClientReadInput, ClientReadOutput,
    ClientWriteError, ClientWriteInput, ClientWriteOutput, CopyCheckpointFetched, GroupCheckReply, LearnFilesFetched,
    LearnReply, LogAppended, MetaConfigUpdateReply, PrepareReply, RegisterChildReply, ReplicaStateSnapshot,
    SplitNotice,
};
use crate::storage::{AsyncCheckpointOutcome, StorageError};
use crate::timers::TimerTick;
use crate::transport::{
    AddChildRequest, ConfigProposal, ConfigurationUpdate, CopyCheckpointRequest, CopyCheckpointResponse,
    GroupCheckRequest, GroupCheckResponse, LearnNotification, LearnNotificationResponse, LearnRequest, LearnResponse,
    PrepareAck, PrepareRequest, RpcError,
};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Debug;
use std::path::PathBuf;
use tokio::sync::oneshot;

// v2 Design choice: Log appends, checkpoints, log GC and file transfers run as tasks and report
//                   back as events. Engine applies and reads stay synchronous inside the actor.
#[derive(Debug)]
pub(crate) enum Event {
    // Primary: throttle, queue and prepare.
    // Others: reject.
    ClientWrite(ClientWriteInput, Callback<ClientWriteOutput, ClientWriteError>),
    // A write that already sat out its throttling delay.
    DelayedClientWrite(ClientWriteInput, Callback<ClientWriteOutput, ClientWriteError>),
    ClientRead(ClientReadInput, Callback<ClientReadOutput, ClientReadError>),
    // A read that already sat out its throttling delay.
    DelayedClientRead(ClientReadInput, Callback<ClientReadOutput, ClientReadError>),
    // Reads the local engine in any status. Inspection only.
    LocalRead(ClientReadInput, Callback<ClientReadOutput, ClientReadError>),

    // -- RPCs served to peers and the meta server --
    Prepare(PrepareRequest, Callback<PrepareAck, RpcError>),
    GroupCheck(GroupCheckRequest, Callback<GroupCheckResponse, RpcError>),
    Learn(LearnRequest, Callback<LearnResponse, RpcError>),
    LearnCompletionNotification(LearnNotification, Callback<LearnNotificationResponse, RpcError>),
    CopyCheckpoint(CopyCheckpointRequest, Callback<CopyCheckpointResponse, RpcError>),
    ConfigProposal(ConfigProposal),
    UpdateConfiguration(ConfigurationUpdate),
    AddChild(AddChildRequest),

    // -- Results of calls this replica made --
    PrepareReply(PrepareReply),
    GroupCheckReply(GroupCheckReply),
    LearnReply(LearnReply),
    LearnFilesFetched(LearnFilesFetched),
    CopyCheckpointFetched(CopyCheckpointFetched),
    MetaConfigUpdateReply(MetaConfigUpdateReply),
    RegisterChildReply(RegisterChildReply),

    // -- Background work --
    LogAppended(LogAppended),
    Timer(TimerTick),
    CheckpointRetry { is_emergency: bool },
    AsyncCheckpointDone(Result<AsyncCheckpointOutcome, StorageError>),
    BackgroundCheckpointDone(Result<(), StorageError>),
    RegisterChildRetry,

    // -- Split, between colocated parent and child --
    SplitNotice(SplitNotice),
    ChildSync(ChildSyncMessage),
    SplitAborted(String),

    // -- Admin --
    QueryState(oneshot::Sender<ReplicaStateSnapshot>),
    BackupCheckpoint(PathBuf, Callback<CheckpointMetadata, CheckpointError>),
    ApplyEnvs(BTreeMap<String, String>),
    Close(oneshot::Sender<()>),
}

#[derive(Debug)]
pub(crate) struct Callback<O: Debug, E: Error>(pub(crate) oneshot::Sender<Result<O, E>>);

impl<O: Debug, E: Error> Callback<O, E> {
    pub(crate) fn send(self, message: Result<O, E>) {
        let _ = self.0.send(message);
    }
}
