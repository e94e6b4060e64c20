use crate::actor::{Callback, Event};
use crate::common::{Decree, ErrorCode, LearnerStatus, Mutation, NodeAddress, PartitionStatus, INVALID_DECREE};
use crate::prepare_list::{CommitMode, PreparedMutation};
use crate::replica::replica::Replica;
use crate::replica::replica_api::{LearnFilesFetched, LearnReply, ReplicaFault};
use crate::storage::{ChkptApplyMode, LearnState};
use crate::transport::{
    FetchFileRequest, LearnNotification, LearnNotificationResponse, LearnRequest, LearnResponse, LearnType,
    RemoteFile, ReplicaTransport, RpcError,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Describes local files for a peer to download: their common directory and name, size and
/// checksum of each. Files are read on a blocking thread.
pub(super) async fn describe_local_files(paths: Vec<PathBuf>) -> io::Result<(String, Vec<RemoteFile>)> {
    tokio::task::spawn_blocking(move || read_file_descriptions(&paths))
        .await
        .unwrap_or_else(|e| Err(io::Error::new(io::ErrorKind::Other, e)))
}

fn read_file_descriptions(paths: &[PathBuf]) -> io::Result<(String, Vec<RemoteFile>)> {
    let mut base_dir = String::new();
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        if let Some(parent) = path.parent() {
            base_dir = parent.to_string_lossy().into_owned();
        }
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("{:?} has no file name", path)))?;
        let data = fs::read(path)?;
        files.push(RemoteFile {
            name,
            size: data.len() as u64,
            crc32: crc32fast::hash(&data),
        });
    }

    Ok((base_dir, files))
}

/// Downloads `files` from `source` into `dest`, replacing whatever `dest` held. Every file is
/// checked against the size and checksum the source announced.
pub(super) async fn fetch_remote_files(
    transport: Arc<dyn ReplicaTransport>,
    source: NodeAddress,
    base_dir: String,
    files: Vec<RemoteFile>,
    dest: PathBuf,
) -> Result<Vec<PathBuf>, ErrorCode> {
    if tokio::fs::metadata(&dest).await.is_ok() {
        tokio::fs::remove_dir_all(&dest)
            .await
            .map_err(|_| ErrorCode::LearnFileFailed)?;
    }
    tokio::fs::create_dir_all(&dest)
        .await
        .map_err(|_| ErrorCode::LearnFileFailed)?;

    let mut fetched = Vec::with_capacity(files.len());
    for file in files {
        let path = Path::new(&base_dir).join(&file.name);
        let request = FetchFileRequest {
            path: path.to_string_lossy().into_owned(),
        };
        let response = transport.fetch_file(&source, request).await.map_err(|e| match e {
            RpcError::Timeout => ErrorCode::Timeout,
            _ => ErrorCode::NetworkFailure,
        })?;
        if !response.err.is_ok() {
            return Err(response.err);
        }
        if response.data.len() as u64 != file.size || crc32fast::hash(&response.data) != file.crc32 {
            return Err(ErrorCode::LearnFileFailed);
        }

        let local = dest.join(&file.name);
        tokio::fs::write(&local, &response.data)
            .await
            .map_err(|_| ErrorCode::LearnFileFailed)?;
        fetched.push(local);
    }

    Ok(fetched)
}

/// What a learnee answers with. Checkpoint answers still lack their file list.
enum LearnSource {
    Ready(LearnResponse),
    Checkpoint { response: LearnResponse, files: Vec<PathBuf> },
}

impl Replica {
    // -- Learnee (primary) --

    /// Serves one learn round. Picks the cheapest source that still covers what the learner
    /// misses: our prepare list, then our log, then a checkpoint of the app. Checkpoint replies
    /// go out once their files are described.
    pub(crate) fn on_learn(&mut self, request: LearnRequest, callback: Callback<LearnResponse, RpcError>) {
        match self.serve_learn(request) {
            LearnSource::Ready(response) => callback.send(Ok(response)),
            LearnSource::Checkpoint { mut response, files } => {
                let logger = self.logger.clone();
                tokio::spawn(async move {
                    match describe_local_files(files).await {
                        Ok((base_dir, files)) => {
                            response.base_local_dir = base_dir;
                            response.files = files;
                        }
                        Err(e) => {
                            slog::warn!(logger, "Cannot describe checkpoint files: {}", e);
                            response = LearnResponse::error(
                                ErrorCode::LocalAppFailure,
                                response.config.clone(),
                                response.learnee.clone(),
                            );
                        }
                    }
                    callback.send(Ok(response));
                });
            }
        }
    }

    fn serve_learn(&mut self, request: LearnRequest) -> LearnSource {
        let learner_config = crate::common::ReplicaConfiguration {
            status: PartitionStatus::PotentialSecondary,
            learner_signature: request.signature,
            ..self.config.clone()
        };
        let address = self.ctx.address.clone();
        let error = |err| LearnSource::Ready(LearnResponse::error(err, learner_config.clone(), address.clone()));
        if self.status() != PartitionStatus::Primary {
            return error(ErrorCode::InvalidState);
        }
        match self.primary.learners.get(&request.learner) {
            Some(learner) if learner.signature == request.signature => {}
            _ => return error(ErrorCode::ObjectNotFound),
        }

        let local_committed = self.plist.last_committed_decree();
        let mut learn_start = request.last_committed_decree_in_app + 1;
        let learner_ahead = request.last_committed_decree_in_app > local_committed;
        if learner_ahead {
            slog::warn!(
                self.logger,
                "Learner {} committed {} beyond our {}; it learns from scratch",
                request.learner,
                request.last_committed_decree_in_app,
                local_committed
            );
            learn_start = 1;
        }

        let mut response = LearnResponse::error(ErrorCode::Ok, learner_config.clone(), address.clone());
        response.last_committed_decree = local_committed;

        if !learner_ahead {
            if learn_start >= self.plist.min_decree() {
                let prepare_start = self.plist.max_decree() + 1;
                if let Some(learner) = self.primary.learners.get_mut(&request.learner) {
                    learner.prepare_start_decree = prepare_start;
                }
                response.learn_type = LearnType::Cache;
                response.prepare_start_decree = prepare_start;
                response.from_decree_excluded = learn_start - 1;
                response.to_decree_included = self.plist.max_decree();
                response.mutations = self
                    .plist
                    .mutations_from(learn_start)
                    .iter()
                    .map(|m| (**m).clone())
                    .collect();
                slog::info!(
                    self.logger,
                    "Learner {} learns ({}, {}] from cache; prepares start at {}",
                    request.learner,
                    response.from_decree_excluded,
                    response.to_decree_included,
                    prepare_start
                );
                return LearnSource::Ready(response);
            }

            if let Some(mutations) = self.learn_from_log(learn_start, local_committed) {
                response.learn_type = LearnType::Log;
                response.from_decree_excluded = learn_start - 1;
                response.to_decree_included = mutations.last().map_or(learn_start - 1, |m| m.decree());
                response.mutations = mutations;
                slog::info!(
                    self.logger,
                    "Learner {} learns ({}, {}] from log",
                    request.learner,
                    response.from_decree_excluded,
                    response.to_decree_included
                );
                return LearnSource::Ready(response);
            }
        }

        match self
            .app
            .engine()
            .get_checkpoint(learn_start, &request.app_specific_learn_request)
        {
            Ok(state) => {
                response.learn_type = LearnType::App;
                response.from_decree_excluded = state.from_decree_excluded;
                response.to_decree_included = state.to_decree_included;
                response.meta = state.meta;
                slog::info!(
                    self.logger,
                    "Learner {} learns checkpoint up to {} ({} files)",
                    request.learner,
                    response.to_decree_included,
                    state.files.len()
                );
                LearnSource::Checkpoint {
                    response,
                    files: state.files,
                }
            }
            Err(e) => {
                slog::warn!(self.logger, "Cannot get checkpoint for {}: {}", request.learner, e);
                error(ErrorCode::LocalAppFailure)
            }
        }
    }

    fn learn_from_log(&self, learn_start: Decree, upto: Decree) -> Option<Vec<Mutation>> {
        let log = self.private_log.as_ref().or_else(|| self.ctx.shared_log.as_ref())?;
        let state = log.get_learn_state(self.gpid, learn_start).ok()?;
        let mutations: Vec<Mutation> = state.mutations.into_iter().filter(|m| m.decree() <= upto).collect();
        match mutations.first() {
            Some(first) if first.decree() == learn_start => Some(mutations),
            _ => None,
        }
    }

    pub(crate) fn on_learn_completion_notification(&mut self, request: LearnNotification) -> LearnNotificationResponse {
        if self.status() != PartitionStatus::Primary {
            return LearnNotificationResponse {
                err: ErrorCode::InvalidState,
            };
        }
        match self.primary.learners.get(&request.learner) {
            Some(learner) if learner.signature == request.signature => {
                self.upgrade_learner(&request.learner);
                LearnNotificationResponse { err: ErrorCode::Ok }
            }
            _ => LearnNotificationResponse {
                err: ErrorCode::ObjectNotFound,
            },
        }
    }

    // -- Learner (potential secondary) --

    /// Starts the next learn round unless one is already running.
    pub(super) fn init_learn(&mut self) {
        if self.status() != PartitionStatus::PotentialSecondary || self.learner.learning_round_in_flight {
            return;
        }
        if self.learner.learner_status == LearnerStatus::LearningSucceeded {
            return;
        }
        let primary = match self.config.primary.clone() {
            Some(primary) => primary,
            None => return,
        };
        let app_specific_learn_request = match self.app.engine().prepare_get_checkpoint() {
            Ok(blob) => blob,
            Err(e) => return self.learning_failed(&format!("engine cannot prepare learn request: {}", e)),
        };

        self.learner.learning_round += 1;
        self.learner.learning_round_in_flight = true;
        let signature = self.learner.learning_version;
        let request = LearnRequest {
            pid: self.gpid,
            learner: self.ctx.address.clone(),
            signature,
            last_committed_decree_in_app: self.app.last_committed_decree(),
            last_committed_decree_in_prepare_list: self.plist.last_committed_decree(),
            app_specific_learn_request,
            max_gced_decree: self
                .private_log
                .as_ref()
                .map_or(INVALID_DECREE, |log| log.max_gced_decree(self.gpid)),
        };
        slog::info!(
            self.logger,
            "Learn round {} from {}: committed in app {}",
            self.learner.learning_round,
            primary,
            request.last_committed_decree_in_app
        );

        let transport = self.ctx.transport.clone();
        let timeout = self.ctx.options.learn_timeout;
        self.spawn_for_event(async move {
            let result = match tokio::time::timeout(timeout, transport.learn(&primary, request)).await {
                Ok(result) => result,
                Err(elapsed) => Err(RpcError::from(elapsed)),
            };
            Event::LearnReply(LearnReply { signature, result })
        });
    }

    pub(crate) fn on_learn_reply(&mut self, reply: LearnReply) {
        if self.status() != PartitionStatus::PotentialSecondary || reply.signature != self.learner.learning_version {
            return;
        }
        self.learner.learning_round_in_flight = false;

        let response = match reply.result {
            Ok(response) if response.err.is_ok() => response,
            Ok(response) => return self.learning_failed(&format!("learnee replied {}", response.err)),
            Err(e) => return self.learning_failed(&e.to_string()),
        };

        match response.learn_type {
            LearnType::Cache => self.on_learn_cache(response),
            LearnType::Log => self.on_learn_log(response),
            LearnType::App => {
                let transport = self.ctx.transport.clone();
                let dest = self.app.learn_dir();
                let signature = reply.signature;
                self.learner.learning_round_in_flight = true;
                self.spawn_for_event(async move {
                    let result = fetch_remote_files(
                        transport,
                        response.learnee.clone(),
                        response.base_local_dir.clone(),
                        response.files.clone(),
                        dest,
                    )
                    .await;
                    Event::LearnFilesFetched(LearnFilesFetched {
                        signature,
                        response,
                        result,
                    })
                });
            }
        }
    }

    fn learning_failed(&mut self, reason: &str) {
        slog::warn!(self.logger, "Learn round {} failed: {}", self.learner.learning_round, reason);
        self.learner.learner_status = LearnerStatus::LearningFailed;
        for (request, callback) in std::mem::take(&mut self.learner.held_prepares) {
            callback.send(Ok(self.prepare_ack(ErrorCode::InvalidState, request.mutation.decree())));
        }
    }

    fn on_learn_cache(&mut self, response: LearnResponse) {
        if response.prepare_start_decree != INVALID_DECREE {
            self.learner.learner_status = LearnerStatus::LearningWithPrepareTransient;
        }

        self.plist.reset(self.app.last_committed_decree());
        for mutation in response.mutations {
            if mutation.decree() <= self.plist.last_committed_decree() {
                continue;
            }
            // Learned mutations are committed on the primary already; they don't wait for the disk.
            self.submit_to_logs(&mutation);
            let entry = PreparedMutation::new(Arc::new(mutation), true, true);
            match self.plist.prepare(entry, PartitionStatus::PotentialSecondary) {
                Ok(committed) => self.execute_committed(committed),
                Err(e) => return self.learning_failed(&format!("learned mutation rejected: {}", e)),
            }
        }
        match self.plist.commit(response.last_committed_decree, CommitMode::Hard) {
            Ok(committed) => self.execute_committed(committed),
            Err(e) => return self.learning_failed(&format!("cannot commit learned mutations: {}", e)),
        }
        if self.status() != PartitionStatus::PotentialSecondary {
            return;
        }

        if response.prepare_start_decree == INVALID_DECREE {
            return self.init_learn();
        }
        self.learner.learner_status = LearnerStatus::LearningWithPrepare;
        for (request, callback) in std::mem::take(&mut self.learner.held_prepares) {
            self.process_prepare(request, callback);
        }

        if self.app.last_committed_decree() >= response.last_committed_decree {
            self.on_learn_completed(&response.learnee);
        } else {
            self.init_learn();
        }
    }

    fn on_learn_log(&mut self, response: LearnResponse) {
        for mutation in response.mutations {
            if mutation.decree() <= self.app.last_committed_decree() {
                continue;
            }
            self.submit_to_logs(&mutation);
            if let Err(e) = self.app.apply_mutation(&mutation) {
                return self.handle_local_failure(ReplicaFault::LearnFailed(e.to_string()));
            }
        }
        self.plist.reset(self.app.last_committed_decree());
        self.init_learn();
    }

    pub(crate) fn on_learn_files_fetched(&mut self, fetched: LearnFilesFetched) {
        if self.status() != PartitionStatus::PotentialSecondary || fetched.signature != self.learner.learning_version {
            return;
        }
        self.learner.learning_round_in_flight = false;

        let files = match fetched.result {
            Ok(files) => files,
            Err(err) => return self.learning_failed(&format!("fetching checkpoint failed: {}", err)),
        };
        let state = LearnState {
            from_decree_excluded: fetched.response.from_decree_excluded,
            to_decree_included: fetched.response.to_decree_included,
            meta: fetched.response.meta,
            files,
        };
        if let Err(e) = self.app.apply_checkpoint(ChkptApplyMode::Learn, &state) {
            return self.handle_local_failure(ReplicaFault::LearnFailed(e.to_string()));
        }

        // Logged mutations below the learned checkpoint are stale now.
        let durable = self.app.last_committed_decree();
        let shared_start = self
            .ctx
            .shared_log
            .as_ref()
            .map_or(0, |log| log.on_partition_reset(self.gpid, durable));
        let private_start = self
            .private_log
            .as_ref()
            .map_or(0, |log| log.on_partition_reset(self.gpid, durable));
        let ballot = self.ballot();
        let last_durable = self.app.last_durable_decree();
        if let Err(e) = self.app.update_init_info(ballot, shared_start, private_start, last_durable) {
            return self.handle_local_failure(ReplicaFault::LearnFailed(e.to_string()));
        }
        self.plist.reset(durable);
        if let Err(e) = fs::remove_dir_all(self.app.learn_dir()) {
            slog::debug!(self.logger, "Could not clean learn dir: {}", e);
        }

        slog::info!(self.logger, "Applied learned checkpoint up to {}", durable);
        self.init_learn();
    }

    fn on_learn_completed(&mut self, learnee: &NodeAddress) {
        if let Err(e) = self.app.engine().sync_checkpoint() {
            slog::warn!(self.logger, "Checkpoint after learning failed: {}", e);
        }
        let ballot = self.ballot();
        if let Err(e) = self.app.update_init_info_ballot_and_decree(ballot) {
            slog::warn!(self.logger, "Failed to persist state after learning: {}", e);
        }
        self.learner.learner_status = LearnerStatus::LearningSucceeded;
        slog::info!(
            self.logger,
            "Learning succeeded after {} rounds at committed decree {}",
            self.learner.learning_round,
            self.plist.last_committed_decree()
        );

        let notification = LearnNotification {
            pid: self.gpid,
            learner: self.ctx.address.clone(),
            signature: self.learner.learning_version,
        };
        let transport = self.ctx.transport.clone();
        let learnee = learnee.clone();
        let logger = self.logger.clone();
        tokio::task::spawn(async move {
            let result = transport.learn_completion_notification(&learnee, notification).await;
            slog::debug!(logger, "Learn completion notification result: {:?}", result);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Gpid, PartitionConfiguration, ReplicaConfiguration};
    use crate::replica::replica::test_utils::*;
    use crate::replica::replica_api::{ClientWriteInput, LearnReply};
    use crate::replica::states::RemoteLearner;
    use crate::storage::{
        put_update, AsyncCheckpointOutcome, SimpleKvEngine, StorageEngine, StorageEngineFactory,
        StorageEngineRegistry, StorageError,
    };
    use crate::transport::{
        AddChildRequest, ConfigProposal, ConfigurationUpdate, CopyCheckpointRequest, CopyCheckpointResponse,
        FetchFileResponse, GroupCheckRequest, GroupCheckResponse, InProcessNetwork, PrepareAck, PrepareRequest,
        ReplicaService,
    };
    use crate::ReplicationOptions;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use tokio::sync::{mpsc, oneshot};

    const BLOB_APP_TYPE: &str = "blob_kv";

    fn write(replica: &mut Replica, key: &str) {
        let (tx, _rx) = oneshot::channel();
        replica.client_write(
            ClientWriteInput {
                updates: vec![put_update(key, "v")],
            },
            Callback(tx),
        );
    }

    async fn learn(replica: &mut Replica, request: LearnRequest) -> LearnResponse {
        let (tx, rx) = oneshot::channel();
        replica.on_learn(request, Callback(tx));
        rx.await.unwrap().unwrap()
    }

    fn learn_request(signature: u64, committed: Decree) -> LearnRequest {
        LearnRequest {
            pid: Gpid::new(1, 0),
            learner: NodeAddress::new("learner"),
            signature,
            last_committed_decree_in_app: committed,
            last_committed_decree_in_prepare_list: committed,
            app_specific_learn_request: Bytes::new(),
            max_gced_decree: INVALID_DECREE,
        }
    }

    fn add_learner(replica: &mut Replica, signature: u64) {
        replica.primary.learners.insert(
            NodeAddress::new("learner"),
            RemoteLearner {
                signature,
                prepare_start_decree: INVALID_DECREE,
            },
        );
    }

    fn become_learner(replica: &mut Replica, signature: u64) {
        let config = ReplicaConfiguration {
            pid: Gpid::new(1, 0),
            ballot: 1,
            primary: Some(NodeAddress::new("primary")),
            status: PartitionStatus::PotentialSecondary,
            learner_signature: signature,
        };
        assert!(replica.update_local_configuration(config, None));
    }

    async fn next_event<F>(events: &mut mpsc::Receiver<Event>, wanted: F) -> Event
    where
        F: Fn(&Event) -> bool,
    {
        loop {
            let event = tokio::time::timeout(std::time::Duration::from_secs(10), events.recv())
                .await
                .unwrap()
                .unwrap();
            if wanted(&event) {
                return event;
            }
        }
    }

    /// Engine that hands out a fixed learn blob and remembers the blobs it was asked with.
    struct BlobEngine {
        inner: SimpleKvEngine,
        seen: Arc<Mutex<Vec<Bytes>>>,
    }

    impl StorageEngine for BlobEngine {
        fn open(&self) -> Result<(), StorageError> {
            self.inner.open()
        }
        fn close(&self, clear_state: bool) -> Result<(), StorageError> {
            self.inner.close(clear_state)
        }
        fn apply_mutation(&self, mutation: &Mutation) -> Result<(), StorageError> {
            self.inner.apply_mutation(mutation)
        }
        fn last_committed_decree(&self) -> Decree {
            self.inner.last_committed_decree()
        }
        fn last_durable_decree(&self) -> Decree {
            self.inner.last_durable_decree()
        }
        fn sync_checkpoint(&self) -> Result<(), StorageError> {
            self.inner.sync_checkpoint()
        }
        fn async_checkpoint(&self, is_emergency: bool) -> Result<AsyncCheckpointOutcome, StorageError> {
            self.inner.async_checkpoint(is_emergency)
        }
        fn supports_async_checkpoint(&self) -> bool {
            self.inner.supports_async_checkpoint()
        }
        fn prepare_get_checkpoint(&self) -> Result<Bytes, StorageError> {
            Ok(Bytes::from_static(b"learn-blob"))
        }
        fn get_checkpoint(&self, learn_start: Decree, request: &[u8]) -> Result<LearnState, StorageError> {
            self.seen.lock().push(Bytes::copy_from_slice(request));
            self.inner.get_checkpoint(learn_start, request)
        }
        fn storage_apply_checkpoint(&self, mode: ChkptApplyMode, state: &LearnState) -> Result<(), StorageError> {
            self.inner.storage_apply_checkpoint(mode, state)
        }
        fn copy_checkpoint_to_dir(&self, dir: &Path) -> Result<Decree, StorageError> {
            self.inner.copy_checkpoint_to_dir(dir)
        }
        fn query(&self, key: &[u8]) -> Result<Option<Bytes>, StorageError> {
            self.inner.query(key)
        }
    }

    struct BlobEngineFactory {
        seen: Arc<Mutex<Vec<Bytes>>>,
    }

    impl StorageEngineFactory for BlobEngineFactory {
        fn create(&self, _gpid: Gpid, data_dir: &Path) -> Result<Arc<dyn StorageEngine>, StorageError> {
            Ok(Arc::new(BlobEngine {
                inner: SimpleKvEngine::new(data_dir, true),
                seen: self.seen.clone(),
            }))
        }
    }

    fn blob_engines() -> (StorageEngineRegistry, Arc<Mutex<Vec<Bytes>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut engines = StorageEngineRegistry::with_builtin_engines();
        engines.register(BLOB_APP_TYPE, Arc::new(BlobEngineFactory { seen: seen.clone() }));
        (engines, seen)
    }

    /// Primary that records learn requests and serves `file_data` for every file.
    struct FakePrimary {
        learn_requests: Mutex<Vec<LearnRequest>>,
        file_data: Bytes,
    }

    impl FakePrimary {
        fn serve(network: &InProcessNetwork, file_data: &'static [u8]) -> Arc<FakePrimary> {
            let primary = Arc::new(FakePrimary {
                learn_requests: Mutex::new(Vec::new()),
                file_data: Bytes::from_static(file_data),
            });
            let service: Arc<dyn ReplicaService> = primary.clone();
            network.register(NodeAddress::new("primary"), Arc::downgrade(&service));
            primary
        }
    }

    #[async_trait::async_trait]
    impl ReplicaService for FakePrimary {
        async fn on_prepare(&self, _: PrepareRequest) -> Result<PrepareAck, RpcError> {
            Err(RpcError::ReplicaNotFound(Gpid::new(1, 0)))
        }
        async fn on_group_check(&self, _: GroupCheckRequest) -> Result<GroupCheckResponse, RpcError> {
            Err(RpcError::ReplicaNotFound(Gpid::new(1, 0)))
        }
        async fn on_learn(&self, request: LearnRequest) -> Result<LearnResponse, RpcError> {
            self.learn_requests.lock().push(request);
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
        async fn on_fetch_file(&self, _: FetchFileRequest) -> Result<FetchFileResponse, RpcError> {
            Ok(FetchFileResponse {
                err: ErrorCode::Ok,
                data: self.file_data.clone(),
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
    async fn learnee_serves_cache_and_checks_signature() {
        let dir = tempfile::tempdir().unwrap();
        let (mut replica, _client, mut events) = new_replica(test_context(dir.path(), ReplicationOptions::default()));
        become_single_primary(&mut replica);
        for i in 0..5 {
            write(&mut replica, &i.to_string());
        }
        settle_log_writes(&mut replica, &mut events).await;
        add_learner(&mut replica, 7);

        assert_eq!(learn(&mut replica, learn_request(8, 0)).await.err, ErrorCode::ObjectNotFound);

        let response = learn(&mut replica, learn_request(7, 2)).await;
        assert_eq!(response.err, ErrorCode::Ok);
        assert_eq!(response.learn_type, LearnType::Cache);
        assert_eq!(response.prepare_start_decree, 6);
        let decrees: Vec<Decree> = response.mutations.iter().map(|m| m.decree()).collect();
        assert_eq!(decrees, vec![3, 4, 5]);
        assert_eq!(
            replica.primary.learners[&NodeAddress::new("learner")].prepare_start_decree,
            6
        );
    }

    #[tokio::test]
    async fn learnee_falls_back_to_log_then_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = ReplicationOptions::default();
        options.max_mutation_count_in_prepare_list = Some(4);
        options.staleness_for_commit = Some(2);
        let (mut replica, _client, mut events) = new_replica(test_context(dir.path(), options));
        become_single_primary(&mut replica);
        for i in 0..10 {
            write(&mut replica, &i.to_string());
        }
        settle_log_writes(&mut replica, &mut events).await;
        add_learner(&mut replica, 1);
        assert!(replica.plist.min_decree() > 1);

        let response = learn(&mut replica, learn_request(1, 0)).await;
        assert_eq!(response.learn_type, LearnType::Log);
        assert_eq!(response.mutations.first().map(|m| m.decree()), Some(1));
        assert_eq!(response.to_decree_included, 10);

        // Once the log is gone the learner gets the checkpoint.
        replica.app.engine().sync_checkpoint().unwrap();
        let log = replica.private_log.clone().unwrap();
        log.on_partition_reset(replica.gpid, 10);
        let response = learn(&mut replica, learn_request(1, 0)).await;
        assert_eq!(response.learn_type, LearnType::App);
        assert_eq!(response.to_decree_included, 10);
        assert_eq!(response.files.len(), 1);
        assert!(!response.base_local_dir.is_empty());
    }

    #[tokio::test]
    async fn relearn_without_gap_copies_no_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = ReplicationOptions::default();
        options.max_mutation_count_in_prepare_list = Some(4);
        options.staleness_for_commit = Some(2);
        let (mut replica, _client, mut events) = new_replica(test_context(dir.path(), options));
        become_single_primary(&mut replica);
        for i in 0..10 {
            write(&mut replica, &i.to_string());
        }
        settle_log_writes(&mut replica, &mut events).await;
        replica.app.engine().sync_checkpoint().unwrap();
        add_learner(&mut replica, 1);

        let response = learn(&mut replica, learn_request(1, 10)).await;
        assert_eq!(response.err, ErrorCode::Ok);
        assert_ne!(response.learn_type, LearnType::App);
        assert!(response.mutations.is_empty());
        assert!(response.files.is_empty());
        assert_eq!(response.prepare_start_decree, 11);
    }

    #[tokio::test]
    async fn learnee_passes_learn_blob_to_engine() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = ReplicationOptions::default();
        options.max_mutation_count_in_prepare_list = Some(4);
        options.staleness_for_commit = Some(2);
        let (engines, seen) = blob_engines();
        let ctx = test_context_with(dir.path(), options, InProcessNetwork::new(), engines);
        let (mut replica, _client, mut events) = new_replica_of_type(ctx, BLOB_APP_TYPE);
        become_single_primary(&mut replica);
        for i in 0..10 {
            write(&mut replica, &i.to_string());
        }
        settle_log_writes(&mut replica, &mut events).await;
        replica.app.engine().sync_checkpoint().unwrap();
        replica.private_log.clone().unwrap().on_partition_reset(replica.gpid, 10);
        add_learner(&mut replica, 1);

        let mut request = learn_request(1, 0);
        request.app_specific_learn_request = Bytes::from_static(b"learn-blob");
        let response = learn(&mut replica, request).await;
        assert_eq!(response.learn_type, LearnType::App);
        assert_eq!(*seen.lock(), vec![Bytes::from_static(b"learn-blob")]);
    }

    #[tokio::test]
    async fn learner_sends_engine_learn_blob() {
        let dir = tempfile::tempdir().unwrap();
        let network = InProcessNetwork::new();
        let primary = FakePrimary::serve(&network, b"");
        let (engines, _seen) = blob_engines();
        let ctx = test_context_with(dir.path(), ReplicationOptions::default(), network, engines);
        let (mut replica, _client, mut events) = new_replica_of_type(ctx, BLOB_APP_TYPE);
        become_learner(&mut replica, 3);

        replica.init_learn();
        next_event(&mut events, |event| matches!(event, Event::LearnReply(_))).await;
        let requests = primary.learn_requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].signature, 3);
        assert_eq!(requests[0].app_specific_learn_request, Bytes::from_static(b"learn-blob"));
    }

    #[tokio::test]
    async fn corrupt_learned_file_restarts_learning() {
        async fn run(served: &'static [u8]) {
            let dir = tempfile::tempdir().unwrap();
            let network = InProcessNetwork::new();
            let _primary = FakePrimary::serve(&network, served);
            let ctx = test_context_with(
                dir.path(),
                ReplicationOptions::default(),
                network,
                StorageEngineRegistry::with_builtin_engines(),
            );
            let (mut replica, _client, mut events) = new_replica(ctx);
            become_learner(&mut replica, 3);
            replica.init_learn();
            let round = replica.learner.learning_round;

            let config = replica.config.clone();
            let mut response = LearnResponse::error(ErrorCode::Ok, config, NodeAddress::new("primary"));
            response.learn_type = LearnType::App;
            response.last_committed_decree = 5;
            response.to_decree_included = 5;
            response.base_local_dir = "/checkpoints".into();
            response.files = vec![RemoteFile {
                name: "checkpoint.5".into(),
                size: 5,
                crc32: crc32fast::hash(b"hello"),
            }];
            replica.on_learn_reply(LearnReply {
                signature: 3,
                result: Ok(response),
            });
            assert!(replica.learner.learning_round_in_flight);

            let fetched = match next_event(&mut events, |event| matches!(event, Event::LearnFilesFetched(_))).await {
                Event::LearnFilesFetched(fetched) => fetched,
                _ => unreachable!(),
            };
            assert_eq!(fetched.result, Err(ErrorCode::LearnFileFailed));
            replica.on_learn_files_fetched(fetched);
            assert_eq!(replica.learner.learner_status, LearnerStatus::LearningFailed);
            assert_eq!(replica.app.last_committed_decree(), 0);
            assert!(!replica.learner.learning_round_in_flight);

            replica.init_learn();
            assert!(replica.learner.learning_round_in_flight);
            assert_eq!(replica.learner.learning_round, round + 1);
        }

        // Checksum mismatch.
        run(b"hellx").await;
        // Size mismatch.
        run(b"hello!").await;
    }

    #[tokio::test]
    async fn learner_applies_cache_and_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let (mut replica, _client, _rx) = new_replica(test_context(dir.path(), ReplicationOptions::default()));
        let mut config = ReplicaConfiguration {
            pid: Gpid::new(1, 0),
            ballot: 1,
            primary: Some(NodeAddress::new("primary")),
            status: PartitionStatus::PotentialSecondary,
            learner_signature: 3,
        };
        assert!(replica.update_local_configuration(config.clone(), None));
        replica.learner.learning_round_in_flight = true;

        let mut response = LearnResponse::error(ErrorCode::Ok, config.clone(), NodeAddress::new("primary"));
        response.last_committed_decree = 2;
        response.prepare_start_decree = 4;
        response.to_decree_included = 3;
        response.mutations = (1..=3)
            .map(|d| Mutation::new(Gpid::new(1, 0), 1, d, d - 1, vec![put_update(&d.to_string(), "v")]))
            .collect();
        replica.on_learn_reply(LearnReply {
            signature: 3,
            result: Ok(response),
        });

        assert_eq!(replica.learner.learner_status, LearnerStatus::LearningSucceeded);
        assert_eq!(replica.app.last_committed_decree(), 2);
        assert_eq!(replica.plist.max_decree(), 3);

        // The next configuration makes it a secondary.
        config.status = PartitionStatus::Secondary;
        config.ballot = 2;
        let mut membership = PartitionConfiguration::new(Gpid::new(1, 0), 3);
        membership.ballot = 2;
        assert!(replica.update_local_configuration(config, Some(membership)));
        assert_eq!(replica.status(), PartitionStatus::Secondary);
    }
}
