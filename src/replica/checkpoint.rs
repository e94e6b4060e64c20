use crate::actor::{Callback, Event};
use crate::common::{ErrorCode, PartitionStatus};
use crate::replica::learn::{describe_local_files, fetch_remote_files};
use crate::replica::replica::Replica;
use crate::replica::replica_api::{CopyCheckpointFetched, ReplicaFault};
use crate::storage::{AsyncCheckpointOutcome, ChkptApplyMode, LearnState, StorageError};
use crate::transport::{CopyCheckpointRequest, CopyCheckpointResponse, RpcError};
use bytes::Bytes;
use rand::seq::SliceRandom;
use tokio::time::Instant;

const CHECKPOINT_COPY_DIR_NAME: &str = "checkpoint.copy";

impl Replica {
    pub(super) fn on_checkpoint_timer(&mut self) {
        if !matches!(self.status(), PartitionStatus::Primary | PartitionStatus::Secondary) {
            return;
        }

        self.garbage_collect_private_log();
        self.trigger_checkpoint(false);
    }

    fn garbage_collect_private_log(&self) {
        let log = match self.private_log.clone() {
            Some(log) => log,
            None => return,
        };
        let gpid = self.gpid;
        let durable = self.app.last_durable_decree();
        let valid_start = self.app.init_info().init_offset_in_private_log;
        let reserve_size = self.ctx.options.log_private_reserve_max_size_bytes;
        let reserve_time = self.ctx.options.log_private_reserve_max_time;
        let logger = self.logger.clone();

        tokio::task::spawn_blocking(move || {
            match log.garbage_collection(gpid, durable, valid_start, reserve_size, reserve_time) {
                Ok(0) => {}
                Ok(removed) => {
                    slog::info!(logger, "Private log GC removed {} files below durable decree {}", removed, durable)
                }
                Err(e) => slog::warn!(logger, "Private log GC failed: {}", e),
            }
        });
    }

    /// Makes the app state durable. Engines that checkpoint in the background do so directly.
    /// Sync-only engines block while checkpointing, so a primary with secondaries copies one of
    /// their checkpoints instead. Anyone else checkpoints on a blocking thread and holds back
    /// applies until it ends.
    pub(super) fn trigger_checkpoint(&mut self, is_emergency: bool) {
        if self.checkpoint.checkpoint_is_running {
            return;
        }
        if self.app.last_committed_decree() == self.app.last_durable_decree() {
            return;
        }
        let is_emergency =
            is_emergency || self.checkpoint.last_checkpoint_time.elapsed() >= self.ctx.options.checkpoint_max_interval;

        let engine = self.app.engine().clone();
        if engine.supports_async_checkpoint() {
            self.checkpoint.checkpoint_is_running = true;
            self.spawn_for_event(async move {
                let result = tokio::task::spawn_blocking(move || engine.async_checkpoint(is_emergency))
                    .await
                    .unwrap_or_else(|e| Err(StorageError::AppFailure(e.to_string())));
                Event::AsyncCheckpointDone(result)
            });
            return;
        }

        match self.status() {
            PartitionStatus::Primary if !self.primary.membership.secondaries.is_empty() => {
                self.copy_checkpoint_from_secondary()
            }
            PartitionStatus::Primary | PartitionStatus::Secondary => {
                self.checkpoint.checkpoint_is_running = true;
                self.checkpoint.apply_deferred = true;
                self.spawn_for_event(async move {
                    let result = tokio::task::spawn_blocking(move || engine.sync_checkpoint())
                        .await
                        .unwrap_or_else(|e| Err(StorageError::AppFailure(e.to_string())));
                    Event::BackgroundCheckpointDone(result)
                });
            }
            _ => {}
        }
    }

    pub(crate) fn on_checkpoint_retry(&mut self, is_emergency: bool) {
        if matches!(self.status(), PartitionStatus::Primary | PartitionStatus::Secondary) {
            self.trigger_checkpoint(is_emergency);
        }
    }

    pub(crate) fn on_async_checkpoint_done(&mut self, result: Result<AsyncCheckpointOutcome, StorageError>) {
        self.checkpoint.checkpoint_is_running = false;
        match result {
            Ok(AsyncCheckpointOutcome::Done) => self.on_checkpoint_completed(),
            Ok(AsyncCheckpointOutcome::TryAgain) => {
                let delay = self.ctx.options.checkpoint_try_again_delay;
                slog::info!(self.logger, "Engine asked to retry checkpoint in {:?}", delay);
                self.spawn_for_event(async move {
                    tokio::time::sleep(delay).await;
                    Event::CheckpointRetry { is_emergency: true }
                });
            }
            Ok(outcome) => slog::debug!(self.logger, "Checkpoint skipped: {:?}", outcome),
            Err(e) => slog::warn!(self.logger, "Checkpoint failed: {}", e),
        }
    }

    pub(crate) fn on_background_checkpoint_done(&mut self, result: Result<(), StorageError>) {
        self.checkpoint.checkpoint_is_running = false;
        self.checkpoint.apply_deferred = false;
        match result {
            Ok(()) => self.on_checkpoint_completed(),
            Err(e) => slog::warn!(self.logger, "Background checkpoint failed: {}", e),
        }

        // Commits that arrived during the checkpoint.
        let committed = self.plist.last_committed_decree();
        if let Err(fault) = self.catch_up_app(committed) {
            self.handle_local_failure(fault);
        }
    }

    fn on_checkpoint_completed(&mut self) {
        self.checkpoint.last_checkpoint_time = Instant::now();
        let ballot = self.ballot();
        if let Err(e) = self.app.update_init_info_ballot_and_decree(ballot) {
            return self.handle_local_failure(ReplicaFault::CheckpointFailed(e.to_string()));
        }
        slog::info!(self.logger, "Checkpoint done at durable decree {}", self.app.last_durable_decree());
    }

    // -- Primary of a sync-only engine --

    fn copy_checkpoint_from_secondary(&mut self) {
        if self.checkpoint.copy_in_flight {
            return;
        }
        let source = match self.primary.membership.secondaries.choose(&mut rand::thread_rng()) {
            Some(source) => source.clone(),
            None => return,
        };

        self.checkpoint.copy_in_flight = true;
        let transport = self.ctx.transport.clone();
        let timeout = self.ctx.options.copy_checkpoint_timeout;
        let request = CopyCheckpointRequest { pid: self.gpid };
        let dest = self.app.learn_dir().join(CHECKPOINT_COPY_DIR_NAME);
        let logger = self.logger.new(slog::o!("Peer" => source.to_string()));
        self.spawn_for_event(async move {
            let copy = async move {
                let response = transport
                    .copy_checkpoint(&source, request)
                    .await
                    .map_err(|_| ErrorCode::NetworkFailure)?;
                if !response.err.is_ok() {
                    return Err(response.err);
                }
                let files = fetch_remote_files(transport, source, response.base_local_dir, response.files, dest).await?;
                Ok::<_, ErrorCode>((response.checkpoint_decree, files))
            };
            let result = match tokio::time::timeout(timeout, copy).await {
                Ok(result) => result,
                Err(elapsed) => {
                    slog::debug!(logger, "Checkpoint copy {}", RpcError::from(elapsed));
                    Err(ErrorCode::Timeout)
                }
            };
            Event::CopyCheckpointFetched(CopyCheckpointFetched { result })
        });
    }

    pub(crate) fn on_copy_checkpoint_fetched(&mut self, fetched: CopyCheckpointFetched) {
        self.checkpoint.copy_in_flight = false;
        if self.status() != PartitionStatus::Primary {
            return;
        }

        let (decree, files) = match fetched.result {
            Ok(copied) => copied,
            Err(err) => {
                slog::warn!(self.logger, "Copying checkpoint from secondary failed: {}", err);
                return;
            }
        };
        if decree <= self.app.last_durable_decree() {
            return;
        }
        let state = LearnState {
            from_decree_excluded: 0,
            to_decree_included: decree,
            meta: Bytes::new(),
            files,
        };
        match self.app.apply_checkpoint(ChkptApplyMode::Copy, &state) {
            Ok(()) => self.on_checkpoint_completed(),
            Err(e) => slog::warn!(self.logger, "Copied checkpoint {} not applied: {}", decree, e),
        }
    }

    /// Secondary hands its latest durable checkpoint to its primary.
    pub(crate) fn on_copy_checkpoint(
        &mut self,
        _request: CopyCheckpointRequest,
        callback: Callback<CopyCheckpointResponse, RpcError>,
    ) {
        if self.status() != PartitionStatus::Secondary {
            return callback.send(Ok(CopyCheckpointResponse::error(ErrorCode::InvalidState)));
        }
        if self.app.last_durable_decree() == 0 {
            return callback.send(Ok(CopyCheckpointResponse::error(ErrorCode::ObjectNotFound)));
        }

        let state = match self.app.engine().get_checkpoint(0, &[]) {
            Ok(state) => state,
            Err(e) => {
                slog::warn!(self.logger, "Cannot get checkpoint for primary: {}", e);
                return callback.send(Ok(CopyCheckpointResponse::error(ErrorCode::LocalAppFailure)));
            }
        };
        let logger = self.logger.clone();
        tokio::spawn(async move {
            let response = match describe_local_files(state.files).await {
                Ok((base_local_dir, files)) => CopyCheckpointResponse {
                    err: ErrorCode::Ok,
                    checkpoint_decree: state.to_decree_included,
                    base_local_dir,
                    files,
                },
                Err(e) => {
                    slog::warn!(logger, "Cannot describe checkpoint files: {}", e);
                    CopyCheckpointResponse::error(ErrorCode::LocalAppFailure)
                }
            };
            callback.send(Ok(response));
        });
    }
}
