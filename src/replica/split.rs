use crate::actor::{ActorClient, Event};
use crate::common::{Decree, Gpid, Mutation, PartitionConfiguration, PartitionStatus};
use crate::prepare_list::{CommitMode, PreparedMutation};
use crate::replica::replica::Replica;
use crate::replica::replica_api::{
    ChildSyncMessage, OpenReplicaError, ParentStateBundle, RegisterChildReply, ReplicaFault, SplitNotice,
};
use crate::storage::{store_app_info, ChkptApplyMode, LearnState};
use crate::transport::{AddChildRequest, GroupCheckRequest, RegisterChildRequest};
use crate::common::ErrorCode;
use bytes::Bytes;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

impl Replica {
    // -- Parent --

    pub(crate) fn on_add_child(&mut self, request: AddChildRequest) {
        if !matches!(self.status(), PartitionStatus::Primary | PartitionStatus::Secondary) {
            slog::warn!(self.logger, "Ignoring split to {} while {:?}", request.child_gpid, self.status());
            return;
        }
        if request.parent_config.ballot != self.ballot() {
            slog::warn!(
                self.logger,
                "Ignoring split to {}: ballot {} is not ours ({})",
                request.child_gpid,
                request.parent_config.ballot,
                self.ballot()
            );
            return;
        }
        if self.split.is_splitting() || request.child_gpid.partition_index < self.partition_count() {
            slog::info!(self.logger, "Ignoring split to {}: already splitting or split", request.child_gpid);
            return;
        }

        self.start_child(request.child_gpid, request.app.partition_count);
        if self.status() == PartitionStatus::Primary && self.split.is_splitting() {
            // Secondaries start their own children on the next group check.
            self.broadcast_group_check();
        }
    }

    fn on_group_check_child(&mut self, child: Gpid, partition_count: i32) {
        if !self.split.is_splitting() && child.partition_index >= self.partition_count() {
            self.start_child(child, partition_count);
        }
    }

    /// Secondary side of a group check: starts, finishes or drops the split the primary runs.
    pub(super) fn on_group_check_split_state(&mut self, request: &GroupCheckRequest) {
        if request.app.partition_count > self.partition_count() {
            if self.split.is_splitting() {
                self.on_split_registered(request.app.partition_count);
            } else {
                self.apply_app_info(&request.app);
            }
            return;
        }

        match request.child_gpid {
            Some(child) => self.on_group_check_child(child, request.app.partition_count * 2),
            None if self.split.is_splitting() => self.abort_split("primary is no longer splitting"),
            None => {}
        }
    }

    fn start_child(&mut self, child: Gpid, new_partition_count: i32) {
        let stub = match self.ctx.stub.upgrade() {
            Some(stub) => stub,
            None => return,
        };
        let mut child_app = self.app_info.clone();
        child_app.partition_count = new_partition_count.max(self.partition_count() * 2);

        let primary = self.config.primary.clone();
        let (client, learn_dir) = match stub.create_child_replica(child, child_app, self.gpid, self.ballot(), primary) {
            Ok(created) => created,
            Err(OpenReplicaError::AlreadyExists(_)) => {
                slog::info!(self.logger, "Child {} already exists", child);
                return;
            }
            Err(e) => {
                slog::warn!(self.logger, "Failed to create child {}: {}", child, e);
                return;
            }
        };
        self.split.child_gpid = Some(child);
        self.split.partition_count_before = self.partition_count();
        slog::info!(self.logger, "Started split to child {}", child);

        let bundle = match self.collect_parent_state(child, &learn_dir) {
            Ok(bundle) => bundle,
            Err(reason) => return self.abort_split(&reason),
        };
        let sender = spawn_child_forwarder(self.logger.clone(), client);
        if sender.send(ChildSyncMessage::ParentState(bundle)).is_err() {
            return self.abort_split("child is gone");
        }
        self.split.child_sender = Some(sender);
    }

    /// Checkpoint of the app staged in the child's learn dir, plus every committed mutation past it.
    fn collect_parent_state(&self, child: Gpid, learn_dir: &Path) -> Result<ParentStateBundle, String> {
        if learn_dir.exists() {
            fs::remove_dir_all(learn_dir).map_err(|e| e.to_string())?;
        }
        let checkpoint_decree = self
            .app
            .engine()
            .copy_checkpoint_to_dir(learn_dir)
            .map_err(|e| e.to_string())?;
        let mut checkpoint_files = Vec::new();
        for entry in fs::read_dir(learn_dir).map_err(|e| e.to_string())? {
            checkpoint_files.push(entry.map_err(|e| e.to_string())?.path());
        }
        checkpoint_files.sort();

        let committed = self.plist.last_committed_decree();
        let cache_start = self.plist.min_decree().max(checkpoint_decree + 1);
        let mut log_mutations = Vec::new();
        if checkpoint_decree + 1 < cache_start {
            let log = self
                .private_log
                .as_ref()
                .or_else(|| self.ctx.shared_log.as_ref())
                .ok_or_else(|| "no log to read committed mutations from".to_string())?;
            let state = log
                .get_learn_state(self.gpid, checkpoint_decree + 1)
                .map_err(|e| e.to_string())?;
            log_mutations = state
                .mutations
                .into_iter()
                .filter(|m| m.decree() < cache_start)
                .map(|m| m.for_partition(child))
                .collect();
            if log_mutations.len() as Decree != cache_start - checkpoint_decree - 1 {
                return Err(format!(
                    "log misses committed mutations between {} and {}",
                    checkpoint_decree, cache_start
                ));
            }
        }
        let cache_mutations = self
            .plist
            .mutations_from(cache_start)
            .into_iter()
            .filter(|m| m.decree() <= committed)
            .map(|m| Arc::new(m.for_partition(child)))
            .collect();

        Ok(ParentStateBundle {
            parent: self.gpid,
            checkpoint_decree,
            checkpoint_files,
            log_mutations,
            cache_mutations,
        })
    }

    /// Every mutation the parent executes also goes to its child, in order.
    pub(super) fn forward_to_child(&mut self, mutation: &Arc<Mutation>) {
        let (child, sender) = match (self.split.child_gpid, self.split.child_sender.as_ref()) {
            (Some(child), Some(sender)) => (child, sender),
            _ => return,
        };
        if sender
            .send(ChildSyncMessage::Mutation(Arc::new(mutation.for_partition(child))))
            .is_err()
        {
            self.abort_split("child stopped taking mutations");
        }
    }

    /// Once the child caught up, the primary blocks writes and waits for its prepare list to
    /// drain. The committed decree at that point is where parent and child must agree.
    pub(super) fn check_split_sync_point(&mut self) {
        if self.status() != PartitionStatus::Primary
            || !self.split.child_caught_up
            || self.split.sync_point.is_some()
            || self.plist.max_decree() != self.plist.last_committed_decree()
        {
            return;
        }

        let decree = self.plist.last_committed_decree();
        self.split.sync_point = Some(decree);
        slog::info!(self.logger, "Split sync point at decree {}", decree);
        let sent = self
            .split
            .child_sender
            .as_ref()
            .map_or(false, |sender| sender.send(ChildSyncMessage::SyncPoint(decree)).is_ok());
        if !sent {
            self.abort_split("child is gone");
        }
    }

    pub(crate) fn on_split_notice(&mut self, notice: SplitNotice) {
        match notice {
            SplitNotice::ChildCaughtUp { child, decree } => {
                if self.split.child_gpid != Some(child) {
                    return;
                }
                slog::info!(self.logger, "Child {} caught up to {}", child, decree);
                self.split.child_caught_up = true;
                if self.status() == PartitionStatus::Primary {
                    self.split.block_writes = true;
                    self.check_split_sync_point();
                }
            }
            SplitNotice::ChildSyncDone { child, decree } => {
                if self.split.child_gpid != Some(child) || self.split.sync_point != Some(decree) {
                    return;
                }
                self.register_child();
            }
            SplitNotice::ChildFailed { child, reason } => {
                if self.split.child_gpid == Some(child) {
                    self.abort_split(&reason);
                }
            }
        }
    }

    fn register_child(&mut self) {
        let child = match self.split.child_gpid {
            Some(child) => child,
            None => return,
        };
        if self.status() != PartitionStatus::Primary {
            return;
        }
        self.split.registering = true;

        let mut child_config = PartitionConfiguration::new(child, self.app_info.max_replica_count);
        child_config.ballot = self.ballot();
        child_config.primary = Some(self.ctx.address.clone());
        child_config.secondaries = self.primary.membership.secondaries.clone();
        child_config.last_committed_decree = self.plist.last_committed_decree();
        let request = RegisterChildRequest {
            app: self.app_info.clone(),
            parent_config: self.primary.membership.clone(),
            child_config,
            primary: self.ctx.address.clone(),
        };
        slog::info!(self.logger, "Registering child {} on meta server", child);

        let meta = self.ctx.meta.clone();
        self.spawn_for_event(async move {
            let result = meta.register_child(request).await;
            Event::RegisterChildReply(RegisterChildReply { child, result })
        });
    }

    pub(crate) fn on_register_child_reply(&mut self, reply: RegisterChildReply) {
        if self.split.child_gpid != Some(reply.child) || self.status() != PartitionStatus::Primary {
            return;
        }

        match reply.result {
            Ok(response) if response.err.is_ok() || response.err == ErrorCode::ChildRegistered => {
                self.on_split_registered(response.app.partition_count);
            }
            Ok(response) => self.abort_split(&format!("meta server refused child: {}", response.err)),
            Err(e) => {
                let delay = self.ctx.options.register_child_retry_interval;
                slog::warn!(self.logger, "Registering child failed, retrying in {:?}: {}", delay, e);
                self.spawn_for_event(async move {
                    tokio::time::sleep(delay).await;
                    Event::RegisterChildRetry
                });
            }
        }
    }

    pub(crate) fn on_register_child_retry(&mut self) {
        if self.split.registering {
            self.register_child();
        }
    }

    fn on_split_registered(&mut self, partition_count: i32) {
        slog::info!(
            self.logger,
            "Split done: partition count {} -> {}",
            self.split.partition_count_before,
            partition_count
        );
        self.app_info.partition_count = partition_count;
        if let Err(e) = store_app_info(&self.dir, &self.app_info) {
            slog::warn!(self.logger, "Failed to persist app info: {}", e);
        }
        let envs = self.app_info.envs.clone();
        self.apply_envs(&envs);
        self.split.clear_parent_side();
    }

    /// Drops the split. A child that was already created moves to ERROR.
    pub(super) fn abort_split(&mut self, reason: &str) {
        if let Some(child) = self.split.child_gpid {
            slog::warn!(self.logger, "Aborting split to {}: {}", child, reason);
            self.ctx
                .notify_replica(&self.logger, child, Event::SplitAborted(reason.to_string()));
        }
        self.split.clear_parent_side();
    }

    // -- Child --

    pub(crate) fn on_child_sync(&mut self, message: ChildSyncMessage) {
        if self.status() != PartitionStatus::PartitionSplit {
            slog::debug!(self.logger, "Ignoring parent state while {:?}", self.status());
            return;
        }

        let result = match message {
            ChildSyncMessage::ParentState(bundle) => self.apply_parent_state(bundle),
            ChildSyncMessage::Mutation(mutation) => self.apply_parent_mutation(mutation),
            ChildSyncMessage::SyncPoint(decree) => {
                if self.plist.last_committed_decree() == decree {
                    self.notify_parent(SplitNotice::ChildSyncDone {
                        child: self.gpid,
                        decree,
                    });
                    Ok(())
                } else {
                    Err(ReplicaFault::SplitFailed(format!(
                        "child committed {} at parent sync point {}",
                        self.plist.last_committed_decree(),
                        decree
                    )))
                }
            }
        };

        if let Err(fault) = result {
            self.notify_parent(SplitNotice::ChildFailed {
                child: self.gpid,
                reason: fault.to_string(),
            });
            self.handle_local_failure(fault);
        }
    }

    fn apply_parent_state(&mut self, bundle: ParentStateBundle) -> Result<(), ReplicaFault> {
        let state = LearnState {
            from_decree_excluded: 0,
            to_decree_included: bundle.checkpoint_decree,
            meta: Bytes::new(),
            files: bundle.checkpoint_files,
        };
        self.app
            .apply_checkpoint(ChkptApplyMode::Learn, &state)
            .map_err(|e| ReplicaFault::SplitFailed(e.to_string()))?;
        self.plist.reset(self.app.last_committed_decree());

        let mutations = bundle.log_mutations.into_iter().map(Arc::new).chain(bundle.cache_mutations);
        for mutation in mutations {
            self.apply_parent_mutation(mutation)?;
        }

        if let Err(e) = self.app.engine().sync_checkpoint() {
            slog::warn!(self.logger, "Checkpoint of child state failed: {}", e);
        }
        let ballot = self.ballot();
        self.app
            .update_init_info_ballot_and_decree(ballot)
            .map_err(|e| ReplicaFault::SplitFailed(e.to_string()))?;
        self.split.parent_state_applied = true;

        let decree = self.plist.last_committed_decree();
        slog::info!(self.logger, "Applied state of parent {} up to {}", bundle.parent, decree);
        self.notify_parent(SplitNotice::ChildCaughtUp {
            child: self.gpid,
            decree,
        });
        Ok(())
    }

    fn apply_parent_mutation(&mut self, mutation: Arc<Mutation>) -> Result<(), ReplicaFault> {
        let decree = mutation.decree();
        if decree <= self.plist.last_committed_decree() {
            return Ok(());
        }
        self.submit_to_logs(&mutation);

        let entry = PreparedMutation::new(mutation, true, true);
        let mut committed = self
            .plist
            .prepare(entry, PartitionStatus::PartitionSplit)
            .map_err(|e| ReplicaFault::SplitFailed(e.to_string()))?;
        committed.extend(
            self.plist
                .commit(decree, CommitMode::Hard)
                .map_err(|e| ReplicaFault::SplitFailed(e.to_string()))?,
        );
        self.execute_committed(committed);
        match &self.fault {
            Some(fault) => Err(fault.clone()),
            None => Ok(()),
        }
    }

    fn notify_parent(&self, notice: SplitNotice) {
        match self.split.parent_gpid {
            Some(parent) => self.ctx.notify_replica(&self.logger, parent, Event::SplitNotice(notice)),
            None => slog::warn!(self.logger, "No parent to notify of {:?}", notice),
        }
    }

    pub(crate) fn on_split_aborted(&mut self, reason: String) {
        if self.status() == PartitionStatus::PartitionSplit {
            self.handle_local_failure(ReplicaFault::SplitFailed(reason));
        }
    }
}

/// Feeds the child's actor in order without blocking the parent's event loop.
fn spawn_child_forwarder(logger: slog::Logger, child: ActorClient) -> mpsc::UnboundedSender<ChildSyncMessage> {
    let (sender, mut receiver) = mpsc::unbounded_channel();
    tokio::task::spawn(async move {
        while let Some(message) = receiver.recv().await {
            if child.notify(Event::ChildSync(message)).await.is_err() {
                slog::warn!(logger, "Child replica exited; stopped forwarding");
                break;
            }
        }
    });

    sender
}
