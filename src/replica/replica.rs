use crate::actor::{Callback, Event, WeakActorClient};
use crate::common::{
    AppInfo, Ballot, Decree, Gpid, Mutation, PartitionConfiguration, PartitionStatus, ReplicaConfiguration,
    SplitStatus, UpdateRecord,
};
use crate::mutation_log::{LogWriter, MutationLog};
use crate::prepare_list::{PrepareList, PreparedMutation};
use crate::replica::context::ReplicaContext;
use crate::replica::replica_api::{
    ClientReadError, ClientReadInput, ClientReadOutput, ClientWriteError, ClientWriteOutput, LogAppended,
    OpenReplicaError, ReplicaFault, ReplicaStateSnapshot,
};
use crate::replica::states::{
    CheckpointContext, LogWriteContext, PotentialSecondaryContext, PrimaryContext, SplitContext, ThrottlingContext,
};
use crate::replica::write_queue::WriteQueue;
use crate::storage::{store_app_info, ReplicationApp, PRIVATE_LOG_DIR_NAME, WRITE_EMPTY_CODE};
use crate::throttling::ThrottlingDecision;
use crate::timers::{PeriodicTimerHandle, TimerTick};
use crate::transport::{ConfigType, PrepareAck};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

/// App env key that throttles writes per second.
pub const WRITE_THROTTLING_ENV_KEY: &str = "replica.write_throttling";
/// App env key that throttles written update bytes per second.
pub const WRITE_SIZE_THROTTLING_ENV_KEY: &str = "replica.write_throttling_by_size";
/// App env key that throttles reads per second.
pub const READ_THROTTLING_ENV_KEY: &str = "replica.read_throttling";

pub(crate) struct ReplicaConfig {
    pub(crate) logger: slog::Logger,
    pub(crate) ctx: Arc<ReplicaContext>,
    pub(crate) app_info: AppInfo,
    pub(crate) gpid: Gpid,
    pub(crate) dir: PathBuf,
    pub(crate) actor_client: WeakActorClient,
}

/// Replica is one copy of one partition. It only ever runs on its own actor's event loop, so
/// nothing in here is shared or locked.
pub(crate) struct Replica {
    pub(super) logger: slog::Logger,
    pub(super) ctx: Arc<ReplicaContext>,
    pub(super) gpid: Gpid,
    pub(super) app_info: AppInfo,
    pub(super) dir: PathBuf,
    pub(super) app: ReplicationApp,
    pub(super) private_log: Option<Arc<MutationLog>>,
    pub(super) private_log_writer: Option<LogWriter>,
    pub(super) log_writes: LogWriteContext,
    pub(super) plist: PrepareList,
    pub(super) config: ReplicaConfiguration,
    pub(super) actor_client: WeakActorClient,
    pub(super) primary: PrimaryContext,
    pub(super) learner: PotentialSecondaryContext,
    pub(super) split: SplitContext,
    pub(super) checkpoint: CheckpointContext,
    pub(super) write_queue: WriteQueue,
    pub(super) throttling: ThrottlingContext,
    pub(super) fault: Option<ReplicaFault>,
    _checkpoint_timer: PeriodicTimerHandle,
}

impl Replica {
    fn assemble(config: ReplicaConfig) -> Result<Self, OpenReplicaError> {
        let ctx = config.ctx;
        let engine = ctx
            .engines
            .create(&config.app_info.app_type, config.gpid, &config.dir.join(crate::storage::DATA_DIR_NAME))?;
        let app = ReplicationApp::new(config.logger.clone(), &config.dir, engine);

        let private_log = if ctx.options.log_private_enabled {
            let log = MutationLog::open(
                config.logger.new(slog::o!("Log" => "private")),
                &config.dir.join(PRIVATE_LOG_DIR_NAME),
                ctx.options.log_file_size_bytes,
            )?;
            Some(Arc::new(log))
        } else {
            None
        };
        let logger = &config.logger;
        let private_log_writer = private_log
            .clone()
            .map(|log| LogWriter::spawn(logger.new(slog::o!("Log" => "private")), log));

        let checkpoint_timer = PeriodicTimerHandle::spawn_timer_task(
            ctx.options.checkpoint_interval,
            config.actor_client.clone(),
            TimerTick::Checkpoint,
        );
        let mut throttling = ThrottlingContext::default();
        throttling.apply_envs(&config.logger, &config.app_info.envs, config.app_info.partition_count);

        Ok(Replica {
            logger: config.logger,
            gpid: config.gpid,
            app_info: config.app_info,
            dir: config.dir,
            app,
            private_log,
            private_log_writer,
            log_writes: LogWriteContext::default(),
            plist: PrepareList::new(0, ctx.options.max_mutation_count_in_prepare_list),
            config: ReplicaConfiguration {
                pid: config.gpid,
                ballot: 0,
                primary: None,
                status: PartitionStatus::Inactive,
                learner_signature: 0,
            },
            actor_client: config.actor_client,
            primary: PrimaryContext::new(PartitionConfiguration::new(config.gpid, 0)),
            learner: PotentialSecondaryContext::new(),
            split: SplitContext::default(),
            checkpoint: CheckpointContext::new(),
            write_queue: WriteQueue::new(ctx.options.batch_write_disabled),
            throttling,
            fault: None,
            _checkpoint_timer: checkpoint_timer,
            ctx,
        })
    }

    /// Creates a replica with empty state in `config.dir`, wiping whatever was there.
    pub(crate) fn create_new(config: ReplicaConfig) -> Result<Self, OpenReplicaError> {
        if config.dir.exists() {
            fs::remove_dir_all(&config.dir)?;
        }
        fs::create_dir_all(&config.dir)?;
        store_app_info(&config.dir, &config.app_info)?;

        let mut replica = Self::assemble(config)?;
        let gpid = replica.gpid;
        let shared_start = replica.ctx.shared_log.as_ref().map_or(0, |log| log.end_offset());
        let private_start = replica.private_log.as_ref().map_or(0, |log| log.end_offset());
        if let Some(log) = replica.ctx.shared_log.as_ref() {
            log.set_valid_start_offset(gpid, shared_start);
        }
        if let Some(log) = replica.private_log.as_ref() {
            log.set_valid_start_offset(gpid, private_start);
        }
        replica.app.open_new_internal(0, shared_start, private_start)?;

        slog::info!(replica.logger, "Created new replica");
        Ok(replica)
    }

    /// Reopens a replica from its directory and replays its log past the last checkpoint. With the
    /// private log disabled the node hands in this replica's part of the shared log.
    pub(crate) fn open(config: ReplicaConfig, shared_log_mutations: Vec<Mutation>) -> Result<Self, OpenReplicaError> {
        let mut replica = Self::assemble(config)?;
        replica.app.open_internal()?;

        let gpid = replica.gpid;
        let info = replica.app.init_info().clone();
        if let Some(log) = replica.ctx.shared_log.as_ref() {
            log.set_valid_start_offset(gpid, info.init_offset_in_shared_log);
        }
        replica.config.ballot = info.init_ballot;
        replica.plist.reset(replica.app.last_committed_decree());

        let mutations = match replica.private_log.as_ref() {
            Some(log) => {
                log.set_valid_start_offset(gpid, info.init_offset_in_private_log);
                let mut mutations = Vec::new();
                log.replay(|mutation| {
                    if mutation.pid() == gpid && mutation.header.log_offset >= info.init_offset_in_private_log {
                        mutations.push(mutation);
                    }
                })?;
                mutations
            }
            None => shared_log_mutations
                .into_iter()
                .filter(|m| m.pid() == gpid && m.header.log_offset >= info.init_offset_in_shared_log)
                .collect(),
        };
        replica.replay(mutations);

        if !replica.check_state_completeness() {
            return Err(OpenReplicaError::Inconsistent(format!(
                "max prepared {} / committed {} / durable {}",
                replica.plist.max_decree(),
                replica.plist.last_committed_decree(),
                replica.app.last_durable_decree()
            )));
        }

        slog::info!(
            replica.logger,
            "Opened replica: ballot {}, last committed decree {}, last durable decree {}, max prepared decree {}",
            replica.config.ballot,
            replica.plist.last_committed_decree(),
            replica.app.last_durable_decree(),
            replica.plist.max_decree()
        );
        Ok(replica)
    }

    /// Child of a split. Starts in `PARTITION_SPLIT` and waits for its parent's state.
    pub(crate) fn create_child(
        config: ReplicaConfig,
        parent: Gpid,
        ballot: Ballot,
        primary: Option<crate::common::NodeAddress>,
    ) -> Result<Self, OpenReplicaError> {
        let mut replica = Self::create_new(config)?;
        replica.config.ballot = ballot;
        replica.config.primary = primary;
        replica.config.status = PartitionStatus::PartitionSplit;
        replica.split.parent_gpid = Some(parent);
        if let Err(e) = replica.app.update_init_info_ballot_and_decree(ballot) {
            slog::warn!(replica.logger, "Failed to persist child ballot: {}", e);
        }

        slog::info!(replica.logger, "Initialized as split child of {} with ballot {}", parent, ballot);
        Ok(replica)
    }

    fn replay(&mut self, mutations: Vec<Mutation>) {
        let count = mutations.len();
        for mutation in mutations {
            if mutation.decree() <= self.plist.last_committed_decree() {
                continue;
            }
            if mutation.ballot() > self.config.ballot {
                self.config.ballot = mutation.ballot();
            }

            let decree = mutation.decree();
            let entry = PreparedMutation::new(Arc::new(mutation), true, true);
            let committed = match self.plist.prepare(entry, PartitionStatus::Inactive) {
                Ok(committed) => committed,
                Err(e) => {
                    slog::warn!(self.logger, "Stopped log replay at decree {}: {}", decree, e);
                    break;
                }
            };
            if !self.apply_replayed(committed) {
                break;
            }
        }

        // Anything past a hole stays for learning to fill in.
        if self.plist.last_committed_decree() != self.app.last_committed_decree() {
            slog::warn!(
                self.logger,
                "Log replay could not reach committed decree {}; restarting prepare list at {}",
                self.plist.last_committed_decree(),
                self.app.last_committed_decree()
            );
            self.plist.reset(self.app.last_committed_decree());
        }

        slog::info!(self.logger, "Replayed {} logged mutations", count);
    }

    fn apply_replayed(&mut self, committed: Vec<Arc<Mutation>>) -> bool {
        for mutation in committed {
            if mutation.decree() <= self.app.last_committed_decree() {
                continue;
            }
            if let Err(e) = self.app.apply_mutation(&mutation) {
                slog::warn!(self.logger, "Stopped log replay, cannot apply {}: {}", mutation.decree(), e);
                return false;
            }
        }

        true
    }

    /// `max_prepared >= last_committed >= last_durable`
    pub(super) fn check_state_completeness(&self) -> bool {
        self.plist.max_decree() >= self.plist.last_committed_decree()
            && self.plist.last_committed_decree() >= self.app.last_durable_decree()
    }

    // -- Accessors --

    pub(super) fn status(&self) -> PartitionStatus {
        self.config.status
    }

    pub(super) fn ballot(&self) -> Ballot {
        self.config.ballot
    }

    pub(super) fn partition_count(&self) -> i32 {
        self.app_info.partition_count
    }

    pub(super) fn last_committed_decree(&self) -> Decree {
        self.plist.last_committed_decree()
    }

    pub(super) fn prepare_ack(&self, err: crate::common::ErrorCode, decree: Decree) -> PrepareAck {
        PrepareAck {
            pid: self.gpid,
            err,
            ballot: self.config.ballot,
            decree,
            last_committed_decree_in_app: self.app.last_committed_decree(),
            last_committed_decree_in_prepare_list: self.plist.last_committed_decree(),
        }
    }

    pub(super) fn empty_update() -> UpdateRecord {
        UpdateRecord {
            code: WRITE_EMPTY_CODE,
            data: Bytes::new(),
        }
    }

    /// Runs `task` off the event loop and feeds the event it produces back to this replica.
    pub(super) fn spawn_for_event<F>(&self, task: F)
    where
        F: Future<Output = Event> + Send + 'static,
    {
        let actor = self.actor_client.clone();
        let logger = self.logger.clone();
        tokio::task::spawn(async move {
            let event = task.await;
            if actor.notify(event).await.is_err() {
                slog::debug!(logger, "Replica exited before a background result came back");
            }
        });
    }

    pub(crate) fn on_timer(&mut self, tick: TimerTick) {
        match tick {
            TimerTick::GroupCheck => self.broadcast_group_check(),
            TimerTick::Checkpoint => self.on_checkpoint_timer(),
        }
    }

    // -- Configuration --

    /// Moves this replica to `new`. Returns false when the change is refused: a lower ballot, a
    /// replica in ERROR, or a transition that needs learning first.
    pub(super) fn update_local_configuration(
        &mut self,
        new: ReplicaConfiguration,
        membership: Option<PartitionConfiguration>,
    ) -> bool {
        let old_status = self.config.status;
        let old_ballot = self.config.ballot;
        if new.ballot < old_ballot {
            slog::warn!(self.logger, "Refusing configuration with ballot {} < {}", new.ballot, old_ballot);
            return false;
        }
        if !self.is_transition_allowed(old_status, new.status) {
            slog::warn!(
                self.logger,
                "Refusing status transition {:?} -> {:?} (ballot {} -> {})",
                old_status,
                new.status,
                old_ballot,
                new.ballot
            );
            return false;
        }

        if old_status == PartitionStatus::Primary && new.status != PartitionStatus::Primary {
            self.leave_primary(new.status);
        }
        if old_status == PartitionStatus::PotentialSecondary && new.status != PartitionStatus::PotentialSecondary {
            self.reject_held_prepares();
            self.learner.reset();
        }
        if new.status != old_status && self.split.is_splitting() && new.status != PartitionStatus::Secondary {
            self.abort_split("partition status changed");
        }
        if old_status == PartitionStatus::PartitionSplit && new.status != PartitionStatus::PartitionSplit {
            self.split.parent_gpid = None;
        }

        let signature = new.learner_signature;
        self.config = new;
        if self.config.ballot != old_ballot {
            if let Err(e) = self.app.update_init_info_ballot_and_decree(self.config.ballot) {
                slog::warn!(self.logger, "Failed to persist ballot {}: {}", self.config.ballot, e);
            }
        }

        match self.config.status {
            PartitionStatus::Primary => self.on_primary_configuration(old_status, old_ballot, membership),
            PartitionStatus::PotentialSecondary => {
                if old_status != PartitionStatus::PotentialSecondary || self.learner.learning_version != signature {
                    self.reject_held_prepares();
                    self.learner.reset();
                    self.learner.start(signature);
                }
            }
            _ => {}
        }

        if old_status != self.config.status || old_ballot != self.config.ballot {
            slog::info!(
                self.logger,
                "Status {:?} -> {:?}, ballot {} -> {}",
                old_status,
                self.config.status,
                old_ballot,
                self.config.ballot
            );
        }
        true
    }

    fn is_transition_allowed(&self, from: PartitionStatus, to: PartitionStatus) -> bool {
        use PartitionStatus::*;
        match (from, to) {
            (Error, _) => false,
            (_, Error) | (_, Inactive) => true,
            (Inactive, Primary) | (Inactive, PotentialSecondary) | (Inactive, PartitionSplit) => true,
            (Primary, Primary) | (Primary, Secondary) => true,
            (Secondary, Primary) | (Secondary, Secondary) | (Secondary, PotentialSecondary) => true,
            (PotentialSecondary, PotentialSecondary) => true,
            (PotentialSecondary, Secondary) => {
                self.learner.learner_status == crate::common::LearnerStatus::LearningSucceeded
            }
            (PartitionSplit, Primary) | (PartitionSplit, PotentialSecondary) | (PartitionSplit, PartitionSplit) => {
                true
            }
            // A child that caught up with its parent joins the child group directly.
            (PartitionSplit, Secondary) => self.split.parent_state_applied,
            _ => false,
        }
    }

    fn on_primary_configuration(
        &mut self,
        old_status: PartitionStatus,
        old_ballot: Ballot,
        membership: Option<PartitionConfiguration>,
    ) {
        let mut membership = membership.unwrap_or_else(|| {
            let mut membership = self.primary.membership.clone();
            membership.pid = self.gpid;
            membership.max_replica_count = self.app_info.max_replica_count;
            membership
        });
        membership.ballot = self.config.ballot;
        membership.primary = Some(self.ctx.address.clone());

        if old_status != PartitionStatus::Primary {
            self.primary = PrimaryContext::new(membership);
            self.primary.last_prepare_decree_on_new_primary = self.plist.max_decree();
            self.primary.group_check_timer = Some(PeriodicTimerHandle::spawn_timer_task(
                self.ctx.options.group_check_interval,
                self.actor_client.clone(),
                TimerTick::GroupCheck,
            ));
        } else {
            self.primary.membership = membership;
            let members = self.primary.membership.secondaries.clone();
            self.primary.learners.retain(|node, _| !members.contains(node));
            let learners: Vec<_> = self.primary.learners.keys().cloned().collect();
            self.primary
                .prepare_senders
                .retain(|node, _| members.contains(node) || learners.contains(node));
        }

        if self.config.ballot != old_ballot || old_status != PartitionStatus::Primary {
            self.reprepare_uncommitted();
        }
    }

    fn leave_primary(&mut self, new_status: PartitionStatus) {
        for callback in self.primary.reset() {
            callback.send(Err(ClientWriteError::InvalidState(new_status)));
        }
        for write in self.write_queue.drain_all() {
            write.callback.send(Err(ClientWriteError::InvalidState(new_status)));
        }
    }

    fn reject_held_prepares(&mut self) {
        for (request, callback) in std::mem::take(&mut self.learner.held_prepares) {
            let ack = self.prepare_ack(crate::common::ErrorCode::InvalidState, request.mutation.decree());
            callback.send(Ok(ack));
        }
    }

    // -- Execution --

    /// Applies freshly committed mutations in order and completes everything waiting on them.
    pub(super) fn execute_committed(&mut self, committed: Vec<Arc<Mutation>>) {
        if committed.is_empty() {
            return;
        }
        for mutation in committed {
            if let Err(fault) = self.execute_mutation(&mutation) {
                self.handle_local_failure(fault);
                return;
            }
        }

        if self.status() == PartitionStatus::Primary {
            self.check_possible_work();
            self.check_split_sync_point();
        }
    }

    fn execute_mutation(&mut self, mutation: &Arc<Mutation>) -> Result<(), ReplicaFault> {
        let decree = mutation.decree();
        if !self.checkpoint.apply_deferred {
            self.catch_up_app(decree - 1)?;
            if decree > self.app.last_committed_decree() {
                self.app.apply_mutation(mutation).map_err(|e| ReplicaFault::ApplyFailed {
                    decree,
                    reason: e.to_string(),
                })?;
            }
        }

        if self.status() == PartitionStatus::Primary {
            if let Some(pending) = self.primary.pending.remove(&decree) {
                for callback in pending.callbacks {
                    callback.send(Ok(ClientWriteOutput {
                        ballot: mutation.ballot(),
                        decree,
                    }));
                }
            }
        }
        self.forward_to_child(mutation);

        Ok(())
    }

    /// Applies committed decrees the app has not seen yet, up to `upto`. They come from the prepare
    /// list, or from the log once the prepare list moved past them.
    pub(super) fn catch_up_app(&mut self, upto: Decree) -> Result<(), ReplicaFault> {
        // Decrees the prepare list lost, read from the log in one pass on first need.
        let mut logged: Option<BTreeMap<Decree, Mutation>> = None;
        while self.app.last_committed_decree() < upto {
            let decree = self.app.last_committed_decree() + 1;
            let mutation = match self.plist.get_mutation_by_decree(decree) {
                Some(mutation) => mutation,
                None => {
                    if logged.is_none() {
                        logged = Some(self.read_logged_mutations(decree)?);
                    }
                    logged
                        .as_mut()
                        .and_then(|logged| logged.remove(&decree))
                        .map(Arc::new)
                        .ok_or_else(|| ReplicaFault::ApplyFailed {
                            decree,
                            reason: "missing from prepare list and log".into(),
                        })?
                }
            };
            self.app.apply_mutation(&mutation).map_err(|e| ReplicaFault::ApplyFailed {
                decree,
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }

    fn read_logged_mutations(&self, from: Decree) -> Result<BTreeMap<Decree, Mutation>, ReplicaFault> {
        let missing = |reason: String| ReplicaFault::ApplyFailed { decree: from, reason };
        let log = self.private_log.as_ref().or_else(|| self.ctx.shared_log.as_ref());
        let log = log.ok_or_else(|| missing("no log to read it from".into()))?;
        let state = log
            .get_learn_state(self.gpid, from)
            .map_err(|e| missing(e.to_string()))?;
        Ok(state.mutations.into_iter().map(|m| (m.decree(), m)).collect())
    }

    /// Hands `mutation` to every enabled log. The outcome comes back as `Event::LogAppended`.
    pub(super) fn submit_to_logs(&mut self, mutation: &Mutation) {
        let mut pending = Vec::with_capacity(2);
        if let Some(writer) = self.private_log_writer.as_ref() {
            pending.push(writer.submit(mutation.clone()));
        }
        if let Some(writer) = self.ctx.shared_log_writer.as_ref() {
            pending.push(writer.submit(mutation.clone()));
        }

        self.log_writes.in_flight += 1;
        let decree = mutation.decree();
        let ballot = mutation.ballot();
        self.spawn_for_event(async move {
            let mut result = Ok(());
            for done in pending {
                let appended = match done.await {
                    Ok(appended) => appended.map(|_| ()).map_err(|e| e.to_string()),
                    Err(_) => Err("log writer stopped".to_string()),
                };
                if let Err(reason) = appended {
                    result = Err(reason);
                }
            }
            Event::LogAppended(LogAppended { decree, ballot, result })
        });
    }

    // -- Failures --

    /// Moves the replica to ERROR. A primary also asks the meta server to take it out of the group.
    pub(super) fn handle_local_failure(&mut self, fault: ReplicaFault) {
        if self.status() == PartitionStatus::Error {
            return;
        }
        slog::error!(self.logger, "Local failure, replica moves to ERROR: {}", fault);

        if self.status() == PartitionStatus::Primary {
            let mut config = self.primary.membership.clone();
            config.ballot += 1;
            config.primary = None;
            let address = self.ctx.address.clone();
            self.send_config_update_to_meta(ConfigType::DowngradeToInactive, address, config);
        }
        self.fault = Some(fault);

        let config = ReplicaConfiguration {
            status: PartitionStatus::Error,
            ..self.config.clone()
        };
        self.update_local_configuration(config, None);
    }

    // -- Reads --

    pub(crate) fn client_read(
        &mut self,
        input: ClientReadInput,
        callback: Callback<ClientReadOutput, ClientReadError>,
    ) {
        if self.status() != PartitionStatus::Primary {
            return callback.send(Err(ClientReadError::InvalidState(self.status())));
        }

        match self.throttling.read_qps.control(1) {
            ThrottlingDecision::Pass => callback.send(self.local_read(input)),
            ThrottlingDecision::Delay(delay) => {
                slog::debug!(self.logger, "Delaying client read by {:?}", delay);
                self.spawn_for_event(async move {
                    tokio::time::sleep(delay).await;
                    Event::DelayedClientRead(input, callback)
                });
            }
            ThrottlingDecision::Reject(delay) => {
                slog::debug!(self.logger, "Rejecting client read after {:?}", delay);
                tokio::task::spawn(async move {
                    tokio::time::sleep(delay).await;
                    callback.send(Err(ClientReadError::Busy));
                });
            }
        }
    }

    /// A read that already sat out its throttling delay.
    pub(crate) fn delayed_client_read(
        &mut self,
        input: ClientReadInput,
        callback: Callback<ClientReadOutput, ClientReadError>,
    ) {
        if self.status() != PartitionStatus::Primary {
            return callback.send(Err(ClientReadError::InvalidState(self.status())));
        }
        callback.send(self.local_read(input));
    }

    pub(crate) fn local_read(&mut self, input: ClientReadInput) -> Result<ClientReadOutput, ClientReadError> {
        let value = self.app.engine().query(&input.key)?;
        Ok(ClientReadOutput { value })
    }

    // -- Admin --

    pub(crate) fn snapshot(&self) -> ReplicaStateSnapshot {
        let is_primary = self.status() == PartitionStatus::Primary;
        ReplicaStateSnapshot {
            pid: self.gpid,
            status: self.status(),
            ballot: self.ballot(),
            primary: self.config.primary.clone(),
            secondaries: if is_primary {
                self.primary.membership.secondaries.clone()
            } else {
                Vec::new()
            },
            learners: if is_primary {
                let mut learners: Vec<_> = self.primary.learners.keys().cloned().collect();
                learners.sort();
                learners
            } else {
                Vec::new()
            },
            last_committed_decree: self.plist.last_committed_decree(),
            last_prepared_decree: self.plist.last_prepared_decree(),
            max_prepared_decree: self.plist.max_decree(),
            app_last_committed_decree: self.app.last_committed_decree(),
            last_durable_decree: self.app.last_durable_decree(),
            learner_status: if self.status() == PartitionStatus::PotentialSecondary {
                Some(self.learner.learner_status)
            } else {
                None
            },
            split_status: if self.split.is_splitting() {
                SplitStatus::Splitting
            } else {
                SplitStatus::NotSplit
            },
            partition_count: self.partition_count(),
            write_throttling_enabled: self.throttling.write_qps.is_enabled() || self.throttling.write_size.is_enabled(),
            read_throttling_enabled: self.throttling.read_qps.is_enabled(),
            fault: self.fault.clone(),
        }
    }

    pub(crate) fn apply_envs(&mut self, envs: &BTreeMap<String, String>) {
        self.app_info.envs = envs.clone();
        let partition_count = self.partition_count();
        self.throttling.apply_envs(&self.logger, envs, partition_count);
    }

    /// Hands back the private log writer so the caller can wait for its queued appends.
    pub(crate) fn close(&mut self) -> Option<LogWriter> {
        let status = self.status();
        self.leave_primary(PartitionStatus::Inactive);
        self.reject_held_prepares();
        if self.split.is_splitting() {
            self.abort_split("replica closed");
        }
        if let Err(e) = self.app.close(false) {
            slog::warn!(self.logger, "Failed to close storage engine: {}", e);
        }

        slog::info!(self.logger, "Closed replica in status {:?}", status);
        self.private_log_writer.take()
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use crate::actor::{ActorClient, Event};
    use crate::api::ReplicationOptionsValidated;
    use crate::common::NodeAddress;
    use crate::replica_stub::ReplicaStub;
    use crate::storage::{StorageEngineRegistry, SIMPLE_KV_APP_TYPE};
    use crate::transport::{
        ConfigUpdateRequest, ConfigUpdateResponse, InProcessNetwork, MetaServerClient, RegisterChildRequest,
        RegisterChildResponse, RpcError,
    };
    use crate::ReplicationOptions;
    use std::convert::TryFrom;
    use std::path::Path;
    use std::sync::Weak;
    use tokio::sync::mpsc;

    /// Meta server that refuses everything. Enough for replicas that never reconfigure.
    pub(crate) struct UnreachableMeta;

    #[async_trait::async_trait]
    impl MetaServerClient for UnreachableMeta {
        async fn update_partition_configuration(
            &self,
            _request: ConfigUpdateRequest,
        ) -> Result<ConfigUpdateResponse, RpcError> {
            Err(RpcError::Unreachable(NodeAddress::new("meta")))
        }

        async fn register_child(&self, _request: RegisterChildRequest) -> Result<RegisterChildResponse, RpcError> {
            Err(RpcError::Unreachable(NodeAddress::new("meta")))
        }
    }

    pub(crate) fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    pub(crate) fn test_context(root: &Path, options: ReplicationOptions) -> Arc<ReplicaContext> {
        test_context_with(
            root,
            options,
            InProcessNetwork::new(),
            StorageEngineRegistry::with_builtin_engines(),
        )
    }

    /// A context whose peers live on `network` and whose apps come from `engines`.
    pub(crate) fn test_context_with(
        root: &Path,
        options: ReplicationOptions,
        network: Arc<InProcessNetwork>,
        engines: StorageEngineRegistry,
    ) -> Arc<ReplicaContext> {
        Arc::new(ReplicaContext {
            address: NodeAddress::new("node-1"),
            root_dir: root.to_path_buf(),
            options: ReplicationOptionsValidated::try_from(options).unwrap(),
            transport: network,
            meta: Arc::new(UnreachableMeta),
            shared_log: None,
            shared_log_writer: None,
            engines,
            stub: Weak::<ReplicaStub>::new(),
        })
    }

    /// A replica outside any actor. The returned receiver collects the events it schedules.
    pub(crate) fn new_replica(ctx: Arc<ReplicaContext>) -> (Replica, ActorClient, mpsc::Receiver<Event>) {
        new_replica_of_type(ctx, SIMPLE_KV_APP_TYPE)
    }

    pub(crate) fn new_replica_of_type(
        ctx: Arc<ReplicaContext>,
        app_type: &str,
    ) -> (Replica, ActorClient, mpsc::Receiver<Event>) {
        let (client, rx) = ActorClient::new(100);
        let gpid = Gpid::new(1, 0);
        let replica = Replica::create_new(ReplicaConfig {
            logger: test_logger(),
            dir: ctx.root_dir.join(format!("1.0.{}", app_type)),
            ctx,
            app_info: AppInfo::new(1, "test", app_type, 1, 3),
            gpid,
            actor_client: client.weak(),
        })
        .unwrap();

        (replica, client, rx)
    }

    /// Feeds `replica` the background results it scheduled for itself until `done` holds. Other
    /// events are dropped.
    pub(crate) async fn pump_events<F>(replica: &mut Replica, events: &mut mpsc::Receiver<Event>, done: F)
    where
        F: Fn(&Replica) -> bool,
    {
        while !done(replica) {
            let event = tokio::time::timeout(std::time::Duration::from_secs(10), events.recv())
                .await
                .expect("timed out waiting for replica events")
                .expect("replica event queue closed");
            match event {
                Event::LogAppended(appended) => replica.on_log_appended(appended),
                Event::BackgroundCheckpointDone(result) => replica.on_background_checkpoint_done(result),
                Event::AsyncCheckpointDone(result) => replica.on_async_checkpoint_done(result),
                _ => {}
            }
        }
    }

    /// Waits until every log write `replica` started came back.
    pub(crate) async fn settle_log_writes(replica: &mut Replica, events: &mut mpsc::Receiver<Event>) {
        pump_events(replica, events, |replica| replica.log_writes.in_flight == 0).await
    }

    /// Makes `replica` the primary of a group without secondaries.
    pub(crate) fn become_single_primary(replica: &mut Replica) {
        let mut membership = PartitionConfiguration::new(replica.gpid, 3);
        membership.ballot = replica.ballot() + 1;
        membership.primary = Some(replica.ctx.address.clone());
        let config = ReplicaConfiguration {
            pid: replica.gpid,
            ballot: membership.ballot,
            primary: membership.primary.clone(),
            status: PartitionStatus::Primary,
            learner_signature: 0,
        };
        assert!(replica.update_local_configuration(config, Some(membership)));
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;
    use crate::common::ErrorCode;
    use crate::replica::replica_api::ClientWriteInput;
    use crate::storage::put_update;
    use crate::ReplicationOptions;
    use tokio::sync::{mpsc, oneshot};

    fn write(
        replica: &mut Replica,
        key: &str,
        value: &str,
    ) -> oneshot::Receiver<Result<ClientWriteOutput, ClientWriteError>> {
        let (tx, rx) = oneshot::channel();
        replica.client_write(
            ClientWriteInput {
                updates: vec![put_update(key, value)],
            },
            Callback(tx),
        );
        rx
    }

    fn read(replica: &mut Replica, key: &str) -> Option<Bytes> {
        replica
            .local_read(ClientReadInput {
                key: Bytes::copy_from_slice(key.as_bytes()),
            })
            .unwrap()
            .value
    }

    #[tokio::test]
    async fn single_primary_commits_on_its_own() {
        let dir = tempfile::tempdir().unwrap();
        let (mut replica, _client, mut events) =
            new_replica(test_context(dir.path(), ReplicationOptions::default()));

        let mut rx = write(&mut replica, "k", "v0");
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(ClientWriteError::InvalidState(PartitionStatus::Inactive))
        ));

        become_single_primary(&mut replica);
        for i in 1..=3 {
            let mut rx = write(&mut replica, "k", &format!("v{}", i));
            // Nothing commits before it is on disk.
            assert!(rx.try_recv().is_err());
            assert_eq!(replica.last_committed_decree(), i - 1);
            settle_log_writes(&mut replica, &mut events).await;
            assert_eq!(rx.try_recv().unwrap().unwrap(), ClientWriteOutput { ballot: 1, decree: i });
        }

        assert_eq!(replica.last_committed_decree(), 3);
        assert_eq!(read(&mut replica, "k"), Some(Bytes::from("v3")));
        assert!(replica.check_state_completeness());
    }

    #[tokio::test]
    async fn reopen_replays_private_log() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path(), ReplicationOptions::default());
        {
            let (mut replica, _client, mut events) = new_replica(ctx.clone());
            become_single_primary(&mut replica);
            for i in 1..=5 {
                write(&mut replica, &format!("k{}", i), "v");
            }
            settle_log_writes(&mut replica, &mut events).await;
            if let Some(writer) = replica.close() {
                writer.flush().await;
            }
        }

        let (client, _rx) = crate::actor::ActorClient::new(10);
        let replica = Replica::open(
            ReplicaConfig {
                logger: test_logger(),
                ctx: ctx.clone(),
                app_info: AppInfo::new(1, "test", crate::storage::SIMPLE_KV_APP_TYPE, 1, 3),
                gpid: Gpid::new(1, 0),
                dir: dir.path().join("1.0.simple_kv"),
                actor_client: client.weak(),
            },
            Vec::new(),
        )
        .unwrap();

        // The last mutation was never piggybacked as committed, so it stays prepared.
        assert_eq!(replica.status(), PartitionStatus::Inactive);
        assert_eq!(replica.ballot(), 1);
        assert_eq!(replica.app.last_committed_decree(), 4);
        assert_eq!(replica.plist.max_decree(), 5);
    }

    #[tokio::test]
    async fn error_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let (mut replica, _client, _rx) = new_replica(test_context(dir.path(), ReplicationOptions::default()));
        become_single_primary(&mut replica);

        replica.handle_local_failure(ReplicaFault::ApplyFailed {
            decree: 1,
            reason: "disk on fire".into(),
        });
        assert_eq!(replica.status(), PartitionStatus::Error);
        assert!(replica.snapshot().fault.is_some());

        let config = ReplicaConfiguration {
            ballot: 10,
            status: PartitionStatus::Primary,
            ..replica.config.clone()
        };
        assert!(!replica.update_local_configuration(config, None));
        assert_eq!(replica.status(), PartitionStatus::Error);

        let ack = replica.prepare_ack(ErrorCode::InvalidState, 1);
        assert_eq!(ack.ballot, 1);
    }

    #[tokio::test]
    async fn throttling_env_is_applied_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let (mut replica, _client, _rx) = new_replica(test_context(dir.path(), ReplicationOptions::default()));

        let mut envs = BTreeMap::new();
        envs.insert(WRITE_THROTTLING_ENV_KEY.to_string(), "100*delay*10".to_string());
        replica.apply_envs(&envs);
        assert!(replica.snapshot().write_throttling_enabled);

        envs.insert(WRITE_THROTTLING_ENV_KEY.to_string(), "garbage".to_string());
        replica.apply_envs(&envs);
        assert!(replica.snapshot().write_throttling_enabled);

        replica.apply_envs(&BTreeMap::new());
        assert!(!replica.snapshot().write_throttling_enabled);
    }

    #[tokio::test]
    async fn size_throttling_env_rejects_large_writes() {
        let dir = tempfile::tempdir().unwrap();
        let (mut replica, _client, mut events) =
            new_replica(test_context(dir.path(), ReplicationOptions::default()));
        become_single_primary(&mut replica);

        let mut envs = BTreeMap::new();
        envs.insert(WRITE_SIZE_THROTTLING_ENV_KEY.to_string(), "100*reject*0".to_string());
        replica.apply_envs(&envs);
        assert!(replica.snapshot().write_throttling_enabled);

        let large = "v".repeat(200);
        let rx = write(&mut replica, "k", &large);
        assert!(matches!(rx.await.unwrap(), Err(ClientWriteError::Busy)));

        let mut rx = write(&mut replica, "k", "small");
        settle_log_writes(&mut replica, &mut events).await;
        assert_eq!(rx.try_recv().unwrap().unwrap().decree, 1);

        replica.apply_envs(&BTreeMap::new());
        assert!(!replica.snapshot().write_throttling_enabled);
        let mut rx = write(&mut replica, "k", &large);
        settle_log_writes(&mut replica, &mut events).await;
        assert_eq!(rx.try_recv().unwrap().unwrap().decree, 2);
    }

    #[tokio::test]
    async fn read_throttling_env_delays_and_rejects_reads() {
        async fn read_through_throttling(
            replica: &mut Replica,
            events: &mut mpsc::Receiver<Event>,
        ) -> Result<ClientReadOutput, ClientReadError> {
            let (tx, mut rx) = oneshot::channel();
            replica.client_read(ClientReadInput { key: Bytes::from("k") }, Callback(tx));
            if let Ok(result) = rx.try_recv() {
                return result;
            }
            let delayed = tokio::time::timeout(std::time::Duration::from_secs(10), async {
                loop {
                    tokio::select! {
                        result = &mut rx => return result.unwrap(),
                        event = events.recv() => {
                            if let Some(Event::DelayedClientRead(input, callback)) = event {
                                replica.delayed_client_read(input, callback);
                            }
                        }
                    }
                }
            });
            delayed.await.unwrap()
        }

        let dir = tempfile::tempdir().unwrap();
        let (mut replica, _client, mut events) =
            new_replica(test_context(dir.path(), ReplicationOptions::default()));
        become_single_primary(&mut replica);

        // One partition gets 1 / 1 + 1 = 2 reads per second.
        let mut envs = BTreeMap::new();
        envs.insert(READ_THROTTLING_ENV_KEY.to_string(), "1*reject*0".to_string());
        replica.apply_envs(&envs);
        assert!(replica.snapshot().read_throttling_enabled);
        assert!(read_through_throttling(&mut replica, &mut events).await.is_ok());
        assert!(read_through_throttling(&mut replica, &mut events).await.is_ok());
        assert!(matches!(
            read_through_throttling(&mut replica, &mut events).await,
            Err(ClientReadError::Busy)
        ));

        envs.insert(READ_THROTTLING_ENV_KEY.to_string(), "1*delay*5".to_string());
        replica.apply_envs(&envs);
        for _ in 0..3 {
            assert_eq!(
                read_through_throttling(&mut replica, &mut events).await.unwrap(),
                ClientReadOutput { value: None }
            );
        }

        replica.apply_envs(&BTreeMap::new());
        assert!(!replica.snapshot().read_throttling_enabled);
    }

    #[tokio::test]
    async fn catch_up_reads_lost_decrees_from_log() {
        let dir = tempfile::tempdir().unwrap();
        let (mut replica, _client, _rx) = new_replica(test_context(dir.path(), ReplicationOptions::default()));
        let log = replica.private_log.clone().unwrap();
        for decree in 1..=4 {
            let updates = vec![put_update(&decree.to_string(), "v")];
            log.append(&Mutation::new(replica.gpid, 1, decree, decree - 1, updates)).unwrap();
        }

        replica.catch_up_app(3).unwrap();
        assert_eq!(replica.app.last_committed_decree(), 3);
        assert_eq!(read(&mut replica, "3"), Some(Bytes::from("v")));

        match replica.catch_up_app(6) {
            Err(ReplicaFault::ApplyFailed { decree, .. }) => assert_eq!(decree, 5),
            other => panic!("unexpected catch up result {:?}", other),
        }
        assert_eq!(replica.app.last_committed_decree(), 4);
    }
}
