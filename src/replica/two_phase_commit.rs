use crate::actor::{Callback, Event};
use crate::common::{
    Ballot, Decree, ErrorCode, Mutation, NodeAddress, PartitionStatus, ReplicaConfiguration, INVALID_DECREE,
};
use crate::prepare_list::{CommitMode, PrepareListError, PreparedMutation};
use crate::replica::replica::Replica;
use crate::replica::replica_api::{
    ClientWriteError, ClientWriteInput, ClientWriteOutput, LogAppended, PrepareReply, ReplicaFault,
};
use crate::replica::states::PendingMutation;
use crate::replica::write_queue::PendingWrite;
use crate::throttling::ThrottlingDecision;
use crate::transport::{PrepareAck, PrepareRequest, RpcError};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Bytes a write carries, as size throttling counts them.
fn update_bytes(input: &ClientWriteInput) -> u64 {
    input.updates.iter().map(|update| update.data.len() as u64).sum()
}

impl Replica {
    // -- Primary: client writes --

    pub(crate) fn client_write(
        &mut self,
        input: ClientWriteInput,
        callback: Callback<ClientWriteOutput, ClientWriteError>,
    ) {
        if let Err(e) = self.check_write_admission() {
            callback.send(Err(e));
            return;
        }

        let decision = match self.throttling.write_qps.control(1) {
            ThrottlingDecision::Pass => self.throttling.write_size.control(update_bytes(&input)),
            decision => decision,
        };
        match decision {
            ThrottlingDecision::Pass => self.enqueue_write(input, callback),
            ThrottlingDecision::Delay(delay) => {
                slog::debug!(self.logger, "Delaying client write by {:?}", delay);
                self.spawn_for_event(async move {
                    tokio::time::sleep(delay).await;
                    Event::DelayedClientWrite(input, callback)
                });
            }
            ThrottlingDecision::Reject(delay) => {
                slog::debug!(self.logger, "Rejecting client write after {:?}", delay);
                tokio::task::spawn(async move {
                    tokio::time::sleep(delay).await;
                    callback.send(Err(ClientWriteError::Busy));
                });
            }
        }
    }

    pub(crate) fn delayed_client_write(
        &mut self,
        input: ClientWriteInput,
        callback: Callback<ClientWriteOutput, ClientWriteError>,
    ) {
        match self.check_write_admission() {
            Ok(()) => self.enqueue_write(input, callback),
            Err(e) => callback.send(Err(e)),
        }
    }

    fn check_write_admission(&self) -> Result<(), ClientWriteError> {
        if self.status() != PartitionStatus::Primary {
            return Err(ClientWriteError::InvalidState(self.status()));
        }
        if self.split.block_writes {
            return Err(ClientWriteError::Splitting);
        }
        // A new primary first commits whatever its predecessor may have prepared.
        if self.plist.last_committed_decree() < self.primary.last_prepare_decree_on_new_primary {
            return Err(ClientWriteError::InvalidState(self.status()));
        }

        Ok(())
    }

    fn enqueue_write(&mut self, input: ClientWriteInput, callback: Callback<ClientWriteOutput, ClientWriteError>) {
        self.write_queue.push(PendingWrite { input, callback });
        self.check_possible_work();
    }

    /// Turns queued writes into mutations while the number of uncommitted decrees stays under the
    /// staleness limit.
    pub(super) fn check_possible_work(&mut self) {
        if self.status() != PartitionStatus::Primary || self.primary.preparing || self.split.block_writes {
            return;
        }

        self.primary.preparing = true;
        while self.status() == PartitionStatus::Primary {
            let in_flight = (self.plist.max_decree() - self.plist.last_committed_decree()) as usize;
            let batch = match self
                .write_queue
                .check_possible_work(in_flight, self.ctx.options.staleness_for_commit)
            {
                Some(batch) => batch,
                None => break,
            };

            let mut updates = Vec::new();
            let mut callbacks = Vec::with_capacity(batch.len());
            for write in batch {
                updates.extend(write.input.updates);
                callbacks.push(write.callback);
            }
            let mutation = Mutation::new(
                self.gpid,
                self.ballot(),
                self.plist.max_decree() + 1,
                self.plist.last_committed_decree(),
                updates,
            );
            self.init_prepare(Arc::new(mutation), callbacks);
        }
        self.primary.preparing = false;
    }

    /// Prepares `mutation` locally and sends it to the group while it is being logged. It commits
    /// once it is logged here and acked by a quorum.
    fn init_prepare(&mut self, mutation: Arc<Mutation>, callbacks: Vec<Callback<ClientWriteOutput, ClientWriteError>>) {
        let decree = mutation.decree();
        let entry = PreparedMutation::new(mutation.clone(), false, false);
        if let Err(e) = self.plist.prepare(entry, PartitionStatus::Primary) {
            for callback in callbacks {
                callback.send(Err(ClientWriteError::InvalidState(self.status())));
            }
            self.handle_local_failure(ReplicaFault::PrepareList(e.to_string()));
            return;
        }
        self.primary.pending.insert(
            decree,
            PendingMutation {
                ballot: mutation.ballot(),
                acked: HashSet::new(),
                callbacks,
            },
        );

        self.submit_to_logs(&mutation);
        self.send_prepares(&mutation);
    }

    fn send_prepares(&mut self, mutation: &Arc<Mutation>) {
        let decree = mutation.decree();
        let mut targets: Vec<(NodeAddress, PartitionStatus, u64)> = self
            .primary
            .membership
            .secondaries
            .iter()
            .map(|node| (node.clone(), PartitionStatus::Secondary, 0))
            .collect();
        for (node, learner) in self.primary.learners.iter() {
            if learner.prepare_start_decree != INVALID_DECREE && learner.prepare_start_decree <= decree {
                targets.push((node.clone(), PartitionStatus::PotentialSecondary, learner.signature));
            }
        }

        for (node, status, signature) in targets {
            let request = PrepareRequest {
                config: ReplicaConfiguration {
                    pid: self.gpid,
                    ballot: self.ballot(),
                    primary: Some(self.ctx.address.clone()),
                    status,
                    learner_signature: signature,
                },
                mutation: (**mutation).clone(),
            };
            let sender = match self.primary.prepare_senders.get(&node) {
                Some(sender) => sender.clone(),
                None => {
                    let sender = self.spawn_prepare_sender(node.clone());
                    self.primary.prepare_senders.insert(node.clone(), sender.clone());
                    sender
                }
            };
            if sender.send(request).is_err() {
                slog::warn!(self.logger, "Prepare sender to {} is gone", node);
                self.primary.prepare_senders.remove(&node);
            }
        }
    }

    fn spawn_prepare_sender(&self, node: NodeAddress) -> mpsc::UnboundedSender<PrepareRequest> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<PrepareRequest>();
        let transport = self.ctx.transport.clone();
        let timeout = self.ctx.options.prepare_timeout;
        let actor = self.actor_client.clone();
        let logger = self.logger.new(slog::o!("Peer" => node.to_string()));

        tokio::task::spawn(async move {
            while let Some(request) = receiver.recv().await {
                let ballot = request.config.ballot;
                let decree = request.mutation.decree();
                let result = match tokio::time::timeout(timeout, transport.prepare(&node, request)).await {
                    Ok(result) => result,
                    Err(elapsed) => Err(RpcError::from(elapsed)),
                };
                slog::debug!(logger, "Prepare {} reply from peer result: {:?}", decree, result);

                let reply = PrepareReply {
                    node: node.clone(),
                    ballot,
                    decree,
                    result,
                };
                if actor.notify(Event::PrepareReply(reply)).await.is_err() {
                    break;
                }
            }
        });

        sender
    }

    pub(crate) fn on_prepare_reply(&mut self, reply: PrepareReply) {
        if self.status() != PartitionStatus::Primary || reply.ballot != self.ballot() {
            return;
        }

        match reply.result {
            Ok(ack) if ack.err.is_ok() => {
                // Learners are prepared to, but their acks never count towards the quorum.
                if self.primary.is_secondary(&reply.node) {
                    if let Some(pending) = self.primary.pending.get_mut(&reply.decree) {
                        pending.acked.insert(reply.node);
                    }
                    self.try_commit_prepared();
                }
            }
            Ok(ack) => {
                if ack.ballot > self.ballot() {
                    slog::warn!(
                        self.logger,
                        "{} has ballot {} > ours {}; stepping down",
                        reply.node,
                        ack.ballot,
                        self.ballot()
                    );
                    let config = ReplicaConfiguration {
                        status: PartitionStatus::Inactive,
                        primary: None,
                        ..self.config.clone()
                    };
                    self.update_local_configuration(config, None);
                } else {
                    let reason = format!("prepare {} rejected with {}", reply.decree, ack.err);
                    self.handle_remote_failure(&reply.node, &reason);
                }
            }
            Err(e) => {
                let reason = format!("prepare {} failed: {}", reply.decree, e);
                self.handle_remote_failure(&reply.node, &reason);
            }
        }
    }

    /// Marks decrees acked by enough secondaries and commits whatever became ready.
    pub(super) fn try_commit_prepared(&mut self) {
        if self.status() != PartitionStatus::Primary {
            return;
        }

        let required = self
            .ctx
            .options
            .quorum
            .required_acks(self.primary.membership.secondaries.len());
        let membership = &self.primary.membership;
        for (decree, pending) in self.primary.pending.iter() {
            let acks = pending
                .acked
                .iter()
                .filter(|node| membership.secondaries.contains(node))
                .count();
            if acks >= required {
                if let Some(entry) = self.plist.get_mut(*decree) {
                    entry.quorum_reached = true;
                }
            }
        }

        match self.plist.commit(self.plist.max_decree(), CommitMode::Soft) {
            Ok(committed) => self.execute_committed(committed),
            Err(e) => self.handle_local_failure(ReplicaFault::PrepareList(e.to_string())),
        }
    }

    /// A new primary re-proposes every decree past its committed point with its own ballot. Holes
    /// are filled with empty writes.
    pub(super) fn reprepare_uncommitted(&mut self) {
        let mut old_pending = std::mem::take(&mut self.primary.pending);
        let max_decree = self.plist.max_decree();
        let first = self.plist.last_committed_decree() + 1;
        if first <= max_decree {
            slog::info!(self.logger, "Repreparing decrees {}..={} with ballot {}", first, max_decree, self.ballot());
        }

        for decree in first..=max_decree {
            if self.status() != PartitionStatus::Primary {
                return;
            }
            if decree <= self.plist.last_committed_decree() {
                continue;
            }
            let updates = match self.plist.get_mutation_by_decree(decree) {
                Some(mutation) => mutation.updates.clone(),
                None => vec![Replica::empty_update()],
            };
            let callbacks = old_pending.remove(&decree).map(|p| p.callbacks).unwrap_or_default();
            let mutation = Mutation::new(
                self.gpid,
                self.ballot(),
                decree,
                self.plist.last_committed_decree(),
                updates,
            );
            self.init_prepare(Arc::new(mutation), callbacks);
        }
    }

    // -- Secondary --

    pub(crate) fn on_prepare(&mut self, request: PrepareRequest, callback: Callback<PrepareAck, RpcError>) {
        let decree = request.mutation.decree();
        if request.config.ballot < self.ballot() {
            callback.send(Ok(self.prepare_ack(ErrorCode::VersionOutdated, decree)));
            return;
        }
        if request.config.ballot > self.ballot() || request.config.status != self.status() {
            if !self.update_local_configuration(request.config.clone(), None) {
                callback.send(Ok(self.prepare_ack(ErrorCode::InvalidState, decree)));
                return;
            }
        }

        match self.status() {
            PartitionStatus::Secondary => {}
            PartitionStatus::PotentialSecondary => {
                if self.learner.learning_round_in_flight {
                    self.learner.held_prepares.push((request, callback));
                    return;
                }
                if !self.learner.accepts_prepares() {
                    callback.send(Ok(self.prepare_ack(ErrorCode::InvalidState, decree)));
                    return;
                }
            }
            status => {
                slog::debug!(self.logger, "Rejecting prepare {} while {:?}", decree, status);
                callback.send(Ok(self.prepare_ack(ErrorCode::InvalidState, decree)));
                return;
            }
        }

        self.process_prepare(request, callback);
    }

    /// Prepares and logs a mutation from the primary; the ack goes out once it is logged.
    /// Piggybacked commits execute on the way.
    pub(super) fn process_prepare(&mut self, request: PrepareRequest, callback: Callback<PrepareAck, RpcError>) {
        let decree = request.mutation.decree();
        if decree <= self.plist.last_committed_decree() {
            callback.send(Ok(self.prepare_ack(ErrorCode::Ok, decree)));
            return;
        }
        if self.commit_waits_for_log(request.mutation.last_committed_decree()) {
            self.log_writes.deferred_prepares.push_back((request, callback));
            return;
        }

        let mutation = Arc::new(request.mutation);
        let entry = PreparedMutation::new(mutation.clone(), false, true);
        let committed = match self.plist.prepare(entry, self.status()) {
            Ok(committed) => committed,
            Err(PrepareListError::AlreadyCommitted { .. }) => {
                callback.send(Ok(self.prepare_ack(ErrorCode::Ok, decree)));
                return;
            }
            Err(e) => {
                slog::warn!(self.logger, "Cannot prepare {}: {}", decree, e);
                callback.send(Ok(self.prepare_ack(ErrorCode::InvalidState, decree)));
                return;
            }
        };

        self.execute_committed(committed);
        if self.status() == PartitionStatus::Error {
            callback.send(Ok(self.prepare_ack(ErrorCode::LocalAppFailure, decree)));
            return;
        }
        self.submit_to_logs(&mutation);
        self.log_writes
            .waiting_acks
            .entry(decree)
            .or_default()
            .push((mutation.ballot(), callback));
    }

    /// True if committing up to `upto` needs a mutation whose log write is still in flight.
    fn commit_waits_for_log(&self, upto: Decree) -> bool {
        self.log_writes.in_flight > 0
            && ((self.plist.last_committed_decree() + 1)..=upto)
                .any(|decree| self.plist.get(decree).map_or(false, |entry| !entry.logged))
    }

    pub(crate) fn on_log_appended(&mut self, appended: LogAppended) {
        self.log_writes.in_flight = self.log_writes.in_flight.saturating_sub(1);
        let LogAppended { decree, ballot, result } = appended;
        if let Err(reason) = result {
            self.handle_local_failure(ReplicaFault::LogWriteFailed { decree, reason });
        } else if let Some(entry) = self.plist.get_mut(decree) {
            if entry.ballot() == ballot {
                entry.logged = true;
            }
        }

        match self.status() {
            PartitionStatus::Secondary | PartitionStatus::PotentialSecondary => {
                self.send_logged_acks(decree, ballot);
                for (request, callback) in std::mem::take(&mut self.log_writes.deferred_prepares) {
                    self.process_prepare(request, callback);
                }
            }
            status => {
                self.reject_waiting_prepares();
                if status == PartitionStatus::Primary {
                    self.try_commit_prepared();
                }
            }
        }
    }

    fn send_logged_acks(&mut self, decree: Decree, ballot: Ballot) {
        let waiting = match self.log_writes.waiting_acks.remove(&decree) {
            Some(waiting) => waiting,
            None => return,
        };
        let logged = decree <= self.plist.last_committed_decree()
            || self
                .plist
                .get(decree)
                .map_or(false, |entry| entry.logged && entry.ballot() == ballot);
        let mut still_waiting = Vec::new();
        for (prepared_ballot, callback) in waiting {
            if prepared_ballot != ballot {
                still_waiting.push((prepared_ballot, callback));
            } else if logged {
                callback.send(Ok(self.prepare_ack(ErrorCode::Ok, decree)));
            } else {
                callback.send(Ok(self.prepare_ack(ErrorCode::InvalidState, decree)));
            }
        }
        if !still_waiting.is_empty() {
            self.log_writes.waiting_acks.insert(decree, still_waiting);
        }
    }

    /// Answers every prepare still waiting on the log once this replica no longer acts on them.
    fn reject_waiting_prepares(&mut self) {
        let err = if self.status() == PartitionStatus::Error {
            ErrorCode::LocalAppFailure
        } else {
            ErrorCode::InvalidState
        };
        for (decree, waiting) in std::mem::take(&mut self.log_writes.waiting_acks) {
            for (_, callback) in waiting {
                callback.send(Ok(self.prepare_ack(err, decree)));
            }
        }
        for (request, callback) in std::mem::take(&mut self.log_writes.deferred_prepares) {
            callback.send(Ok(self.prepare_ack(err, request.mutation.decree())));
        }
    }
}
