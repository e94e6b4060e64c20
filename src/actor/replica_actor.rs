use crate::actor::event::Event;
use crate::replica::Replica;
use tokio::sync::mpsc;

/// ReplicaActor is replica logic in actor model. Every state change of a replica happens on its
/// event loop; background tasks report back through events.
pub(crate) struct ReplicaActor {
    logger: slog::Logger,
    receiver: mpsc::Receiver<Event>,
    replica: Replica,
}

impl ReplicaActor {
    pub(crate) fn new(logger: slog::Logger, receiver: mpsc::Receiver<Event>, replica: Replica) -> Self {
        ReplicaActor {
            logger,
            receiver,
            replica,
        }
    }

    pub(crate) async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            if let Event::Close(callback) = event {
                if let Some(writer) = self.replica.close() {
                    writer.flush().await;
                }
                let _ = callback.send(());
                break;
            }
            self.handle_event(event);
        }

        slog::info!(self.logger, "Replica event loop exited");
    }

    // This must NOT be async. Any long running work must be spawned as a task
    // and come back as an event to this actor.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::ClientWrite(input, callback) => self.replica.client_write(input, callback),
            Event::DelayedClientWrite(input, callback) => self.replica.delayed_client_write(input, callback),
            Event::ClientRead(input, callback) => self.replica.client_read(input, callback),
            Event::DelayedClientRead(input, callback) => self.replica.delayed_client_read(input, callback),
            Event::LocalRead(input, callback) => callback.send(self.replica.local_read(input)),
            Event::Prepare(request, callback) => self.replica.on_prepare(request, callback),
            Event::GroupCheck(request, callback) => callback.send(Ok(self.replica.on_group_check(request))),
            Event::Learn(request, callback) => self.replica.on_learn(request, callback),
            Event::LearnCompletionNotification(request, callback) => {
                callback.send(Ok(self.replica.on_learn_completion_notification(request)));
            }
            Event::CopyCheckpoint(request, callback) => self.replica.on_copy_checkpoint(request, callback),
            Event::ConfigProposal(proposal) => self.replica.on_config_proposal(proposal),
            Event::UpdateConfiguration(update) => self.replica.on_update_configuration(update),
            Event::AddChild(request) => self.replica.on_add_child(request),
            Event::PrepareReply(reply) => self.replica.on_prepare_reply(reply),
            Event::GroupCheckReply(reply) => self.replica.on_group_check_reply(reply),
            Event::LearnReply(reply) => self.replica.on_learn_reply(reply),
            Event::LearnFilesFetched(fetched) => self.replica.on_learn_files_fetched(fetched),
            Event::CopyCheckpointFetched(fetched) => self.replica.on_copy_checkpoint_fetched(fetched),
            Event::MetaConfigUpdateReply(reply) => self.replica.on_meta_config_update_reply(reply),
            Event::RegisterChildReply(reply) => self.replica.on_register_child_reply(reply),
            Event::LogAppended(appended) => self.replica.on_log_appended(appended),
            Event::Timer(tick) => self.replica.on_timer(tick),
            Event::CheckpointRetry { is_emergency } => self.replica.on_checkpoint_retry(is_emergency),
            Event::AsyncCheckpointDone(result) => self.replica.on_async_checkpoint_done(result),
            Event::BackgroundCheckpointDone(result) => self.replica.on_background_checkpoint_done(result),
            Event::RegisterChildRetry => self.replica.on_register_child_retry(),
            Event::SplitNotice(notice) => self.replica.on_split_notice(notice),
            Event::ChildSync(message) => self.replica.on_child_sync(message),
            Event::SplitAborted(reason) => self.replica.on_split_aborted(reason),
            Event::QueryState(callback) => {
                let _ = callback.send(self.replica.snapshot());
            }
            Event::BackupCheckpoint(dir, callback) => callback.send(self.replica.backup_checkpoint(&dir)),
            Event::ApplyEnvs(envs) => self.replica.apply_envs(&envs),
            Event::Close(callback) => {
                // Handled by the event loop; nothing queued after Close is processed.
                let _ = callback.send(());
            }
        }
    }
}
