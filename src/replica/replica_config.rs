use crate::actor::Event;
use crate::common::{AppInfo, ErrorCode, NodeAddress, PartitionConfiguration, PartitionStatus, ReplicaConfiguration};
use crate::common::INVALID_DECREE;
use crate::replica::replica::Replica;
use crate::replica::replica_api::MetaConfigUpdateReply;
use crate::replica::states::RemoteLearner;
use crate::storage::store_app_info;
use crate::transport::{ConfigProposal, ConfigType, ConfigUpdateRequest, ConfigurationUpdate};

impl Replica {
    // -- Proposals from the meta server --

    pub(crate) fn on_config_proposal(&mut self, proposal: ConfigProposal) {
        if proposal.config.ballot != self.ballot() {
            slog::info!(
                self.logger,
                "Ignoring {:?} proposal with ballot {} (ours {})",
                proposal.config_type,
                proposal.config.ballot,
                self.ballot()
            );
            return;
        }
        self.apply_app_info(&proposal.app);

        match proposal.config_type {
            ConfigType::AssignPrimary => self.assign_primary(proposal),
            ConfigType::AddSecondary => self.add_potential_secondary(proposal),
            ConfigType::UpgradeToSecondary => self.upgrade_learner(&proposal.node),
            ConfigType::DowngradeToInactive | ConfigType::Remove => self.remove_member(proposal),
        }
    }

    fn assign_primary(&mut self, proposal: ConfigProposal) {
        if proposal.node != self.ctx.address {
            return;
        }
        match self.status() {
            PartitionStatus::Primary => {
                slog::info!(self.logger, "Already primary; ignoring assignment");
                return;
            }
            PartitionStatus::Inactive | PartitionStatus::Secondary | PartitionStatus::PartitionSplit => {}
            status => {
                slog::warn!(self.logger, "Cannot become primary while {:?}", status);
                return;
            }
        }

        let mut config = proposal.config;
        config.ballot += 1;
        config.primary = Some(self.ctx.address.clone());
        let address = self.ctx.address.clone();
        config.secondaries.retain(|node| node != &address);
        self.send_config_update_to_meta(ConfigType::AssignPrimary, address, config);
    }

    fn add_potential_secondary(&mut self, proposal: ConfigProposal) {
        if self.status() != PartitionStatus::Primary {
            slog::warn!(self.logger, "Not primary; cannot add {} as secondary", proposal.node);
            return;
        }
        if self.primary.is_secondary(&proposal.node) || proposal.node == self.ctx.address {
            return;
        }

        let signature = match self.primary.learners.get(&proposal.node) {
            Some(learner) => learner.signature,
            None => {
                let signature = self.primary.new_learning_version();
                self.primary.learners.insert(
                    proposal.node.clone(),
                    RemoteLearner {
                        signature,
                        prepare_start_decree: INVALID_DECREE,
                    },
                );
                slog::info!(self.logger, "Added learner {} with signature {}", proposal.node, signature);
                signature
            }
        };
        self.send_group_check(proposal.node, PartitionStatus::PotentialSecondary, signature);
    }

    fn remove_member(&mut self, proposal: ConfigProposal) {
        if self.status() != PartitionStatus::Primary {
            return;
        }
        if self.primary.learners.remove(&proposal.node).is_some() {
            self.primary.prepare_senders.remove(&proposal.node);
            slog::info!(self.logger, "Removed learner {}", proposal.node);
            return;
        }
        if self.primary.is_secondary(&proposal.node) {
            let mut config = self.primary.membership.clone();
            config.ballot += 1;
            config.secondaries.retain(|node| node != &proposal.node);
            self.send_config_update_to_meta(proposal.config_type, proposal.node, config);
        }
    }

    /// Asks the meta server to move a learner into the group.
    pub(super) fn upgrade_learner(&mut self, node: &NodeAddress) {
        if self.status() != PartitionStatus::Primary || !self.primary.learners.contains_key(node) {
            return;
        }

        let mut config = self.primary.membership.clone();
        config.ballot += 1;
        if !config.secondaries.contains(node) {
            config.secondaries.push(node.clone());
        }
        self.send_config_update_to_meta(ConfigType::UpgradeToSecondary, node.clone(), config);
    }

    /// A member failed to answer or rejected the primary. Learners are simply dropped; secondaries
    /// are removed through the meta server.
    pub(super) fn handle_remote_failure(&mut self, node: &NodeAddress, reason: &str) {
        if self.status() != PartitionStatus::Primary {
            return;
        }
        slog::warn!(self.logger, "Remote failure of {}: {}", node, reason);

        if self.primary.learners.remove(node).is_some() {
            self.primary.prepare_senders.remove(node);
            return;
        }
        if self.primary.is_secondary(node) {
            let mut config = self.primary.membership.clone();
            config.ballot += 1;
            config.secondaries.retain(|n| n != node);
            self.send_config_update_to_meta(ConfigType::Remove, node.clone(), config);
        }
    }

    // -- Meta server round trips --

    /// One configuration change at a time; later requests are dropped and retried by whatever
    /// noticed the need again.
    pub(super) fn send_config_update_to_meta(
        &mut self,
        config_type: ConfigType,
        node: NodeAddress,
        config: PartitionConfiguration,
    ) {
        if self.primary.reconfiguration_in_flight {
            slog::debug!(self.logger, "Dropping {:?} of {}: a reconfiguration is in flight", config_type, node);
            return;
        }
        self.primary.reconfiguration_in_flight = true;
        slog::info!(
            self.logger,
            "Asking meta server for {:?} of {} at ballot {}",
            config_type,
            node,
            config.ballot
        );

        let request = ConfigUpdateRequest {
            app: self.app_info.clone(),
            config,
            config_type,
            node: node.clone(),
        };
        let meta = self.ctx.meta.clone();
        self.spawn_for_event(async move {
            let result = meta.update_partition_configuration(request).await;
            Event::MetaConfigUpdateReply(MetaConfigUpdateReply {
                config_type,
                node,
                result,
            })
        });
    }

    pub(crate) fn on_meta_config_update_reply(&mut self, reply: MetaConfigUpdateReply) {
        self.primary.reconfiguration_in_flight = false;
        let response = match reply.result {
            Ok(response) => response,
            Err(e) => {
                slog::warn!(self.logger, "{:?} of {} failed: {}", reply.config_type, reply.node, e);
                return;
            }
        };

        match response.err {
            ErrorCode::Ok | ErrorCode::VersionOutdated => {
                if response.config.ballot > self.ballot() {
                    self.apply_partition_config(response.config);
                }
            }
            err => slog::warn!(self.logger, "Meta server refused {:?} of {}: {}", reply.config_type, reply.node, err),
        }
    }

    /// Meta server pushes the latest configuration of our partition.
    pub(crate) fn on_update_configuration(&mut self, update: ConfigurationUpdate) {
        self.apply_app_info(&update.app);
        if update.config.ballot <= self.ballot() {
            return;
        }
        let is_member = update.config.is_member(&self.ctx.address);
        if !is_member
            && matches!(
                self.status(),
                PartitionStatus::PotentialSecondary | PartitionStatus::PartitionSplit
            )
        {
            return;
        }

        self.apply_partition_config(update.config);
    }

    pub(super) fn apply_partition_config(&mut self, config: PartitionConfiguration) -> bool {
        let status = config.status_of(&self.ctx.address);
        let new = ReplicaConfiguration {
            pid: self.gpid,
            ballot: config.ballot,
            primary: config.primary.clone(),
            status,
            learner_signature: 0,
        };
        let changed = self.update_local_configuration(new, Some(config));
        if changed && self.status() == PartitionStatus::Primary {
            self.try_commit_prepared();
            self.broadcast_group_check();
        }

        changed
    }

    /// Picks up env and partition count changes of the table.
    pub(super) fn apply_app_info(&mut self, app: &AppInfo) {
        if app.app_id != self.app_info.app_id {
            return;
        }
        if app.envs != self.app_info.envs {
            let envs = app.envs.clone();
            self.apply_envs(&envs);
        }
        if app.partition_count > self.app_info.partition_count && !self.split.is_splitting() {
            slog::info!(
                self.logger,
                "Partition count {} -> {}",
                self.app_info.partition_count,
                app.partition_count
            );
            self.app_info.partition_count = app.partition_count;
            if let Err(e) = store_app_info(&self.dir, &self.app_info) {
                slog::warn!(self.logger, "Failed to persist app info: {}", e);
            }
        }
    }
}
