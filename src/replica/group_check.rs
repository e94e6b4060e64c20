use crate::actor::Event;
use crate::common::{ErrorCode, LearnerStatus, NodeAddress, PartitionStatus, ReplicaConfiguration};
use crate::prepare_list::CommitMode;
use crate::replica::replica::Replica;
use crate::replica::replica_api::{GroupCheckReply, ReplicaFault};
use crate::transport::{GroupCheckRequest, GroupCheckResponse, RpcError};

impl Replica {
    /// Primary tells every secondary and learner its configuration and committed decree. Replies
    /// surface dead members and learners that are done.
    pub(super) fn broadcast_group_check(&mut self) {
        if self.status() != PartitionStatus::Primary {
            return;
        }

        let secondaries = self.primary.membership.secondaries.clone();
        for node in secondaries {
            self.send_group_check(node, PartitionStatus::Secondary, 0);
        }
        let learners: Vec<(NodeAddress, u64)> = self
            .primary
            .learners
            .iter()
            .map(|(node, learner)| (node.clone(), learner.signature))
            .collect();
        for (node, signature) in learners {
            self.send_group_check(node, PartitionStatus::PotentialSecondary, signature);
        }
    }

    pub(super) fn send_group_check(&self, node: NodeAddress, status: PartitionStatus, signature: u64) {
        let request = GroupCheckRequest {
            app: self.app_info.clone(),
            node: node.clone(),
            config: ReplicaConfiguration {
                pid: self.gpid,
                ballot: self.ballot(),
                primary: Some(self.ctx.address.clone()),
                status,
                learner_signature: signature,
            },
            last_committed_decree: self.plist.last_committed_decree(),
            child_gpid: self.split.child_gpid,
        };

        let transport = self.ctx.transport.clone();
        let timeout = self.ctx.options.prepare_timeout;
        let ballot = self.ballot();
        let logger = self.logger.new(slog::o!("Peer" => node.to_string()));
        self.spawn_for_event(async move {
            let result = match tokio::time::timeout(timeout, transport.group_check(&node, request)).await {
                Ok(result) => result,
                Err(elapsed) => Err(RpcError::from(elapsed)),
            };
            slog::debug!(logger, "Group check reply from peer result: {:?}", result);
            Event::GroupCheckReply(GroupCheckReply { node, ballot, result })
        });
    }

    pub(crate) fn on_group_check_reply(&mut self, reply: GroupCheckReply) {
        if self.status() != PartitionStatus::Primary || reply.ballot != self.ballot() {
            return;
        }

        let response = match reply.result {
            Ok(response) => response,
            Err(e) => {
                self.handle_remote_failure(&reply.node, &format!("group check failed: {}", e));
                return;
            }
        };
        if !response.err.is_ok() {
            self.handle_remote_failure(&reply.node, &format!("group check rejected with {}", response.err));
            return;
        }

        let learner_done = response.learner_status == Some(LearnerStatus::LearningSucceeded)
            && self
                .primary
                .learners
                .get(&reply.node)
                .map_or(false, |learner| learner.signature == response.learner_signature);
        if learner_done {
            self.upgrade_learner(&reply.node);
        }
    }

    /// A member learns the primary's view from its group check.
    pub(crate) fn on_group_check(&mut self, request: GroupCheckRequest) -> GroupCheckResponse {
        let mut response = self.group_check_response(ErrorCode::Ok);
        if request.config.ballot < self.ballot() {
            response.err = ErrorCode::VersionOutdated;
            return response;
        }

        let config_changed = request.config.ballot > self.ballot()
            || request.config.status != self.status()
            || (request.config.status == PartitionStatus::PotentialSecondary
                && request.config.learner_signature != self.learner.learning_version);
        if config_changed && !self.update_local_configuration(request.config.clone(), None) {
            response = self.group_check_response(ErrorCode::InvalidState);
            return response;
        }
        self.apply_app_info(&request.app);

        match self.status() {
            PartitionStatus::Secondary => {
                match self.plist.commit(request.last_committed_decree, CommitMode::Soft) {
                    Ok(committed) => self.execute_committed(committed),
                    Err(e) => self.handle_local_failure(ReplicaFault::PrepareList(e.to_string())),
                }
                self.on_group_check_split_state(&request);
            }
            PartitionStatus::PotentialSecondary => {
                if self.learner.learner_status != LearnerStatus::LearningSucceeded {
                    self.init_learn();
                }
            }
            _ => {
                response.err = ErrorCode::InvalidState;
                return response;
            }
        }

        let err = response.err;
        self.group_check_response(err)
    }

    fn group_check_response(&self, err: ErrorCode) -> GroupCheckResponse {
        let is_learner = self.status() == PartitionStatus::PotentialSecondary;
        GroupCheckResponse {
            pid: self.gpid,
            err,
            node: self.ctx.address.clone(),
            last_committed_decree_in_app: self.app.last_committed_decree(),
            last_committed_decree_in_prepare_list: self.plist.last_committed_decree(),
            learner_status: if is_learner {
                Some(self.learner.learner_status)
            } else {
                None
            },
            learner_signature: if is_learner { self.learner.learning_version } else { 0 },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::common::{
        AppInfo, ErrorCode, Gpid, LearnerStatus, NodeAddress, PartitionStatus, ReplicaConfiguration,
    };
    use crate::replica::replica::test_utils::*;
    use crate::storage::SIMPLE_KV_APP_TYPE;
    use crate::transport::GroupCheckRequest;
    use crate::ReplicationOptions;

    fn request(ballot: i64, status: PartitionStatus, signature: u64) -> GroupCheckRequest {
        GroupCheckRequest {
            app: AppInfo::new(1, "test", SIMPLE_KV_APP_TYPE, 1, 3),
            node: NodeAddress::new("node-1"),
            config: ReplicaConfiguration {
                pid: Gpid::new(1, 0),
                ballot,
                primary: Some(NodeAddress::new("primary")),
                status,
                learner_signature: signature,
            },
            last_committed_decree: 0,
            child_gpid: None,
        }
    }

    #[tokio::test]
    async fn group_check_turns_inactive_replica_into_learner() {
        let dir = tempfile::tempdir().unwrap();
        let (mut replica, _client, _rx) = new_replica(test_context(dir.path(), ReplicationOptions::default()));

        let response = replica.on_group_check(request(1, PartitionStatus::PotentialSecondary, 42));
        assert_eq!(response.err, ErrorCode::Ok);
        assert_eq!(response.learner_signature, 42);
        assert_eq!(replica.status(), PartitionStatus::PotentialSecondary);
        // A learn round is already on its way to the primary.
        assert!(replica.learner.learning_round_in_flight);
        assert_ne!(response.learner_status, Some(LearnerStatus::LearningSucceeded));
    }

    #[tokio::test]
    async fn stale_group_check_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut replica, _client, _rx) = new_replica(test_context(dir.path(), ReplicationOptions::default()));
        become_single_primary(&mut replica);

        let response = replica.on_group_check(request(0, PartitionStatus::Secondary, 0));
        assert_eq!(response.err, ErrorCode::VersionOutdated);
        assert_eq!(replica.status(), PartitionStatus::Primary);
    }

    #[tokio::test]
    async fn secondary_cannot_be_assigned_without_learning() {
        let dir = tempfile::tempdir().unwrap();
        let (mut replica, _client, _rx) = new_replica(test_context(dir.path(), ReplicationOptions::default()));

        let response = replica.on_group_check(request(1, PartitionStatus::Secondary, 0));
        assert_eq!(response.err, ErrorCode::InvalidState);
        assert_eq!(replica.status(), PartitionStatus::Inactive);
    }
}
