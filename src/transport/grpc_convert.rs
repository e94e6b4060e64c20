use crate::common::{
    AppInfo, ErrorCode, Gpid, LearnerStatus, Mutation, NodeAddress, PartitionConfiguration, PartitionStatus,
    ReplicaConfiguration,
};
use crate::grpc::{
    ProtoAddChildRequest, ProtoAppInfo, ProtoConfigProposal, ProtoConfigurationUpdate, ProtoCopyCheckpointRequest,
    ProtoCopyCheckpointResponse, ProtoFetchFileRequest, ProtoFetchFileResponse, ProtoGpid, ProtoGroupCheckRequest,
    ProtoGroupCheckResponse, ProtoLearnNotification, ProtoLearnNotificationResponse, ProtoLearnRequest,
    ProtoLearnResponse, ProtoPartitionConfiguration, ProtoPrepareAck, ProtoPrepareRequest, ProtoRemoteFile,
    ProtoReplicaConfiguration,
};
use crate::transport::{
    AddChildRequest, ConfigProposal, ConfigType, ConfigurationUpdate, CopyCheckpointRequest, CopyCheckpointResponse,
    FetchFileRequest, FetchFileResponse, GroupCheckRequest, GroupCheckResponse, LearnNotification,
    LearnNotificationResponse, LearnRequest, LearnResponse, LearnType, PrepareAck, PrepareRequest, RemoteFile,
    RpcError,
};
use bytes::Bytes;
use std::convert::TryFrom;
use tonic::{Code, Status};

// Wire conversions. Domain -> proto never fails, proto -> domain rejects malformed input with
// `invalid_argument` so the caller never sees a half-decoded request.

pub(crate) fn rpc_error_to_status(error: &RpcError) -> Status {
    match error {
        RpcError::ReplicaNotFound(gpid) => Status::not_found(gpid.to_string()),
        RpcError::Unreachable(node) => Status::unavailable(node.to_string()),
        RpcError::Timeout => Status::deadline_exceeded("timed out"),
        RpcError::ActorExited => Status::aborted("replica actor has exited"),
        RpcError::Transport(message) => Status::internal(message.clone()),
    }
}

pub(crate) fn status_to_rpc_error(target: &NodeAddress, status: Status) -> RpcError {
    match status.code() {
        Code::NotFound => match parse_gpid(status.message()) {
            Some(gpid) => RpcError::ReplicaNotFound(gpid),
            None => RpcError::Transport(status.message().to_string()),
        },
        Code::Unavailable => RpcError::Unreachable(target.clone()),
        Code::DeadlineExceeded => RpcError::Timeout,
        Code::Aborted => RpcError::ActorExited,
        _ => RpcError::Transport(format!("{:?}: {}", status.code(), status.message())),
    }
}

fn parse_gpid(text: &str) -> Option<Gpid> {
    let mut parts = text.splitn(2, '.');
    let app_id = parts.next()?.parse().ok()?;
    let partition_index = parts.next()?.parse().ok()?;
    Some(Gpid::new(app_id, partition_index))
}

fn required<T>(field: &'static str, value: Option<T>) -> Result<T, Status> {
    value.ok_or_else(|| Status::invalid_argument(format!("Missing field '{}'", field)))
}

fn node_to_proto(node: Option<&NodeAddress>) -> String {
    node.map(|n| n.as_str().to_string()).unwrap_or_default()
}

fn node_from_proto(node: String) -> Option<NodeAddress> {
    if node.is_empty() {
        None
    } else {
        Some(NodeAddress::new(node))
    }
}

fn required_node(field: &'static str, node: String) -> Result<NodeAddress, Status> {
    required(field, node_from_proto(node))
}

fn mutation_from_proto(bytes: &[u8]) -> Result<Mutation, Status> {
    Mutation::decode(bytes).map_err(|e| Status::invalid_argument(format!("Bad mutation: {}", e)))
}

// -- Shared types --

impl From<Gpid> for ProtoGpid {
    fn from(gpid: Gpid) -> Self {
        ProtoGpid {
            app_id: gpid.app_id,
            partition_index: gpid.partition_index,
        }
    }
}

impl From<ProtoGpid> for Gpid {
    fn from(proto: ProtoGpid) -> Self {
        Gpid::new(proto.app_id, proto.partition_index)
    }
}

fn gpid_from_proto(field: &'static str, proto: Option<ProtoGpid>) -> Result<Gpid, Status> {
    required(field, proto).map(Gpid::from)
}

impl From<AppInfo> for ProtoAppInfo {
    fn from(app: AppInfo) -> Self {
        ProtoAppInfo {
            app_id: app.app_id,
            app_name: app.app_name,
            app_type: app.app_type,
            partition_count: app.partition_count,
            max_replica_count: app.max_replica_count,
            envs: app.envs.into_iter().collect(),
        }
    }
}

impl From<ProtoAppInfo> for AppInfo {
    fn from(proto: ProtoAppInfo) -> Self {
        AppInfo {
            app_id: proto.app_id,
            app_name: proto.app_name,
            app_type: proto.app_type,
            partition_count: proto.partition_count,
            max_replica_count: proto.max_replica_count,
            envs: proto.envs.into_iter().collect(),
        }
    }
}

fn app_from_proto(proto: Option<ProtoAppInfo>) -> Result<AppInfo, Status> {
    required("app", proto).map(AppInfo::from)
}

impl From<PartitionConfiguration> for ProtoPartitionConfiguration {
    fn from(config: PartitionConfiguration) -> Self {
        ProtoPartitionConfiguration {
            pid: Some(config.pid.into()),
            ballot: config.ballot,
            max_replica_count: config.max_replica_count,
            primary: node_to_proto(config.primary.as_ref()),
            secondaries: config.secondaries.into_iter().map(NodeAddress::into_inner).collect(),
            last_committed_decree: config.last_committed_decree,
            last_drops: config.last_drops.into_iter().map(NodeAddress::into_inner).collect(),
        }
    }
}

impl TryFrom<ProtoPartitionConfiguration> for PartitionConfiguration {
    type Error = Status;

    fn try_from(proto: ProtoPartitionConfiguration) -> Result<Self, Self::Error> {
        Ok(PartitionConfiguration {
            pid: gpid_from_proto("config.pid", proto.pid)?,
            ballot: proto.ballot,
            max_replica_count: proto.max_replica_count,
            primary: node_from_proto(proto.primary),
            secondaries: proto.secondaries.into_iter().map(NodeAddress::new).collect(),
            last_committed_decree: proto.last_committed_decree,
            last_drops: proto.last_drops.into_iter().map(NodeAddress::new).collect(),
        })
    }
}

fn partition_config_from_proto(
    field: &'static str,
    proto: Option<ProtoPartitionConfiguration>,
) -> Result<PartitionConfiguration, Status> {
    PartitionConfiguration::try_from(required(field, proto)?)
}

impl From<ReplicaConfiguration> for ProtoReplicaConfiguration {
    fn from(config: ReplicaConfiguration) -> Self {
        ProtoReplicaConfiguration {
            pid: Some(config.pid.into()),
            ballot: config.ballot,
            primary: node_to_proto(config.primary.as_ref()),
            status: config.status.as_i32(),
            learner_signature: config.learner_signature,
        }
    }
}

impl TryFrom<ProtoReplicaConfiguration> for ReplicaConfiguration {
    type Error = Status;

    fn try_from(proto: ProtoReplicaConfiguration) -> Result<Self, Self::Error> {
        let status = PartitionStatus::from_i32(proto.status)
            .ok_or_else(|| Status::invalid_argument(format!("Unknown partition status {}", proto.status)))?;
        Ok(ReplicaConfiguration {
            pid: gpid_from_proto("config.pid", proto.pid)?,
            ballot: proto.ballot,
            primary: node_from_proto(proto.primary),
            status,
            learner_signature: proto.learner_signature,
        })
    }
}

fn replica_config_from_proto(proto: Option<ProtoReplicaConfiguration>) -> Result<ReplicaConfiguration, Status> {
    ReplicaConfiguration::try_from(required("config", proto)?)
}

impl From<RemoteFile> for ProtoRemoteFile {
    fn from(file: RemoteFile) -> Self {
        ProtoRemoteFile {
            name: file.name,
            size: file.size,
            crc32: file.crc32,
        }
    }
}

impl From<ProtoRemoteFile> for RemoteFile {
    fn from(proto: ProtoRemoteFile) -> Self {
        RemoteFile {
            name: proto.name,
            size: proto.size,
            crc32: proto.crc32,
        }
    }
}

// -- 2PC --

impl From<PrepareRequest> for ProtoPrepareRequest {
    fn from(request: PrepareRequest) -> Self {
        ProtoPrepareRequest {
            config: Some(request.config.into()),
            mutation: request.mutation.encode(),
        }
    }
}

impl TryFrom<ProtoPrepareRequest> for PrepareRequest {
    type Error = Status;

    fn try_from(proto: ProtoPrepareRequest) -> Result<Self, Self::Error> {
        Ok(PrepareRequest {
            config: replica_config_from_proto(proto.config)?,
            mutation: mutation_from_proto(&proto.mutation)?,
        })
    }
}

impl From<PrepareAck> for ProtoPrepareAck {
    fn from(ack: PrepareAck) -> Self {
        ProtoPrepareAck {
            pid: Some(ack.pid.into()),
            err: ack.err.as_i32(),
            ballot: ack.ballot,
            decree: ack.decree,
            last_committed_decree_in_app: ack.last_committed_decree_in_app,
            last_committed_decree_in_prepare_list: ack.last_committed_decree_in_prepare_list,
        }
    }
}

impl TryFrom<ProtoPrepareAck> for PrepareAck {
    type Error = Status;

    fn try_from(proto: ProtoPrepareAck) -> Result<Self, Self::Error> {
        Ok(PrepareAck {
            pid: gpid_from_proto("pid", proto.pid)?,
            err: ErrorCode::from_i32(proto.err),
            ballot: proto.ballot,
            decree: proto.decree,
            last_committed_decree_in_app: proto.last_committed_decree_in_app,
            last_committed_decree_in_prepare_list: proto.last_committed_decree_in_prepare_list,
        })
    }
}

// -- Group check --

impl From<GroupCheckRequest> for ProtoGroupCheckRequest {
    fn from(request: GroupCheckRequest) -> Self {
        ProtoGroupCheckRequest {
            app: Some(request.app.into()),
            node: request.node.into_inner(),
            config: Some(request.config.into()),
            last_committed_decree: request.last_committed_decree,
            child_gpid: request.child_gpid.map(ProtoGpid::from),
        }
    }
}

impl TryFrom<ProtoGroupCheckRequest> for GroupCheckRequest {
    type Error = Status;

    fn try_from(proto: ProtoGroupCheckRequest) -> Result<Self, Self::Error> {
        Ok(GroupCheckRequest {
            app: app_from_proto(proto.app)?,
            node: required_node("node", proto.node)?,
            config: replica_config_from_proto(proto.config)?,
            last_committed_decree: proto.last_committed_decree,
            child_gpid: proto.child_gpid.map(Gpid::from),
        })
    }
}

impl From<GroupCheckResponse> for ProtoGroupCheckResponse {
    fn from(response: GroupCheckResponse) -> Self {
        ProtoGroupCheckResponse {
            pid: Some(response.pid.into()),
            err: response.err.as_i32(),
            node: response.node.into_inner(),
            last_committed_decree_in_app: response.last_committed_decree_in_app,
            last_committed_decree_in_prepare_list: response.last_committed_decree_in_prepare_list,
            learner_status: response.learner_status.map_or(0, |s| s.as_i32()),
            learner_signature: response.learner_signature,
        }
    }
}

impl TryFrom<ProtoGroupCheckResponse> for GroupCheckResponse {
    type Error = Status;

    fn try_from(proto: ProtoGroupCheckResponse) -> Result<Self, Self::Error> {
        let learner_status = match proto.learner_status {
            0 => None,
            value => Some(
                LearnerStatus::from_i32(value)
                    .ok_or_else(|| Status::invalid_argument(format!("Unknown learner status {}", value)))?,
            ),
        };
        Ok(GroupCheckResponse {
            pid: gpid_from_proto("pid", proto.pid)?,
            err: ErrorCode::from_i32(proto.err),
            node: required_node("node", proto.node)?,
            last_committed_decree_in_app: proto.last_committed_decree_in_app,
            last_committed_decree_in_prepare_list: proto.last_committed_decree_in_prepare_list,
            learner_status,
            learner_signature: proto.learner_signature,
        })
    }
}

// -- Learn --

impl From<LearnRequest> for ProtoLearnRequest {
    fn from(request: LearnRequest) -> Self {
        ProtoLearnRequest {
            pid: Some(request.pid.into()),
            learner: request.learner.into_inner(),
            signature: request.signature,
            last_committed_decree_in_app: request.last_committed_decree_in_app,
            last_committed_decree_in_prepare_list: request.last_committed_decree_in_prepare_list,
            app_specific_learn_request: request.app_specific_learn_request.to_vec(),
            max_gced_decree: request.max_gced_decree,
        }
    }
}

impl TryFrom<ProtoLearnRequest> for LearnRequest {
    type Error = Status;

    fn try_from(proto: ProtoLearnRequest) -> Result<Self, Self::Error> {
        Ok(LearnRequest {
            pid: gpid_from_proto("pid", proto.pid)?,
            learner: required_node("learner", proto.learner)?,
            signature: proto.signature,
            last_committed_decree_in_app: proto.last_committed_decree_in_app,
            last_committed_decree_in_prepare_list: proto.last_committed_decree_in_prepare_list,
            app_specific_learn_request: Bytes::from(proto.app_specific_learn_request),
            max_gced_decree: proto.max_gced_decree,
        })
    }
}

impl From<LearnResponse> for ProtoLearnResponse {
    fn from(response: LearnResponse) -> Self {
        ProtoLearnResponse {
            err: response.err.as_i32(),
            config: Some(response.config.into()),
            learnee: response.learnee.into_inner(),
            last_committed_decree: response.last_committed_decree,
            prepare_start_decree: response.prepare_start_decree,
            learn_type: response.learn_type.as_i32(),
            from_decree_excluded: response.from_decree_excluded,
            to_decree_included: response.to_decree_included,
            meta: response.meta.to_vec(),
            base_local_dir: response.base_local_dir,
            files: response.files.into_iter().map(ProtoRemoteFile::from).collect(),
            mutations: response.mutations.iter().map(Mutation::encode).collect(),
        }
    }
}

impl TryFrom<ProtoLearnResponse> for LearnResponse {
    type Error = Status;

    fn try_from(proto: ProtoLearnResponse) -> Result<Self, Self::Error> {
        let learn_type = LearnType::from_i32(proto.learn_type)
            .ok_or_else(|| Status::invalid_argument(format!("Unknown learn type {}", proto.learn_type)))?;
        let mut mutations = Vec::with_capacity(proto.mutations.len());
        for bytes in proto.mutations.iter() {
            mutations.push(mutation_from_proto(bytes)?);
        }

        Ok(LearnResponse {
            err: ErrorCode::from_i32(proto.err),
            config: replica_config_from_proto(proto.config)?,
            learnee: required_node("learnee", proto.learnee)?,
            last_committed_decree: proto.last_committed_decree,
            prepare_start_decree: proto.prepare_start_decree,
            learn_type,
            from_decree_excluded: proto.from_decree_excluded,
            to_decree_included: proto.to_decree_included,
            meta: Bytes::from(proto.meta),
            base_local_dir: proto.base_local_dir,
            files: proto.files.into_iter().map(RemoteFile::from).collect(),
            mutations,
        })
    }
}

impl From<LearnNotification> for ProtoLearnNotification {
    fn from(request: LearnNotification) -> Self {
        ProtoLearnNotification {
            pid: Some(request.pid.into()),
            learner: request.learner.into_inner(),
            signature: request.signature,
        }
    }
}

impl TryFrom<ProtoLearnNotification> for LearnNotification {
    type Error = Status;

    fn try_from(proto: ProtoLearnNotification) -> Result<Self, Self::Error> {
        Ok(LearnNotification {
            pid: gpid_from_proto("pid", proto.pid)?,
            learner: required_node("learner", proto.learner)?,
            signature: proto.signature,
        })
    }
}

impl From<LearnNotificationResponse> for ProtoLearnNotificationResponse {
    fn from(response: LearnNotificationResponse) -> Self {
        ProtoLearnNotificationResponse {
            err: response.err.as_i32(),
        }
    }
}

impl From<ProtoLearnNotificationResponse> for LearnNotificationResponse {
    fn from(proto: ProtoLearnNotificationResponse) -> Self {
        LearnNotificationResponse {
            err: ErrorCode::from_i32(proto.err),
        }
    }
}

// -- Checkpoint copy and file transfer --

impl From<CopyCheckpointRequest> for ProtoCopyCheckpointRequest {
    fn from(request: CopyCheckpointRequest) -> Self {
        ProtoCopyCheckpointRequest {
            pid: Some(request.pid.into()),
        }
    }
}

impl TryFrom<ProtoCopyCheckpointRequest> for CopyCheckpointRequest {
    type Error = Status;

    fn try_from(proto: ProtoCopyCheckpointRequest) -> Result<Self, Self::Error> {
        Ok(CopyCheckpointRequest {
            pid: gpid_from_proto("pid", proto.pid)?,
        })
    }
}

impl From<CopyCheckpointResponse> for ProtoCopyCheckpointResponse {
    fn from(response: CopyCheckpointResponse) -> Self {
        ProtoCopyCheckpointResponse {
            err: response.err.as_i32(),
            checkpoint_decree: response.checkpoint_decree,
            base_local_dir: response.base_local_dir,
            files: response.files.into_iter().map(ProtoRemoteFile::from).collect(),
        }
    }
}

impl From<ProtoCopyCheckpointResponse> for CopyCheckpointResponse {
    fn from(proto: ProtoCopyCheckpointResponse) -> Self {
        CopyCheckpointResponse {
            err: ErrorCode::from_i32(proto.err),
            checkpoint_decree: proto.checkpoint_decree,
            base_local_dir: proto.base_local_dir,
            files: proto.files.into_iter().map(RemoteFile::from).collect(),
        }
    }
}

impl From<FetchFileRequest> for ProtoFetchFileRequest {
    fn from(request: FetchFileRequest) -> Self {
        ProtoFetchFileRequest { path: request.path }
    }
}

impl From<ProtoFetchFileRequest> for FetchFileRequest {
    fn from(proto: ProtoFetchFileRequest) -> Self {
        FetchFileRequest { path: proto.path }
    }
}

impl From<FetchFileResponse> for ProtoFetchFileResponse {
    fn from(response: FetchFileResponse) -> Self {
        ProtoFetchFileResponse {
            err: response.err.as_i32(),
            data: response.data.to_vec(),
        }
    }
}

impl From<ProtoFetchFileResponse> for FetchFileResponse {
    fn from(proto: ProtoFetchFileResponse) -> Self {
        FetchFileResponse {
            err: ErrorCode::from_i32(proto.err),
            data: Bytes::from(proto.data),
        }
    }
}

// -- Configuration and split --

impl From<ConfigProposal> for ProtoConfigProposal {
    fn from(request: ConfigProposal) -> Self {
        ProtoConfigProposal {
            app: Some(request.app.into()),
            config: Some(request.config.into()),
            config_type: request.config_type.as_i32(),
            node: request.node.into_inner(),
        }
    }
}

impl TryFrom<ProtoConfigProposal> for ConfigProposal {
    type Error = Status;

    fn try_from(proto: ProtoConfigProposal) -> Result<Self, Self::Error> {
        let config_type = ConfigType::from_i32(proto.config_type)
            .ok_or_else(|| Status::invalid_argument(format!("Unknown config type {}", proto.config_type)))?;
        Ok(ConfigProposal {
            app: app_from_proto(proto.app)?,
            config: partition_config_from_proto("config", proto.config)?,
            config_type,
            node: required_node("node", proto.node)?,
        })
    }
}

impl From<ConfigurationUpdate> for ProtoConfigurationUpdate {
    fn from(request: ConfigurationUpdate) -> Self {
        ProtoConfigurationUpdate {
            app: Some(request.app.into()),
            config: Some(request.config.into()),
        }
    }
}

impl TryFrom<ProtoConfigurationUpdate> for ConfigurationUpdate {
    type Error = Status;

    fn try_from(proto: ProtoConfigurationUpdate) -> Result<Self, Self::Error> {
        Ok(ConfigurationUpdate {
            app: app_from_proto(proto.app)?,
            config: partition_config_from_proto("config", proto.config)?,
        })
    }
}

impl From<AddChildRequest> for ProtoAddChildRequest {
    fn from(request: AddChildRequest) -> Self {
        ProtoAddChildRequest {
            app: Some(request.app.into()),
            parent_config: Some(request.parent_config.into()),
            child_gpid: Some(request.child_gpid.into()),
        }
    }
}

impl TryFrom<ProtoAddChildRequest> for AddChildRequest {
    type Error = Status;

    fn try_from(proto: ProtoAddChildRequest) -> Result<Self, Self::Error> {
        Ok(AddChildRequest {
            app: app_from_proto(proto.app)?,
            parent_config: partition_config_from_proto("parent_config", proto.parent_config)?,
            child_gpid: gpid_from_proto("child_gpid", proto.child_gpid)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::UpdateRecord;

    #[test]
    fn rpc_errors_survive_the_wire() {
        let target = NodeAddress::new("127.0.0.1:34801");
        let errors = vec![
            RpcError::ReplicaNotFound(Gpid::new(2, 7)),
            RpcError::Unreachable(target.clone()),
            RpcError::Timeout,
            RpcError::ActorExited,
        ];
        for error in errors {
            let status = rpc_error_to_status(&error);
            assert_eq!(status_to_rpc_error(&target, status), error);
        }

        match status_to_rpc_error(&target, rpc_error_to_status(&RpcError::Transport("boom".into()))) {
            RpcError::Transport(message) => assert!(message.contains("boom")),
            other => panic!("Unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_primary_is_empty_on_the_wire() {
        let mut config = PartitionConfiguration::new(Gpid::new(1, 0), 3);
        config.secondaries.push(NodeAddress::new("n2"));
        let proto = ProtoPartitionConfiguration::from(config.clone());
        assert_eq!(proto.primary, "");
        assert_eq!(PartitionConfiguration::try_from(proto).unwrap(), config);
    }

    #[test]
    fn malformed_requests_are_rejected() {
        let proto = ProtoPrepareRequest {
            config: None,
            mutation: Vec::new(),
        };
        let status = PrepareRequest::try_from(proto).unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);

        let config = ReplicaConfiguration {
            pid: Gpid::new(1, 0),
            ballot: 3,
            primary: Some(NodeAddress::new("n1")),
            status: PartitionStatus::Secondary,
            learner_signature: 0,
        };
        let proto = ProtoPrepareRequest {
            config: Some(config.into()),
            mutation: vec![1, 2, 3],
        };
        let status = PrepareRequest::try_from(proto).unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[test]
    fn learned_mutations_keep_their_payload() {
        let mutation = Mutation::new(
            Gpid::new(1, 0),
            2,
            5,
            4,
            vec![UpdateRecord {
                code: 1,
                data: Bytes::from("k=v"),
            }],
        );
        let mut response = LearnResponse::error(
            ErrorCode::Ok,
            ReplicaConfiguration {
                pid: Gpid::new(1, 0),
                ballot: 2,
                primary: Some(NodeAddress::new("n1")),
                status: PartitionStatus::PotentialSecondary,
                learner_signature: 9,
            },
            NodeAddress::new("n1"),
        );
        response.learn_type = LearnType::Log;
        response.mutations.push(mutation.clone());

        let decoded = LearnResponse::try_from(ProtoLearnResponse::from(response)).unwrap();
        assert_eq!(decoded.learn_type, LearnType::Log);
        assert_eq!(decoded.config.learner_signature, 9);
        assert_eq!(decoded.mutations, vec![mutation]);
    }
}
