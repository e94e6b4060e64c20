use crate::common::{AppInfo, ErrorCode, Gpid, NodeAddress, PartitionConfiguration};
use crate::transport::{
    AddChildRequest, ConfigProposal, ConfigType, ConfigUpdateRequest, ConfigUpdateResponse, ConfigurationUpdate,
    MetaServerClient, RegisterChildRequest, RegisterChildResponse, ReplicaTransport, RpcError,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// LocalMetaServer is an in-memory meta server. It keeps the partition configurations of every
/// app and drives replicas through the transport. Placement decisions are left to the caller.
pub struct LocalMetaServer {
    logger: slog::Logger,
    transport: Arc<dyn ReplicaTransport>,
    state: Mutex<MetaState>,
}

#[derive(Default)]
struct MetaState {
    apps: HashMap<i32, AppInfo>,
    partitions: HashMap<Gpid, PartitionConfiguration>,
    hold_child_registration: bool,
}

impl LocalMetaServer {
    pub fn new(logger: slog::Logger, transport: Arc<dyn ReplicaTransport>) -> Arc<Self> {
        Arc::new(LocalMetaServer {
            logger,
            transport,
            state: Mutex::new(MetaState::default()),
        })
    }

    pub fn app_info(&self, app_id: i32) -> Option<AppInfo> {
        self.state.lock().apps.get(&app_id).cloned()
    }

    pub fn partition_config(&self, gpid: Gpid) -> Option<PartitionConfiguration> {
        self.state.lock().partitions.get(&gpid).cloned()
    }

    /// While held, child registrations fail as if the meta server were unreachable.
    pub fn set_hold_child_registration(&self, hold: bool) {
        self.state.lock().hold_child_registration = hold;
    }

    /// Creates every partition of `app` with `primary` as its only member.
    pub async fn create_app(&self, app: AppInfo, primary: NodeAddress) -> Result<(), RpcError> {
        let mut updates = Vec::new();
        {
            let mut state = self.state.lock();
            if state.apps.contains_key(&app.app_id) {
                return Err(RpcError::Transport(format!("app {} already exists", app.app_id)));
            }
            for index in 0..app.partition_count {
                let gpid = Gpid::new(app.app_id, index);
                let mut config = PartitionConfiguration::new(gpid, app.max_replica_count);
                config.ballot = 1;
                config.primary = Some(primary.clone());
                state.partitions.insert(gpid, config.clone());
                updates.push(ConfigurationUpdate {
                    app: app.clone(),
                    config,
                });
            }
            state.apps.insert(app.app_id, app.clone());
        }

        slog::info!(self.logger, "Created app {} with {} partitions on {}", app.app_id, app.partition_count, primary);
        for update in updates {
            self.transport.update_configuration(&primary, update).await?;
        }
        Ok(())
    }

    /// Asks the primary of `gpid` to make `node` learn and join as a secondary.
    pub async fn add_secondary(&self, gpid: Gpid, node: NodeAddress) -> Result<(), RpcError> {
        self.propose(gpid, ConfigType::AddSecondary, node).await
    }

    /// Asks `node` to become the primary of `gpid`.
    pub async fn assign_primary(&self, gpid: Gpid, node: NodeAddress) -> Result<(), RpcError> {
        let (app, config) = self.app_and_config(gpid)?;
        let proposal = ConfigProposal {
            app,
            config,
            config_type: ConfigType::AssignPrimary,
            node: node.clone(),
        };
        self.transport.config_proposal(&node, proposal).await
    }

    async fn propose(&self, gpid: Gpid, config_type: ConfigType, node: NodeAddress) -> Result<(), RpcError> {
        let (app, config) = self.app_and_config(gpid)?;
        let primary = config.primary.clone().ok_or(RpcError::ReplicaNotFound(gpid))?;
        let proposal = ConfigProposal {
            app,
            config,
            config_type,
            node,
        };
        self.transport.config_proposal(&primary, proposal).await
    }

    /// Tells the primary of every partition of `app_id` to split into a new child.
    pub async fn start_partition_split(&self, app_id: i32) -> Result<(), RpcError> {
        let (app, parents) = {
            let state = self.state.lock();
            let app = state
                .apps
                .get(&app_id)
                .cloned()
                .ok_or(RpcError::ReplicaNotFound(Gpid::new(app_id, 0)))?;
            let parents: Vec<PartitionConfiguration> = (0..app.partition_count)
                .filter_map(|index| state.partitions.get(&Gpid::new(app_id, index)).cloned())
                .collect();
            (app, parents)
        };

        for parent_config in parents {
            let primary = match parent_config.primary.clone() {
                Some(primary) => primary,
                None => continue,
            };
            let child_gpid = Gpid::new(app_id, parent_config.pid.partition_index + app.partition_count);
            slog::info!(self.logger, "Splitting {} into {}", parent_config.pid, child_gpid);
            let request = AddChildRequest {
                app: app.clone(),
                parent_config,
                child_gpid,
            };
            self.transport.add_child(&primary, request).await?;
        }
        Ok(())
    }

    fn app_and_config(&self, gpid: Gpid) -> Result<(AppInfo, PartitionConfiguration), RpcError> {
        let state = self.state.lock();
        match (state.apps.get(&gpid.app_id), state.partitions.get(&gpid)) {
            (Some(app), Some(config)) => Ok((app.clone(), config.clone())),
            _ => Err(RpcError::ReplicaNotFound(gpid)),
        }
    }

    fn push_configuration(&self, app: AppInfo, config: PartitionConfiguration) {
        let members: Vec<NodeAddress> = config.primary.iter().chain(config.secondaries.iter()).cloned().collect();
        for node in members {
            let transport = self.transport.clone();
            let update = ConfigurationUpdate {
                app: app.clone(),
                config: config.clone(),
            };
            let logger = self.logger.new(slog::o!("Peer" => node.to_string()));
            tokio::task::spawn(async move {
                let result = transport.update_configuration(&node, update).await;
                slog::debug!(logger, "Configuration push to peer result: {:?}", result);
            });
        }
    }
}

#[async_trait::async_trait]
impl MetaServerClient for LocalMetaServer {
    /// Accepts a change only when it moves the partition's ballot forward by exactly one.
    async fn update_partition_configuration(
        &self,
        request: ConfigUpdateRequest,
    ) -> Result<ConfigUpdateResponse, RpcError> {
        let gpid = request.config.pid;
        let mut state = self.state.lock();
        let current = state
            .partitions
            .get(&gpid)
            .cloned()
            .ok_or(RpcError::ReplicaNotFound(gpid))?;
        if request.config.ballot != current.ballot + 1 {
            slog::warn!(
                self.logger,
                "Refusing {:?} of {} on {}: ballot {} does not follow {}",
                request.config_type,
                request.node,
                gpid,
                request.config.ballot,
                current.ballot
            );
            return Ok(ConfigUpdateResponse {
                err: ErrorCode::VersionOutdated,
                config: current,
            });
        }

        let mut config = request.config;
        if matches!(request.config_type, ConfigType::DowngradeToInactive | ConfigType::Remove)
            && !config.last_drops.contains(&request.node)
        {
            config.last_drops.push(request.node.clone());
        }
        slog::info!(
            self.logger,
            "{} moves to ballot {} after {:?} of {}",
            gpid,
            config.ballot,
            request.config_type,
            request.node
        );
        state.partitions.insert(gpid, config.clone());

        Ok(ConfigUpdateResponse {
            err: ErrorCode::Ok,
            config,
        })
    }

    async fn register_child(&self, request: RegisterChildRequest) -> Result<RegisterChildResponse, RpcError> {
        let child = request.child_config.pid;
        let (app, child_config) = {
            let mut state = self.state.lock();
            if state.hold_child_registration {
                return Err(RpcError::Transport("child registration is held".into()));
            }
            let mut app = state
                .apps
                .get(&child.app_id)
                .cloned()
                .ok_or(RpcError::ReplicaNotFound(child))?;
            if let Some(registered) = state.partitions.get(&child) {
                return Ok(RegisterChildResponse {
                    err: ErrorCode::ChildRegistered,
                    app,
                    parent_config: request.parent_config,
                    child_config: registered.clone(),
                });
            }

            let mut child_config = request.child_config;
            child_config.ballot = request.parent_config.ballot + 1;
            // Child index = parent index + old partition count.
            let split_count = (child.partition_index - request.parent_config.pid.partition_index) * 2;
            app.partition_count = app.partition_count.max(split_count);
            state.partitions.insert(child, child_config.clone());
            state.apps.insert(app.app_id, app.clone());
            (app, child_config)
        };

        slog::info!(self.logger, "Registered child {} at ballot {}", child, child_config.ballot);
        self.push_configuration(app.clone(), child_config.clone());
        Ok(RegisterChildResponse {
            err: ErrorCode::Ok,
            app,
            parent_config: request.parent_config,
            child_config,
        })
    }
}
