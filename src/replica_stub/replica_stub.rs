use crate::actor::{ActorClient, ReplicaActor};
use crate::api::ReplicationOptionsValidated;
use crate::common::{AppInfo, Ballot, Decree, Gpid, Mutation, NodeAddress, PartitionStatus};
use crate::mutation_log::{LogWriter, MutationLog};
use crate::replica::{
    load_checkpoint_metadata, verify_checkpoint_files, OpenReplicaError, Replica, ReplicaConfig, ReplicaContext,
    RestoreError,
};
use crate::storage::{load_app_info, StorageEngineRegistry, LEARN_DIR_NAME};
use crate::transport::{MetaServerClient, ReplicaTransport};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

pub(crate) const SHARED_LOG_DIR_NAME: &str = "slog";
const BAD_REPLICA_DIR_SUFFIX: &str = ".err";
const RESTORE_DIR_NAME: &str = "restore";

pub(crate) struct ReplicaStubConfig {
    pub(crate) logger: slog::Logger,
    pub(crate) address: NodeAddress,
    pub(crate) root_dir: PathBuf,
    pub(crate) options: ReplicationOptionsValidated,
    pub(crate) transport: Arc<dyn ReplicaTransport>,
    pub(crate) meta: Arc<dyn MetaServerClient>,
    pub(crate) engines: StorageEngineRegistry,
}

/// ReplicaStub is one node of the cluster: it hosts any number of replicas, each running on its
/// own actor, and routes peer RPCs to them.
pub(crate) struct ReplicaStub {
    pub(super) logger: slog::Logger,
    pub(super) ctx: Arc<ReplicaContext>,
    replicas: RwLock<HashMap<Gpid, ActorClient>>,
}

impl ReplicaStub {
    /// Opens the node under `root_dir`, including every replica found there.
    pub(crate) fn open(config: ReplicaStubConfig) -> Result<Arc<ReplicaStub>, OpenReplicaError> {
        fs::create_dir_all(&config.root_dir)?;
        let shared_log = if config.options.log_shared_enabled {
            let log = MutationLog::open(
                config.logger.new(slog::o!("Log" => "shared")),
                &config.root_dir.join(SHARED_LOG_DIR_NAME),
                config.options.log_file_size_bytes,
            )?;
            Some(Arc::new(log))
        } else {
            None
        };
        let shared_log_writer = shared_log
            .clone()
            .map(|log| LogWriter::spawn(config.logger.new(slog::o!("Log" => "shared")), log));

        let stub = Arc::new_cyclic(|stub: &Weak<ReplicaStub>| ReplicaStub {
            logger: config.logger.clone(),
            ctx: Arc::new(ReplicaContext {
                address: config.address,
                root_dir: config.root_dir,
                options: config.options,
                transport: config.transport,
                meta: config.meta,
                shared_log,
                shared_log_writer,
                engines: config.engines,
                stub: stub.clone(),
            }),
            replicas: RwLock::new(HashMap::new()),
        });
        stub.load_replicas()?;

        Ok(stub)
    }

    fn load_replicas(&self) -> Result<(), OpenReplicaError> {
        let mut shared_mutations: HashMap<Gpid, Vec<Mutation>> = HashMap::new();
        if !self.ctx.options.log_private_enabled {
            if let Some(log) = self.ctx.shared_log.as_ref() {
                log.replay(|mutation| shared_mutations.entry(mutation.pid()).or_default().push(mutation))?;
            }
        }

        let dirs = list_dirs(&self.ctx.root_dir)?;
        let mut replicas = self.replicas.write();
        for dir in dirs {
            let gpid = match parse_replica_dir_name(&dir) {
                Some((gpid, _)) => gpid,
                None => continue,
            };
            let mutations = shared_mutations.remove(&gpid).unwrap_or_default();
            let opened = load_app_info(&dir)
                .map_err(OpenReplicaError::from)
                .and_then(|app_info| {
                    self.spawn_replica(&mut replicas, app_info, gpid, |config| Replica::open(config, mutations))
                });
            if let Err(e) = opened {
                slog::warn!(self.logger, "Failed to open replica {} from {:?}: {}", gpid, dir, e);
                self.move_aside(&dir);
            }
        }

        slog::info!(
            self.logger,
            "Opened {} replicas under {:?}",
            replicas.len(),
            self.ctx.root_dir
        );
        Ok(())
    }

    fn move_aside(&self, dir: &Path) {
        let mut name = dir.as_os_str().to_os_string();
        name.push(BAD_REPLICA_DIR_SUFFIX);
        if let Err(e) = fs::rename(dir, &name) {
            slog::warn!(self.logger, "Failed to move bad replica dir {:?} aside: {}", dir, e);
        }
    }

    pub(crate) fn address(&self) -> &NodeAddress {
        &self.ctx.address
    }

    pub(crate) fn replica_client(&self, gpid: Gpid) -> Option<ActorClient> {
        self.replicas.read().get(&gpid).cloned()
    }

    pub(crate) fn replicas(&self) -> Vec<Gpid> {
        let mut gpids: Vec<Gpid> = self.replicas.read().keys().copied().collect();
        gpids.sort();
        gpids
    }

    fn replica_dir(&self, app_info: &AppInfo, gpid: Gpid) -> PathBuf {
        self.ctx.root_dir.join(format!(
            "{}.{}.{}",
            gpid.app_id, gpid.partition_index, app_info.app_type
        ))
    }

    /// Builds a replica with `build` and starts its actor. Fails if `gpid` is already hosted.
    fn spawn_replica<F, E>(
        &self,
        replicas: &mut HashMap<Gpid, ActorClient>,
        app_info: AppInfo,
        gpid: Gpid,
        build: F,
    ) -> Result<ActorClient, E>
    where
        F: FnOnce(ReplicaConfig) -> Result<Replica, E>,
        E: From<OpenReplicaError>,
    {
        if replicas.contains_key(&gpid) {
            return Err(OpenReplicaError::AlreadyExists(gpid).into());
        }
        if !self.ctx.engines.contains(&app_info.app_type) {
            let e = crate::storage::StorageError::UnknownEngine(app_info.app_type.clone());
            return Err(OpenReplicaError::from(e).into());
        }

        let logger = self.logger.new(slog::o!("Gpid" => gpid.to_string()));
        let (client, receiver) = ActorClient::new(self.ctx.options.actor_queue_size);
        let replica = build(ReplicaConfig {
            logger: logger.clone(),
            ctx: self.ctx.clone(),
            dir: self.replica_dir(&app_info, gpid),
            app_info,
            gpid,
            actor_client: client.weak(),
        })?;

        tokio::task::spawn(ReplicaActor::new(logger, receiver, replica).run_event_loop());
        replicas.insert(gpid, client.clone());
        Ok(client)
    }

    pub(crate) fn create_new_replica(&self, app_info: AppInfo, gpid: Gpid) -> Result<ActorClient, OpenReplicaError> {
        let mut replicas = self.replicas.write();
        let client = self.spawn_replica(&mut replicas, app_info, gpid, Replica::create_new)?;
        slog::info!(self.logger, "Created replica {}", gpid);
        Ok(client)
    }

    /// Creates the child of a split next to its parent. Returns the child's actor and the directory
    /// the parent stages its checkpoint in.
    pub(crate) fn create_child_replica(
        &self,
        child: Gpid,
        app_info: AppInfo,
        parent: Gpid,
        ballot: Ballot,
        primary: Option<NodeAddress>,
    ) -> Result<(ActorClient, PathBuf), OpenReplicaError> {
        let learn_dir = self.replica_dir(&app_info, child).join(LEARN_DIR_NAME);
        let mut replicas = self.replicas.write();
        let client = self.spawn_replica(&mut replicas, app_info, child, |config| {
            Replica::create_child(config, parent, ballot, primary)
        })?;

        Ok((client, learn_dir))
    }

    /// Stops the replica's actor. Its data stays on disk.
    pub(crate) async fn close_replica(&self, gpid: Gpid) -> bool {
        let client = match self.replicas.write().remove(&gpid) {
            Some(client) => client,
            None => return false,
        };
        if client.close().await.is_err() {
            slog::warn!(self.logger, "Replica {} was already stopped", gpid);
        }

        slog::info!(self.logger, "Closed replica {}", gpid);
        true
    }

    /// Creates `gpid` from a backed up checkpoint. A damaged backup fails the restore, unless bad
    /// partitions are skipped: then the replica is created empty and `IgnoreBadData` is returned.
    pub(crate) fn restore_replica(
        &self,
        app_info: AppInfo,
        gpid: Gpid,
        backup_dir: &Path,
    ) -> Result<Decree, RestoreError> {
        let verified = load_checkpoint_metadata(backup_dir).and_then(|metadata| {
            verify_checkpoint_files(backup_dir, &metadata)?;
            Ok(metadata)
        });
        let mut replicas = self.replicas.write();

        let metadata = match verified {
            Ok(metadata) => metadata,
            Err(e) => {
                slog::warn!(self.logger, "Backup of {} in {:?} is damaged: {}", gpid, backup_dir, e);
                if !self.ctx.options.skip_bad_partition {
                    return Err(RestoreError::Corruption {
                        gpid,
                        reason: e.to_string(),
                    });
                }
                self.spawn_replica(&mut replicas, app_info, gpid, Replica::create_new)?;
                return Err(RestoreError::IgnoreBadData(gpid));
            }
        };

        let mut restored = 0;
        self.spawn_replica(&mut replicas, app_info, gpid, |config| {
            let restore_dir = config.dir.join(LEARN_DIR_NAME).join(RESTORE_DIR_NAME);
            let mut replica = Replica::create_new(config)?;
            fs::create_dir_all(&restore_dir).map_err(OpenReplicaError::from)?;
            for file in &metadata.files {
                fs::copy(backup_dir.join(&file.name), restore_dir.join(&file.name)).map_err(OpenReplicaError::from)?;
            }
            restored = replica.restore_from_checkpoint(&restore_dir, &metadata)?;
            if let Err(e) = fs::remove_dir_all(&restore_dir) {
                slog::debug!(self.logger, "Could not clean restore dir: {}", e);
            }
            Ok::<_, RestoreError>(replica)
        })?;

        Ok(restored)
    }

    pub(crate) async fn apply_envs(&self, app_id: i32, envs: BTreeMap<String, String>) {
        let clients: Vec<ActorClient> = self
            .replicas
            .read()
            .iter()
            .filter(|(gpid, _)| gpid.app_id == app_id)
            .map(|(_, client)| client.clone())
            .collect();
        for client in clients {
            let _ = client.apply_envs(envs.clone()).await;
        }
    }

    /// Drops shared log segments whose mutations every hosted replica made durable. Replicas whose
    /// state is unknown keep their segments. So do closed replicas still on disk when they have no
    /// private log to rebuild from.
    pub(crate) async fn garbage_collect_shared_log(&self) -> usize {
        let log = match self.ctx.shared_log.clone() {
            Some(log) => log,
            None => return 0,
        };
        let clients: Vec<(Gpid, ActorClient)> = self
            .replicas
            .read()
            .iter()
            .map(|(gpid, client)| (*gpid, client.clone()))
            .collect();

        let mut durable_decrees = HashMap::new();
        let mut pinned = HashSet::new();
        for (gpid, client) in clients {
            match client.query_state().await {
                Ok(state) if state.status != PartitionStatus::Error => {
                    durable_decrees.insert(gpid, state.last_durable_decree);
                }
                _ => {
                    pinned.insert(gpid);
                }
            }
        }

        let root_dir = self.ctx.root_dir.clone();
        let pin_closed_replicas = !self.ctx.options.log_private_enabled;
        let reserve_size = self.ctx.options.log_shared_reserve_max_size_bytes;
        let reserve_time = self.ctx.options.log_shared_reserve_max_time;
        let result = tokio::task::spawn_blocking(move || {
            if pin_closed_replicas {
                for dir in list_dirs(&root_dir)? {
                    if let Some((gpid, _)) = parse_replica_dir_name(&dir) {
                        if !durable_decrees.contains_key(&gpid) {
                            pinned.insert(gpid);
                        }
                    }
                }
            }
            log.garbage_collection_shared(&durable_decrees, &pinned, reserve_size, reserve_time)
        })
        .await;
        match result {
            Ok(Ok(removed)) => {
                if removed > 0 {
                    slog::info!(self.logger, "Shared log GC removed {} files", removed);
                }
                removed
            }
            Ok(Err(e)) => {
                slog::warn!(self.logger, "Shared log GC failed: {}", e);
                0
            }
            Err(e) => {
                slog::warn!(self.logger, "Shared log GC task failed: {}", e);
                0
            }
        }
    }

    /// Runs shared log GC on every checkpoint interval until the stub is dropped.
    pub(crate) fn spawn_shared_log_gc(self: &Arc<Self>) {
        if self.ctx.shared_log.is_none() {
            return;
        }
        let period = self.ctx.options.checkpoint_interval;
        let stub = Arc::downgrade(self);
        tokio::task::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                match stub.upgrade() {
                    Some(stub) => {
                        stub.garbage_collect_shared_log().await;
                    }
                    None => break,
                }
            }
        });
    }

    /// Closes every replica, then waits for the shared log to write what they queued.
    pub(crate) async fn shutdown(&self) {
        let clients: Vec<(Gpid, ActorClient)> = self.replicas.write().drain().collect();
        for (gpid, client) in clients {
            if client.close().await.is_err() {
                slog::debug!(self.logger, "Replica {} was already stopped", gpid);
            }
        }
        if let Some(writer) = self.ctx.shared_log_writer.as_ref() {
            writer.flush().await;
        }

        slog::info!(self.logger, "Node {} shut down", self.ctx.address);
    }
}

/// Sub-directories of `root`, sorted.
fn list_dirs(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// `<app_id>.<partition_index>.<app_type>`
pub(crate) fn parse_replica_dir_name(dir: &Path) -> Option<(Gpid, String)> {
    let name = dir.file_name()?.to_str()?;
    if name.ends_with(BAD_REPLICA_DIR_SUFFIX) {
        return None;
    }
    let mut parts = name.splitn(3, '.');
    let app_id = parts.next()?.parse().ok()?;
    let partition_index = parts.next()?.parse().ok()?;
    let app_type = parts.next()?;
    if app_type.is_empty() {
        return None;
    }

    Some((Gpid::new(app_id, partition_index), app_type.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replica_dir_names() {
        fn run(expected: Option<(i32, i32, &str)>, input: &str) {
            let parsed = parse_replica_dir_name(Path::new(input));
            let expected = expected.map(|(app, index, app_type)| (Gpid::new(app, index), app_type.to_string()));
            assert_eq!(parsed, expected, "{}", input);
        }

        run(Some((1, 0, "simple_kv")), "/data/1.0.simple_kv");
        run(Some((12, 7, "simple_kv_sync")), "12.7.simple_kv_sync");
        run(None, "/data/1.0.simple_kv.err");
        run(None, "slog");
        run(None, "1.0");
        run(None, "1.0.");
        run(None, "a.0.simple_kv");
        run(None, "1.x.simple_kv");
    }
}
