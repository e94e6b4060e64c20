use crate::common::{Ballot, Decree, Mutation};
use crate::storage::init_info::{InitInfoError, ReplicaInitInfo};
use crate::storage::{ChkptApplyMode, LearnState, StorageEngine, StorageError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DATA_DIR_NAME: &str = "data";
pub const LEARN_DIR_NAME: &str = "learn";
pub const BACKUP_DIR_NAME: &str = "backup";
pub const PRIVATE_LOG_DIR_NAME: &str = "plog";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Replica data dir {0:?} does not exist")]
    DataDirMissing(PathBuf),
    #[error("Replica data is incomplete: last durable decree {durable} < init durable decree {init_durable}")]
    IncompleteData { durable: Decree, init_durable: Decree },
    #[error("Mutation {decree} does not follow last committed decree {last_committed}")]
    NonContiguous { decree: Decree, last_committed: Decree },
    #[error("Storage engine failure: {0}")]
    Storage(#[from] StorageError),
    #[error("Init info failure: {0}")]
    InitInfo(#[from] InitInfoError),
}

/// ReplicationApp binds a storage engine to one replica directory and enforces the rules the
/// replication layer relies on: strict decree order on apply, and init info that records where
/// the durable state starts.
pub struct ReplicationApp {
    logger: slog::Logger,
    dir: PathBuf,
    engine: Arc<dyn StorageEngine>,
    info: ReplicaInitInfo,
}

impl ReplicationApp {
    pub fn new(logger: slog::Logger, replica_dir: &Path, engine: Arc<dyn StorageEngine>) -> Self {
        ReplicationApp {
            logger,
            dir: replica_dir.to_path_buf(),
            engine,
            info: ReplicaInitInfo::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.join(DATA_DIR_NAME)
    }

    pub fn learn_dir(&self) -> PathBuf {
        self.dir.join(LEARN_DIR_NAME)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.dir.join(BACKUP_DIR_NAME)
    }

    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    pub fn init_info(&self) -> &ReplicaInitInfo {
        &self.info
    }

    pub fn last_committed_decree(&self) -> Decree {
        self.engine.last_committed_decree()
    }

    pub fn last_durable_decree(&self) -> Decree {
        self.engine.last_durable_decree()
    }

    /// Opens an existing replica's data.
    pub fn open_internal(&mut self) -> Result<(), AppError> {
        let data_dir = self.data_dir();
        if !data_dir.is_dir() {
            return Err(AppError::DataDirMissing(data_dir));
        }

        self.engine.open()?;
        self.info = ReplicaInitInfo::load(&self.logger, &self.dir)?;

        let durable = self.engine.last_durable_decree();
        if durable < self.info.init_durable_decree {
            slog::error!(
                self.logger,
                "Replica data is not complete: last durable decree {} < init durable decree {}",
                durable,
                self.info.init_durable_decree
            );
            return Err(AppError::IncompleteData {
                durable,
                init_durable: self.info.init_durable_decree,
            });
        }

        Ok(())
    }

    /// Wipes any previous data and starts an empty replica whose logs are valid from the given
    /// offsets.
    pub fn open_new_internal(
        &mut self,
        ballot: Ballot,
        shared_log_start: i64,
        private_log_start: i64,
    ) -> Result<(), AppError> {
        let data_dir = self.data_dir();
        if data_dir.exists() {
            fs::remove_dir_all(&data_dir).map_err(StorageError::from)?;
        }
        fs::create_dir_all(&data_dir).map_err(StorageError::from)?;

        self.engine.open()?;
        self.update_init_info(ballot, shared_log_start, private_log_start, 0)
    }

    pub fn close(&self, clear_state: bool) -> Result<(), AppError> {
        self.engine.close(clear_state)?;
        Ok(())
    }

    pub fn apply_mutation(&self, mutation: &Mutation) -> Result<(), AppError> {
        let last_committed = self.engine.last_committed_decree();
        if mutation.decree() != last_committed + 1 {
            return Err(AppError::NonContiguous {
                decree: mutation.decree(),
                last_committed,
            });
        }

        self.engine.apply_mutation(mutation)?;
        Ok(())
    }

    pub fn apply_checkpoint(&self, mode: ChkptApplyMode, state: &LearnState) -> Result<(), AppError> {
        self.engine.storage_apply_checkpoint(mode, state)?;
        Ok(())
    }

    pub fn update_init_info(
        &mut self,
        ballot: Ballot,
        shared_log_offset: i64,
        private_log_offset: i64,
        durable_decree: Decree,
    ) -> Result<(), AppError> {
        self.info = ReplicaInitInfo {
            init_ballot: ballot,
            init_durable_decree: durable_decree,
            init_offset_in_shared_log: shared_log_offset,
            init_offset_in_private_log: private_log_offset,
        };
        self.info.store(&self.logger, &self.dir)?;
        Ok(())
    }

    /// Refreshes ballot and durable decree, keeping the recorded log offsets.
    pub fn update_init_info_ballot_and_decree(&mut self, ballot: Ballot) -> Result<(), AppError> {
        let shared = self.info.init_offset_in_shared_log;
        let private = self.info.init_offset_in_private_log;
        let durable = self.engine.last_durable_decree();
        self.update_init_info(ballot, shared, private, durable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Gpid;
    use crate::storage::simple_kv::{put_update, SimpleKvEngine};

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn new_app(dir: &Path) -> ReplicationApp {
        let engine = Arc::new(SimpleKvEngine::new(&dir.join(DATA_DIR_NAME), true));
        ReplicationApp::new(test_logger(), dir, engine)
    }

    fn write(decree: Decree) -> Mutation {
        Mutation::new(Gpid::new(1, 0), 1, decree, decree - 1, vec![put_update("k", "v")])
    }

    #[test]
    fn open_new_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut app = new_app(dir.path());
            app.open_new_internal(1, 100, 0).unwrap();
            app.apply_mutation(&write(1)).unwrap();
            app.engine().sync_checkpoint().unwrap();
            app.update_init_info_ballot_and_decree(2).unwrap();
        }

        let mut app = new_app(dir.path());
        app.open_internal().unwrap();
        assert_eq!(app.last_committed_decree(), 1);
        assert_eq!(
            app.init_info(),
            &ReplicaInitInfo {
                init_ballot: 2,
                init_durable_decree: 1,
                init_offset_in_shared_log: 100,
                init_offset_in_private_log: 0,
            }
        );
    }

    #[test]
    fn open_rejects_missing_or_incomplete_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = new_app(dir.path());
        assert!(matches!(app.open_internal(), Err(AppError::DataDirMissing(_))));

        app.open_new_internal(1, 0, 0).unwrap();
        app.update_init_info(1, 0, 0, 5).unwrap();
        app.close(false).unwrap();

        let mut app = new_app(dir.path());
        assert!(matches!(
            app.open_internal(),
            Err(AppError::IncompleteData {
                durable: 0,
                init_durable: 5
            })
        ));
    }

    #[test]
    fn apply_requires_contiguous_decrees() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = new_app(dir.path());
        app.open_new_internal(1, 0, 0).unwrap();

        app.apply_mutation(&write(1)).unwrap();
        assert!(matches!(
            app.apply_mutation(&write(3)),
            Err(AppError::NonContiguous {
                decree: 3,
                last_committed: 1
            })
        ));
        assert!(matches!(
            app.apply_mutation(&write(1)),
            Err(AppError::NonContiguous { .. })
        ));
    }
}
