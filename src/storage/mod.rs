mod app_info;
mod engine;
mod factory;
mod init_info;
mod replication_app;
mod simple_kv;

pub use app_info::load_app_info;
pub use app_info::store_app_info;
pub use app_info::APP_INFO_FILE_NAME;
pub use engine::AsyncCheckpointOutcome;
pub use engine::ChkptApplyMode;
pub use engine::LearnState;
pub use engine::StorageEngine;
pub use engine::StorageError;
pub use engine::WRITE_EMPTY_CODE;
pub use factory::SimpleKvFactory;
pub use factory::StorageEngineFactory;
pub use factory::StorageEngineRegistry;
pub use factory::SIMPLE_KV_APP_TYPE;
pub use factory::SIMPLE_KV_SYNC_APP_TYPE;
pub use init_info::InitInfoError;
pub use init_info::ReplicaInitInfo;
pub use init_info::INIT_INFO_FILE_NAME;
pub use init_info::LEGACY_INIT_INFO_FILE_NAME;
pub use replication_app::AppError;
pub use replication_app::ReplicationApp;
pub use replication_app::BACKUP_DIR_NAME;
pub use replication_app::DATA_DIR_NAME;
pub use replication_app::LEARN_DIR_NAME;
pub use replication_app::PRIVATE_LOG_DIR_NAME;
pub use simple_kv::append_update;
pub use simple_kv::checkpoint_file_name;
pub use simple_kv::put_update;
pub use simple_kv::remove_update;
pub use simple_kv::SimpleKvEngine;
