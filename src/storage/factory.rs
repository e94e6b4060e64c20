use crate::common::Gpid;
use crate::storage::simple_kv::SimpleKvEngine;
use crate::storage::{StorageEngine, StorageError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub const SIMPLE_KV_APP_TYPE: &str = "simple_kv";
pub const SIMPLE_KV_SYNC_APP_TYPE: &str = "simple_kv_sync";

// -- Engine factory --
pub trait StorageEngineFactory: Send + Sync {
    fn create(&self, gpid: Gpid, data_dir: &Path) -> Result<Arc<dyn StorageEngine>, StorageError>;
}

// -- SimpleKvFactory --

pub struct SimpleKvFactory {
    async_checkpoint: bool,
}

impl SimpleKvFactory {
    pub fn new() -> Self {
        SimpleKvFactory { async_checkpoint: true }
    }

    /// Engines that only support synchronous checkpoints. Primaries of such apps copy
    /// checkpoints from their secondaries.
    pub fn sync_only() -> Self {
        SimpleKvFactory {
            async_checkpoint: false,
        }
    }
}

impl StorageEngineFactory for SimpleKvFactory {
    fn create(&self, _gpid: Gpid, data_dir: &Path) -> Result<Arc<dyn StorageEngine>, StorageError> {
        Ok(Arc::new(SimpleKvEngine::new(data_dir, self.async_checkpoint)))
    }
}

// -- Registry --

/// StorageEngineRegistry maps an app type to the factory that builds its engines. It is built once
/// per node and handed to every replica that opens.
#[derive(Clone)]
pub struct StorageEngineRegistry {
    factories: HashMap<String, Arc<dyn StorageEngineFactory>>,
}

impl StorageEngineRegistry {
    pub fn new() -> Self {
        StorageEngineRegistry {
            factories: HashMap::new(),
        }
    }

    /// Registry with the engines shipped in this crate.
    pub fn with_builtin_engines() -> Self {
        let mut registry = StorageEngineRegistry::new();
        registry.register(SIMPLE_KV_APP_TYPE, Arc::new(SimpleKvFactory::new()));
        registry.register(SIMPLE_KV_SYNC_APP_TYPE, Arc::new(SimpleKvFactory::sync_only()));
        registry
    }

    /// Registers `factory` under `app_type`. Last registration wins.
    pub fn register(&mut self, app_type: &str, factory: Arc<dyn StorageEngineFactory>) {
        self.factories.insert(app_type.to_string(), factory);
    }

    pub fn contains(&self, app_type: &str) -> bool {
        self.factories.contains_key(app_type)
    }

    pub fn create(
        &self,
        app_type: &str,
        gpid: Gpid,
        data_dir: &Path,
    ) -> Result<Arc<dyn StorageEngine>, StorageError> {
        match self.factories.get(app_type) {
            Some(factory) => factory.create(gpid, data_dir),
            None => Err(StorageError::UnknownEngine(app_type.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_registered_engines_only() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StorageEngineRegistry::with_builtin_engines();

        let engine = registry
            .create(SIMPLE_KV_APP_TYPE, Gpid::new(1, 0), dir.path())
            .unwrap();
        assert!(engine.supports_async_checkpoint());

        let engine = registry
            .create(SIMPLE_KV_SYNC_APP_TYPE, Gpid::new(1, 0), dir.path())
            .unwrap();
        assert!(!engine.supports_async_checkpoint());

        match registry.create("rocksdb", Gpid::new(1, 0), dir.path()) {
            Err(StorageError::UnknownEngine(name)) => assert_eq!(name, "rocksdb"),
            Err(e) => panic!("Unexpected error {:?}", e),
            Ok(_) => panic!("rocksdb is not registered"),
        }
    }
}
