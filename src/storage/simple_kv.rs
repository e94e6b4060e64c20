use crate::common::{Decree, Mutation, UpdateRecord};
use crate::storage::engine::WRITE_EMPTY_CODE;
use crate::storage::{AsyncCheckpointOutcome, ChkptApplyMode, LearnState, StorageEngine, StorageError};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const KV_PUT_CODE: u32 = 1;
pub const KV_REMOVE_CODE: u32 = 2;
pub const KV_APPEND_CODE: u32 = 3;

const CHECKPOINT_PREFIX: &str = "checkpoint.";
const CHECKPOINTS_RETAINED: usize = 2;

#[derive(Serialize, Deserialize)]
struct KvUpdate {
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Serialize, Deserialize)]
struct CheckpointFile {
    decree: Decree,
    store: BTreeMap<String, String>,
}

pub fn put_update(key: &str, value: &str) -> UpdateRecord {
    kv_update(KV_PUT_CODE, key, value)
}

pub fn remove_update(key: &str) -> UpdateRecord {
    kv_update(KV_REMOVE_CODE, key, "")
}

pub fn append_update(key: &str, value: &str) -> UpdateRecord {
    kv_update(KV_APPEND_CODE, key, value)
}

fn kv_update(code: u32, key: &str, value: &str) -> UpdateRecord {
    let update = KvUpdate {
        key: key.to_string(),
        value: value.to_string(),
    };
    // Serializing two strings cannot fail.
    let data = serde_json::to_vec(&update).unwrap_or_default();
    UpdateRecord {
        code,
        data: Bytes::from(data),
    }
}

pub fn checkpoint_file_name(decree: Decree) -> String {
    format!("{}{}", CHECKPOINT_PREFIX, decree)
}

fn parse_checkpoint_file_name(name: &str) -> Option<Decree> {
    name.strip_prefix(CHECKPOINT_PREFIX)?.parse::<Decree>().ok()
}

/// SimpleKvEngine is an in-memory string map made durable through full JSON checkpoints named
/// `checkpoint.<decree>` in its data directory.
pub struct SimpleKvEngine {
    data_dir: PathBuf,
    async_checkpoint: bool,
    state: Mutex<KvState>,
}

struct KvState {
    open: bool,
    store: BTreeMap<String, String>,
    last_committed_decree: Decree,
    last_durable_decree: Decree,
}

impl SimpleKvEngine {
    pub fn new(data_dir: &Path, async_checkpoint: bool) -> Self {
        SimpleKvEngine {
            data_dir: data_dir.to_path_buf(),
            async_checkpoint,
            state: Mutex::new(KvState {
                open: false,
                store: BTreeMap::new(),
                last_committed_decree: 0,
                last_durable_decree: 0,
            }),
        }
    }

    fn list_checkpoints(&self) -> Result<BTreeMap<Decree, PathBuf>, StorageError> {
        let mut checkpoints = BTreeMap::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            if let Some(decree) = entry.file_name().to_str().and_then(parse_checkpoint_file_name) {
                checkpoints.insert(decree, entry.path());
            }
        }
        Ok(checkpoints)
    }

    fn checkpoint_locked(&self, state: &mut KvState) -> Result<(), StorageError> {
        if state.last_committed_decree == state.last_durable_decree {
            return Ok(());
        }

        write_checkpoint(&self.data_dir, state.last_committed_decree, &state.store)?;
        state.last_durable_decree = state.last_committed_decree;

        let checkpoints = self.list_checkpoints()?;
        let stale = checkpoints.len().saturating_sub(CHECKPOINTS_RETAINED);
        for (_, path) in checkpoints.into_iter().take(stale) {
            fs::remove_file(path)?;
        }

        Ok(())
    }
}

fn write_checkpoint(dir: &Path, decree: Decree, store: &BTreeMap<String, String>) -> Result<PathBuf, StorageError> {
    let checkpoint = CheckpointFile {
        decree,
        store: store.clone(),
    };
    let bytes = serde_json::to_vec(&checkpoint).map_err(|e| StorageError::InvalidData(e.to_string()))?;

    let path = dir.join(checkpoint_file_name(decree));
    let tmp_path = dir.join(format!("{}.tmp", checkpoint_file_name(decree)));
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, &path)?;

    Ok(path)
}

fn read_checkpoint(path: &Path) -> Result<CheckpointFile, StorageError> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| StorageError::InvalidData(format!("checkpoint {:?} is unreadable: {}", path, e)))
}

impl StorageEngine for SimpleKvEngine {
    fn open(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        fs::create_dir_all(&self.data_dir)?;

        let checkpoints = self.list_checkpoints()?;
        match checkpoints.into_iter().next_back() {
            Some((decree, path)) => {
                let checkpoint = read_checkpoint(&path)?;
                if checkpoint.decree != decree {
                    return Err(StorageError::InvalidData(format!(
                        "checkpoint {:?} holds decree {}",
                        path, checkpoint.decree
                    )));
                }
                state.store = checkpoint.store;
                state.last_committed_decree = decree;
                state.last_durable_decree = decree;
            }
            None => {
                state.store.clear();
                state.last_committed_decree = 0;
                state.last_durable_decree = 0;
            }
        }

        state.open = true;
        Ok(())
    }

    fn close(&self, clear_state: bool) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(StorageError::NotOpen);
        }

        state.open = false;
        state.store.clear();
        state.last_committed_decree = 0;
        state.last_durable_decree = 0;
        if clear_state && self.data_dir.exists() {
            fs::remove_dir_all(&self.data_dir)?;
        }

        Ok(())
    }

    fn apply_mutation(&self, mutation: &Mutation) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(StorageError::NotOpen);
        }
        if mutation.decree() != state.last_committed_decree + 1 {
            return Err(StorageError::InvalidData(format!(
                "mutation decree {} does not follow {}",
                mutation.decree(),
                state.last_committed_decree
            )));
        }

        for update in mutation.updates.iter() {
            if update.code == WRITE_EMPTY_CODE {
                continue;
            }

            let kv: KvUpdate =
                serde_json::from_slice(&update.data).map_err(|e| StorageError::InvalidData(e.to_string()))?;
            match update.code {
                KV_PUT_CODE => {
                    state.store.insert(kv.key, kv.value);
                }
                KV_REMOVE_CODE => {
                    state.store.remove(&kv.key);
                }
                KV_APPEND_CODE => {
                    state.store.entry(kv.key).or_insert_with(String::new).push_str(&kv.value);
                }
                code => {
                    return Err(StorageError::InvalidData(format!("unknown update code {}", code)));
                }
            }
        }

        state.last_committed_decree = mutation.decree();
        Ok(())
    }

    fn last_committed_decree(&self) -> Decree {
        self.state.lock().last_committed_decree
    }

    fn last_durable_decree(&self) -> Decree {
        self.state.lock().last_durable_decree
    }

    fn sync_checkpoint(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(StorageError::NotOpen);
        }
        self.checkpoint_locked(&mut state)
    }

    fn async_checkpoint(&self, _is_emergency: bool) -> Result<AsyncCheckpointOutcome, StorageError> {
        if !self.async_checkpoint {
            return Err(StorageError::NotSupported("async checkpoint"));
        }

        let mut state = self.state.lock();
        if !state.open {
            return Err(StorageError::NotOpen);
        }
        if state.last_committed_decree == state.last_durable_decree {
            return Ok(AsyncCheckpointOutcome::NoNeedOperate);
        }

        self.checkpoint_locked(&mut state)?;
        Ok(AsyncCheckpointOutcome::Done)
    }

    fn supports_async_checkpoint(&self) -> bool {
        self.async_checkpoint
    }

    fn prepare_get_checkpoint(&self) -> Result<Bytes, StorageError> {
        Ok(Bytes::new())
    }

    fn get_checkpoint(&self, _learn_start: Decree, _request: &[u8]) -> Result<LearnState, StorageError> {
        let state = self.state.lock();
        if !state.open {
            return Err(StorageError::NotOpen);
        }

        let mut learn_state = LearnState::default();
        if state.last_durable_decree > 0 {
            learn_state.to_decree_included = state.last_durable_decree;
            learn_state
                .files
                .push(self.data_dir.join(checkpoint_file_name(state.last_durable_decree)));
        }

        Ok(learn_state)
    }

    fn storage_apply_checkpoint(&self, mode: ChkptApplyMode, learn_state: &LearnState) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(StorageError::NotOpen);
        }

        let source = match learn_state.files.first() {
            Some(path) => path,
            None => {
                if mode == ChkptApplyMode::Learn && learn_state.to_decree_included == 0 {
                    // Learnee has no checkpoint yet: start over from an empty store.
                    state.store.clear();
                    state.last_committed_decree = 0;
                    state.last_durable_decree = 0;
                    return Ok(());
                }
                return Err(StorageError::InvalidData("checkpoint has no files".into()));
            }
        };

        let checkpoint = read_checkpoint(source)?;
        if checkpoint.decree != learn_state.to_decree_included {
            return Err(StorageError::InvalidData(format!(
                "checkpoint file holds decree {} but learn state claims {}",
                checkpoint.decree, learn_state.to_decree_included
            )));
        }

        match mode {
            ChkptApplyMode::Learn => {
                write_checkpoint(&self.data_dir, checkpoint.decree, &checkpoint.store)?;
                state.store = checkpoint.store;
                state.last_committed_decree = checkpoint.decree;
                state.last_durable_decree = checkpoint.decree;
            }
            ChkptApplyMode::Copy => {
                if checkpoint.decree > state.last_committed_decree {
                    return Err(StorageError::InvalidData(format!(
                        "copied checkpoint {} is ahead of committed decree {}",
                        checkpoint.decree, state.last_committed_decree
                    )));
                }
                if checkpoint.decree > state.last_durable_decree {
                    write_checkpoint(&self.data_dir, checkpoint.decree, &checkpoint.store)?;
                    state.last_durable_decree = checkpoint.decree;
                }
            }
        }

        Ok(())
    }

    fn copy_checkpoint_to_dir(&self, dir: &Path) -> Result<Decree, StorageError> {
        let state = self.state.lock();
        if !state.open {
            return Err(StorageError::NotOpen);
        }

        fs::create_dir_all(dir)?;
        write_checkpoint(dir, state.last_committed_decree, &state.store)?;
        Ok(state.last_committed_decree)
    }

    fn query(&self, key: &[u8]) -> Result<Option<Bytes>, StorageError> {
        let state = self.state.lock();
        if !state.open {
            return Err(StorageError::NotOpen);
        }

        let key = std::str::from_utf8(key).map_err(|e| StorageError::InvalidData(e.to_string()))?;
        Ok(state.store.get(key).map(|v| Bytes::from(v.clone())))
    }
}
