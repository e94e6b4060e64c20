use crate::common::{Decree, PartitionStatus};
use crate::replica::replica::Replica;
use crate::replica::replica_api::{CheckpointError, CheckpointFileInfo, CheckpointMetadata, RestoreError};
use crate::storage::{ChkptApplyMode, LearnState};
use bytes::Bytes;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

pub(crate) const BACKUP_METADATA_FILE_NAME: &str = "backup_metadata";

impl Replica {
    /// Writes a checkpoint of the current app state into `dir` along with a metadata file that
    /// lets a restore check every file.
    pub(crate) fn backup_checkpoint(&mut self, dir: &Path) -> Result<CheckpointMetadata, CheckpointError> {
        if !matches!(self.status(), PartitionStatus::Primary | PartitionStatus::Secondary) {
            return Err(CheckpointError::InvalidState(self.status()));
        }
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }

        let checkpoint_decree = self.app.engine().copy_checkpoint_to_dir(dir)?;
        let mut files = Vec::new();
        for path in list_files(dir)? {
            files.push(describe_file(&path)?);
        }
        let metadata = CheckpointMetadata {
            checkpoint_decree,
            files,
        };
        let json = serde_json::to_vec_pretty(&metadata).map_err(|e| CheckpointError::InvalidMetadata(e.to_string()))?;
        fs::write(dir.join(BACKUP_METADATA_FILE_NAME), json)?;

        slog::info!(
            self.logger,
            "Backed up checkpoint at decree {} with {} files to {:?}",
            checkpoint_decree,
            metadata.files.len(),
            dir
        );
        Ok(metadata)
    }

    /// Loads a verified backup into a freshly created replica. Logs restart past the restored
    /// decree.
    pub(crate) fn restore_from_checkpoint(
        &mut self,
        backup_dir: &Path,
        metadata: &CheckpointMetadata,
    ) -> Result<Decree, RestoreError> {
        let state = LearnState {
            from_decree_excluded: 0,
            to_decree_included: metadata.checkpoint_decree,
            meta: Bytes::new(),
            files: metadata.files.iter().map(|f| backup_dir.join(&f.name)).collect(),
        };
        self.app
            .apply_checkpoint(ChkptApplyMode::Learn, &state)
            .map_err(|e| RestoreError::Corruption {
                gpid: self.gpid,
                reason: e.to_string(),
            })?;

        let decree = self.app.last_committed_decree();
        let shared_start = self
            .ctx
            .shared_log
            .as_ref()
            .map_or(0, |log| log.on_partition_reset(self.gpid, decree));
        let private_start = self
            .private_log
            .as_ref()
            .map_or(0, |log| log.on_partition_reset(self.gpid, decree));
        let ballot = self.ballot();
        let durable = self.app.last_durable_decree();
        self.app
            .update_init_info(ballot, shared_start, private_start, durable)
            .map_err(|e| RestoreError::Checkpoint(CheckpointError::InvalidMetadata(e.to_string())))?;
        self.plist.reset(decree);

        slog::info!(self.logger, "Restored from {:?} at decree {}", backup_dir, decree);
        Ok(decree)
    }
}

pub(crate) fn load_checkpoint_metadata(dir: &Path) -> Result<CheckpointMetadata, CheckpointError> {
    let bytes = fs::read(dir.join(BACKUP_METADATA_FILE_NAME))?;
    serde_json::from_slice(&bytes).map_err(|e| CheckpointError::InvalidMetadata(e.to_string()))
}

/// Every file the metadata names must be present with the recorded size and crc.
pub(crate) fn verify_checkpoint_files(dir: &Path, metadata: &CheckpointMetadata) -> Result<(), CheckpointError> {
    if metadata.files.is_empty() {
        return Err(CheckpointError::InvalidMetadata("no checkpoint files".into()));
    }
    for expected in &metadata.files {
        let path = dir.join(&expected.name);
        if !path.is_file() {
            return Err(CheckpointError::Corruption {
                file: expected.name.clone(),
                reason: "missing".into(),
            });
        }
        let actual = describe_file(&path)?;
        if actual.size != expected.size {
            return Err(CheckpointError::Corruption {
                file: expected.name.clone(),
                reason: format!("size {} != {}", actual.size, expected.size),
            });
        }
        if actual.crc32 != expected.crc32 {
            return Err(CheckpointError::Corruption {
                file: expected.name.clone(),
                reason: format!("crc {:#x} != {:#x}", actual.crc32, expected.crc32),
            });
        }
    }

    Ok(())
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>, CheckpointError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn describe_file(path: &Path) -> Result<CheckpointFileInfo, CheckpointError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CheckpointError::InvalidMetadata(format!("bad file name {:?}", path)))?
        .to_string();

    let mut file = fs::File::open(path)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut size = 0u64;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    Ok(CheckpointFileInfo {
        name,
        size,
        crc32: hasher.finalize(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Callback;
    use crate::replica::replica::test_utils::*;
    use crate::replica::replica_api::ClientWriteInput;
    use crate::storage::put_update;
    use crate::ReplicationOptions;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn backup_then_verify() {
        let dir = tempfile::tempdir().unwrap();
        let backup = dir.path().join("backup-1");
        let (mut replica, _client, mut events) =
            new_replica(test_context(dir.path(), ReplicationOptions::default()));

        assert!(matches!(
            replica.backup_checkpoint(&backup),
            Err(CheckpointError::InvalidState(PartitionStatus::Inactive))
        ));

        become_single_primary(&mut replica);
        for i in 0..4 {
            let (tx, _rx) = oneshot::channel();
            replica.client_write(
                ClientWriteInput {
                    updates: vec![put_update(&format!("k{}", i), "v")],
                },
                Callback(tx),
            );
        }
        settle_log_writes(&mut replica, &mut events).await;

        let metadata = replica.backup_checkpoint(&backup).unwrap();
        assert_eq!(metadata.checkpoint_decree, 4);
        assert_eq!(load_checkpoint_metadata(&backup).unwrap(), metadata);
        verify_checkpoint_files(&backup, &metadata).unwrap();

        // Flip the file's content without changing its size.
        let file = backup.join(&metadata.files[0].name);
        let mut bytes = fs::read(&file).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&file, bytes).unwrap();
        assert!(matches!(
            verify_checkpoint_files(&backup, &metadata),
            Err(CheckpointError::Corruption { .. })
        ));
    }

    #[test]
    fn missing_metadata_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_checkpoint_metadata(dir.path()), Err(CheckpointError::Io(_))));

        fs::write(dir.path().join(BACKUP_METADATA_FILE_NAME), b"{not json").unwrap();
        assert!(matches!(
            load_checkpoint_metadata(dir.path()),
            Err(CheckpointError::InvalidMetadata(_))
        ));
    }
}
