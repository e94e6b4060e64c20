use crate::common::{Ballot, Decree};
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

pub const INIT_INFO_FILE_NAME: &str = ".init-info";
pub const LEGACY_INIT_INFO_FILE_NAME: &str = ".info";
pub(crate) const INIT_INFO_MAGIC: u32 = 0xdead_beef;
const LEGACY_INIT_INFO_SIZE: usize = 40;

#[derive(Debug, thiserror::Error)]
pub enum InitInfoError {
    #[error("Replica init info IO failure: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid replica init info in {file}: {reason}")]
    InvalidData { file: String, reason: String },
}

/// ReplicaInitInfo records where a replica's durable state starts: the ballot and durable decree at
/// the last reset, and the log offsets from which replay is valid.
///
/// Two on-disk encodings exist. The current one is JSON in `.init-info`. The legacy binary one in
/// `.info` is little endian:
///
/// ```text
/// +-----------+---------+------------+-------------+---------------+----------------+
/// | Magic (4) | CRC (4) | Ballot (8) | Durable (8) | SharedOff (8) | PrivateOff (8) |
/// +-----------+---------+------------+-------------+---------------+----------------+
/// ```
///
/// * `CRC` - crc32 of all 40 bytes with the CRC field zeroed
///
/// Loading a legacy file rewrites it as JSON and removes the legacy file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicaInitInfo {
    pub init_ballot: Ballot,
    pub init_durable_decree: Decree,
    pub init_offset_in_shared_log: i64,
    pub init_offset_in_private_log: i64,
}

impl ReplicaInitInfo {
    pub fn load(logger: &slog::Logger, dir: &Path) -> Result<Self, InitInfoError> {
        let new_path = dir.join(INIT_INFO_FILE_NAME);
        let old_path = dir.join(LEGACY_INIT_INFO_FILE_NAME);

        if new_path.exists() {
            let info = Self::load_json(&new_path)?;
            slog::debug!(logger, "Loaded replica init info from {:?}: {:?}", new_path, info);
            return Ok(info);
        }

        let info = Self::load_binary(&old_path)?;
        slog::info!(logger, "Loaded legacy replica init info from {:?}: {:?}", old_path, info);
        match info.store_json(&new_path) {
            Ok(_) => {
                fs::remove_file(&old_path)?;
                slog::info!(logger, "Upgraded replica init info {:?} to {:?}", old_path, new_path);
            }
            Err(e) => {
                slog::error!(logger, "Failed to upgrade replica init info {:?}: {:?}", old_path, e);
            }
        }

        Ok(info)
    }

    pub fn store(&self, logger: &slog::Logger, dir: &Path) -> Result<(), InitInfoError> {
        let new_path = dir.join(INIT_INFO_FILE_NAME);
        self.store_json(&new_path)?;

        let old_path = dir.join(LEGACY_INIT_INFO_FILE_NAME);
        if old_path.exists() {
            fs::remove_file(&old_path)?;
        }
        slog::debug!(logger, "Stored replica init info to {:?}: {:?}", new_path, self);

        Ok(())
    }

    fn load_json(path: &Path) -> Result<Self, InitInfoError> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| InitInfoError::InvalidData {
            file: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn store_json(&self, path: &Path) -> Result<(), InitInfoError> {
        let bytes = serde_json::to_vec(self).map_err(|e| InitInfoError::InvalidData {
            file: path.display().to_string(),
            reason: e.to_string(),
        })?;
        write_atomically(path, &bytes)?;
        Ok(())
    }

    fn load_binary(path: &Path) -> Result<Self, InitInfoError> {
        let bytes = fs::read(path)?;
        let invalid = |reason: &str| InitInfoError::InvalidData {
            file: path.display().to_string(),
            reason: reason.to_string(),
        };
        if bytes.len() < LEGACY_INIT_INFO_SIZE {
            return Err(invalid("file too short"));
        }

        let mut buf = &bytes[..LEGACY_INIT_INFO_SIZE];
        let magic = buf.get_u32_le();
        if magic != INIT_INFO_MAGIC {
            return Err(invalid("bad magic"));
        }
        let crc = buf.get_u32_le();
        let info = ReplicaInitInfo {
            init_ballot: buf.get_i64_le(),
            init_durable_decree: buf.get_i64_le(),
            init_offset_in_shared_log: buf.get_i64_le(),
            init_offset_in_private_log: buf.get_i64_le(),
        };
        if info.legacy_crc() != crc {
            return Err(invalid("crc mismatch"));
        }

        Ok(info)
    }

    fn encode_binary(&self, crc: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(LEGACY_INIT_INFO_SIZE);
        buf.put_u32_le(INIT_INFO_MAGIC);
        buf.put_u32_le(crc);
        buf.put_i64_le(self.init_ballot);
        buf.put_i64_le(self.init_durable_decree);
        buf.put_i64_le(self.init_offset_in_shared_log);
        buf.put_i64_le(self.init_offset_in_private_log);
        buf
    }

    fn legacy_crc(&self) -> u32 {
        crc32fast::hash(&self.encode_binary(0))
    }

    /// Writes the legacy binary encoding. Only replicas created by older versions have these.
    #[cfg(test)]
    pub(crate) fn store_binary(&self, dir: &Path) -> Result<(), InitInfoError> {
        let bytes = self.encode_binary(self.legacy_crc());
        write_atomically(&dir.join(LEGACY_INIT_INFO_FILE_NAME), &bytes)?;
        Ok(())
    }
}

/// Writes to `<path>.tmp` first and renames over `path`.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    fs::write(tmp_path, bytes)?;
    fs::rename(tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn sample() -> ReplicaInitInfo {
        ReplicaInitInfo {
            init_ballot: 3,
            init_durable_decree: 42,
            init_offset_in_shared_log: 1024,
            init_offset_in_private_log: 2048,
        }
    }

    #[test]
    fn store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        sample().store(&test_logger(), dir.path()).unwrap();

        assert!(dir.path().join(INIT_INFO_FILE_NAME).exists());
        assert_eq!(ReplicaInitInfo::load(&test_logger(), dir.path()).unwrap(), sample());
    }

    #[test]
    fn legacy_file_is_upgraded() {
        let dir = tempfile::tempdir().unwrap();
        sample().store_binary(dir.path()).unwrap();
        assert_eq!(fs::read(dir.path().join(LEGACY_INIT_INFO_FILE_NAME)).unwrap().len(), 40);

        let loaded = ReplicaInitInfo::load(&test_logger(), dir.path()).unwrap();
        assert_eq!(loaded, sample());
        assert!(!dir.path().join(LEGACY_INIT_INFO_FILE_NAME).exists());
        assert!(dir.path().join(INIT_INFO_FILE_NAME).exists());

        assert_eq!(ReplicaInitInfo::load(&test_logger(), dir.path()).unwrap(), sample());
    }

    #[test]
    fn legacy_file_with_bad_crc_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        sample().store_binary(dir.path()).unwrap();

        let path = dir.path().join(LEGACY_INIT_INFO_FILE_NAME);
        let mut bytes = fs::read(&path).unwrap();
        bytes[12] ^= 0x01;
        fs::write(&path, bytes).unwrap();

        match ReplicaInitInfo::load(&test_logger(), dir.path()) {
            Err(InitInfoError::InvalidData { reason, .. }) => assert_eq!(reason, "crc mismatch"),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn missing_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ReplicaInitInfo::load(&test_logger(), dir.path()),
            Err(InitInfoError::Io(_))
        ));
    }
}
