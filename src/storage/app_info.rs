use crate::common::AppInfo;
use crate::storage::init_info::{write_atomically, InitInfoError, INIT_INFO_MAGIC};
use bytes::{Buf, BufMut};
use std::fs;
use std::path::Path;

pub const APP_INFO_FILE_NAME: &str = ".app-info";

/// Byte representation of `.app-info`:
///
/// ```text
/// +-----------+---------+-----------------...
/// | Magic (4) | CRC (4) | AppInfo JSON   ...
/// +-----------+---------+-----------------...
/// ```
///
/// * `CRC` - crc32 of the JSON payload
pub fn store_app_info(dir: &Path, app_info: &AppInfo) -> Result<(), InitInfoError> {
    let path = dir.join(APP_INFO_FILE_NAME);
    let json = serde_json::to_vec(app_info).map_err(|e| InitInfoError::InvalidData {
        file: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut bytes = Vec::with_capacity(8 + json.len());
    bytes.put_u32_le(INIT_INFO_MAGIC);
    bytes.put_u32_le(crc32fast::hash(&json));
    bytes.extend_from_slice(&json);
    write_atomically(&path, &bytes)?;

    Ok(())
}

pub fn load_app_info(dir: &Path) -> Result<AppInfo, InitInfoError> {
    let path = dir.join(APP_INFO_FILE_NAME);
    let bytes = fs::read(&path)?;
    let invalid = |reason: String| InitInfoError::InvalidData {
        file: path.display().to_string(),
        reason,
    };
    if bytes.len() < 8 {
        return Err(invalid("file too short".into()));
    }

    let mut header = &bytes[..8];
    if header.get_u32_le() != INIT_INFO_MAGIC {
        return Err(invalid("bad magic".into()));
    }
    let crc = header.get_u32_le();
    let json = &bytes[8..];
    if crc32fast::hash(json) != crc {
        return Err(invalid("crc mismatch".into()));
    }

    serde_json::from_slice(json).map_err(|e| invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_info_round_trip_and_damage() {
        let dir = tempfile::tempdir().unwrap();
        let mut app_info = AppInfo::new(2, "orders", "simple_kv", 4, 3);
        app_info
            .envs
            .insert("replica.write_throttling".into(), "100*delay*10".into());

        store_app_info(dir.path(), &app_info).unwrap();
        assert_eq!(load_app_info(dir.path()).unwrap(), app_info);

        let path = dir.path().join(APP_INFO_FILE_NAME);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 2;
        bytes[last] ^= 0x20;
        fs::write(&path, bytes).unwrap();
        assert!(matches!(
            load_app_info(dir.path()),
            Err(InitInfoError::InvalidData { .. })
        ));
    }
}
