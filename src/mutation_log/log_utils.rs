use crate::mutation_log::LogError;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

/// Log segment files are named `log.<index>.<start_offset>`.
pub(crate) fn log_file_name(index: u32, start_offset: i64) -> String {
    format!("log.{}.{}", index, start_offset)
}

pub(crate) fn parse_log_file_name(name: &str) -> Option<(u32, i64)> {
    let mut parts = name.split('.');
    if parts.next() != Some("log") {
        return None;
    }
    let index = parts.next()?.parse::<u32>().ok()?;
    let start_offset = parts.next()?.parse::<i64>().ok()?;
    if parts.next().is_some() {
        return None;
    }

    Some((index, start_offset))
}

/// Lists every log segment in `dir` keyed by file index. Unrelated files are ignored.
pub(crate) fn list_log_files(dir: &Path) -> io::Result<BTreeMap<u32, (PathBuf, i64)>> {
    let mut files = BTreeMap::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if let Some((index, start_offset)) = name.to_str().and_then(parse_log_file_name) {
            files.insert(index, (entry.path(), start_offset));
        }
    }

    Ok(files)
}

pub(crate) fn check_log_files_continuity(files: &BTreeMap<u32, (PathBuf, i64)>) -> Result<(), LogError> {
    let first_index = match files.keys().next() {
        None => return Ok(()),
        Some(index) => *index,
    };

    let mut expected = first_index;
    for index in files.keys() {
        if *index != expected {
            let all_files: Vec<String> = files
                .iter()
                .map(|(index, (_, start_offset))| log_file_name(*index, *start_offset))
                .collect();
            return Err(LogError::InvalidData(format!(
                "log file missing with index {}. Files present: [{}]",
                expected,
                all_files.join(", ")
            )));
        }
        expected += 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_parsing() {
        fn run(expected: Option<(u32, i64)>, name: &str) {
            assert_eq!(expected, parse_log_file_name(name), "name: {}", name);
        }

        run(Some((1, 0)), "log.1.0");
        run(Some((12, 4096)), "log.12.4096");
        run(None, "log.1");
        run(None, "log.1.0.tmp");
        run(None, "plog.1.0");
        run(None, "log.x.0");

        assert_eq!(log_file_name(3, 77), "log.3.77");
    }

    #[test]
    fn continuity() {
        let mut files = BTreeMap::new();
        assert!(check_log_files_continuity(&files).is_ok());

        files.insert(2, (PathBuf::from("log.2.0"), 0));
        files.insert(3, (PathBuf::from("log.3.100"), 100));
        assert!(check_log_files_continuity(&files).is_ok());

        files.insert(5, (PathBuf::from("log.5.300"), 300));
        match check_log_files_continuity(&files) {
            Err(LogError::InvalidData(msg)) => assert!(msg.contains("index 4"), "{}", msg),
            other => panic!("Unexpected result {:?}", other),
        }
    }
}
