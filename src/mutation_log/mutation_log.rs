use crate::common::{Decree, Gpid, Mutation, INVALID_DECREE};
use crate::mutation_log::log_block::BLOCK_HEADER_SIZE;
use crate::mutation_log::log_file::{LogBlock, LogFile};
use crate::mutation_log::log_utils;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Mutation log IO failure: {0}")]
    Io(#[from] io::Error),
    #[error("Mutation log corrupted in {file} at offset {offset}: {reason}")]
    Corruption { file: String, offset: i64, reason: String },
    #[error("Invalid mutation log data: {0}")]
    InvalidData(String),
    #[error("Mutation log append failed: {0}")]
    AppendFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogAppendResult {
    /// Global offset the mutation was written at.
    pub offset: i64,
    /// Bytes written including block framing.
    pub size: usize,
}

/// LogLearnState is the log-replay part of a learn reply: every logged mutation of one partition
/// in `(from_decree_excluded, to_decree_included]`, in decree order.
#[derive(Debug, Clone, PartialEq)]
pub struct LogLearnState {
    pub from_decree_excluded: Decree,
    pub to_decree_included: Decree,
    pub mutations: Vec<Mutation>,
}

/// MutationLog is an append-only write-ahead log made of numbered segment files. It is used both
/// as the node-wide shared log (many partitions) and as a replica's private log (one partition).
///
/// All methods take `&self`; an internal lock serializes appends, which keeps the write order of
/// each partition identical to the order `append` was called in.
pub struct MutationLog {
    logger: slog::Logger,
    dir: PathBuf,
    max_file_size: u64,
    state: Mutex<LogState>,
}

struct LogState {
    files: BTreeMap<u32, LogFile>,
    valid_start_offsets: HashMap<Gpid, i64>,
    max_gced_decrees: HashMap<Gpid, Decree>,
}

impl LogState {
    fn end_offset(&self) -> i64 {
        self.files.values().next_back().map(|f| f.end_offset()).unwrap_or(0)
    }

    fn current_index(&self) -> Option<u32> {
        self.files.keys().next_back().copied()
    }
}

impl MutationLog {
    /// Opens (or creates) the log under `dir`, validating every block of every segment. A torn
    /// block at the very end of the newest segment is cut off; any other damage fails the open.
    pub fn open(logger: slog::Logger, dir: &Path, max_file_size: u64) -> Result<MutationLog, LogError> {
        fs::create_dir_all(dir)?;
        let listed = log_utils::list_log_files(dir)?;
        log_utils::check_log_files_continuity(&listed)?;
        let last_index = listed.keys().next_back().copied();

        let mut files = BTreeMap::new();
        let mut expected_start_offset = None;
        for (index, (path, start_offset)) in listed {
            if let Some(expected) = expected_start_offset {
                if start_offset != expected {
                    return Err(LogError::InvalidData(format!(
                        "log file {:?} starts at offset {}, previous file ends at {}",
                        path, start_offset, expected
                    )));
                }
            }

            let mut file = LogFile::open_existing(path, index, start_offset)?;
            let is_last = Some(index) == last_index;
            let (blocks, valid_end) = file.read_blocks(is_last)?;
            for block in blocks.iter() {
                let mutation = decode_block(&file, block)?;
                file.note_decree(mutation.pid(), mutation.decree());
            }

            if is_last {
                if valid_end < file.size() {
                    slog::warn!(
                        logger,
                        "Truncating torn tail of log file {:?} from {} to {} bytes",
                        file.path(),
                        file.size(),
                        valid_end
                    );
                }
                file.reopen_for_append(valid_end)?;
            }

            expected_start_offset = Some(file.end_offset());
            files.insert(index, file);
        }

        if files.is_empty() {
            files.insert(1, LogFile::create(dir, 1, 0)?);
        }

        let state = LogState {
            files,
            valid_start_offsets: HashMap::new(),
            max_gced_decrees: HashMap::new(),
        };
        slog::info!(
            logger,
            "Opened mutation log {:?} with {} file(s), end offset {}",
            dir,
            state.files.len(),
            state.end_offset()
        );

        Ok(MutationLog {
            logger,
            dir: dir.to_path_buf(),
            max_file_size,
            state: Mutex::new(state),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Feeds every logged mutation to `callback` in log order. Returns how many were replayed.
    pub fn replay<F>(&self, mut callback: F) -> Result<usize, LogError>
    where
        F: FnMut(Mutation),
    {
        let state = self.state.lock();
        let current_index = state.current_index();
        let mut count = 0;
        for file in state.files.values() {
            let (blocks, _) = file.read_blocks(Some(file.index()) == current_index)?;
            for block in blocks.iter() {
                callback(decode_block(file, block)?);
                count += 1;
            }
        }

        Ok(count)
    }

    /// Durably appends `mutation`. The returned offset is also recorded inside the logged copy.
    pub fn append(&self, mutation: &Mutation) -> Result<LogAppendResult, LogError> {
        let mut results = self.append_batch(std::slice::from_ref(mutation))?;
        results
            .pop()
            .ok_or_else(|| LogError::InvalidData("append produced no result".into()))
    }

    /// Appends `mutations` in order and syncs once at the end. On error nothing after the failed
    /// mutation is written and the batch as a whole counts as failed.
    pub fn append_batch(&self, mutations: &[Mutation]) -> Result<Vec<LogAppendResult>, LogError> {
        let mut state = self.state.lock();
        let mut results = Vec::with_capacity(mutations.len());
        for mutation in mutations {
            self.rollover_if_needed(&mut state)?;
            let current = current_file(&mut state)?;
            let mut logged = mutation.clone();
            logged.header.log_offset = current.end_offset();
            let body = logged.encode();

            let offset = current.append_block(&body)?;
            current.note_decree(mutation.pid(), mutation.decree());
            results.push(LogAppendResult {
                offset,
                size: BLOCK_HEADER_SIZE + body.len(),
            });
        }
        current_file(&mut state)?.sync()?;

        Ok(results)
    }

    fn rollover_if_needed(&self, state: &mut LogState) -> Result<(), LogError> {
        let current = current_file(state)?;
        if current.is_writable() && (current.size() == 0 || current.size() < self.max_file_size) {
            return Ok(());
        }
        if !current.is_writable() {
            slog::warn!(self.logger, "Log file {:?} stopped taking writes, rolling over", current.path());
        }

        current.sync()?;
        current.close_writer();
        let next_index = current.index() + 1;
        let next_file = LogFile::create(&self.dir, next_index, current.end_offset())?;
        slog::debug!(self.logger, "Rolled mutation log over to {:?}", next_file.path());
        state.files.insert(next_index, next_file);

        Ok(())
    }

    pub fn end_offset(&self) -> i64 {
        self.state.lock().end_offset()
    }

    /// Highest decree logged for `gpid` in any retained segment.
    pub fn max_decree(&self, gpid: Gpid) -> Decree {
        let state = self.state.lock();
        state
            .files
            .values()
            .filter_map(|f| f.max_decree(gpid))
            .max()
            .unwrap_or(INVALID_DECREE)
    }

    /// Highest decree of `gpid` removed by garbage collection.
    pub fn max_gced_decree(&self, gpid: Gpid) -> Decree {
        let state = self.state.lock();
        state.max_gced_decrees.get(&gpid).copied().unwrap_or(INVALID_DECREE)
    }

    pub fn file_count(&self) -> usize {
        self.state.lock().files.len()
    }

    /// Marks everything logged for `gpid` so far as superseded (the partition was reset to a
    /// checkpoint at `decree`). Returns the new valid start offset.
    pub fn on_partition_reset(&self, gpid: Gpid, decree: Decree) -> i64 {
        let mut state = self.state.lock();
        let offset = state.end_offset();
        state.valid_start_offsets.insert(gpid, offset);
        slog::info!(
            self.logger,
            "Partition {} reset to decree {}, log valid start offset is now {}",
            gpid,
            decree,
            offset
        );

        offset
    }

    /// Restores a valid start offset that was persisted elsewhere (replica init info).
    pub fn set_valid_start_offset(&self, gpid: Gpid, offset: i64) {
        self.state.lock().valid_start_offsets.insert(gpid, offset);
    }

    pub fn valid_start_offset(&self, gpid: Gpid) -> i64 {
        self.state.lock().valid_start_offsets.get(&gpid).copied().unwrap_or(0)
    }

    /// Collects the contiguous run of logged mutations of `gpid` starting at `start_decree`.
    /// When the log no longer holds `start_decree` the result is empty and
    /// `to_decree_included == start_decree - 1`.
    pub fn get_learn_state(&self, gpid: Gpid, start_decree: Decree) -> Result<LogLearnState, LogError> {
        let state = self.state.lock();
        let valid_start = state.valid_start_offsets.get(&gpid).copied().unwrap_or(0);
        let current_index = state.current_index();

        // Later entries of the same decree (re-prepared under a newer ballot) replace older ones.
        let mut by_decree = BTreeMap::new();
        for file in state.files.values() {
            if file.end_offset() <= valid_start {
                continue;
            }
            match file.max_decree(gpid) {
                Some(max) if max >= start_decree => {}
                _ => continue,
            }

            let (blocks, _) = file.read_blocks(Some(file.index()) == current_index)?;
            for block in blocks.iter().filter(|b| b.offset >= valid_start) {
                let mutation = decode_block(file, block)?;
                if mutation.pid() == gpid && mutation.decree() >= start_decree {
                    by_decree.insert(mutation.decree(), mutation);
                }
            }
        }

        let mut mutations = Vec::new();
        let mut next = start_decree;
        for (decree, mutation) in by_decree {
            if decree != next {
                break;
            }
            mutations.push(mutation);
            next += 1;
        }

        Ok(LogLearnState {
            from_decree_excluded: start_decree - 1,
            to_decree_included: next - 1,
            mutations,
        })
    }

    /// Private log GC. Removes the oldest segments once every mutation of `gpid` they hold is at
    /// or below `durable_decree` (or precedes `valid_start_offset`), keeping the newest segments
    /// while their total size stays under `reserve_max_size` or their age under `reserve_max_time`.
    /// Returns the number of files removed.
    pub fn garbage_collection(
        &self,
        gpid: Gpid,
        durable_decree: Decree,
        valid_start_offset: i64,
        reserve_max_size: u64,
        reserve_max_time: Duration,
    ) -> Result<usize, LogError> {
        self.remove_covered_files(reserve_max_size, reserve_max_time, |file, _| {
            file.end_offset() <= valid_start_offset
                || file.max_decree(gpid).map_or(true, |max| max <= durable_decree)
        })
    }

    /// Shared log GC. A segment is removable only when every partition that logged into it is
    /// durable past its mutations. Partitions in `pinned` keep their segments; other partitions
    /// absent from `durable_decrees` are gone and no longer hold anything back.
    pub fn garbage_collection_shared(
        &self,
        durable_decrees: &HashMap<Gpid, Decree>,
        pinned: &HashSet<Gpid>,
        reserve_max_size: u64,
        reserve_max_time: Duration,
    ) -> Result<usize, LogError> {
        self.remove_covered_files(reserve_max_size, reserve_max_time, |file, valid_starts| {
            file.max_decrees().iter().all(|(gpid, max)| {
                let reset_past = valid_starts.get(gpid).map_or(false, |start| file.end_offset() <= *start);
                let durable_past = match durable_decrees.get(gpid) {
                    Some(durable) => *max <= *durable,
                    None => !pinned.contains(gpid),
                };
                reset_past || durable_past
            })
        })
    }

    fn remove_covered_files<F>(
        &self,
        reserve_max_size: u64,
        reserve_max_time: Duration,
        is_covered: F,
    ) -> Result<usize, LogError>
    where
        F: Fn(&LogFile, &HashMap<Gpid, i64>) -> bool,
    {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let current_index = match state.current_index() {
            Some(index) => index,
            None => return Ok(0),
        };
        let now = SystemTime::now();

        // Newest removable file; it and everything older may go.
        let mut reserved_size = 0u64;
        let mut mark = None;
        for file in state.files.values().rev() {
            let reserved = file.index() == current_index
                || reserved_size < reserve_max_size
                || (reserve_max_time > Duration::from_secs(0) && file.age(now) < reserve_max_time);
            if !reserved && is_covered(file, &state.valid_start_offsets) {
                mark = Some(file.index());
                break;
            }
            reserved_size += file.size();
        }
        let mark = match mark {
            Some(mark) => mark,
            None => return Ok(0),
        };

        let mut removable = Vec::new();
        for (index, file) in state.files.iter() {
            if *index > mark || !is_covered(file, &state.valid_start_offsets) {
                break;
            }
            removable.push(*index);
        }

        for index in removable.iter() {
            if let Some(file) = state.files.get(index) {
                fs::remove_file(file.path())?;
            }
            if let Some(file) = state.files.remove(index) {
                for (gpid, max) in file.max_decrees() {
                    let gced = state.max_gced_decrees.entry(*gpid).or_insert(*max);
                    if *max > *gced {
                        *gced = *max;
                    }
                }
            }
        }

        if !removable.is_empty() {
            slog::info!(
                self.logger,
                "Garbage collected {} log file(s) in {:?}: {:?}",
                removable.len(),
                self.dir,
                removable
            );
        }

        Ok(removable.len())
    }
}

fn current_file(state: &mut LogState) -> Result<&mut LogFile, LogError> {
    state
        .files
        .values_mut()
        .next_back()
        .ok_or_else(|| LogError::InvalidData("mutation log has no open file".into()))
}

fn decode_block(file: &LogFile, block: &LogBlock) -> Result<Mutation, LogError> {
    let mutation = Mutation::decode(&block.body).map_err(|e| {
        LogError::InvalidData(format!(
            "undecodable mutation in {:?} at offset {}: {}",
            file.path(),
            block.offset,
            e
        ))
    })?;
    if mutation.header.log_offset != block.offset {
        return Err(LogError::InvalidData(format!(
            "mutation {}@{} in {:?} records offset {} but sits at {}",
            mutation.pid(),
            mutation.decree(),
            file.path(),
            mutation.header.log_offset,
            block.offset
        )));
    }

    Ok(mutation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::UpdateRecord;
    use bytes::Bytes;
    use std::fs::OpenOptions;
    use std::io::Write;

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn mutation(gpid: Gpid, decree: Decree) -> Mutation {
        Mutation::new(
            gpid,
            1,
            decree,
            decree - 1,
            vec![UpdateRecord {
                code: 1,
                data: Bytes::from(format!("value-{}", decree)),
            }],
        )
    }

    fn replayed_decrees(log: &MutationLog) -> Vec<Decree> {
        let mut decrees = Vec::new();
        log.replay(|mu| decrees.push(mu.decree())).unwrap();
        decrees
    }

    #[test]
    fn append_then_reopen_and_replay() {
        let dir = tempfile::tempdir().unwrap();
        let gpid = Gpid::new(1, 0);

        let mut offsets = Vec::new();
        {
            let log = MutationLog::open(test_logger(), dir.path(), 1 << 20).unwrap();
            for decree in 1..=10 {
                offsets.push(log.append(&mutation(gpid, decree)).unwrap().offset);
            }
            assert_eq!(log.max_decree(gpid), 10);
        }

        let log = MutationLog::open(test_logger(), dir.path(), 1 << 20).unwrap();
        let mut replayed = Vec::new();
        log.replay(|mu| replayed.push((mu.decree(), mu.header.log_offset))).unwrap();
        let expected: Vec<_> = (1..=10).zip(offsets.into_iter()).collect();
        assert_eq!(replayed, expected);
        assert_eq!(log.max_decree(gpid), 10);
    }

    #[test]
    fn rollover_keeps_offsets_continuous() {
        let dir = tempfile::tempdir().unwrap();
        let gpid = Gpid::new(1, 0);

        {
            let log = MutationLog::open(test_logger(), dir.path(), 1).unwrap();
            for decree in 1..=4 {
                log.append(&mutation(gpid, decree)).unwrap();
            }
            assert_eq!(log.file_count(), 4);
        }

        let log = MutationLog::open(test_logger(), dir.path(), 1).unwrap();
        assert_eq!(replayed_decrees(&log), vec![1, 2, 3, 4]);
        log.append(&mutation(gpid, 5)).unwrap();
        assert_eq!(log.file_count(), 5);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let gpid = Gpid::new(1, 0);

        {
            let log = MutationLog::open(test_logger(), dir.path(), 1 << 20).unwrap();
            for decree in 1..=3 {
                log.append(&mutation(gpid, decree)).unwrap();
            }
        }

        // Half of a block header.
        let path = dir.path().join(log_utils::log_file_name(1, 0));
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xef, 0xbe, 0xad, 0xde, 0x10, 0x00]).unwrap();
        drop(file);

        let log = MutationLog::open(test_logger(), dir.path(), 1 << 20).unwrap();
        assert_eq!(replayed_decrees(&log), vec![1, 2, 3]);
        log.append(&mutation(gpid, 4)).unwrap();
        assert_eq!(replayed_decrees(&log), vec![1, 2, 3, 4]);
    }

    #[test]
    fn damaged_block_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let gpid = Gpid::new(1, 0);

        {
            let log = MutationLog::open(test_logger(), dir.path(), 1 << 20).unwrap();
            for decree in 1..=3 {
                log.append(&mutation(gpid, decree)).unwrap();
            }
        }

        let path = dir.path().join(log_utils::log_file_name(1, 0));
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        match MutationLog::open(test_logger(), dir.path(), 1 << 20) {
            Err(LogError::Corruption { reason, .. }) => assert!(reason.contains("crc"), "{}", reason),
            Err(e) => panic!("Unexpected error {:?}", e),
            Ok(_) => panic!("Open should fail on a damaged block"),
        }
    }

    #[test]
    fn missing_file_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let gpid = Gpid::new(1, 0);

        {
            let log = MutationLog::open(test_logger(), dir.path(), 1).unwrap();
            for decree in 1..=3 {
                log.append(&mutation(gpid, decree)).unwrap();
            }
        }

        let listed = log_utils::list_log_files(dir.path()).unwrap();
        let (path, _) = listed.get(&2).unwrap();
        fs::remove_file(path).unwrap();

        assert!(matches!(
            MutationLog::open(test_logger(), dir.path(), 1),
            Err(LogError::InvalidData(_))
        ));
    }

    #[test]
    fn learn_state_respects_reset_and_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let gpid = Gpid::new(1, 0);
        let other = Gpid::new(2, 0);
        let log = MutationLog::open(test_logger(), dir.path(), 1 << 20).unwrap();

        for decree in 1..=5 {
            log.append(&mutation(gpid, decree)).unwrap();
            log.append(&mutation(other, decree)).unwrap();
        }

        let state = log.get_learn_state(gpid, 3).unwrap();
        assert_eq!(state.from_decree_excluded, 2);
        assert_eq!(state.to_decree_included, 5);
        let decrees: Vec<_> = state.mutations.iter().map(|m| m.decree()).collect();
        assert_eq!(decrees, vec![3, 4, 5]);
        assert!(state.mutations.iter().all(|m| m.pid() == gpid));

        log.on_partition_reset(gpid, 5);
        log.append(&mutation(gpid, 6)).unwrap();

        let state = log.get_learn_state(gpid, 3).unwrap();
        assert!(state.mutations.is_empty());
        assert_eq!(state.to_decree_included, 2);

        let state = log.get_learn_state(gpid, 6).unwrap();
        assert_eq!(state.to_decree_included, 6);
    }

    #[test]
    fn learn_state_prefers_latest_ballot() {
        let dir = tempfile::tempdir().unwrap();
        let gpid = Gpid::new(1, 0);
        let log = MutationLog::open(test_logger(), dir.path(), 1 << 20).unwrap();

        log.append(&mutation(gpid, 1)).unwrap();
        log.append(&mutation(gpid, 2)).unwrap();
        let mut reprepared = mutation(gpid, 2);
        reprepared.header.ballot = 2;
        log.append(&reprepared).unwrap();

        let state = log.get_learn_state(gpid, 1).unwrap();
        assert_eq!(state.mutations.len(), 2);
        assert_eq!(state.mutations[1].ballot(), 2);
    }

    #[test]
    fn private_gc_keeps_undurable_and_reserved_files() {
        let dir = tempfile::tempdir().unwrap();
        let gpid = Gpid::new(1, 0);
        let log = MutationLog::open(test_logger(), dir.path(), 1).unwrap();
        for decree in 1..=5 {
            log.append(&mutation(gpid, decree)).unwrap();
        }
        assert_eq!(log.file_count(), 5);

        let one_file = fs::metadata(dir.path().join(log_utils::log_file_name(1, 0)))
            .unwrap()
            .len();

        // Size reserve keeps the two newest files even though decree 4 is durable.
        let removed = log
            .garbage_collection(gpid, 4, 0, one_file * 2, Duration::from_secs(0))
            .unwrap();
        assert_eq!(removed, 3);
        assert_eq!(log.file_count(), 2);
        assert_eq!(log.max_gced_decree(gpid), 3);

        let removed = log.garbage_collection(gpid, 4, 0, 0, Duration::from_secs(0)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(log.max_gced_decree(gpid), 4);

        // The current file is never removed.
        let removed = log.garbage_collection(gpid, 10, 0, 0, Duration::from_secs(0)).unwrap();
        assert_eq!(removed, 0);
        assert_eq!(replayed_decrees(&log), vec![5]);
    }

    #[test]
    fn private_gc_respects_time_reserve() {
        let dir = tempfile::tempdir().unwrap();
        let gpid = Gpid::new(1, 0);
        let log = MutationLog::open(test_logger(), dir.path(), 1).unwrap();
        for decree in 1..=3 {
            log.append(&mutation(gpid, decree)).unwrap();
        }

        let removed = log
            .garbage_collection(gpid, 3, 0, 0, Duration::from_secs(3600))
            .unwrap();
        assert_eq!(removed, 0);
        assert_eq!(log.file_count(), 3);
    }

    #[test]
    fn shared_gc_waits_for_every_partition() {
        let dir = tempfile::tempdir().unwrap();
        let a = Gpid::new(1, 0);
        let b = Gpid::new(1, 1);
        let log = MutationLog::open(test_logger(), dir.path(), 1).unwrap();
        for decree in 1..=3 {
            log.append(&mutation(a, decree)).unwrap();
            log.append(&mutation(b, decree)).unwrap();
        }
        // Files: a1 b1 a2 b2 a3 b3(current)
        assert_eq!(log.file_count(), 6);

        let mut durable = HashMap::new();
        durable.insert(a, 3);
        let pinned: HashSet<Gpid> = vec![b].into_iter().collect();
        let removed = log
            .garbage_collection_shared(&durable, &pinned, 0, Duration::from_secs(0))
            .unwrap();
        assert_eq!(removed, 1);

        durable.insert(b, 2);
        let removed = log
            .garbage_collection_shared(&durable, &HashSet::new(), 0, Duration::from_secs(0))
            .unwrap();
        assert_eq!(removed, 4);
        assert_eq!(log.max_gced_decree(a), 3);
        assert_eq!(log.max_gced_decree(b), 2);
        assert_eq!(replayed_decrees(&log), vec![3]);
    }

    #[test]
    fn shared_gc_drops_partitions_no_longer_hosted() {
        let dir = tempfile::tempdir().unwrap();
        let a = Gpid::new(1, 0);
        let removed_partition = Gpid::new(2, 0);
        let log = MutationLog::open(test_logger(), dir.path(), 1).unwrap();
        for decree in 1..=2 {
            log.append(&mutation(a, decree)).unwrap();
            log.append(&mutation(removed_partition, decree)).unwrap();
        }
        log.append(&mutation(a, 3)).unwrap();
        assert_eq!(log.file_count(), 5);

        let mut durable = HashMap::new();
        durable.insert(a, 3);
        let removed = log
            .garbage_collection_shared(&durable, &HashSet::new(), 0, Duration::from_secs(0))
            .unwrap();
        assert_eq!(removed, 4);
        assert_eq!(log.max_gced_decree(removed_partition), 2);
        assert_eq!(replayed_decrees(&log), vec![3]);
    }

    #[test]
    fn shared_gc_honors_reserves() {
        let dir = tempfile::tempdir().unwrap();
        let a = Gpid::new(1, 0);
        let log = MutationLog::open(test_logger(), dir.path(), 1).unwrap();
        for decree in 1..=4 {
            log.append(&mutation(a, decree)).unwrap();
        }
        let mut durable = HashMap::new();
        durable.insert(a, 4);

        let removed = log
            .garbage_collection_shared(&durable, &HashSet::new(), 0, Duration::from_secs(3600))
            .unwrap();
        assert_eq!(removed, 0);

        let one_file = fs::metadata(dir.path().join(log_utils::log_file_name(1, 0)))
            .unwrap()
            .len();
        let removed = log
            .garbage_collection_shared(&durable, &HashSet::new(), one_file * 2, Duration::from_secs(0))
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(log.file_count(), 2);
    }
}
