use crate::common::{Decree, Gpid};
use crate::mutation_log::log_block::{encode_block, BlockHeader, BLOCK_HEADER_SIZE, LOG_BLOCK_MAGIC};
use crate::mutation_log::log_utils::log_file_name;
use crate::mutation_log::LogError;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// A raw block read back from a log file.
pub(crate) struct LogBlock {
    /// Global offset of the block header.
    pub(crate) offset: i64,
    pub(crate) body: Vec<u8>,
}

/// Where a segment's blocks go. Abstracted so a failed write can be cut off again.
pub(crate) trait SegmentWriter: Write + Send {
    /// Cuts the segment to `len` bytes and moves the write position there.
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    fn sync_data(&mut self) -> io::Result<()>;
}

impl SegmentWriter for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.seek(SeekFrom::Start(len))?;
        Ok(())
    }

    fn sync_data(&mut self) -> io::Result<()> {
        File::sync_data(self)
    }
}

/// LogFile is one segment of a mutation log. Only the newest segment of a log holds a writer.
pub(crate) struct LogFile {
    index: u32,
    start_offset: i64,
    path: PathBuf,
    writer: Option<Box<dyn SegmentWriter>>,
    size: u64,
    max_decrees: HashMap<Gpid, Decree>,
    last_write_time: SystemTime,
}

impl LogFile {
    pub(crate) fn create(dir: &Path, index: u32, start_offset: i64) -> io::Result<Self> {
        let path = dir.join(log_file_name(index, start_offset));
        let writer = OpenOptions::new().create_new(true).write(true).open(&path)?;

        Ok(LogFile {
            index,
            start_offset,
            path,
            writer: Some(Box::new(writer)),
            size: 0,
            max_decrees: HashMap::new(),
            last_write_time: SystemTime::now(),
        })
    }

    pub(crate) fn open_existing(path: PathBuf, index: u32, start_offset: i64) -> io::Result<Self> {
        let metadata = fs::metadata(&path)?;
        let last_write_time = metadata.modified().unwrap_or_else(|_| SystemTime::now());

        Ok(LogFile {
            index,
            start_offset,
            path,
            writer: None,
            size: metadata.len(),
            max_decrees: HashMap::new(),
            last_write_time,
        })
    }

    pub(crate) fn index(&self) -> u32 {
        self.index
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn is_writable(&self) -> bool {
        self.writer.is_some()
    }

    pub(crate) fn end_offset(&self) -> i64 {
        self.start_offset + self.size as i64
    }

    pub(crate) fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.last_write_time).unwrap_or_default()
    }

    pub(crate) fn note_decree(&mut self, gpid: Gpid, decree: Decree) {
        let max = self.max_decrees.entry(gpid).or_insert(decree);
        if decree > *max {
            *max = decree;
        }
    }

    pub(crate) fn max_decree(&self, gpid: Gpid) -> Option<Decree> {
        self.max_decrees.get(&gpid).copied()
    }

    pub(crate) fn max_decrees(&self) -> &HashMap<Gpid, Decree> {
        &self.max_decrees
    }

    /// Reads every block of the file in order. With `allow_torn_tail`, a block cut short by a
    /// crash at the end of the file ends the read instead of failing it. Returns the blocks and
    /// the local offset where valid data ends.
    pub(crate) fn read_blocks(&self, allow_torn_tail: bool) -> Result<(Vec<LogBlock>, u64), LogError> {
        let data = fs::read(&self.path)?;
        let mut blocks = Vec::new();
        let mut pos = 0usize;

        while pos < data.len() {
            if data.len() - pos < BLOCK_HEADER_SIZE {
                if allow_torn_tail {
                    break;
                }
                return Err(self.corruption(pos, "truncated block header"));
            }

            let mut header_bytes = [0u8; BLOCK_HEADER_SIZE];
            header_bytes.copy_from_slice(&data[pos..pos + BLOCK_HEADER_SIZE]);
            let header = BlockHeader::decode(&header_bytes);
            if header.magic != LOG_BLOCK_MAGIC {
                return Err(self.corruption(pos, "bad block magic"));
            }
            if header.local_offset as usize != pos {
                return Err(self.corruption(pos, "block local offset mismatch"));
            }

            let body_start = pos + BLOCK_HEADER_SIZE;
            let body_end = body_start + header.length as usize;
            if body_end > data.len() {
                if allow_torn_tail {
                    break;
                }
                return Err(self.corruption(pos, "truncated block body"));
            }

            let body = &data[body_start..body_end];
            if !header.body_matches(body) {
                return Err(self.corruption(pos, "block crc mismatch"));
            }

            blocks.push(LogBlock {
                offset: self.start_offset + pos as i64,
                body: body.to_vec(),
            });
            pos = body_end;
        }

        Ok((blocks, pos as u64))
    }

    /// Re-opens the file for appending, cutting anything past `valid_end` (a torn tail).
    pub(crate) fn reopen_for_append(&mut self, valid_end: u64) -> io::Result<()> {
        let mut writer = OpenOptions::new().write(true).open(&self.path)?;
        SegmentWriter::truncate(&mut writer, valid_end)?;
        self.writer = Some(Box::new(writer));
        self.size = valid_end;
        Ok(())
    }

    /// Appends one block and returns its global offset. A failed write is cut off again so the
    /// next block lands right after the last good one; if that fails too the segment stops taking
    /// writes.
    pub(crate) fn append_block(&mut self, body: &[u8]) -> Result<i64, LogError> {
        let local_offset = self.size;
        let block_offset = u32::try_from(local_offset).map_err(|_| {
            LogError::InvalidData(format!(
                "log file {:?} is {} bytes, past the block offset range",
                self.path, local_offset
            ))
        })?;
        let writer = match self.writer.as_mut() {
            Some(writer) => writer,
            None => {
                return Err(LogError::InvalidData(format!(
                    "log file {:?} is not open for writing",
                    self.path
                )))
            }
        };

        let block = encode_block(body, block_offset);
        if let Err(e) = writer.write_all(&block) {
            if writer.truncate(local_offset).is_err() {
                self.writer = None;
            }
            return Err(e.into());
        }
        self.size += block.len() as u64;
        self.last_write_time = SystemTime::now();

        Ok(self.start_offset + local_offset as i64)
    }

    pub(crate) fn sync(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.sync_data(),
            None => Ok(()),
        }
    }

    pub(crate) fn close_writer(&mut self) {
        self.writer = None;
    }

    fn corruption(&self, local_offset: usize, reason: &str) -> LogError {
        LogError::Corruption {
            file: self.path.display().to_string(),
            offset: self.start_offset + local_offset as i64,
            reason: reason.to_string(),
        }
    }
}
