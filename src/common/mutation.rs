use crate::common::{Ballot, Decree, Gpid, INVALID_OFFSET};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Byte representation:
///
/// ```text
/// +---+-----------+-----------+--------+--------+------------+--------+-----------+-------+-----------...
/// |Vrs| AppId (4) | PIdx (4)  | Ballot | Decree | LogOffset  |  LCD   | Timestamp | Count | Updates ...
/// +---+-----------+-----------+--------+--------+------------+--------+-----------+-------+-----------...
/// ```
///
/// * `Vrs` - version of the serialized payload
/// * `Ballot`, `Decree`, `LogOffset`, `LCD`, `Timestamp` - 8 byte little endian signed integers
/// * `Count` - 4 byte number of update records, each one `| Code (4) | Len (4) | Data (Len) |`
///
/// Checksums are not part of the mutation; the log block framing carries them.
#[derive(Clone, Debug, PartialEq)]
pub struct Mutation {
    pub header: MutationHeader,
    pub updates: Vec<UpdateRecord>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MutationHeader {
    pub pid: Gpid,
    pub ballot: Ballot,
    pub decree: Decree,
    pub log_offset: i64,
    /// Primary's committed watermark when this mutation was prepared.
    pub last_committed_decree: Decree,
    pub timestamp_ms: i64,
}

/// UpdateRecord is a single client write. `code` tells the storage engine how to interpret `data`.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateRecord {
    pub code: u32,
    pub data: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum MutationDecodeError {
    #[error("Unsupported mutation format version {0}")]
    UnsupportedVersion(u8),
    #[error("Mutation payload truncated while reading {0}")]
    Truncated(&'static str),
}

const MUTATION_FORMAT_VERSION: u8 = 1;
const HEADER_SIZE: usize = 1 + 4 + 4 + 8 * 5 + 4;

impl Mutation {
    pub fn new(pid: Gpid, ballot: Ballot, decree: Decree, last_committed_decree: Decree, updates: Vec<UpdateRecord>) -> Self {
        Mutation {
            header: MutationHeader {
                pid,
                ballot,
                decree,
                log_offset: INVALID_OFFSET,
                last_committed_decree,
                timestamp_ms: chrono::Utc::now().timestamp_millis(),
            },
            updates,
        }
    }

    pub fn pid(&self) -> Gpid {
        self.header.pid
    }

    pub fn ballot(&self) -> Ballot {
        self.header.ballot
    }

    pub fn decree(&self) -> Decree {
        self.header.decree
    }

    pub fn last_committed_decree(&self) -> Decree {
        self.header.last_committed_decree
    }

    /// Copy of this mutation re-addressed to another partition. Used when a split parent hands
    /// its mutations to the child.
    pub fn for_partition(&self, pid: Gpid) -> Mutation {
        let mut copy = self.clone();
        copy.header.pid = pid;
        copy
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.updates.iter().map(|u| 8 + u.data.len()).sum::<usize>()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(MUTATION_FORMAT_VERSION);
        buf.put_i32_le(self.header.pid.app_id);
        buf.put_i32_le(self.header.pid.partition_index);
        buf.put_i64_le(self.header.ballot);
        buf.put_i64_le(self.header.decree);
        buf.put_i64_le(self.header.log_offset);
        buf.put_i64_le(self.header.last_committed_decree);
        buf.put_i64_le(self.header.timestamp_ms);
        buf.put_u32_le(self.updates.len() as u32);
        for update in self.updates.iter() {
            buf.put_u32_le(update.code);
            buf.put_u32_le(update.data.len() as u32);
            buf.put_slice(&update.data);
        }

        buf.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MutationDecodeError> {
        let mut buf = bytes;
        if buf.remaining() < HEADER_SIZE {
            return Err(MutationDecodeError::Truncated("header"));
        }

        let version = buf.get_u8();
        if version != MUTATION_FORMAT_VERSION {
            return Err(MutationDecodeError::UnsupportedVersion(version));
        }

        let app_id = buf.get_i32_le();
        let partition_index = buf.get_i32_le();
        let header = MutationHeader {
            pid: Gpid::new(app_id, partition_index),
            ballot: buf.get_i64_le(),
            decree: buf.get_i64_le(),
            log_offset: buf.get_i64_le(),
            last_committed_decree: buf.get_i64_le(),
            timestamp_ms: buf.get_i64_le(),
        };

        let count = buf.get_u32_le() as usize;
        let mut updates = Vec::with_capacity(count);
        for _ in 0..count {
            if buf.remaining() < 8 {
                return Err(MutationDecodeError::Truncated("update header"));
            }
            let code = buf.get_u32_le();
            let len = buf.get_u32_le() as usize;
            if buf.remaining() < len {
                return Err(MutationDecodeError::Truncated("update data"));
            }
            let data = Bytes::copy_from_slice(&buf[..len]);
            buf.advance(len);
            updates.push(UpdateRecord { code, data });
        }

        Ok(Mutation { header, updates })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_truncated_payload() {
        let mutation = Mutation::new(
            Gpid::new(2, 1),
            3,
            5,
            4,
            vec![UpdateRecord {
                code: 7,
                data: Bytes::from_static(b"hello"),
            }],
        );
        let bytes = mutation.encode();
        assert_eq!(bytes.len(), mutation.encoded_len());

        let decoded = Mutation::decode(&bytes).unwrap();
        assert_eq!(decoded, mutation);

        assert!(matches!(
            Mutation::decode(&bytes[..bytes.len() - 1]),
            Err(MutationDecodeError::Truncated("update data"))
        ));
        assert!(matches!(
            Mutation::decode(&bytes[..10]),
            Err(MutationDecodeError::Truncated("header"))
        ));
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let mut bytes = Mutation::new(Gpid::new(1, 0), 1, 1, 0, Vec::new()).encode();
        bytes[0] = 9;
        assert!(matches!(
            Mutation::decode(&bytes),
            Err(MutationDecodeError::UnsupportedVersion(9))
        ));
    }
}
