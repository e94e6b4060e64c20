use bytes::{Buf, BufMut};

pub(crate) const LOG_BLOCK_MAGIC: u32 = 0xdead_beef;
pub(crate) const BLOCK_HEADER_SIZE: usize = 16;

/// Every block in a log file starts with this header, followed by `length` body bytes.
///
/// ```text
/// +-----------+-----------+-----------+--------------+----------------...
/// | Magic (4) | Len (4)   | CRC (4)   | LocalOff (4) | Body (Len)     ...
/// +-----------+-----------+-----------+--------------+----------------...
/// ```
///
/// * `CRC` - crc32 of the body only
/// * `LocalOff` - offset of the block (header included) inside its log file
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct BlockHeader {
    pub(crate) magic: u32,
    pub(crate) length: u32,
    pub(crate) body_crc: u32,
    pub(crate) local_offset: u32,
}

impl BlockHeader {
    pub(crate) fn for_body(body: &[u8], local_offset: u32) -> Self {
        BlockHeader {
            magic: LOG_BLOCK_MAGIC,
            length: body.len() as u32,
            body_crc: crc32fast::hash(body),
            local_offset,
        }
    }

    pub(crate) fn encode(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut out = [0u8; BLOCK_HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_u32_le(self.magic);
        buf.put_u32_le(self.length);
        buf.put_u32_le(self.body_crc);
        buf.put_u32_le(self.local_offset);
        out
    }

    pub(crate) fn decode(bytes: &[u8; BLOCK_HEADER_SIZE]) -> Self {
        let mut buf = &bytes[..];
        BlockHeader {
            magic: buf.get_u32_le(),
            length: buf.get_u32_le(),
            body_crc: buf.get_u32_le(),
            local_offset: buf.get_u32_le(),
        }
    }

    pub(crate) fn body_matches(&self, body: &[u8]) -> bool {
        crc32fast::hash(body) == self.body_crc
    }
}

/// Header and body as one contiguous buffer, ready to be written with a single syscall.
pub(crate) fn encode_block(body: &[u8], local_offset: u32) -> Vec<u8> {
    let header = BlockHeader::for_body(body, local_offset);
    let mut block = Vec::with_capacity(BLOCK_HEADER_SIZE + body.len());
    block.extend_from_slice(&header.encode());
    block.extend_from_slice(body);
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryInto;

    #[test]
    fn header_layout() {
        let block = encode_block(b"abc", 32);
        assert_eq!(block.len(), BLOCK_HEADER_SIZE + 3);
        assert_eq!(&block[0..4], &[0xef, 0xbe, 0xad, 0xde]);

        let header = BlockHeader::decode((&block[..BLOCK_HEADER_SIZE]).try_into().unwrap());
        assert_eq!(header.magic, LOG_BLOCK_MAGIC);
        assert_eq!(header.length, 3);
        assert_eq!(header.local_offset, 32);
        assert!(header.body_matches(b"abc"));
        assert!(!header.body_matches(b"abd"));
    }
}
