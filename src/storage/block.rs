use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::core::error::Result;

/// Fixed 17-byte `(offset, length, type_tag)` triple, network byte order.
/// This is the unit the value store attaches to every appended value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub offset: i64,
    pub length: i32,
    pub type_tag: u8,
}

impl BlockHeader {
    pub const SIZE: usize = 17;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.offset.to_be_bytes());
        buf[8..12].copy_from_slice(&self.length.to_be_bytes());
        buf[12..16].fill(0); // reserved
        buf[16] = self.type_tag;
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(crate::core::error::Error::DataMisaligned(
                "short block header read".into(),
            ));
        }
        Ok(BlockHeader {
            offset: i64::from_be_bytes(buf[0..8].try_into().unwrap()),
            length: i32::from_be_bytes(buf[8..12].try_into().unwrap()),
            type_tag: buf[16],
        })
    }
}

/// An append-only file that hands back the byte offset of each write.
/// Concurrent appenders must be serialized by the caller (the collection's
/// `FileLock` in practice); reads are positional and stateless.
pub struct PagedAppendStream {
    file: File,
    len: u64,
}

impl PagedAppendStream {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(PagedAppendStream { file, len })
    }

    /// Append `bytes` at the current end of the stream, returning its
    /// starting offset.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.len;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        self.len += bytes.len() as u64;
        Ok(offset)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Positional read, independent of the append cursor.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Overwrite a pointer word in place (used by the postings store to
    /// patch `next`/`last` offsets without rewriting page bodies).
    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn block_header_round_trips() {
        let h = BlockHeader {
            offset: 12345,
            length: 678,
            type_tag: 3,
        };
        let encoded = h.encode();
        assert_eq!(encoded.len(), BlockHeader::SIZE);
        let decoded = BlockHeader::decode(&encoded).unwrap();
        assert_eq!(h, decoded);
    }

    #[test]
    fn append_returns_growing_offsets() {
        let dir = tempdir().unwrap();
        let mut stream = PagedAppendStream::open(dir.path().join("x.dat")).unwrap();
        let o1 = stream.append(b"hello").unwrap();
        let o2 = stream.append(b"world!").unwrap();
        assert_eq!(o1, 0);
        assert_eq!(o2, 5);

        let mut buf = [0u8; 5];
        stream.read_at(o1, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.dat");
        {
            let mut stream = PagedAppendStream::open(&path).unwrap();
            stream.append(b"abc").unwrap();
            stream.flush().unwrap();
        }
        let mut stream = PagedAppendStream::open(&path).unwrap();
        assert_eq!(stream.len(), 3);
        let off = stream.append(b"def").unwrap();
        assert_eq!(off, 3);
    }
}
