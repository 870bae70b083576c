use std::fs;
use std::path::{Path, PathBuf};

use roaring::RoaringBitmap;

use crate::compression::compress::{CompressedBlock, CompressionType};
use crate::core::error::{Error, Result};
use crate::core::types::{DocId, KeyId, ValueAddress};
use crate::storage::block::PagedAppendStream;
use crate::storage::version::Compression;

/// One fixed-stride doc-index record: `(offset: u64, length: u32)`, padded
/// to a power-of-two stride so `doc_id * DOC_INDEX_STRIDE` lands exactly on
/// a record (§4.3).
const DOC_INDEX_STRIDE: u64 = 16;

fn to_compression_type(c: Compression) -> CompressionType {
    match c {
        Compression::None => CompressionType::None,
        Compression::Lz4 => CompressionType::Lz4,
        Compression::Zstd => CompressionType::Zstd,
        Compression::Snappy => CompressionType::Snappy,
    }
}

/// Append-only store of doc-maps (`Vec<(KeyId, ValueAddress)>`, field order
/// preserved) plus the parallel fixed-stride index that makes `read` O(1),
/// plus the deleted-doc-id set consulted on read (§4.3). Each doc-map is
/// bincode-encoded, then compressed per the batch's `compression` choice
/// (§4.9's `BatchInfo.compression`) before being appended — the doc-index's
/// stored length is always the on-disk (compressed) length.
pub struct DocStore {
    docs: PagedAppendStream,
    doc_index: PagedAppendStream,
    deleted: RoaringBitmap,
    deleted_path: PathBuf,
    compression: CompressionType,
}

impl DocStore {
    pub fn open(
        docs_path: impl AsRef<Path>,
        doc_index_path: impl AsRef<Path>,
        deleted_path: impl AsRef<Path>,
        compression: Compression,
    ) -> Result<Self> {
        let deleted_path = deleted_path.as_ref().to_path_buf();
        let deleted = if deleted_path.exists() {
            let bytes = fs::read(&deleted_path)?;
            RoaringBitmap::deserialize_from(&bytes[..])
                .map_err(|e| Error::DataMisaligned(format!("corrupt deleted-doc bitmap: {e}")))?
        } else {
            RoaringBitmap::new()
        };
        Ok(DocStore {
            docs: PagedAppendStream::open(docs_path)?,
            doc_index: PagedAppendStream::open(doc_index_path)?,
            deleted,
            deleted_path,
            compression: to_compression_type(compression),
        })
    }

    /// Append a doc-map, recording its `(offset, length)` at `doc_id`'s slot
    /// in the doc-index file.
    pub fn append(&mut self, doc_id: DocId, doc_map: &[(KeyId, ValueAddress)]) -> Result<(u64, u32)> {
        let bincoded = bincode::serialize(doc_map)?;
        let block = CompressedBlock::compress(&bincoded, self.compression)?;
        let encoded = bincode::serialize(&block)?;
        let offset = self.docs.append(&encoded)?;
        let length = encoded.len() as u32;

        let mut record = Vec::with_capacity(DOC_INDEX_STRIDE as usize);
        record.extend_from_slice(&offset.to_be_bytes());
        record.extend_from_slice(&length.to_be_bytes());
        let slot = doc_id.value() * DOC_INDEX_STRIDE;
        // The doc-index is append-only in practice because doc-ids are
        // assigned densely and monotonically within a batch; pad any gap
        // with zeroed slots so the stride invariant holds.
        while self.doc_index.len() < slot {
            self.doc_index.append(&[0u8; DOC_INDEX_STRIDE as usize])?;
        }
        self.doc_index.append(&record)?;

        Ok((offset, length))
    }

    pub fn read(&mut self, doc_id: DocId) -> Result<Option<Vec<(KeyId, ValueAddress)>>> {
        if self.deleted.contains(doc_id.value() as u32) {
            return Ok(None);
        }
        let slot = doc_id.value() * DOC_INDEX_STRIDE;
        if slot + DOC_INDEX_STRIDE > self.doc_index.len() {
            return Ok(None);
        }
        let mut record = [0u8; DOC_INDEX_STRIDE as usize];
        self.doc_index.read_at(slot, &mut record)?;
        let offset = u64::from_be_bytes(record[0..8].try_into().unwrap());
        let length = u32::from_be_bytes(record[8..12].try_into().unwrap());
        if length == 0 && offset == 0 {
            return Ok(None);
        }

        let mut buf = vec![0u8; length as usize];
        self.docs.read_at(offset, &mut buf)?;
        let block: CompressedBlock =
            bincode::deserialize(&buf).map_err(|e| Error::DataMisaligned(format!("corrupt doc-map block: {e}")))?;
        let bincoded = block.decompress()?;
        let doc_map: Vec<(KeyId, ValueAddress)> = bincode::deserialize(&bincoded)
            .map_err(|e| Error::DataMisaligned(format!("corrupt doc-map: {e}")))?;
        Ok(Some(doc_map))
    }

    pub fn mark_deleted(&mut self, doc_id: DocId) {
        self.deleted.insert(doc_id.value() as u32);
    }

    pub fn is_deleted(&self, doc_id: DocId) -> bool {
        self.deleted.contains(doc_id.value() as u32)
    }

    /// Flushes the append streams and rewrites the whole deleted-doc bitmap
    /// to its companion `.del` file — small and infrequent enough (deletes,
    /// not ingests) that a rewrite-in-place is simpler than an append log.
    pub fn flush(&mut self) -> Result<()> {
        self.docs.flush()?;
        self.doc_index.flush()?;
        let mut buf = Vec::new();
        self.deleted
            .serialize_into(&mut buf)
            .map_err(Error::Io)?;
        fs::write(&self.deleted_path, buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ValueType;
    use tempfile::tempdir;

    #[test]
    fn append_then_read_recovers_doc_map() {
        let dir = tempdir().unwrap();
        let mut store = DocStore::open(dir.path().join("c.docs"), dir.path().join("c.dix"), dir.path().join("c.del"), Compression::Lz4).unwrap();

        let doc_map = vec![
            (
                KeyId(0),
                ValueAddress {
                    offset: 0,
                    length: 8,
                    type_tag: ValueType::Integer as u8,
                },
            ),
            (
                KeyId(1),
                ValueAddress {
                    offset: 8,
                    length: 20,
                    type_tag: ValueType::Text as u8,
                },
            ),
        ];

        store.append(DocId(0), &doc_map).unwrap();
        let read_back = store.read(DocId(0)).unwrap().unwrap();
        assert_eq!(read_back, doc_map);
        assert!(store.read(DocId(1)).unwrap().is_none());
    }

    #[test]
    fn zstd_compression_round_trips_a_doc_map() {
        let dir = tempdir().unwrap();
        let mut store =
            DocStore::open(dir.path().join("c.docs"), dir.path().join("c.dix"), dir.path().join("c.del"), Compression::Zstd).unwrap();
        let doc_map = vec![(
            KeyId(0),
            ValueAddress {
                offset: 0,
                length: 8,
                type_tag: ValueType::Integer as u8,
            },
        )];
        store.append(DocId(0), &doc_map).unwrap();
        assert_eq!(store.read(DocId(0)).unwrap().unwrap(), doc_map);
    }

    #[test]
    fn deleted_doc_is_hidden_on_read() {
        let dir = tempdir().unwrap();
        let mut store = DocStore::open(dir.path().join("c.docs"), dir.path().join("c.dix"), dir.path().join("c.del"), Compression::Lz4).unwrap();
        store.append(DocId(0), &[]).unwrap();
        store.mark_deleted(DocId(0));
        assert!(store.read(DocId(0)).unwrap().is_none());
    }

    #[test]
    fn deletion_survives_reopening_the_store() {
        let dir = tempdir().unwrap();
        let docs_path = dir.path().join("c.docs");
        let dix_path = dir.path().join("c.dix");
        let del_path = dir.path().join("c.del");

        {
            let mut store = DocStore::open(&docs_path, &dix_path, &del_path, Compression::Lz4).unwrap();
            store.append(DocId(0), &[]).unwrap();
            store.append(DocId(1), &[]).unwrap();
            store.mark_deleted(DocId(0));
            store.flush().unwrap();
        }

        let mut reopened = DocStore::open(&docs_path, &dix_path, &del_path, Compression::Lz4).unwrap();
        assert!(reopened.is_deleted(DocId(0)));
        assert!(reopened.read(DocId(0)).unwrap().is_none());
        assert!(reopened.read(DocId(1)).unwrap().is_some());
    }
}
