use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;

use crate::core::error::Result;
use crate::core::types::KeyId;
use crate::storage::block::PagedAppendStream;

/// The persistent, append-only field-name → key-id interning map (§3,
/// §5 "Key-id interning table"). First-writer-wins: once a name has an id,
/// that id is never reused, even across process restarts, because the
/// table is rebuilt from the `.key` file in append order on open.
pub struct KeyTable {
    stream: PagedAppendStream,
    names_to_ids: RwLock<HashMap<String, KeyId>>,
}

impl KeyTable {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut stream = PagedAppendStream::open(path)?;
        let names_to_ids = RwLock::new(replay(&mut stream)?);
        Ok(KeyTable {
            stream,
            names_to_ids,
        })
    }

    /// Resolve `name` to its key-id, interning it (appending a new entry)
    /// if this is the first time this collection has seen it.
    pub fn intern(&mut self, name: &str) -> Result<KeyId> {
        if let Some(id) = self.names_to_ids.read().get(name) {
            return Ok(*id);
        }
        let mut guard = self.names_to_ids.write();
        // Re-check: another thread may have interned it while we waited.
        if let Some(id) = guard.get(name) {
            return Ok(*id);
        }
        let id = KeyId(guard.len() as u64);
        let record = encode_entry(name);
        self.stream.append(&record)?;
        guard.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn get(&self, name: &str) -> Option<KeyId> {
        self.names_to_ids.read().get(name).copied()
    }

    /// Reverse lookup for document materialization (the query evaluator
    /// needs field names back from the `key-id`s stored in a doc-map).
    pub fn name_of(&self, id: KeyId) -> Option<String> {
        self.names_to_ids.read().iter().find(|(_, v)| **v == id).map(|(k, _)| k.clone())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.stream.flush()
    }
}

fn encode_entry(name: &str) -> Vec<u8> {
    let bytes = name.as_bytes();
    let mut buf = Vec::with_capacity(4 + bytes.len());
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
    buf
}

fn replay(stream: &mut PagedAppendStream) -> Result<HashMap<String, KeyId>> {
    let mut map = HashMap::new();
    let mut offset = 0u64;
    let total = stream.len();
    let mut next_id = 0u64;
    while offset < total {
        let mut len_buf = [0u8; 4];
        stream.read_at(offset, &mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        offset += 4;
        let mut name_buf = vec![0u8; len];
        stream.read_at(offset, &mut name_buf)?;
        offset += len as u64;
        let name = String::from_utf8(name_buf)
            .map_err(|_| crate::core::error::Error::DataMisaligned("invalid key name".into()))?;
        map.insert(name, KeyId(next_id));
        next_id += 1;
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn interning_is_append_only_and_stable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.key");
        let mut table = KeyTable::open(&path).unwrap();

        let title_id = table.intern("title").unwrap();
        let body_id = table.intern("body").unwrap();
        assert_eq!(table.intern("title").unwrap(), title_id);
        assert_ne!(title_id, body_id);
        table.flush().unwrap();
        drop(table);

        let reopened = KeyTable::open(&path).unwrap();
        assert_eq!(reopened.get("title"), Some(title_id));
        assert_eq!(reopened.get("body"), Some(body_id));
    }
}
