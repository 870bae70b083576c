use std::fs;
use std::path::PathBuf;

use crate::core::error::Result;

/// Resolves the on-disk file names for a collection (§6). Everything lives
/// flat in one data directory; the collection id and version id are baked
/// into file names rather than into a directory tree, so a version's files
/// can be published (or discarded) by writing (or not writing) its `.ix`
/// marker without touching anything else.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub data_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir)?;
        Ok(StorageLayout { data_dir })
    }

    fn path(&self, file_name: String) -> PathBuf {
        self.data_dir.join(file_name)
    }

    // -- collection-scoped streams, stable across versions --

    pub fn value_path(&self, collection_id: &str) -> PathBuf {
        self.path(format!("{collection_id}.val"))
    }

    pub fn key_path(&self, collection_id: &str) -> PathBuf {
        self.path(format!("{collection_id}.key"))
    }

    pub fn docs_path(&self, collection_id: &str) -> PathBuf {
        self.path(format!("{collection_id}.docs"))
    }

    pub fn value_index_path(&self, collection_id: &str) -> PathBuf {
        self.path(format!("{collection_id}.vix"))
    }

    pub fn key_index_path(&self, collection_id: &str) -> PathBuf {
        self.path(format!("{collection_id}.kix"))
    }

    pub fn doc_index_path(&self, collection_id: &str) -> PathBuf {
        self.path(format!("{collection_id}.dix"))
    }

    /// The deleted-doc-id bitmap persisted alongside the doc store (§4.3),
    /// consulted (and kept up to date) on every `DocStore::open`/`flush`.
    pub fn deleted_path(&self, collection_id: &str) -> PathBuf {
        self.path(format!("{collection_id}.del"))
    }

    pub fn postings_path(&self, collection_id: &str) -> PathBuf {
        self.path(format!("{collection_id}.pos"))
    }

    pub fn vector_path(&self, collection_id: &str) -> PathBuf {
        self.path(format!("{collection_id}.vec"))
    }

    // -- version-scoped term trees and batch marker --

    pub fn trie_path(&self, version_id: u64, field_name: &str) -> PathBuf {
        self.path(format!("{version_id}-{field_name}.tri"))
    }

    pub fn vector_tree_path(&self, version_id: u64, key_id: u64) -> PathBuf {
        self.path(format!("{version_id}.{key_id}.ix1"))
    }

    pub fn vector_postings_path(&self, version_id: u64, key_id: u64) -> PathBuf {
        self.path(format!("{version_id}.{key_id}.ixp1"))
    }

    /// The `.vec` sibling file for one version's vector tree (§4.5).
    /// Unlike `vector_path`, this is version-scoped: each batch's trees are
    /// built fresh and serialized once, so their vectors live in their own
    /// file rather than a single ever-growing collection-wide blob.
    pub fn vector_tree_vec_path(&self, version_id: u64, key_id: u64) -> PathBuf {
        self.path(format!("{version_id}.{key_id}.vec"))
    }

    pub fn batch_info_path(&self, version_id: u64) -> PathBuf {
        self.path(format!("{version_id}.ix"))
    }

    /// Lists every published version id, oldest first, by scanning for
    /// `<version-id>.ix` marker files.
    pub fn published_versions(&self) -> Result<Vec<u64>> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".ix") {
                if let Ok(id) = stem.parse::<u64>() {
                    versions.push(id);
                }
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_names_follow_the_spec_layout() {
        let dir = tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().to_path_buf()).unwrap();

        assert_eq!(
            layout.value_path("c1").file_name().unwrap().to_str().unwrap(),
            "c1.val"
        );
        assert_eq!(
            layout.trie_path(7, "title").file_name().unwrap().to_str().unwrap(),
            "7-title.tri"
        );
        assert_eq!(
            layout.batch_info_path(7).file_name().unwrap().to_str().unwrap(),
            "7.ix"
        );
        assert_eq!(
            layout.deleted_path("c1").file_name().unwrap().to_str().unwrap(),
            "c1.del"
        );
    }

    #[test]
    fn published_versions_are_sorted() {
        let dir = tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().to_path_buf()).unwrap();
        fs::write(layout.batch_info_path(3), b"").unwrap();
        fs::write(layout.batch_info_path(1), b"").unwrap();
        fs::write(layout.batch_info_path(2), b"").unwrap();
        assert_eq!(layout.published_versions().unwrap(), vec![1, 2, 3]);
    }
}
