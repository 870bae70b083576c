use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tracing::info;

use crate::analysis::analyzer::{Analyzer, AnalyzerRegistry};
use crate::core::config::CollectionConfig;
use crate::core::error::Result;
use crate::core::types::DocId;
use crate::index::postings::PostingsStore;
use crate::schema::schema::CollectionSchema;
use crate::search::executor::{SearchExecutor, SearchResult, TrieCache};
use crate::storage::doc_store::DocStore;
use crate::storage::key_table::KeyTable;
use crate::storage::layout::StorageLayout;
use crate::storage::value_store::ValueStore;
use crate::writer::session::WriteSession;

/// Maps a collection name to the numeric id `PostingsStore`'s read cache is
/// keyed by (§4.9's postings-resolution cache is namespaced per collection
/// so two collections sharing one cache never collide on an offset).
fn collection_hash(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

/// The embedder-facing entry point (§1): one `Collection` per named index,
/// holding everything that outlives a single write session or search call —
/// the on-disk layout, the schema, the analyzer registry, and the term-tree
/// cache shared across every search. Opening a collection does not itself
/// take the exclusive file lock; that happens only when a `WriteSession` is
/// opened, so many `Collection` handles (and many concurrent searches) can
/// coexist against the same data directory.
pub struct Collection {
    name: String,
    collection_id: u64,
    storage: Arc<StorageLayout>,
    schema: CollectionSchema,
    analyzers: Arc<AnalyzerRegistry>,
    config: CollectionConfig,
    trie_cache: Arc<TrieCache>,
}

impl Collection {
    /// Opens (creating on first use) the collection `name` under
    /// `config.data_dir`. Each collection gets its own subdirectory so its
    /// `.lock` file (held for the duration of a write session) never
    /// contends with a sibling collection's writes.
    pub fn open(name: impl Into<String>, config: CollectionConfig) -> Result<Self> {
        Self::open_with_schema(name, CollectionSchema::new(), config)
    }

    pub fn open_with_schema(name: impl Into<String>, schema: CollectionSchema, config: CollectionConfig) -> Result<Self> {
        let name = name.into();
        let storage = Arc::new(StorageLayout::new(config.data_dir.join(&name))?);
        let collection_id = collection_hash(&name);
        let trie_cache = Arc::new(TrieCache::with_capacity(config.trie_cache_capacity));
        info!(collection = %name, "collection opened");
        Ok(Collection {
            name,
            collection_id,
            storage,
            schema,
            analyzers: Arc::new(AnalyzerRegistry::new()),
            config,
            trie_cache,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection_id(&self) -> u64 {
        self.collection_id
    }

    pub fn data_dir(&self) -> &std::path::Path {
        &self.storage.data_dir
    }

    /// Registers (or overwrites) a named analyzer, e.g. for a field whose
    /// schema analyzer name doesn't match one of the registry's built-in
    /// presets. Visible immediately to any session sharing this
    /// collection's `Arc<AnalyzerRegistry>`, including one already open.
    pub fn register_analyzer(&self, name: impl Into<String>, analyzer: Analyzer) {
        self.analyzers.register(name, analyzer);
    }

    /// Opens a write session against this collection, taking its exclusive
    /// file lock for the session's lifetime (§5). Only one may be open at a
    /// time; a second attempt fails fast with `Error::ConflictingWrite`.
    pub fn write_session(&self) -> Result<WriteSession> {
        WriteSession::open(
            Arc::clone(&self.storage),
            self.name.clone(),
            self.schema.clone(),
            Arc::clone(&self.analyzers),
            self.config.clone(),
        )
    }

    /// Evaluates `query` against every published batch (§4.9), applying
    /// `CombineTakingLatestVersion` primary-key shadowing across versions,
    /// and returns up to `limit` ranked hits starting at `offset`. Opens
    /// fresh read handles on the collection's streams for this call alone;
    /// the term-tree cache is the only state shared across calls, so
    /// concurrent searches never contend on a lock the way a write session
    /// does.
    pub fn search(&self, query: &str, limit: usize, offset: usize) -> Result<SearchResult> {
        let keys = KeyTable::open(self.storage.key_path(&self.name))?;
        let mut values = ValueStore::open(self.storage.value_path(&self.name))?;
        let mut docs = DocStore::open(
            self.storage.docs_path(&self.name),
            self.storage.doc_index_path(&self.name),
            self.storage.deleted_path(&self.name),
            self.config.compression,
        )?;
        let mut postings = PostingsStore::open(self.storage.postings_path(&self.name))?;

        let executor = SearchExecutor {
            storage: &self.storage,
            trie_cache: &self.trie_cache,
            schema: &self.schema,
            analyzers: &self.analyzers,
            collection_id: self.collection_id,
            default_fuzzy_edits: self.config.default_fuzzy_edits,
        };
        executor.search(query, &keys, &mut values, &mut docs, &mut postings, limit, offset)
    }

    /// Marks `doc_id` deleted in the doc store, hiding it from future reads
    /// without rewriting any postings list or term tree (§4.3). Requires a
    /// fresh doc-store handle since deletion is a write, not a query.
    pub fn delete(&self, doc_id: DocId) -> Result<()> {
        let mut docs = DocStore::open(
            self.storage.docs_path(&self.name),
            self.storage.doc_index_path(&self.name),
            self.storage.deleted_path(&self.name),
            self.config.compression,
        )?;
        docs.mark_deleted(doc_id);
        docs.flush()
    }

    /// Invalidates every cached term tree for `version`, e.g. after a
    /// compaction step rewrites its `.tri` files in place.
    pub fn invalidate_version_cache(&self, version: u64) {
        self.trie_cache.invalidate_version(version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Document, FieldValue};
    use tempfile::tempdir;

    fn config(dir: &std::path::Path) -> CollectionConfig {
        CollectionConfig {
            data_dir: dir.to_path_buf(),
            model_builder_workers: 2,
            ..CollectionConfig::default()
        }
    }

    #[test]
    fn write_then_search_round_trips_a_document() {
        let dir = tempdir().unwrap();
        let collection = Collection::open_with_schema("movies", CollectionSchema::new().with_primary_key("_id"), config(dir.path())).unwrap();

        {
            let mut session = collection.write_session().unwrap();
            session
                .put(
                    Document::new()
                        .with_field("_id", FieldValue::Text("m1".to_string()))
                        .with_field("title", FieldValue::Text("rambo".to_string())),
                )
                .unwrap();
            session.commit().unwrap();
        }

        let result = collection.search("title:rambo", 10, 0).unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.hits[0].document.get("title"), Some(&FieldValue::Text("rambo".to_string())));
    }

    #[test]
    fn delete_is_visible_to_a_later_search() {
        let dir = tempdir().unwrap();
        let collection = Collection::open("movies", config(dir.path())).unwrap();

        let doc_id = {
            let mut session = collection.write_session().unwrap();
            let id = session
                .put(Document::new().with_field("title", FieldValue::Text("rambo".to_string())))
                .unwrap();
            session.commit().unwrap();
            id
        };

        assert_eq!(collection.search("title:rambo", 10, 0).unwrap().total, 1);

        collection.delete(doc_id).unwrap();

        // A fresh `Collection` (and so a fresh `DocStore::open`) must still
        // see the deletion: it has to come from disk, not in-memory state.
        let reopened = Collection::open("movies", config(dir.path())).unwrap();
        assert_eq!(reopened.search("title:rambo", 10, 0).unwrap().total, 0);
    }

    #[test]
    fn second_write_session_while_first_is_open_fails() {
        let dir = tempdir().unwrap();
        let collection = Collection::open("movies", config(dir.path())).unwrap();
        let _first = collection.write_session().unwrap();
        assert!(collection.write_session().is_err());
    }

    #[test]
    fn primary_key_shadows_across_versions() {
        let dir = tempdir().unwrap();
        let collection = Collection::open_with_schema("movies", CollectionSchema::new().with_primary_key("_id"), config(dir.path())).unwrap();

        {
            let mut session = collection.write_session().unwrap();
            session
                .put(
                    Document::new()
                        .with_field("_id", FieldValue::Text("m1".to_string()))
                        .with_field("title", FieldValue::Text("rambo".to_string())),
                )
                .unwrap();
            session.commit().unwrap();
        }
        {
            let mut session = collection.write_session().unwrap();
            session
                .put(
                    Document::new()
                        .with_field("_id", FieldValue::Text("m1".to_string()))
                        .with_field("title", FieldValue::Text("rambo ii".to_string())),
                )
                .unwrap();
            session.commit().unwrap();
        }

        let result = collection.search("title:rambo", 10, 0).unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(
            result.hits[0].document.get("title"),
            Some(&FieldValue::Text("rambo ii".to_string()))
        );
    }
}
