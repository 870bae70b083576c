use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::analysis::analyzer::AnalyzerRegistry;
use crate::analysis::embedding::analyze_field;
use crate::core::config::CollectionConfig;
use crate::core::error::{Error, Result};
use crate::core::types::{is_engine_managed, Document, DocId, FieldValue, KeyId};
use crate::index::postings::PostingsStore;
use crate::parallel::indexer::{BuiltTrees, ModelBuilderJob, ModelBuilderPool};
use crate::schema::schema::CollectionSchema;
use crate::storage::doc_store::DocStore;
use crate::storage::file_lock::FileLock;
use crate::storage::key_table::KeyTable;
use crate::storage::layout::StorageLayout;
use crate::storage::value_store::ValueStore;
use crate::storage::version::BatchInfo;

/// A `(key-id, doc-id, embedding)` triple sampled for post-build validation:
/// after the model-builder pool drains, the write session re-queries the
/// vector tree that should now contain `doc_id` and asserts it is reachable.
struct PendingValidation {
    key_id: KeyId,
    doc_id: DocId,
    vector: Vec<f32>,
}

/// Coordinates the value/key/doc/postings streams and the model-builder
/// queue for one ingest batch. Holds the collection's exclusive `FileLock`
/// for its whole lifetime; a second session on the same collection fails
/// fast with `ConflictingWrite`.
pub struct WriteSession {
    storage: Arc<StorageLayout>,
    collection_id: String,
    _lock: FileLock,

    schema: CollectionSchema,
    analyzers: Arc<AnalyzerRegistry>,
    config: CollectionConfig,

    values: ValueStore,
    keys: KeyTable,
    docs: DocStore,
    postings: PostingsStore,

    next_doc_id: u64,
    version_id: u64,
    doc_count: u64,
    checksum: crc32fast::Hasher,

    pool: Option<ModelBuilderPool>,
    pending_validations: Vec<PendingValidation>,

    flushed: AtomicBool,
    flushing: AtomicBool,
}

impl WriteSession {
    /// Opens (or resumes) a write session against `collection_id`'s data in
    /// `storage`. `next_doc_id` is reconstructed by summing every published
    /// batch's `doc_count`, so doc-ids stay dense and monotonic across the
    /// whole collection, not just within this batch. `version_id` is a
    /// millis-since-epoch timestamp, bumped past the latest published
    /// version if the clock ever went backwards relative to it.
    pub fn open(
        storage: Arc<StorageLayout>,
        collection_id: impl Into<String>,
        schema: CollectionSchema,
        analyzers: Arc<AnalyzerRegistry>,
        config: CollectionConfig,
    ) -> Result<Self> {
        let collection_id = collection_id.into();
        let lock = FileLock::acquire(&storage, true)?;

        let values = ValueStore::open(storage.value_path(&collection_id))?;
        let keys = KeyTable::open(storage.key_path(&collection_id))?;
        let docs = DocStore::open(
            storage.docs_path(&collection_id),
            storage.doc_index_path(&collection_id),
            storage.deleted_path(&collection_id),
            config.compression,
        )?;
        let postings = PostingsStore::open(storage.postings_path(&collection_id))?;

        let mut next_doc_id = 0u64;
        let mut latest_version = 0u64;
        for version in storage.published_versions()? {
            let info = BatchInfo::read(storage.batch_info_path(version))?;
            next_doc_id += info.doc_count;
            latest_version = latest_version.max(version);
        }

        let version_id = now_millis().max(latest_version + 1);

        let pool = ModelBuilderPool::new(
            config.model_builder_workers,
            config.queue_capacity,
            config.identical_angle,
            config.fold_angle,
        );

        info!(collection_id = %collection_id, version_id, next_doc_id, "write session opened");

        Ok(WriteSession {
            storage,
            collection_id,
            _lock: lock,
            schema,
            analyzers,
            config,
            values,
            keys,
            docs,
            postings,
            next_doc_id,
            version_id,
            doc_count: 0,
            checksum: crc32fast::Hasher::new(),
            pool: Some(pool),
            pending_validations: Vec::new(),
            flushed: AtomicBool::new(false),
            flushing: AtomicBool::new(false),
        })
    }

    pub fn version_id(&self) -> u64 {
        self.version_id
    }

    /// Ingests one document: assigns its doc-id, stamps `_created`, renames
    /// an upstream `__docid` to `_original`, interns every field's key,
    /// appends its value, and submits each non-engine field's analyzed
    /// terms to the model-builder queue.
    pub fn put(&mut self, document: Document) -> Result<DocId> {
        let doc_id = DocId(self.next_doc_id);
        self.next_doc_id += 1;

        let mut fields = document.fields;
        if let Some(pos) = fields.iter().position(|(name, _)| name == "__docid") {
            let (_, original) = fields.remove(pos);
            fields.push(("_original".to_string(), original));
        }
        fields.push(("_created".to_string(), FieldValue::Timestamp(now_millis() as i64)));
        fields.push(("__docid".to_string(), FieldValue::Integer(doc_id.value() as i64)));

        let mut doc_map = Vec::with_capacity(fields.len());
        for (name, value) in &fields {
            let key_id = self.keys.intern(name)?;
            let addr = self.values.append(value)?;
            doc_map.push((key_id, addr));

            if is_engine_managed(name) {
                continue;
            }

            let analyzer_name = self.schema.analyzer_for_field(name);
            let analyzer = self
                .analyzers
                .get(analyzer_name)
                .ok_or_else(|| Error::NotFound(format!("analyzer '{analyzer_name}' not found")))?;
            let analyzed = analyze_field(&analyzer, name, &value.as_token());
            let terms = analyzed.terms_with_embeddings();

            if self.config.validate_writes && self.config.validate_key_ids.contains(&key_id.0) {
                for (_, vector) in &terms {
                    self.pending_validations.push(PendingValidation {
                        key_id,
                        doc_id,
                        vector: vector.clone(),
                    });
                }
            }

            if let Some(pool) = &self.pool {
                pool.submit(ModelBuilderJob {
                    doc_id,
                    key_id,
                    field: name.clone(),
                    terms,
                });
            }
        }

        self.docs.append(doc_id, &doc_map)?;
        self.checksum.update(&bincode::serialize(&doc_map)?);
        self.doc_count += 1;
        Ok(doc_id)
    }

    /// Drains the model-builder queue, runs the validator, serializes every
    /// dirty tree, and posts their postings. Idempotent: a second call
    /// after a successful flush is a no-op. Not reentrant: a concurrent
    /// call while one is in flight fails with `ConflictingWrite`.
    pub fn flush(&mut self) -> Result<()> {
        if self.flushed.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.flushing.swap(true, Ordering::SeqCst) {
            return Err(Error::ConflictingWrite);
        }

        let result = self.flush_inner();
        self.flushing.store(false, Ordering::SeqCst);
        if result.is_ok() {
            self.flushed.store(true, Ordering::SeqCst);
        }
        result
    }

    fn flush_inner(&mut self) -> Result<()> {
        let pool = self.pool.take().expect("flush called twice without reopening the pool");
        let built = pool.join();

        if self.config.validate_writes {
            self.run_validator(&built)?;
        }

        let mut postings_by_field: HashMap<String, Vec<(String, Vec<u64>)>> = HashMap::new();
        for ((field, term), doc_ids) in built.pending_postings {
            postings_by_field.entry(field).or_default().push((term, doc_ids));
        }

        // Posting-list creation shares one append stream (`self.postings`),
        // so it must stay sequential; §4.10's "serialize each dirty tree in
        // parallel" applies to the disk-serialization step once every
        // tree's postings offsets are already resolved, not to this part.
        let mut dirty_tries = Vec::with_capacity(built.tries.len());
        for (field, trie) in built.tries {
            let mut trie = trie.into_inner();
            if let Some(terms) = postings_by_field.remove(&field) {
                for (term, doc_ids) in terms {
                    let offset = self.postings.new_list(&doc_ids)?;
                    trie.insert(&term, offset);
                }
            }
            let path = self.storage.trie_path(self.version_id, &field);
            dirty_tries.push((path, trie));
        }

        let mut dirty_vector_trees = Vec::with_capacity(built.vector_trees.len());
        for (key_id, tree) in built.vector_trees {
            let mut tree = tree.into_inner();
            if tree.is_empty() {
                continue;
            }
            let postings = &mut self.postings;
            tree.flush_postings(|doc_ids| postings.new_list(doc_ids))?;
            let ix_path = self.storage.vector_tree_path(self.version_id, key_id.0);
            let vec_path = self.storage.vector_tree_vec_path(self.version_id, key_id.0);
            dirty_vector_trees.push((ix_path, vec_path, tree));
        }

        // One `ColumnSerializer` worth of work per dirty tree (§4.10),
        // fanned out over rayon's global pool — independent files, so no
        // coordination needed beyond collecting the first error.
        use rayon::prelude::*;
        dirty_tries
            .par_iter()
            .try_for_each(|(path, trie)| trie.write_to(path))?;
        dirty_vector_trees
            .par_iter()
            .try_for_each(|(ix_path, vec_path, tree)| tree.write_to(ix_path, vec_path))?;

        self.values.flush()?;
        self.keys.flush()?;
        self.docs.flush()?;
        self.postings.flush()?;

        info!(
            collection_id = %self.collection_id,
            version_id = self.version_id,
            doc_count = self.doc_count,
            "write session flushed"
        );
        Ok(())
    }

    fn run_validator(&self, built: &BuiltTrees) -> Result<()> {
        for pv in &self.pending_validations {
            let tree = built.vector_trees.get(&pv.key_id).ok_or_else(|| {
                Error::DataMisaligned(format!("validator: no vector tree for key {}", pv.key_id.0))
            })?;
            let tree = tree.lock();
            let (docs, _) = tree
                .closest_match(&pv.vector)
                .ok_or_else(|| Error::DataMisaligned("validator: empty vector tree".into()))?;
            if !docs.contains(&pv.doc_id.value()) {
                warn!(key_id = pv.key_id.0, doc_id = pv.doc_id.value(), "validator: doc unreachable");
                return Err(Error::DataMisaligned(format!(
                    "validator: doc {} unreachable in vector tree for key {}",
                    pv.doc_id.value(),
                    pv.key_id.0
                )));
            }
        }
        Ok(())
    }

    /// Flushes if needed, then writes the batch-info marker last — the
    /// publication signal a reader uses to include this version. Returns
    /// the published `version_id`.
    pub fn commit(&mut self) -> Result<u64> {
        self.flush()?;

        let info = BatchInfo {
            version_id: self.version_id,
            doc_count: self.doc_count,
            compression: self.config.compression,
            primary_key_field: self.schema.primary_key_field.clone(),
            postings_offset: self.postings.len(),
            checksum: std::mem::take(&mut self.checksum).finalize(),
        };
        info.write(self.storage.batch_info_path(self.version_id))?;

        info!(
            collection_id = %self.collection_id,
            version_id = self.version_id,
            doc_count = self.doc_count,
            "batch committed"
        );
        Ok(self.version_id)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
