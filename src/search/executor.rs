use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::RwLock;

use crate::analysis::analyzer::AnalyzerRegistry;
use crate::core::error::{Error, Result};
use crate::core::types::{is_engine_managed, is_single_token, DocId, Document};
use crate::index::postings::{self, PostingsStore, ReduceOp};
use crate::index::trie::Trie;
use crate::query::ast::{Modifier, Op, QueryNode, RangeBound};
use crate::query::parser::QueryParser;
use crate::schema::schema::CollectionSchema;
use crate::scoring::tfidf::{fuzzy_factor, idf};
use crate::storage::doc_store::DocStore;
use crate::storage::key_table::KeyTable;
use crate::storage::layout::StorageLayout;
use crate::storage::value_store::ValueStore;
use crate::storage::version::BatchInfo;

/// An upper sentinel for an open-ended `key>value` range statement with no
/// paired `key<value` bound: lexicographically greater than any realistic
/// indexed term without requiring the trie to expose a "largest term"
/// query of its own.
const RANGE_HIGH_SENTINEL: &str = "\u{10FFFF}\u{10FFFF}\u{10FFFF}\u{10FFFF}";

/// One ranked, materialized document returned from a search (§4.9).
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub score: f32,
    pub document: Document,
}

/// The outcome of `Collection::search`: a page of ranked hits plus the
/// total number of documents that matched, independent of paging (§6's
/// `GET /io/<collection>?query=...` returns the same shape).
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
    pub total: u64,
}

/// Per-`(version, field)` cache of loaded trie term trees. Design Notes §9
/// resolves the read-session/postings-cache cyclic reference by having the
/// session *factory* (here, `Collection`) own the cache and hand sessions a
/// non-owning reference; this is that cache, shared by every search against
/// one collection for its whole lifetime.
pub struct TrieCache {
    entries: RwLock<LruCache<(u64, String), Arc<Trie>>>,
}

impl Default for TrieCache {
    fn default() -> Self {
        TrieCache::with_capacity(256)
    }
}

impl TrieCache {
    pub fn new() -> Self {
        TrieCache::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("capacity.max(1) is never zero");
        TrieCache {
            entries: RwLock::new(LruCache::new(cap)),
        }
    }

    fn get_or_load(&self, storage: &StorageLayout, version: u64, field: &str) -> Result<Arc<Trie>> {
        let key = (version, field.to_string());
        if let Some(trie) = self.entries.write().get(&key) {
            return Ok(Arc::clone(trie));
        }
        let path = storage.trie_path(version, field);
        let trie = if path.exists() { Trie::read_from(&path)? } else { Trie::default() };
        let arc = Arc::new(trie);
        self.entries.write().put(key, Arc::clone(&arc));
        Ok(arc)
    }

    /// Drops every cached entry for `version` — a method call, not a
    /// callback, per Design Notes §9 — used after a batch is superseded by
    /// compaction.
    pub fn invalidate_version(&self, version: u64) {
        let mut entries = self.entries.write();
        let stale: Vec<(u64, String)> = entries.iter().map(|(k, _)| k.clone()).filter(|(v, _)| *v == version).collect();
        for key in stale {
            entries.pop(&key);
        }
    }
}

/// Evaluates one query string against a collection's published batches
/// (§4.9): per statement, resolve the field's term tree, look up exact /
/// fuzzy / prefix matches, fetch their postings, and fold everything into a
/// single ranked, paged result. A fresh `SearchExecutor` is built per call;
/// the only state that outlives a single search is the shared `TrieCache`.
pub struct SearchExecutor<'a> {
    pub storage: &'a StorageLayout,
    pub trie_cache: &'a TrieCache,
    pub schema: &'a CollectionSchema,
    pub analyzers: &'a AnalyzerRegistry,
    pub collection_id: u64,
    pub default_fuzzy_edits: u8,
}

impl<'a> SearchExecutor<'a> {
    pub fn search(
        &self,
        query: &str,
        keys: &KeyTable,
        values: &mut ValueStore,
        docs: &mut DocStore,
        postings: &mut PostingsStore,
        limit: usize,
        offset: usize,
    ) -> Result<SearchResult> {
        let parser = QueryParser::new(self.default_fuzzy_edits);
        let Some(query_chain) = parser.parse(query)? else {
            return Ok(SearchResult::default());
        };

        // Later versions shadow earlier ones on matching primary key
        // (`CombineTakingLatestVersion`, §3, §4.9): visit newest-first and
        // let each primary key's first (i.e. newest) hit win.
        let mut winners: HashMap<String, (DocId, f32)> = HashMap::new();

        for version in self.storage.published_versions()?.into_iter().rev() {
            let info_path = self.storage.batch_info_path(version);
            if !info_path.exists() {
                continue;
            }
            let info = BatchInfo::read(&info_path)?;
            let hits = self.evaluate_version(&query_chain, version, info.doc_count, postings)?;

            for (doc_id, score) in hits {
                let doc_id = DocId(doc_id);
                // A matched doc-id can be tombstoned after the postings
                // list that produced it was built (§4.3) — skip it rather
                // than treating its now-absent doc-map as corruption.
                if docs.is_deleted(doc_id) {
                    continue;
                }
                let pk_key = self.primary_key_of(doc_id, keys, values, docs)?;
                winners.entry(pk_key).or_insert((doc_id, score));
            }
        }

        let mut ranked: Vec<(DocId, f32)> = winners.into_values().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let total = ranked.len() as u64;
        let mut hits = Vec::new();
        for (doc_id, score) in ranked.into_iter().skip(offset).take(limit) {
            let document = self.materialize(doc_id, keys, values, docs)?;
            hits.push(SearchHit { doc_id, score, document });
        }

        Ok(SearchResult { hits, total })
    }

    /// Evaluates every top-level statement in `chain` against one batch
    /// version, composing them left-to-right by each statement's operator.
    /// The first statement always seeds the accumulator regardless of its
    /// declared operator — there is nothing before it to AND against or
    /// NOT away — matching scenario 2 in §8 (`+title:'the'-title:'ugly'`
    /// establishes `'the'` as the base set, then subtracts `'ugly'`).
    fn evaluate_version(
        &self,
        chain: &QueryNode,
        version: u64,
        total_docs: u64,
        postings: &mut PostingsStore,
    ) -> Result<Vec<(u64, f32)>> {
        let mut acc: HashMap<u64, f32> = HashMap::new();
        let mut first = true;

        let mut iter = chain.iter_statements().peekable();
        while let Some(stmt) = iter.next() {
            let hits = if let Modifier::Range(bound) = &stmt.modifier {
                let next = iter.peek().map(|n| *n);
                let (lo, hi, consumed) = resolve_range_bounds(stmt, bound, next);
                if consumed {
                    iter.next();
                }
                let trie = self.trie_cache.get_or_load(self.storage, version, &stmt.field)?;
                self.resolve_range(&trie, &lo, &hi, total_docs, postings)?
            } else {
                let trie = self.trie_cache.get_or_load(self.storage, version, &stmt.field)?;
                self.resolve_statement(&trie, stmt, total_docs, postings)?
            };

            if first {
                acc = hits.into_iter().collect();
                first = false;
            } else {
                combine_into(&mut acc, &hits, stmt.op);
            }
        }

        Ok(acc.into_iter().collect())
    }

    /// Resolves one statement's primary term plus any extra terms threaded
    /// through `then` (the value tokenized to more than one term, §4.8),
    /// ANDing them together — an intra-statement conjunction distinct from
    /// the inter-statement composition in `evaluate_version`.
    fn resolve_statement(
        &self,
        trie: &Trie,
        stmt: &QueryNode,
        total_docs: u64,
        postings: &mut PostingsStore,
    ) -> Result<Vec<(u64, f32)>> {
        let mut acc: HashMap<u64, f32> = HashMap::new();
        for (i, term) in stmt.iter_terms().enumerate() {
            let hits = self.resolve_term(trie, term, total_docs, postings)?;
            if i == 0 {
                acc = hits.into_iter().collect();
            } else {
                combine_into(&mut acc, &hits, Op::And);
            }
        }
        Ok(acc.into_iter().collect())
    }

    fn resolve_term(
        &self,
        trie: &Trie,
        term: &QueryNode,
        total_docs: u64,
        postings: &mut PostingsStore,
    ) -> Result<Vec<(u64, f32)>> {
        match &term.modifier {
            Modifier::Exact | Modifier::Range(_) => {
                let key = self.exact_lookup_key(&term.field, &term.value)?;
                match trie.has(&key) {
                    Some(offset) => {
                        let ids = postings.resolve(self.collection_id, offset)?;
                        let score = idf(total_docs, ids.len() as u64);
                        Ok(ids.iter().map(|id| (*id, score)).collect())
                    }
                    None => Ok(Vec::new()),
                }
            }
            Modifier::Prefix => {
                let key = self.fold_lookup_key(&term.field, &term.value)?;
                let matches = trie.starts_with(&key);
                self.union_matched_terms(matches.into_iter().map(|(_, offset)| (offset, 1.0)), total_docs, postings)
            }
            Modifier::Fuzzy => {
                let key = self.fold_lookup_key(&term.field, &term.value)?;
                let matches = trie.near(&key, self.default_fuzzy_edits);
                self.union_matched_terms(
                    matches
                        .into_iter()
                        .map(|(_, distance, offset)| (offset, fuzzy_factor(distance, self.default_fuzzy_edits))),
                    total_docs,
                    postings,
                )
            }
        }
    }

    /// Normalizes an `Exact`/`Range` query value through `field`'s full
    /// analyzer (tokenize, then every filter), matching how its indexed
    /// terms were produced (§8) — otherwise a stemmed or case-folded index
    /// term could never be reached by a literal query value. Single-token
    /// and engine-managed fields pass the value through untouched, since
    /// they're never run through an analyzer at index time either.
    fn exact_lookup_key(&self, field: &str, value: &str) -> Result<String> {
        if is_single_token(field) || is_engine_managed(field) {
            return Ok(value.to_string());
        }
        let analyzer_name = self.schema.analyzer_for_field(field);
        let analyzer = self
            .analyzers
            .get(analyzer_name)
            .ok_or_else(|| Error::NotFound(format!("analyzer '{analyzer_name}' not found")))?;
        Ok(analyzer.analyze(value).into_iter().map(|t| t.text).next().unwrap_or_default())
    }

    /// Case-folds a `Prefix`/`Fuzzy` query value via `field`'s tokenizer
    /// alone — matching the index's case normalization without running a
    /// deliberately partial or misspelled fragment through a whole-word
    /// stemmer or stopword filter, which would corrupt it.
    fn fold_lookup_key(&self, field: &str, value: &str) -> Result<String> {
        if is_single_token(field) || is_engine_managed(field) {
            return Ok(value.to_string());
        }
        let analyzer_name = self.schema.analyzer_for_field(field);
        let analyzer = self
            .analyzers
            .get(analyzer_name)
            .ok_or_else(|| Error::NotFound(format!("analyzer '{analyzer_name}' not found")))?;
        Ok(analyzer
            .tokenizer
            .tokenize(value)
            .into_iter()
            .map(|t| t.text)
            .next()
            .unwrap_or_else(|| value.to_string()))
    }

    /// Unions the postings of several matched terms (a `starts-with` or
    /// `near` match set), scaling each term's idf by `weight` before
    /// folding — §4.9's "each matched term contributes with its idf" and
    /// the fuzzy `(1 - distance/max_edits)` factor. Reuses
    /// `index::postings::reduce` directly: every cursor here is `Or`, so
    /// there is no first-cursor seeding hazard.
    fn union_matched_terms(
        &self,
        matches: impl Iterator<Item = (u64, f32)>,
        total_docs: u64,
        postings: &mut PostingsStore,
    ) -> Result<Vec<(u64, f32)>> {
        let mut cursors = Vec::new();
        for (offset, weight) in matches {
            let ids = postings.resolve(self.collection_id, offset)?;
            let score = idf(total_docs, ids.len() as u64) * weight;
            cursors.push((ids, ReduceOp::Or, score));
        }
        if cursors.is_empty() {
            return Ok(Vec::new());
        }
        Ok(postings::reduce(&cursors))
    }

    fn resolve_range(
        &self,
        trie: &Trie,
        lo: &str,
        hi: &str,
        total_docs: u64,
        postings: &mut PostingsStore,
    ) -> Result<Vec<(u64, f32)>> {
        let matches = trie.range(lo, hi);
        self.union_matched_terms(matches.into_iter().map(|(_, offset)| (offset, 1.0)), total_docs, postings)
    }

    /// The value of the schema's primary-key field for `doc_id`, or a
    /// doc-id-derived key when the schema has none (or the document lacks
    /// it) — every document is then its own shadowing unit, which across
    /// versions is always unique since doc-ids are never reused (§3).
    fn primary_key_of(&self, doc_id: DocId, keys: &KeyTable, values: &mut ValueStore, docs: &mut DocStore) -> Result<String> {
        let Some(field) = &self.schema.primary_key_field else {
            return Ok(format!("__docid:{}", doc_id.value()));
        };
        let doc_map = docs
            .read(doc_id)?
            .ok_or_else(|| Error::DataMisaligned(format!("doc {} missing from doc store", doc_id.value())))?;
        for (key_id, addr) in doc_map {
            if keys.name_of(key_id).as_deref() == Some(field.as_str()) {
                let value = values.read(addr)?;
                return Ok(value.as_token());
            }
        }
        Ok(format!("__docid:{}", doc_id.value()))
    }

    fn materialize(&self, doc_id: DocId, keys: &KeyTable, values: &mut ValueStore, docs: &mut DocStore) -> Result<Document> {
        let doc_map = docs
            .read(doc_id)?
            .ok_or_else(|| Error::DataMisaligned(format!("doc {} missing from doc store", doc_id.value())))?;
        let mut document = Document::new();
        for (key_id, addr) in doc_map {
            let name = keys.name_of(key_id).unwrap_or_else(|| format!("__unknown_key_{}", key_id.0));
            let value = values.read(addr)?;
            document = document.with_field(name, value);
        }
        Ok(document)
    }
}

/// Determines the `[lo, hi]` bounds for one `key<value`/`key>value`
/// statement, combining it with the next statement if it is a matching
/// range bound on the same field joined by `+` (§4.8). Returns whether the
/// next statement was consumed.
fn resolve_range_bounds(stmt: &QueryNode, bound: &RangeBound, next: Option<&QueryNode>) -> (String, String, bool) {
    let mut lo = None;
    let mut hi = None;
    match bound {
        RangeBound::Lower => lo = Some(stmt.value.clone()),
        RangeBound::Upper => hi = Some(stmt.value.clone()),
    }

    let mut consumed = false;
    if let Some(next_stmt) = next {
        if next_stmt.field == stmt.field && next_stmt.op == Op::And {
            if let Modifier::Range(next_bound) = &next_stmt.modifier {
                match (bound, next_bound) {
                    (RangeBound::Lower, RangeBound::Upper) => {
                        hi = Some(next_stmt.value.clone());
                        consumed = true;
                    }
                    (RangeBound::Upper, RangeBound::Lower) => {
                        lo = Some(next_stmt.value.clone());
                        consumed = true;
                    }
                    _ => {}
                }
            }
        }
    }

    (lo.unwrap_or_default(), hi.unwrap_or_else(|| RANGE_HIGH_SENTINEL.to_string()), consumed)
}

/// Folds `next`'s `(doc_id, score)` pairs into `acc` under `op`, mirroring
/// `index::postings::reduce`'s per-operator semantics (AND intersects and
/// sums, OR unions and sums, NOT removes) but over an already-scored
/// in-memory set rather than raw postings lists — needed here because a
/// prefix/fuzzy statement's docs carry per-term scores that a single
/// postings cursor can't represent.
fn combine_into(acc: &mut HashMap<u64, f32>, next: &[(u64, f32)], op: Op) {
    match op {
        Op::And => {
            let incoming: HashSet<u64> = next.iter().map(|(id, _)| *id).collect();
            acc.retain(|id, _| incoming.contains(id));
            for (id, score) in next {
                if let Some(s) = acc.get_mut(id) {
                    *s += score;
                }
            }
        }
        Op::Or => {
            for (id, score) in next {
                *acc.entry(*id).or_insert(0.0) += score;
            }
        }
        Op::Not => {
            for (id, _) in next {
                acc.remove(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyzer::AnalyzerRegistry;
    use crate::core::config::CollectionConfig;
    use crate::core::types::{Document, FieldValue};
    use crate::storage::layout::StorageLayout;
    use crate::storage::version::Compression;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn index_titles(dir: &std::path::Path, titles: &[&str]) {
        let storage = Arc::new(StorageLayout::new(dir.to_path_buf()).unwrap());
        let schema = CollectionSchema::new();
        let analyzers = Arc::new(AnalyzerRegistry::new());
        let config = CollectionConfig {
            model_builder_workers: 2,
            ..CollectionConfig::default()
        };
        let mut session = crate::writer::session::WriteSession::open(storage, "movies", schema, analyzers, config).unwrap();
        for title in titles {
            session
                .put(Document::new().with_field("title", FieldValue::Text(title.to_string())))
                .unwrap();
        }
        session.commit().unwrap();
    }

    fn search(dir: &std::path::Path, query: &str) -> Vec<u64> {
        let storage = Arc::new(StorageLayout::new(dir.to_path_buf()).unwrap());
        let keys = KeyTable::open(storage.key_path("movies")).unwrap();
        let mut values = ValueStore::open(storage.value_path("movies")).unwrap();
        let mut docs = DocStore::open(
            storage.docs_path("movies"),
            storage.doc_index_path("movies"),
            storage.deleted_path("movies"),
            Compression::default(),
        )
        .unwrap();
        let mut postings = PostingsStore::open(storage.postings_path("movies")).unwrap();
        let schema = CollectionSchema::new();
        let trie_cache = TrieCache::new();
        let analyzers = AnalyzerRegistry::new();
        let executor = SearchExecutor {
            storage: &storage,
            trie_cache: &trie_cache,
            schema: &schema,
            analyzers: &analyzers,
            collection_id: 1,
            default_fuzzy_edits: 2,
        };
        let result = executor
            .search(query, &keys, &mut values, &mut docs, &mut postings, 100, 0)
            .unwrap();
        let mut ids: Vec<u64> = result.hits.iter().map(|h| h.doc_id.value()).collect();
        ids.sort_unstable();
        ids
    }

    const TITLES: [&str; 6] = ["rambo", "rambo 2", "rocky", "the good", "the bad", "the ugly"];

    #[test]
    fn exact_match_returns_matching_doc_ids() {
        let dir = tempdir().unwrap();
        index_titles(dir.path(), &TITLES);
        assert_eq!(search(dir.path(), "title:rambo"), vec![0, 1]);
        assert_eq!(search(dir.path(), "title:the"), vec![3, 4, 5]);
    }

    #[test]
    fn and_not_composition() {
        let dir = tempdir().unwrap();
        index_titles(dir.path(), &TITLES);
        assert_eq!(search(dir.path(), "+title:the\n-title:ugly"), vec![3, 4]);
    }

    #[test]
    fn prefix_match_unions_matched_terms() {
        let dir = tempdir().unwrap();
        index_titles(
            dir.path(),
            &["rambo", "rambo 2", "rocky 2", "raiders of the lost ark", "rain man"],
        );
        assert_eq!(search(dir.path(), "title:ra*"), vec![0, 1, 3, 4]);
    }

    #[test]
    fn fuzzy_match_finds_near_misses() {
        let dir = tempdir().unwrap();
        index_titles(dir.path(), &["rambo", "rocky", "tomb raider"]);
        assert_eq!(search(dir.path(), "title:raider"), vec![2]);
        assert_eq!(search(dir.path(), "title:raider~"), vec![2]);
    }

    #[test]
    fn empty_query_returns_empty_result() {
        let dir = tempdir().unwrap();
        index_titles(dir.path(), &TITLES);
        assert_eq!(search(dir.path(), ""), Vec::<u64>::new());
    }
}
