use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::core::types::{DocId, KeyId};
use crate::index::trie::Trie;
use crate::index::vector_tree::VectorTree;

/// One unit of work submitted to the model-builder queue (§4.10 step 4):
/// every `(token text, embedding)` pair found in one field of one document,
/// to be inserted into that field's trie and that key's vector tree.
pub struct ModelBuilderJob {
    pub doc_id: DocId,
    pub key_id: KeyId,
    pub field: String,
    pub terms: Vec<(String, Vec<f32>)>,
}

/// Bounded producer/consumer worker pool building per-field/per-key term
/// trees for a single write session (§4.10, §5). Inserts into a given tree
/// are serialized by that tree's own lock; inserts into different trees
/// proceed in parallel across the `workers` threads.
pub struct ModelBuilderPool {
    sender: Option<Sender<ModelBuilderJob>>,
    handles: Vec<JoinHandle<()>>,
    tries: Arc<RwLock<HashMap<String, Mutex<Trie>>>>,
    vector_trees: Arc<RwLock<HashMap<KeyId, Mutex<VectorTree>>>>,
    /// Doc-ids accumulated per `(field, term)`, persisted to the postings
    /// store at flush time and patched back into the trie's terminal nodes.
    pending_postings: Arc<RwLock<HashMap<(String, String), Mutex<Vec<u64>>>>>,
}

impl ModelBuilderPool {
    pub fn new(workers: usize, queue_capacity: usize, identical_angle: f64, fold_angle: f64) -> Self {
        let (sender, receiver): (Sender<ModelBuilderJob>, Receiver<ModelBuilderJob>) = bounded(queue_capacity);
        let tries: Arc<RwLock<HashMap<String, Mutex<Trie>>>> = Arc::new(RwLock::new(HashMap::new()));
        let vector_trees: Arc<RwLock<HashMap<KeyId, Mutex<VectorTree>>>> = Arc::new(RwLock::new(HashMap::new()));
        let pending_postings: Arc<RwLock<HashMap<(String, String), Mutex<Vec<u64>>>>> = Arc::new(RwLock::new(HashMap::new()));

        let handles = (0..workers.max(1))
            .map(|_| {
                let receiver = receiver.clone();
                let tries = Arc::clone(&tries);
                let vector_trees = Arc::clone(&vector_trees);
                let pending_postings = Arc::clone(&pending_postings);
                thread::spawn(move || {
                    for job in receiver.iter() {
                        for (term, vector) in &job.terms {
                            insert_term(&tries, &job.field, term);
                            record_pending(&pending_postings, &job.field, term, job.doc_id);
                            insert_vector(&vector_trees, job.key_id, identical_angle, fold_angle, vector.clone(), job.doc_id);
                        }
                    }
                })
            })
            .collect();

        ModelBuilderPool {
            sender: Some(sender),
            handles,
            tries,
            vector_trees,
            pending_postings,
        }
    }

    pub fn submit(&self, job: ModelBuilderJob) {
        if let Some(sender) = &self.sender {
            // Enqueue blocks only when the queue is bounded and full (§5).
            let _ = sender.send(job);
        }
    }

    /// Closes the queue and blocks until every worker has drained it.
    pub fn join(mut self) -> BuiltTrees {
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        let tries = Arc::try_unwrap(self.tries).map(RwLock::into_inner).unwrap_or_default();
        let vector_trees = Arc::try_unwrap(self.vector_trees).map(RwLock::into_inner).unwrap_or_default();
        let pending_postings = Arc::try_unwrap(self.pending_postings)
            .map(RwLock::into_inner)
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.into_inner()))
            .collect();

        BuiltTrees {
            tries,
            vector_trees,
            pending_postings,
        }
    }
}

/// The trees and pending trie postings handed back once a model-builder
/// pool has drained, ready for the write session's flush step to persist.
pub struct BuiltTrees {
    pub tries: HashMap<String, Mutex<Trie>>,
    pub vector_trees: HashMap<KeyId, Mutex<VectorTree>>,
    pub pending_postings: HashMap<(String, String), Vec<u64>>,
}

fn insert_term(tries: &RwLock<HashMap<String, Mutex<Trie>>>, field: &str, term: &str) {
    if let Some(lock) = tries.read().get(field) {
        lock.lock().insert(term, 0);
        return;
    }
    tries.write().entry(field.to_string()).or_insert_with(|| Mutex::new(Trie::new()));
    tries.read().get(field).unwrap().lock().insert(term, 0);
}

fn record_pending(pending: &RwLock<HashMap<(String, String), Mutex<Vec<u64>>>>, field: &str, term: &str, doc_id: DocId) {
    let key = (field.to_string(), term.to_string());
    if let Some(lock) = pending.read().get(&key) {
        lock.lock().push(doc_id.value());
        return;
    }
    pending.write().entry(key.clone()).or_insert_with(|| Mutex::new(Vec::new()));
    pending.read().get(&key).unwrap().lock().push(doc_id.value());
}

fn insert_vector(
    vector_trees: &RwLock<HashMap<KeyId, Mutex<VectorTree>>>,
    key_id: KeyId,
    identical_angle: f64,
    fold_angle: f64,
    vector: Vec<f32>,
    doc_id: DocId,
) {
    if let Some(lock) = vector_trees.read().get(&key_id) {
        lock.lock().insert(vector, doc_id.value());
        return;
    }
    vector_trees
        .write()
        .entry(key_id)
        .or_insert_with(|| Mutex::new(VectorTree::new(identical_angle, fold_angle)));
    vector_trees.read().get(&key_id).unwrap().lock().insert(vector, doc_id.value());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_inserts_into_distinct_fields_all_land() {
        let pool = ModelBuilderPool::new(4, 64, 0.999, 0.7);
        for i in 0..50u64 {
            pool.submit(ModelBuilderJob {
                doc_id: DocId(i),
                key_id: KeyId(0),
                field: "title".to_string(),
                terms: vec![(format!("term{i}"), vec![1.0, 0.0])],
            });
        }
        let built = pool.join();
        let trie = built.tries.get("title").unwrap().lock();
        for i in 0..50u64 {
            assert!(trie.has(&format!("term{i}")).is_some());
        }
    }

    #[test]
    fn pending_postings_accumulate_all_doc_ids_for_a_term() {
        let pool = ModelBuilderPool::new(2, 64, 0.999, 0.7);
        pool.submit(ModelBuilderJob {
            doc_id: DocId(1),
            key_id: KeyId(0),
            field: "title".to_string(),
            terms: vec![("rust".to_string(), vec![1.0])],
        });
        pool.submit(ModelBuilderJob {
            doc_id: DocId(2),
            key_id: KeyId(0),
            field: "title".to_string(),
            terms: vec![("rust".to_string(), vec![1.0])],
        });
        let built = pool.join();
        let mut ids = built.pending_postings.get(&("title".to_string(), "rust".to_string())).unwrap().clone();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
    }
}
