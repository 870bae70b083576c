use std::collections::HashSet;
use std::path::PathBuf;

use crate::storage::version::Compression;

/// Process-wide configuration for a collection. Everything here is the
/// interface the embedder supplies; *loading* it from a file or environment
/// is the embedder's concern, not the core's (see `SPEC_FULL.md` §1).
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// The one process-wide setting the spec requires: the data directory.
    pub data_dir: PathBuf,

    /// Capacity, in number of `(version, field)` entries, of the
    /// collection-wide cache of loaded trie term trees (§9's read-side
    /// cache, `search::executor::TrieCache`). Evicted entries are simply
    /// re-read from their `.tri` file on next use.
    pub trie_cache_capacity: usize,

    /// Worker count for the model-builder queue (§4.10).
    pub model_builder_workers: usize,
    /// Bound on the model-builder and validator queues.
    pub queue_capacity: usize,

    /// Whether the deferred validator queue runs after flush.
    pub validate_writes: bool,
    /// Which key-ids the validator samples. Open Question in spec.md §9:
    /// the sample source asserts only for `keyId ∈ {4,5}`; we keep that as
    /// an explicit, documented sampling set rather than a hardcoded range —
    /// see DESIGN.md.
    pub validate_key_ids: HashSet<u64>,

    /// Cosine-angle threshold above which a vector merges into the visited
    /// node instead of branching (§4.5).
    pub identical_angle: f64,
    /// Cosine-angle threshold above which the vector tree descends instead
    /// of branching to the opposite side (§4.5).
    pub fold_angle: f64,

    /// Default edit budget for a bare `value~` fuzzy query (§4.9).
    pub default_fuzzy_edits: u8,

    /// Scheme used to compress each document's encoded doc-map before it is
    /// appended to the doc store; recorded verbatim into each batch's
    /// `BatchInfo.compression` at commit.
    pub compression: Compression,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        CollectionConfig {
            data_dir: PathBuf::from("./data"),
            trie_cache_capacity: 256,

            model_builder_workers: num_cpus::get().max(1),
            queue_capacity: 1024,

            validate_writes: false,
            validate_key_ids: HashSet::from([4, 5]),

            identical_angle: 0.999,
            fold_angle: 0.7,

            default_fuzzy_edits: 2,

            compression: Compression::default(),
        }
    }
}
