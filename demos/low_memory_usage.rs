/// Demonstrates tuning a collection for a memory-constrained embedder:
/// fewer model-builder workers, a smaller bounded queue, and committing in
/// small batches instead of one giant session so no single flush has to
/// hold an unbounded number of pending terms in memory at once.
use doculex::core::collection::Collection;
use doculex::{CollectionConfig, Document, FieldValue};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CollectionConfig {
        data_dir: std::env::temp_dir().join("doculex-low-memory-demo"),
        model_builder_workers: 1,
        queue_capacity: 64,
        trie_cache_capacity: 32,
        ..CollectionConfig::default()
    };

    let collection = Collection::open("bulk_articles", config)?;
    println!("collection opened with a single model-builder worker and a 64-entry queue\n");

    const BATCH_SIZE: u64 = 100;
    const TOTAL_DOCS: u64 = 1000;

    for batch_start in (0..TOTAL_DOCS).step_by(BATCH_SIZE as usize) {
        let mut session = collection.write_session()?;
        for i in batch_start..(batch_start + BATCH_SIZE).min(TOTAL_DOCS) {
            session.put(
                Document::new()
                    .with_field("title", FieldValue::Text(format!("document {i}")))
                    .with_field("body", FieldValue::Text("lorem ipsum dolor sit amet".to_string())),
            )?;
        }
        let version = session.commit()?;
        println!("committed batch {version} ({BATCH_SIZE} docs) — session dropped, queue drained");
    }

    let result = collection.search("title:document", 5, 0)?;
    println!("\n'title:document' matched {} documents across all batches", result.total);

    Ok(())
}
