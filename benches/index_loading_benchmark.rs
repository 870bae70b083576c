use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use doculex::core::collection::Collection;
use doculex::{CollectionConfig, Document, FieldValue};
use tempfile::TempDir;

fn index_documents(dir: &TempDir, name: &str, doc_count: u64) -> Collection {
    let config = CollectionConfig {
        data_dir: dir.path().to_path_buf(),
        model_builder_workers: 2,
        ..CollectionConfig::default()
    };
    let collection = Collection::open(name, config).unwrap();
    let mut session = collection.write_session().unwrap();
    for i in 0..doc_count {
        session
            .put(
                Document::new()
                    .with_field("title", FieldValue::Text(format!("document {i} about rust search engine")))
                    .with_field(
                        "body",
                        FieldValue::Text(format!("this is document number {i} with various terms like database index query")),
                    ),
            )
            .unwrap();
    }
    session.commit().unwrap();
    collection
}

/// Measures the cost of `SearchExecutor`'s trie-cache miss path — reading
/// a version's `.tri` files from disk and deserializing them — versus a
/// warm cache hit on a repeated search against the same collection.
fn bench_trie_cache_cold_vs_warm(c: &mut Criterion) {
    let mut group = c.benchmark_group("trie_cache");

    for doc_count in [100u64, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("cold", doc_count), doc_count, |b, &doc_count| {
            b.iter(|| {
                let dir = TempDir::new().unwrap();
                let collection = index_documents(&dir, "cold", doc_count);
                let result = collection.search(black_box("title:rust"), 20, 0).unwrap();
                black_box(result);
            });
        });
    }

    let dir = TempDir::new().unwrap();
    let collection = index_documents(&dir, "warm", 1000);
    collection.search("title:rust", 20, 0).unwrap(); // populate the trie cache once

    group.bench_function("warm_1000_docs", |b| {
        b.iter(|| {
            let result = collection.search(black_box("title:rust"), 20, 0).unwrap();
            black_box(result);
        });
    });

    group.finish();
}

/// Measures postings resolution cost as a single term's list grows across
/// several committed batches (each batch appends a tail page, §4.9).
fn bench_postings_resolution_across_batches(c: &mut Criterion) {
    let mut group = c.benchmark_group("postings_resolution");

    for batch_count in [1u64, 10, 50].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(batch_count), batch_count, |b, &batch_count| {
            b.iter(|| {
                let dir = TempDir::new().unwrap();
                let config = CollectionConfig {
                    data_dir: dir.path().to_path_buf(),
                    model_builder_workers: 2,
                    ..CollectionConfig::default()
                };
                let collection = Collection::open("paged", config).unwrap();
                for _ in 0..batch_count {
                    let mut session = collection.write_session().unwrap();
                    for i in 0..20 {
                        session
                            .put(Document::new().with_field("title", FieldValue::Text(format!("shared term {i}"))))
                            .unwrap();
                    }
                    session.commit().unwrap();
                }
                let result = collection.search(black_box("title:shared"), 1000, 0).unwrap();
                black_box(result);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_trie_cache_cold_vs_warm, bench_postings_resolution_across_batches);
criterion_main!(benches);
