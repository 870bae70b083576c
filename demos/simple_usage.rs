/// Complete doculex API demo
///
/// Demonstrates the main operations an embedder uses:
/// - opening a collection and a write session
/// - ingesting documents and committing a batch
/// - field, boolean, prefix, and fuzzy search
/// - shadowing a document by primary key across batches
/// - deletion
use doculex::core::collection::Collection;
use doculex::{CollectionConfig, CollectionSchema, Document, FieldValue};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n=== doculex demo ===\n");

    let data_dir = std::env::temp_dir().join("doculex-simple-usage-demo");
    let config = CollectionConfig {
        data_dir,
        ..CollectionConfig::default()
    };
    let schema = CollectionSchema::new().with_primary_key("_id");
    let collection = Collection::open_with_schema("articles", schema, config)?;
    println!("collection '{}' opened at {:?}\n", collection.name(), collection.data_dir());

    println!("ingesting documents...");
    {
        let mut session = collection.write_session()?;
        session.put(article("a1", "Rust Programming", "Learn the Rust language"))?;
        session.put(article("a2", "Database Systems", "SQL and NoSQL databases"))?;
        session.put(article("a3", "Web Development", "Building web apps"))?;
        let version = session.commit()?;
        println!("  committed batch {version} with 3 documents\n");
    }

    println!("searching...");
    for query in ["title:rust", "title:database", "title:web*", "title:databse~"] {
        let result = collection.search(query, 10, 0)?;
        println!("  '{query}': {} hit(s)", result.total);
        for hit in &result.hits {
            if let Some(FieldValue::Text(title)) = hit.document.get("title") {
                println!("    - {title} (score {:.3})", hit.score);
            }
        }
    }
    println!();

    println!("updating article 'a2' by re-ingesting its primary key in a new batch...");
    {
        let mut session = collection.write_session()?;
        session.put(article("a2", "Advanced Databases", "Deep dive into database internals"))?;
        session.commit()?;
    }
    let result = collection.search("title:database", 10, 0)?;
    println!("  'title:database' now returns {} hit(s):", result.total);
    for hit in &result.hits {
        if let Some(FieldValue::Text(title)) = hit.document.get("title") {
            println!("    - {title}");
        }
    }
    println!();

    println!("deleting 'a3' (doc-id {})...", 2);
    collection.delete(doculex::DocId(2))?;
    let result = collection.search("title:web", 10, 0)?;
    println!("  'title:web' now returns {} hit(s)\n", result.total);

    println!("=== demo complete ===\n");
    Ok(())
}

fn article(id: &str, title: &str, body: &str) -> Document {
    Document::new()
        .with_field("_id", FieldValue::Text(id.to_string()))
        .with_field("title", FieldValue::Text(title.to_string()))
        .with_field("body", FieldValue::Text(body.to_string()))
}
