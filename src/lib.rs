pub mod analysis;
pub mod compression;
pub mod core;
pub mod index;
pub mod mmap;
pub mod parallel;
pub mod plugins;
pub mod query;
pub mod schema;
pub mod scoring;
pub mod search;
pub mod storage;
pub mod writer;

pub use crate::core::collection::Collection;
pub use crate::core::config::CollectionConfig;
pub use crate::core::error::{Error, Result};
pub use crate::core::types::{Document, DocId, FieldValue};
pub use crate::schema::schema::CollectionSchema;
pub use crate::search::executor::SearchResult;
