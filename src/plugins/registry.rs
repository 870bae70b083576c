use std::collections::HashMap;
use std::sync::Arc;

use crate::core::error::{Error, Result};
use crate::core::types::Document;

/// The capability set a content-type plugin offers (Design Notes §9:
/// "polymorphism over writers/readers/tokenizers per media type" — modeled
/// as a registry of small orthogonal capabilities rather than an
/// inheritance chain). The HTTP front end named in §6 is the external
/// collaborator that would route a request's media type through this
/// registry; it is not implemented here.
pub trait MediaTypePlugin: Send + Sync {
    fn media_type(&self) -> &str;

    /// Decodes a request body into the records it describes.
    fn parse(&self, body: &[u8]) -> Result<Vec<Document>>;

    /// Encodes a result set back into this media type's wire form.
    fn write(&self, docs: &[Document]) -> Result<Vec<u8>>;
}

/// Keyed by media-type string, as Design Notes §9 prescribes. Looking up an
/// unregistered media type is the `NotSupported` case that maps to HTTP 415
/// at the (unimplemented) front end.
#[derive(Default)]
pub struct MediaTypeRegistry {
    plugins: HashMap<String, Arc<dyn MediaTypePlugin>>,
}

impl MediaTypeRegistry {
    pub fn new() -> Self {
        MediaTypeRegistry { plugins: HashMap::new() }
    }

    pub fn register(&mut self, plugin: Arc<dyn MediaTypePlugin>) {
        self.plugins.insert(plugin.media_type().to_string(), plugin);
    }

    pub fn get(&self, media_type: &str) -> Result<Arc<dyn MediaTypePlugin>> {
        self.plugins
            .get(media_type)
            .cloned()
            .ok_or_else(|| Error::NotSupported(format!("no plugin registered for media type '{media_type}'")))
    }
}
