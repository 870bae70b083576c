use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::path::Path;

use crate::core::error::Result;

/// Read-only memory map over a term tree's sibling `.vec` file (§4.5):
/// vectors are addressed by byte offset from the index file, so the reader
/// never has to parse the whole vector blob up front.
pub struct MmapFile {
    mmap: Option<Mmap>,
}

impl MmapFile {
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        let len = file.metadata()?.len() as usize;
        if len == 0 {
            return Ok(MmapFile { mmap: None });
        }
        let mmap = unsafe { MmapOptions::new().len(len).map(&file)? };
        Ok(MmapFile { mmap: Some(mmap) })
    }

    pub fn data(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }
}