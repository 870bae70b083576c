use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};

/// Compressed block storage for general-purpose blob data (the doc store's
/// compression metadata in a `BatchInfo`, §4.9's "compression" field).
#[derive(Serialize, Deserialize)]
pub struct CompressedBlock {
    pub data: Vec<u8>,
    pub original_size: usize,
    pub compression: CompressionType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum CompressionType {
    None,
    Lz4,
    Zstd,
    Snappy,
}

impl CompressedBlock {
    pub fn compress(data: &[u8], compression: CompressionType) -> Result<Self> {
        let compressed = match compression {
            CompressionType::None => data.to_vec(),
            CompressionType::Lz4 => lz4::block::compress(data, None, false)
                .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?,
            CompressionType::Zstd => zstd::encode_all(data, 3)?,
            CompressionType::Snappy => {
                use snap::raw::Encoder;
                Encoder::new()
                    .compress_vec(data)
                    .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
            }
        };

        Ok(CompressedBlock {
            data: compressed,
            original_size: data.len(),
            compression,
        })
    }

    pub fn decompress(&self) -> Result<Vec<u8>> {
        match self.compression {
            CompressionType::None => Ok(self.data.clone()),
            CompressionType::Lz4 => lz4::block::decompress(&self.data, Some(self.original_size as i32))
                .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e))),
            CompressionType::Zstd => zstd::decode_all(&self.data[..]).map_err(Error::Io),
            CompressionType::Snappy => {
                use snap::raw::Decoder;
                Decoder::new()
                    .decompress_vec(&self.data)
                    .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
            }
        }
    }

    pub fn compress_auto(data: &[u8], priority: CompressionPriority) -> Result<Self> {
        let compression = match priority {
            CompressionPriority::Speed => CompressionType::Lz4,
            CompressionPriority::Ratio => CompressionType::Zstd,
            CompressionPriority::Balanced => CompressionType::Snappy,
        };
        Self::compress(data, compression)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum CompressionPriority {
    Speed,
    Ratio,
    Balanced,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_scheme() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(4);
        for scheme in [CompressionType::None, CompressionType::Lz4, CompressionType::Zstd, CompressionType::Snappy] {
            let block = CompressedBlock::compress(&data, scheme).unwrap();
            assert_eq!(block.decompress().unwrap(), data);
        }
    }
}
