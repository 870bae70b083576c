use std::path::Path;

use crate::core::error::{Error, Result};
use crate::core::types::{FieldValue, ValueAddress, ValueType};
use crate::storage::block::PagedAppendStream;

/// Appends typed comparable values to a collection's `.val` file and hands
/// back the `(offset, length, type_tag)` address that later identifies the
/// value (§4.2). Encoding is deterministic and network-byte-order per type.
pub struct ValueStore {
    stream: PagedAppendStream,
}

impl ValueStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(ValueStore {
            stream: PagedAppendStream::open(path)?,
        })
    }

    pub fn append(&mut self, value: &FieldValue) -> Result<ValueAddress> {
        let encoded = encode_value(value);
        let offset = self.stream.append(&encoded)?;
        Ok(ValueAddress {
            offset,
            length: encoded.len() as u32,
            type_tag: value.value_type() as u8,
        })
    }

    pub fn read(&mut self, addr: ValueAddress) -> Result<FieldValue> {
        let mut buf = vec![0u8; addr.length as usize];
        self.stream.read_at(addr.offset, &mut buf)?;
        decode_value(&buf, addr.type_tag)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.stream.flush()
    }
}

fn encode_value(value: &FieldValue) -> Vec<u8> {
    match value {
        FieldValue::Integer(v) => v.to_be_bytes().to_vec(),
        FieldValue::Float(v) => v.to_bits().to_be_bytes().to_vec(),
        FieldValue::Timestamp(v) => v.to_be_bytes().to_vec(),
        FieldValue::Text(s) => {
            let units: Vec<u16> = s.encode_utf16().collect();
            let mut buf = Vec::with_capacity(4 + units.len() * 2);
            buf.extend_from_slice(&(units.len() as u32).to_be_bytes());
            for u in units {
                buf.extend_from_slice(&u.to_be_bytes());
            }
            buf
        }
    }
}

fn decode_value(buf: &[u8], type_tag: u8) -> Result<FieldValue> {
    match ValueType::from_tag(type_tag)? {
        ValueType::Integer => {
            let bytes: [u8; 8] = buf
                .try_into()
                .map_err(|_| Error::DataMisaligned("short integer value read".into()))?;
            Ok(FieldValue::Integer(i64::from_be_bytes(bytes)))
        }
        ValueType::Float => {
            let bytes: [u8; 8] = buf
                .try_into()
                .map_err(|_| Error::DataMisaligned("short float value read".into()))?;
            Ok(FieldValue::Float(f64::from_bits(u64::from_be_bytes(bytes))))
        }
        ValueType::Timestamp => {
            let bytes: [u8; 8] = buf
                .try_into()
                .map_err(|_| Error::DataMisaligned("short timestamp value read".into()))?;
            Ok(FieldValue::Timestamp(i64::from_be_bytes(bytes)))
        }
        ValueType::Text => {
            if buf.len() < 4 {
                return Err(Error::DataMisaligned("short text value header".into()));
            }
            let len = u32::from_be_bytes(buf[0..4].try_into().unwrap()) as usize;
            let mut units = Vec::with_capacity(len);
            let mut pos = 4;
            for _ in 0..len {
                let unit = u16::from_be_bytes(
                    buf.get(pos..pos + 2)
                        .ok_or_else(|| Error::DataMisaligned("truncated text value".into()))?
                        .try_into()
                        .unwrap(),
                );
                units.push(unit);
                pos += 2;
            }
            String::from_utf16(&units)
                .map(FieldValue::Text)
                .map_err(|_| Error::DataMisaligned("invalid UTF-16 in text value".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_every_type() {
        let dir = tempdir().unwrap();
        let mut store = ValueStore::open(dir.path().join("c.val")).unwrap();

        let values = vec![
            FieldValue::Integer(-42),
            FieldValue::Float(3.5),
            FieldValue::Text("hello, world".to_string()),
            FieldValue::Timestamp(1_700_000_000_000),
            FieldValue::Text("unicode: héllo 日本語".to_string()),
        ];

        let mut addrs = Vec::new();
        for v in &values {
            addrs.push(store.append(v).unwrap());
        }
        for (addr, expected) in addrs.into_iter().zip(values) {
            assert_eq!(store.read(addr).unwrap(), expected);
        }
    }

    #[test]
    fn corrupt_type_tag_is_fatal() {
        let dir = tempdir().unwrap();
        let mut store = ValueStore::open(dir.path().join("c.val")).unwrap();
        let addr = store.append(&FieldValue::Integer(1)).unwrap();
        let bad = ValueAddress {
            type_tag: 99,
            ..addr
        };
        assert!(store.read(bad).is_err());
    }
}
