//! On-disk object header used by [`DiskStore`](crate::DiskStore).
//!
//! Every object file is a 16-byte header followed by the payload:
//!
//! ```text
//! 0x00  4   "TARN" magic
//! 0x04  1   version (u8) = 1
//! 0x05  1   type: 1=blob, 2=tree
//! 0x06  1   compression: 0=none, 1=zstd
//! 0x07  1   reserved (must be 0)
//! 0x08  8   payload_len (u64 LE), stored (possibly compressed) size
//! 0x10  ... payload
//! ```

use crate::error::{Error, Result};
use std::path::Path;

pub const MAGIC: &[u8; 4] = b"TARN";

pub const VERSION: u8 = 1;

pub const HEADER_SIZE: usize = 16;

/// Kind of payload an object file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Blob = 1,
    Tree = 2,
}

impl ObjectType {
    fn from_byte(byte: u8) -> Option<Self> {
        [ObjectType::Blob, ObjectType::Tree]
            .into_iter()
            .find(|t| *t as u8 == byte)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Blob => "blob",
            ObjectType::Tree => "tree",
        }
    }
}

/// Compression applied to an object's payload, also the store-wide
/// setting read from the `config` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None = 0,
    Zstd = 1,
}

impl CompressionType {
    fn from_byte(byte: u8) -> Option<Self> {
        [CompressionType::None, CompressionType::Zstd]
            .into_iter()
            .find(|c| *c as u8 == byte)
    }

    /// Name used in the store config file.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::Zstd => "zstd",
        }
    }

    /// Parse a config file value.
    pub fn parse(s: &str) -> Option<Self> {
        [CompressionType::None, CompressionType::Zstd]
            .into_iter()
            .find(|c| c.as_str() == s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHeader {
    pub object_type: ObjectType,
    pub compression: CompressionType,
    pub payload_len: u64,
}

impl ObjectHeader {
    pub fn new(object_type: ObjectType, compression: CompressionType, payload_len: u64) -> Self {
        Self {
            object_type,
            compression,
            payload_len,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..4].copy_from_slice(MAGIC);
        buf[4] = VERSION;
        buf[5] = self.object_type as u8;
        buf[6] = self.compression as u8;
        buf[8..].copy_from_slice(&self.payload_len.to_le_bytes());
        buf
    }

    /// Decode the header at the start of `buf`, read from the object file
    /// at `path`. Any malformed field is a `CorruptedObject`.
    pub fn decode(path: &Path, buf: &[u8]) -> Result<Self> {
        let corrupt = |reason: String| Error::corrupted_object(path, reason);

        let Some(header) = buf.get(..HEADER_SIZE) else {
            return Err(corrupt(format!("header is only {} bytes", buf.len())));
        };
        if &header[..4] != MAGIC {
            return Err(corrupt(format!("bad magic {:02x?}", &header[..4])));
        }
        if header[4] != VERSION {
            return Err(corrupt(format!("object version {}", header[4])));
        }
        if header[7] != 0 {
            return Err(corrupt(format!("reserved byte is {}", header[7])));
        }

        let object_type = ObjectType::from_byte(header[5])
            .ok_or_else(|| corrupt(format!("object type {}", header[5])))?;
        let compression = CompressionType::from_byte(header[6])
            .ok_or_else(|| corrupt(format!("compression type {}", header[6])))?;

        let mut len = [0u8; 8];
        len.copy_from_slice(&header[8..]);
        Ok(Self::new(object_type, compression, u64::from_le_bytes(len)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(buf: &[u8]) -> Result<ObjectHeader> {
        ObjectHeader::decode(Path::new("objects/ab/cd"), buf)
    }

    #[test]
    fn test_header_encode_decode() {
        let header = ObjectHeader::new(ObjectType::Tree, CompressionType::Zstd, 0x1234_5678_9ABC);
        let encoded = header.encode();
        assert_eq!(&encoded[0..4], MAGIC);
        assert_eq!(decode(&encoded).unwrap(), header);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut buf = ObjectHeader::new(ObjectType::Blob, CompressionType::None, 1).encode();
        buf[0..4].copy_from_slice(b"CAFS");
        assert!(matches!(decode(&buf), Err(Error::CorruptedObject { .. })));
    }

    #[test]
    fn test_header_rejects_bad_fields() {
        let good = ObjectHeader::new(ObjectType::Blob, CompressionType::None, 1).encode();

        for (offset, value) in [(4, 9), (5, 3), (6, 7), (7, 1)] {
            let mut bad = good;
            bad[offset] = value;
            assert!(
                matches!(decode(&bad), Err(Error::CorruptedObject { .. })),
                "byte {} = {} accepted",
                offset,
                value
            );
        }

        assert!(decode(&good[..10]).is_err());
    }

    #[test]
    fn test_compression_config_names() {
        assert_eq!(CompressionType::parse("zstd"), Some(CompressionType::Zstd));
        assert_eq!(CompressionType::parse("none"), Some(CompressionType::None));
        assert_eq!(CompressionType::parse("gzip"), None);
    }
}
