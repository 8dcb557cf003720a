//! compressed resource payloads
//!
//! a compressed resource starts with a fixed header naming the decompressor.
//! decompressors may be stacked: the output of one stage can itself start
//! with another header.

use crate::error::{Error, Result};
use crate::image::header::ByteOrder;
use crate::image::strings::ImageStrings;

pub const COMPRESSED_MAGIC: u32 = 0xCAFE_FAFA;

/// magic(4) compressed(8) uncompressed(8) name(4) content(4) terminal(1)
pub const COMPRESSED_HEADER_SIZE: usize = 29;

pub const ZSTD_DECOMPRESSOR: &str = "zstd";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompressedHeader {
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub decompressor_name_offset: u32,
    pub content_offset: u32,
    pub is_terminal: bool,
}

impl CompressedHeader {
    /// parse a header if `bytes` starts with one
    pub fn read(bytes: &[u8], order: ByteOrder) -> Option<Self> {
        if bytes.len() < COMPRESSED_HEADER_SIZE || order.read_u32(bytes) != COMPRESSED_MAGIC {
            return None;
        }
        Some(Self {
            compressed_size: order.read_u64(&bytes[4..]),
            uncompressed_size: order.read_u64(&bytes[12..]),
            decompressor_name_offset: order.read_u32(&bytes[20..]),
            content_offset: order.read_u32(&bytes[24..]),
            is_terminal: bytes[28] != 0,
        })
    }

    pub fn to_bytes(&self, order: ByteOrder) -> [u8; COMPRESSED_HEADER_SIZE] {
        let mut out = [0u8; COMPRESSED_HEADER_SIZE];
        out[0..4].copy_from_slice(&order.u32_bytes(COMPRESSED_MAGIC));
        out[4..12].copy_from_slice(&order.u64_bytes(self.compressed_size));
        out[12..20].copy_from_slice(&order.u64_bytes(self.uncompressed_size));
        out[20..24].copy_from_slice(&order.u32_bytes(self.decompressor_name_offset));
        out[24..28].copy_from_slice(&order.u32_bytes(self.content_offset));
        out[28] = self.is_terminal as u8;
        out
    }
}

/// undo every compression stage applied to `bytes`
pub fn decompress_resource(
    mut bytes: Vec<u8>,
    order: ByteOrder,
    strings: &ImageStrings,
    expected_size: u64,
) -> Result<Vec<u8>> {
    while let Some(header) = CompressedHeader::read(&bytes, order) {
        let start = COMPRESSED_HEADER_SIZE;
        let payload = usize::try_from(header.compressed_size)
            .ok()
            .and_then(|size| start.checked_add(size))
            .and_then(|end| bytes.get(start..end))
            .ok_or_else(|| {
                Error::Truncated(format!(
                    "compressed payload needs {} bytes, have {}",
                    header.compressed_size,
                    bytes.len() - start
                ))
            })?;

        let name = strings.get(header.decompressor_name_offset)?;
        let out = match name {
            ZSTD_DECOMPRESSOR => zstd::stream::decode_all(payload)
                .map_err(|e| Error::Malformed(format!("zstd stream: {}", e)))?,
            other => return Err(Error::UnsupportedCompression(other.to_string())),
        };

        if out.len() as u64 != header.uncompressed_size {
            return Err(Error::Malformed(format!(
                "decompressed {} bytes, header says {}",
                out.len(),
                header.uncompressed_size
            )));
        }

        tracing::trace!(
            decompressor = name,
            from = header.compressed_size,
            to = header.uncompressed_size,
            "decompressed resource stage"
        );

        bytes = out;
        if header.is_terminal {
            break;
        }
    }

    if bytes.len() as u64 != expected_size {
        return Err(Error::Malformed(format!(
            "resource is {} bytes, location says {}",
            bytes.len(),
            expected_size
        )));
    }

    Ok(bytes)
}

/// wrap `content` in a single zstd stage
#[cfg(test)]
pub fn compress_zstd(content: &[u8], order: ByteOrder, name_offset: u32) -> Vec<u8> {
    let payload = zstd::stream::encode_all(content, 3).unwrap();
    let header = CompressedHeader {
        compressed_size: payload.len() as u64,
        uncompressed_size: content.len() as u64,
        decompressor_name_offset: name_offset,
        content_offset: 0,
        is_terminal: true,
    };
    let mut out = header.to_bytes(order).to_vec();
    out.extend(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::strings::StringTableBuilder;

    #[test]
    fn test_zstd_stage() {
        let mut b = StringTableBuilder::new();
        let zstd_name = b.add(ZSTD_DECOMPRESSOR);
        let strings = ImageStrings::new(b.finish().into());

        let content = b"hello hello hello hello hello".to_vec();
        let packed = compress_zstd(&content, ByteOrder::Big, zstd_name);
        let out = decompress_resource(packed, ByteOrder::Big, &strings, content.len() as u64).unwrap();
        assert_eq!(out, content);
    }

    #[test]
    fn test_unknown_decompressor() {
        let mut b = StringTableBuilder::new();
        let zip = b.add("zip");
        let strings = ImageStrings::new(b.finish().into());

        let packed = compress_zstd(b"data", ByteOrder::Little, zip);
        let err = decompress_resource(packed, ByteOrder::Little, &strings, 4).unwrap_err();
        assert!(matches!(err, Error::UnsupportedCompression(ref n) if n == "zip"));
    }

    #[test]
    fn test_oversized_payload_length() {
        let mut b = StringTableBuilder::new();
        let zstd_name = b.add(ZSTD_DECOMPRESSOR);
        let strings = ImageStrings::new(b.finish().into());

        for size in [u64::MAX, u64::MAX - 10, 1 << 40] {
            let mut packed = compress_zstd(b"data", ByteOrder::Little, zstd_name);
            packed[4..12].copy_from_slice(&ByteOrder::Little.u64_bytes(size));
            let err = decompress_resource(packed, ByteOrder::Little, &strings, 4).unwrap_err();
            assert!(matches!(err, Error::Truncated(_)));
        }
    }

    #[test]
    fn test_plain_bytes_pass_through() {
        let strings = ImageStrings::new(StringTableBuilder::new().finish().into());
        let out = decompress_resource(vec![1, 2, 3], ByteOrder::Little, &strings, 3).unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn test_size_mismatch() {
        let strings = ImageStrings::new(StringTableBuilder::new().finish().into());
        assert!(decompress_resource(vec![1, 2, 3], ByteOrder::Little, &strings, 4).is_err());
    }
}
