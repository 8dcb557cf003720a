use crate::error::{Error, Result};

pub const IMAGE_MAGIC: u32 = 0xCAFE_DADA;
pub const MAJOR_VERSION: u16 = 1;
pub const MINOR_VERSION: u16 = 0;

/// header is seven u32 slots
pub const HEADER_SIZE: usize = 7 * 4;

/// byte order of every multi-byte integer outside the attribute streams
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    /// read a u32 from the first four bytes of `bytes`
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
        match self {
            ByteOrder::Little => u32::from_le_bytes(raw),
            ByteOrder::Big => u32::from_be_bytes(raw),
        }
    }

    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        match self {
            ByteOrder::Little => u64::from_le_bytes(raw),
            ByteOrder::Big => u64::from_be_bytes(raw),
        }
    }

    pub fn u32_bytes(self, value: u32) -> [u8; 4] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }

    pub fn u64_bytes(self, value: u64) -> [u8; 8] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }

    /// decode a packed array of u32 values; trailing bytes are ignored
    pub fn read_u32_array(self, bytes: &[u8]) -> Vec<u32> {
        bytes.chunks_exact(4).map(|c| self.read_u32(c)).collect()
    }
}

/// container header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageHeader {
    pub byte_order: ByteOrder,
    pub major_version: u16,
    pub minor_version: u16,
    pub flags: u32,
    pub resource_count: u32,
    pub table_length: u32,
    pub locations_size: u32,
    pub strings_size: u32,
}

impl ImageHeader {
    /// parse the header, detecting byte order from the magic
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Truncated(format!(
                "header needs {} bytes, have {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let byte_order = if ByteOrder::Little.read_u32(bytes) == IMAGE_MAGIC {
            ByteOrder::Little
        } else if ByteOrder::Big.read_u32(bytes) == IMAGE_MAGIC {
            ByteOrder::Big
        } else {
            return Err(Error::BadMagic(ByteOrder::Big.read_u32(bytes)));
        };

        let slot = |i: usize| byte_order.read_u32(&bytes[i * 4..]);
        let version = slot(1);
        let major_version = (version >> 16) as u16;
        let minor_version = (version & 0xffff) as u16;
        if major_version != MAJOR_VERSION || minor_version != MINOR_VERSION {
            return Err(Error::UnsupportedVersion {
                major: major_version,
                minor: minor_version,
            });
        }

        Ok(Self {
            byte_order,
            major_version,
            minor_version,
            flags: slot(2),
            resource_count: slot(3),
            table_length: slot(4),
            locations_size: slot(5),
            strings_size: slot(6),
        })
    }

    /// serialize the header in its byte order
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let version = ((self.major_version as u32) << 16) | self.minor_version as u32;
        let slots = [
            IMAGE_MAGIC,
            version,
            self.flags,
            self.resource_count,
            self.table_length,
            self.locations_size,
            self.strings_size,
        ];
        let mut out = [0u8; HEADER_SIZE];
        for (i, value) in slots.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&self.byte_order.u32_bytes(*value));
        }
        out
    }

    pub fn redirect_offset(&self) -> usize {
        HEADER_SIZE
    }

    pub fn offsets_offset(&self) -> usize {
        self.redirect_offset() + self.table_length as usize * 4
    }

    pub fn locations_offset(&self) -> usize {
        self.offsets_offset() + self.table_length as usize * 4
    }

    pub fn strings_offset(&self) -> usize {
        self.locations_offset() + self.locations_size as usize
    }

    /// size of everything before the resource content
    pub fn index_size(&self) -> usize {
        self.strings_offset() + self.strings_size as usize
    }
}
