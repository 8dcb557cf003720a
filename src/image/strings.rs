//! interned string table and the name hash used by the lookup tables

use bytes::Bytes;

use crate::error::{Error, Result};

/// offset of `"modules"`, always the first string after the empty string
pub const MODULES_STRING_OFFSET: u32 = 1;
/// offset of `"packages"`, always directly after `"modules"`
pub const PACKAGES_STRING_OFFSET: u32 = 9;

pub const HASH_MULTIPLIER: u32 = 0x0100_0193;
const POSITIVE_MASK: u32 = 0x7fff_ffff;

/// hash a name the way the redirect table was built
pub fn hash_code(bytes: &[u8], seed: u32) -> u32 {
    hash_parts(&[bytes], seed)
}

/// hash the concatenation of `parts` without building it
pub fn hash_parts(parts: &[&[u8]], seed: u32) -> u32 {
    let mut h = seed;
    for part in parts {
        for &b in *part {
            h = h.wrapping_mul(HASH_MULTIPLIER) ^ b as u32;
        }
    }
    h & POSITIVE_MASK
}

/// NUL-terminated UTF-8 strings addressed by byte offset
#[derive(Clone)]
pub struct ImageStrings {
    data: Bytes,
}

impl ImageStrings {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    /// check the reserved offsets the location classifier relies on
    pub fn validate(&self) -> Result<()> {
        let ok = self.get(0).ok() == Some("")
            && self.get(MODULES_STRING_OFFSET).ok() == Some("modules")
            && self.get(PACKAGES_STRING_OFFSET).ok() == Some("packages");
        if ok {
            Ok(())
        } else {
            Err(Error::Malformed("string table lacks reserved entries".to_string()))
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn raw(&self, offset: u32) -> Option<&[u8]> {
        let start = offset as usize;
        let tail = self.data.get(start..)?;
        let end = tail.iter().position(|&b| b == 0)?;
        Some(&tail[..end])
    }

    /// string at `offset`
    pub fn get(&self, offset: u32) -> Result<&str> {
        let raw = self.raw(offset).ok_or(Error::InvalidStringOffset(offset))?;
        std::str::from_utf8(raw).map_err(|_| Error::InvalidStringOffset(offset))
    }

    /// first byte of the string at `offset`, if any
    pub fn first_byte(&self, offset: u32) -> Option<u8> {
        self.raw(offset).and_then(|s| s.first().copied())
    }

    /// if `candidate[start..]` begins with the string at `offset`,
    /// return the position just past it
    pub fn match_at(&self, offset: u32, candidate: &[u8], start: usize) -> Option<usize> {
        let s = self.raw(offset)?;
        let end = start.checked_add(s.len())?;
        if candidate.get(start..end)? == s {
            Some(end)
        } else {
            None
        }
    }
}

/// builds a string table with the reserved entries in place
#[cfg(test)]
pub struct StringTableBuilder {
    data: Vec<u8>,
    offsets: std::collections::HashMap<String, u32>,
}

#[cfg(test)]
impl StringTableBuilder {
    pub fn new() -> Self {
        let mut b = Self {
            data: Vec::new(),
            offsets: std::collections::HashMap::new(),
        };
        b.add("");
        b.add("modules");
        b.add("packages");
        b
    }

    pub fn add(&mut self, s: &str) -> u32 {
        if let Some(&offset) = self.offsets.get(s) {
            return offset;
        }
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        self.offsets.insert(s.to_string(), offset);
        offset
    }

    pub fn finish(self) -> Vec<u8> {
        self.data
    }
}
