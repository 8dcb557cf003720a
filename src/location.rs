//! location attribute codec and name verification
//!
//! every container entry is described by a compact attribute stream. each
//! attribute starts with a control byte: bits 3-7 hold the attribute kind,
//! bits 0-2 hold the value length minus one. values are big-endian. a
//! control byte with kind 0 ends the stream.

use std::fmt;

use crate::error::{Error, Result};
use crate::image::strings::{ImageStrings, MODULES_STRING_OFFSET, PACKAGES_STRING_OFFSET};

pub const ATTRIBUTE_END: usize = 0;
pub const ATTRIBUTE_MODULE: usize = 1;
pub const ATTRIBUTE_PARENT: usize = 2;
pub const ATTRIBUTE_BASE: usize = 3;
pub const ATTRIBUTE_EXTENSION: usize = 4;
pub const ATTRIBUTE_OFFSET: usize = 5;
pub const ATTRIBUTE_COMPRESSED: usize = 6;
pub const ATTRIBUTE_UNCOMPRESSED: usize = 7;
pub const ATTRIBUTE_PREVIEW_FLAGS: usize = 8;
pub const ATTRIBUTE_COUNT: usize = 9;

/// the normal entry has a counterpart under META-INF/preview
pub const FLAGS_HAS_PREVIEW_VERSION: u64 = 0x1;
/// the entry lives under META-INF/preview
pub const FLAGS_IS_PREVIEW_VERSION: u64 = 0x2;
/// the entry lives under META-INF/preview and has no normal counterpart
pub const FLAGS_IS_PREVIEW_ONLY: u64 = 0x4;

/// decoded attribute array, indexed by the ATTRIBUTE_* constants
pub type Attributes = [u64; ATTRIBUTE_COUNT];

/// decode an attribute stream starting at `offset`
pub fn decompress(bytes: &[u8], offset: usize) -> Result<Attributes> {
    let mut attributes = [0u64; ATTRIBUTE_COUNT];
    let mut pos = offset;

    while pos < bytes.len() {
        let control = bytes[pos];
        pos += 1;

        let kind = (control >> 3) as usize;
        if kind == ATTRIBUTE_END {
            break;
        }
        if kind >= ATTRIBUTE_COUNT {
            return Err(Error::InvalidAttributeKind(kind as u8));
        }

        let length = (control & 0x7) as usize + 1;
        if pos + length > bytes.len() {
            return Err(Error::TruncatedAttribute(pos));
        }

        attributes[kind] = bytes[pos..pos + length]
            .iter()
            .fold(0u64, |value, &b| (value << 8) | b as u64);
        pos += length;
    }

    Ok(attributes)
}

/// encode an attribute array, skipping zero-valued attributes
pub fn compress(attributes: &Attributes) -> Vec<u8> {
    let mut out = Vec::with_capacity(ATTRIBUTE_COUNT * 3);

    for (kind, &value) in attributes.iter().enumerate().skip(ATTRIBUTE_END + 1) {
        if value == 0 {
            continue;
        }
        // number of value bytes minus one
        let n = ((63 - value.leading_zeros()) >> 3) as usize;
        out.push(((kind << 3) | n) as u8);
        for i in (0..=n).rev() {
            out.push((value >> (i * 8)) as u8);
        }
    }

    out.push((ATTRIBUTE_END << 3) as u8);
    out
}

/// kind of container entry, derived from its attributes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LocationType {
    /// a resource inside a module: `/<module>/<path>`
    Resource,
    /// a directory below `/modules`
    ModulesDirectory,
    /// `/modules` itself
    ModulesRoot,
    /// a package directory: `/packages/<package>`
    PackagesDirectory,
    /// `/packages` itself
    PackagesRoot,
}

impl LocationType {
    pub fn is_directory(self) -> bool {
        !matches!(self, LocationType::Resource)
    }
}

/// the decoded attributes of one container entry
#[derive(Clone, PartialEq, Eq)]
pub struct Location {
    attributes: Attributes,
}

impl Location {
    pub fn from_attributes(attributes: Attributes) -> Self {
        Self { attributes }
    }

    /// decode the attribute stream at `offset`
    pub fn decode(bytes: &[u8], offset: usize) -> Result<Self> {
        decompress(bytes, offset).map(Self::from_attributes)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attribute(&self, kind: usize) -> u64 {
        self.attributes[kind]
    }

    pub fn module_offset(&self) -> u32 {
        self.attributes[ATTRIBUTE_MODULE] as u32
    }

    pub fn parent_offset(&self) -> u32 {
        self.attributes[ATTRIBUTE_PARENT] as u32
    }

    pub fn base_offset(&self) -> u32 {
        self.attributes[ATTRIBUTE_BASE] as u32
    }

    pub fn extension_offset(&self) -> u32 {
        self.attributes[ATTRIBUTE_EXTENSION] as u32
    }

    pub fn content_offset(&self) -> u64 {
        self.attributes[ATTRIBUTE_OFFSET]
    }

    pub fn compressed_size(&self) -> u64 {
        self.attributes[ATTRIBUTE_COMPRESSED]
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.attributes[ATTRIBUTE_UNCOMPRESSED]
    }

    pub fn preview_flags(&self) -> u64 {
        self.attributes[ATTRIBUTE_PREVIEW_FLAGS]
    }

    pub fn has_preview_version(&self) -> bool {
        self.preview_flags() & FLAGS_HAS_PREVIEW_VERSION != 0
    }

    pub fn is_preview_version(&self) -> bool {
        self.preview_flags() & FLAGS_IS_PREVIEW_VERSION != 0
    }

    pub fn is_preview_only(&self) -> bool {
        self.preview_flags() & FLAGS_IS_PREVIEW_ONLY != 0
    }

    /// classify the entry; only the two roots need a string table lookup
    pub fn location_type(&self, strings: &ImageStrings) -> Result<LocationType> {
        match self.module_offset() {
            MODULES_STRING_OFFSET => Ok(LocationType::ModulesDirectory),
            PACKAGES_STRING_OFFSET => Ok(LocationType::PackagesDirectory),
            0 => match strings.first_byte(self.base_offset()) {
                Some(b'm') => Ok(LocationType::ModulesRoot),
                Some(b'p') => Ok(LocationType::PackagesRoot),
                _ => Err(Error::Malformed(format!(
                    "root entry with unexpected base at offset {}",
                    self.base_offset()
                ))),
            },
            _ => Ok(LocationType::Resource),
        }
    }

    pub fn module<'a>(&self, strings: &'a ImageStrings) -> Result<&'a str> {
        strings.get(self.module_offset())
    }

    pub fn parent<'a>(&self, strings: &'a ImageStrings) -> Result<&'a str> {
        strings.get(self.parent_offset())
    }

    pub fn base<'a>(&self, strings: &'a ImageStrings) -> Result<&'a str> {
        strings.get(self.base_offset())
    }

    pub fn extension<'a>(&self, strings: &'a ImageStrings) -> Result<&'a str> {
        strings.get(self.extension_offset())
    }

    /// the entry name as stored in the container: `/module/parent/base.ext`
    pub fn full_name(&self, strings: &ImageStrings) -> Result<String> {
        let mut name = String::from("/");
        if self.module_offset() != 0 {
            name.push_str(self.module(strings)?);
            name.push('/');
        }
        if self.parent_offset() != 0 {
            name.push_str(self.parent(strings)?);
            name.push('/');
        }
        name.push_str(self.base(strings)?);
        if self.extension_offset() != 0 {
            name.push('.');
            name.push_str(self.extension(strings)?);
        }
        Ok(name)
    }

    /// the path relative to the module: `parent/base.ext`
    pub fn relative_path(&self, strings: &ImageStrings) -> Result<String> {
        let mut path = String::new();
        if self.parent_offset() != 0 {
            path.push_str(self.parent(strings)?);
            path.push('/');
        }
        path.push_str(self.base(strings)?);
        if self.extension_offset() != 0 {
            path.push('.');
            path.push_str(self.extension(strings)?);
        }
        Ok(path)
    }

    /// check `name` against this location without building the full name
    pub fn verify(&self, name: &str, strings: &ImageStrings) -> bool {
        verify_name(name, &self.attributes, strings)
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Location")
            .field("module", &self.module_offset())
            .field("parent", &self.parent_offset())
            .field("base", &self.base_offset())
            .field("extension", &self.extension_offset())
            .field("offset", &self.content_offset())
            .field("compressed", &self.compressed_size())
            .field("uncompressed", &self.uncompressed_size())
            .field("flags", &self.preview_flags())
            .finish()
    }
}

/// match `name` against the module/parent/base/extension offsets in `attributes`
pub fn verify_name(name: &str, attributes: &Attributes, strings: &ImageStrings) -> bool {
    let name = name.as_bytes();
    let mut pos = 0;

    if !expect_byte(name, &mut pos, b'/') {
        return false;
    }

    let module = attributes[ATTRIBUTE_MODULE] as u32;
    if module != 0 {
        if !match_segment(name, &mut pos, module, strings) || !expect_byte(name, &mut pos, b'/') {
            return false;
        }
    }

    match_path_tail(name, pos, attributes, strings)
}

/// match a module name and module-relative path against raw attribute offsets
pub fn verify_module_path(
    module: &str,
    path: &str,
    attributes: &Attributes,
    strings: &ImageStrings,
) -> bool {
    let module_offset = attributes[ATTRIBUTE_MODULE] as u32;
    if module_offset == 0 || strings.match_at(module_offset, module.as_bytes(), 0) != Some(module.len()) {
        return false;
    }

    match_path_tail(path.as_bytes(), 0, attributes, strings)
}

/// match `parent/base.ext` starting at `pos`, requiring the whole input be consumed
fn match_path_tail(name: &[u8], mut pos: usize, attributes: &Attributes, strings: &ImageStrings) -> bool {
    let parent = attributes[ATTRIBUTE_PARENT] as u32;
    if parent != 0 {
        if !match_segment(name, &mut pos, parent, strings) || !expect_byte(name, &mut pos, b'/') {
            return false;
        }
    }

    if !match_segment(name, &mut pos, attributes[ATTRIBUTE_BASE] as u32, strings) {
        return false;
    }

    let extension = attributes[ATTRIBUTE_EXTENSION] as u32;
    if extension != 0 {
        if !expect_byte(name, &mut pos, b'.') || !match_segment(name, &mut pos, extension, strings) {
            return false;
        }
    }

    pos == name.len()
}

fn match_segment(name: &[u8], pos: &mut usize, offset: u32, strings: &ImageStrings) -> bool {
    match strings.match_at(offset, name, *pos) {
        Some(end) => {
            *pos = end;
            true
        }
        None => false,
    }
}

fn expect_byte(name: &[u8], pos: &mut usize, expected: u8) -> bool {
    if name.get(*pos) == Some(&expected) {
        *pos += 1;
        true
    } else {
        false
    }
}
