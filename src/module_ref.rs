//! per-package module references
//!
//! every `/packages/<pkg>` entry stores which modules contribute to the
//! package as flat `[flags, name_offset]` u32 pairs. entries with a preview
//! version always come first so a preview-only scan can stop early.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use crate::error::{Error, Result};

/// the module holds the package's resources (as opposed to an empty parent package)
pub const FLAGS_HAS_CONTENT: u32 = 0x1;
/// the module has a normal version of the package
pub const FLAGS_HAS_NORMAL_VERSION: u32 = 0x2;
/// the module has a preview version of the package
pub const FLAGS_HAS_PREVIEW_VERSION: u32 = 0x4;

/// one module's contribution to a package
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ModuleReference {
    name: String,
    flags: u32,
}

impl ModuleReference {
    /// a module holding resources of the package
    pub fn for_package(module: impl Into<String>, is_preview: bool) -> Self {
        Self {
            name: module.into(),
            flags: FLAGS_HAS_CONTENT | version_flag(is_preview),
        }
    }

    /// a module where the package only exists as a parent of other packages
    pub fn for_empty_package(module: impl Into<String>, is_preview: bool) -> Self {
        Self {
            name: module.into(),
            flags: version_flag(is_preview),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn has_resources(&self) -> bool {
        self.flags & FLAGS_HAS_CONTENT != 0
    }

    pub fn has_normal_version(&self) -> bool {
        self.flags & FLAGS_HAS_NORMAL_VERSION != 0
    }

    pub fn has_preview_version(&self) -> bool {
        self.flags & FLAGS_HAS_PREVIEW_VERSION != 0
    }

    /// combine two references to the same module
    pub fn merge(&self, other: &ModuleReference) -> Result<ModuleReference> {
        if self.name != other.name {
            return Err(Error::ModuleReferenceMismatch {
                first: self.name.clone(),
                second: other.name.clone(),
            });
        }
        Ok(Self {
            name: self.name.clone(),
            flags: self.flags | other.flags,
        })
    }

    /// lazily read the module name offsets selected by the include flags
    pub fn read_name_offsets(
        buffer: &[u32],
        include_normal: bool,
        include_preview: bool,
    ) -> Result<NameOffsets<'_>> {
        check_buffer(buffer)?;

        let mut mask = 0;
        if include_normal {
            mask |= FLAGS_HAS_NORMAL_VERSION;
        }
        if include_preview {
            mask |= FLAGS_HAS_PREVIEW_VERSION;
        }
        if mask == 0 {
            return Err(Error::InvalidModuleReferences(
                "at least one of normal or preview must be included".to_string(),
            ));
        }

        Ok(NameOffsets {
            buffer,
            index: 0,
            mask,
            include_normal,
        })
    }

    /// raw `(flags, name_offset)` pairs
    pub fn read_entries(buffer: &[u32]) -> Result<impl Iterator<Item = (u32, u32)> + '_> {
        check_buffer(buffer)?;
        Ok(buffer.chunks_exact(2).map(|pair| (pair[0], pair[1])))
    }

    /// append `refs` as `[flags, name_offset]` pairs, checking the ordering invariants
    pub fn write<F>(refs: &[ModuleReference], out: &mut Vec<u32>, mut encode_name: F) -> Result<()>
    where
        F: FnMut(&str) -> u32,
    {
        if refs.is_empty() {
            return Err(Error::InvalidModuleReferences("empty reference list".to_string()));
        }

        let mut names = HashSet::new();
        for r in refs {
            if !names.insert(r.name.as_str()) {
                return Err(Error::InvalidModuleReferences(format!(
                    "duplicate module: {}",
                    r.name
                )));
            }
        }

        for pair in refs.windows(2) {
            if pair[0] >= pair[1] {
                return Err(Error::InvalidModuleReferences(format!(
                    "out of order: {} before {}",
                    pair[0].name, pair[1].name
                )));
            }
        }

        if refs.iter().filter(|r| r.has_resources()).count() > 1 {
            return Err(Error::InvalidModuleReferences(
                "more than one module holds resources".to_string(),
            ));
        }

        for r in refs {
            out.push(r.flags);
            out.push(encode_name(&r.name));
        }
        Ok(())
    }
}

fn version_flag(is_preview: bool) -> u32 {
    if is_preview {
        FLAGS_HAS_PREVIEW_VERSION
    } else {
        FLAGS_HAS_NORMAL_VERSION
    }
}

fn check_buffer(buffer: &[u32]) -> Result<()> {
    if buffer.is_empty() || buffer.len() % 2 != 0 {
        return Err(Error::InvalidModuleReferences(format!(
            "invalid buffer length: {}",
            buffer.len()
        )));
    }
    Ok(())
}

impl Ord for ModuleReference {
    /// preview-contributing references first, then by name
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .has_preview_version()
            .cmp(&self.has_preview_version())
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.flags.cmp(&other.flags))
    }
}

impl PartialOrd for ModuleReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for ModuleReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleReference({}, {:#x})", self.name, self.flags)
    }
}

/// iterator returned by [`ModuleReference::read_name_offsets`]
pub struct NameOffsets<'a> {
    buffer: &'a [u32],
    index: usize,
    mask: u32,
    include_normal: bool,
}

impl Iterator for NameOffsets<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        while self.index < self.buffer.len() {
            let flags = self.buffer[self.index];
            let name_offset = self.buffer[self.index + 1];
            self.index += 2;

            if flags & self.mask != 0 {
                return Some(name_offset);
            }
            // preview entries are sorted first, nothing left to find
            if !self.include_normal && flags & FLAGS_HAS_PREVIEW_VERSION == 0 {
                self.index = self.buffer.len();
            }
        }
        None
    }
}
