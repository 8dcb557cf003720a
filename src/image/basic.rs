use std::fs::File;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use memmap2::Mmap;

use crate::error::{Error, IoResultExt, Result};
use crate::image::decompress::decompress_resource;
use crate::image::header::{ByteOrder, ImageHeader};
use crate::image::strings::{hash_parts, ImageStrings, HASH_MULTIPLIER};
use crate::location::{self, Attributes, Location};

/// low-level view of a container file
///
/// answers name lookups through the perfect-hash tables and hands out
/// resource content. it never builds nodes and holds no locks, so the
/// shared reader can call it without taking its cache lock.
pub struct BasicImage {
    path: PathBuf,
    data: Bytes,
    header: ImageHeader,
    locations: Bytes,
    strings: ImageStrings,
}

impl BasicImage {
    /// map and index a container file
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_path(path)?;
        // the container is opened read-only and never modified while mapped
        let mmap = unsafe { Mmap::map(&file) }.with_path(path)?;
        Self::from_bytes(path.to_path_buf(), Bytes::from_owner(mmap))
    }

    /// index a container held in memory
    pub fn from_bytes(path: PathBuf, data: Bytes) -> Result<Self> {
        let header = ImageHeader::parse(&data)?;

        if data.len() < header.index_size() {
            return Err(Error::Truncated(format!(
                "index needs {} bytes, have {}",
                header.index_size(),
                data.len()
            )));
        }

        let locations = data.slice(header.locations_offset()..header.strings_offset());
        let strings = ImageStrings::new(data.slice(header.strings_offset()..header.index_size()));
        strings.validate()?;

        tracing::debug!(
            path = %path.display(),
            byte_order = ?header.byte_order,
            resources = header.resource_count,
            table_length = header.table_length,
            "indexed container"
        );

        Ok(Self {
            path,
            data,
            header,
            locations,
            strings,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    pub fn strings(&self) -> &ImageStrings {
        &self.strings
    }

    /// total container size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// raw attributes of the location stream at `offset`
    pub fn attributes(&self, offset: u32) -> Result<Attributes> {
        if offset as usize >= self.locations.len() {
            return Err(Error::Malformed(format!("location offset {} out of range", offset)));
        }
        location::decompress(&self.locations, offset as usize)
    }

    pub fn location_at(&self, offset: u32) -> Result<Location> {
        self.attributes(offset).map(Location::from_attributes)
    }

    /// look up a container entry by its full name
    pub fn find_location(&self, name: &str) -> Result<Option<Location>> {
        let Some(offset) = self.lookup(&[name.as_bytes()])? else {
            return Ok(None);
        };
        let loc = self.location_at(offset)?;
        Ok(loc.verify(name, &self.strings).then_some(loc))
    }

    /// look up `/<module>/<path>` without concatenating it
    pub fn find_location_in_module(&self, module: &str, path: &str) -> Result<Option<Location>> {
        let parts: [&[u8]; 4] = [b"/", module.as_bytes(), b"/", path.as_bytes()];
        let Some(offset) = self.lookup(&parts)? else {
            return Ok(None);
        };
        let attributes = self.attributes(offset)?;
        if location::verify_module_path(module, path, &attributes, &self.strings) {
            Ok(Some(Location::from_attributes(attributes)))
        } else {
            Ok(None)
        }
    }

    /// location offset for a hashed name, if the tables have a candidate slot
    fn lookup(&self, parts: &[&[u8]]) -> Result<Option<u32>> {
        let length = self.header.table_length;
        if length == 0 {
            return Ok(None);
        }

        let index = hash_parts(parts, HASH_MULTIPLIER) % length;
        let value = self.redirect(index) as i32;
        let index = match value {
            0 => return Ok(None),
            v if v < 0 => (-1 - v) as u32,
            v => hash_parts(parts, v as u32) % length,
        };

        if index >= length {
            return Err(Error::Malformed(format!("redirect to slot {} out of range", index)));
        }
        Ok(Some(self.offset_slot(index)))
    }

    fn redirect(&self, index: u32) -> u32 {
        let at = self.header.redirect_offset() + index as usize * 4;
        self.byte_order().read_u32(&self.data[at..])
    }

    fn offset_slot(&self, index: u32) -> u32 {
        let at = self.header.offsets_offset() + index as usize * 4;
        self.byte_order().read_u32(&self.data[at..])
    }

    /// location offsets of every entry in the container
    pub fn location_offsets(&self) -> Vec<u32> {
        (0..self.header.table_length).map(|i| self.offset_slot(i)).collect()
    }

    /// content of an entry; a zero-copy slice when stored uncompressed
    pub fn resource_buffer(&self, loc: &Location) -> Result<Bytes> {
        if loc.compressed_size() != 0 {
            return self.resource_bytes(loc).map(Bytes::from);
        }
        self.stored_content(loc.content_offset(), loc.uncompressed_size())
    }

    /// content of an entry as an owned buffer
    pub fn resource_bytes(&self, loc: &Location) -> Result<Vec<u8>> {
        if loc.compressed_size() == 0 {
            return self.resource_buffer(loc).map(|b| b.to_vec());
        }
        let stored = self.stored_content(loc.content_offset(), loc.compressed_size())?;
        decompress_resource(
            stored.to_vec(),
            self.byte_order(),
            &self.strings,
            loc.uncompressed_size(),
        )
    }

    /// directory listings and module references are u32 arrays in container order
    pub fn resource_u32s(&self, loc: &Location) -> Result<Vec<u32>> {
        let buffer = self.resource_buffer(loc)?;
        Ok(self.byte_order().read_u32_array(&buffer))
    }

    fn stored_content(&self, offset: u64, size: u64) -> Result<Bytes> {
        let range = (self.header.index_size() as u64)
            .checked_add(offset)
            .and_then(|start| Some((start, start.checked_add(size)?)));
        match range {
            Some((start, end)) if end <= self.data.len() as u64 => {
                Ok(self.data.slice(start as usize..end as usize))
            }
            _ => Err(Error::Truncated(format!(
                "content at offset {} ({} bytes) past end of container ({} bytes)",
                offset,
                size,
                self.data.len()
            ))),
        }
    }
}

impl std::fmt::Debug for BasicImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicImage")
            .field("path", &self.path)
            .field("header", &self.header)
            .finish()
    }
}
