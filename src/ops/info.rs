//! container summary

use std::fmt;
use std::path::PathBuf;

use crate::error::Result;
use crate::image::ByteOrder;
use crate::reader::ImageReader;

/// header fields and top-level counts of an open image
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub path: PathBuf,
    pub file_size: usize,
    pub byte_order: ByteOrder,
    pub major_version: u16,
    pub minor_version: u16,
    pub flags: u32,
    pub resource_count: u32,
    pub table_length: u32,
    pub locations_size: u32,
    pub strings_size: u32,
    pub modules: usize,
    pub packages: usize,
    pub preview_mode: bool,
}

pub fn info(reader: &ImageReader) -> Result<ImageInfo> {
    let header = reader.header()?;
    Ok(ImageInfo {
        path: reader.image_path().to_path_buf(),
        file_size: reader.image_size()?,
        byte_order: header.byte_order,
        major_version: header.major_version,
        minor_version: header.minor_version,
        flags: header.flags,
        resource_count: header.resource_count,
        table_length: header.table_length,
        locations_size: header.locations_size,
        strings_size: header.strings_size,
        modules: reader.module_names()?.len(),
        packages: reader.package_names()?.len(),
        preview_mode: reader.is_preview_mode(),
    })
}

impl fmt::Display for ImageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "image:      {}", self.path.display())?;
        writeln!(f, "size:       {} bytes", self.file_size)?;
        writeln!(f, "version:    {}.{}", self.major_version, self.minor_version)?;
        writeln!(f, "byte order: {:?}", self.byte_order)?;
        writeln!(f, "flags:      {:#x}", self.flags)?;
        writeln!(f, "resources:  {}", self.resource_count)?;
        writeln!(f, "entries:    {}", self.table_length)?;
        writeln!(f, "locations:  {} bytes", self.locations_size)?;
        writeln!(f, "strings:    {} bytes", self.strings_size)?;
        writeln!(f, "modules:    {}", self.modules)?;
        writeln!(f, "packages:   {}", self.packages)?;
        write!(
            f,
            "preview:    {}",
            if self.preview_mode { "enabled" } else { "disabled" }
        )
    }
}
