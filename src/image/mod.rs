//! container file access: header, lookup tables, strings and resource content

pub mod basic;
#[cfg(test)]
pub mod builder;
pub mod decompress;
pub mod header;
pub mod strings;

pub use basic::BasicImage;
pub use header::{ByteOrder, ImageHeader};
pub use strings::ImageStrings;
