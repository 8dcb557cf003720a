//! high-level operations on open images

mod extract;
mod info;
mod list;

pub use extract::{extract, ExtractOptions, ExtractStats};
pub use info::{info, ImageInfo};
pub use list::{list, list_recursive, ListEntry, ListKind};
