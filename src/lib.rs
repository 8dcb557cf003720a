//! jimage - read-only virtual filesystem over module containers
//!
//! a container packs the resources of many modules into one file with a
//! perfect-hash index. this crate exposes it as a tree of nodes:
//!
//! - `/modules/<module>/<path>`: directories and resources of each module
//! - `/packages/<package>/<module>`: links from a package to every module
//!   contributing to it
//!
//! # Preview mode
//!
//! modules may carry preview versions of their resources under
//! `META-INF/preview`. a reader opened in preview mode shows those versions
//! in place of the normal ones and adds preview-only resources, directories
//! and packages to the tree. the `META-INF/preview` directory itself is
//! never visible.
//!
//! # Example usage
//!
//! ```no_run
//! use jimage::{ImageReader, PreviewMode};
//!
//! let reader = ImageReader::open("/opt/jdk/lib/modules", PreviewMode::Disabled).unwrap();
//! let node = reader
//!     .find_resource_node("java.base", "java/lang/Object.class")
//!     .unwrap()
//!     .unwrap();
//! let bytes = reader.get_resource_bytes(&node).unwrap();
//! assert_eq!(&bytes[..4], &[0xca, 0xfe, 0xba, 0xbe]);
//! reader.close().unwrap();
//! ```

mod config;
mod error;
mod preview;
mod reader;
mod shared;

pub mod image;
pub mod location;
pub mod module_ref;
pub mod node;
pub mod ops;

pub use config::Config;
pub use error::{Error, Result};
pub use image::{BasicImage, ByteOrder, ImageHeader};
pub use location::{Location, LocationType};
pub use module_ref::ModuleReference;
pub use node::{Node, NodeKind, NodeRef};
pub use preview::{PreviewMode, PREVIEW_ENV};
pub use reader::ImageReader;
