//! nodes of the virtual tree
//!
//! a node is identified by its full path. two nodes with the same name from
//! the same reader are the same node; nodes from different readers are never
//! compared.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use crate::error::{Error, Result};
use crate::location::Location;

pub const MODULES_ROOT: &str = "/modules";
pub const PACKAGES_ROOT: &str = "/packages";
pub const MODULES_PREFIX: &str = "/modules/";
pub const PACKAGES_PREFIX: &str = "/packages/";

/// shared handle to a cached node
pub type NodeRef = Arc<Node>;

/// what a node is
pub enum NodeKind {
    /// children are set exactly once, when the directory is completed
    Directory {
        children: OnceLock<Vec<NodeRef>>,
        preview_only: bool,
    },
    Resource(Location),
    /// resolved by looking up `target` on the owning reader
    Link { target: String },
}

pub struct Node {
    name: String,
    kind: NodeKind,
}

impl Node {
    pub(crate) fn directory(name: impl Into<String>, preview_only: bool) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Directory {
                children: OnceLock::new(),
                preview_only,
            },
        }
    }

    pub(crate) fn resource(name: impl Into<String>, location: Location) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Resource(location),
        }
    }

    pub(crate) fn link(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Link {
                target: target.into(),
            },
        }
    }

    /// full path, e.g. `/modules/java.base/java/lang/Object.class`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// last path segment
    pub fn file_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub fn is_resource(&self) -> bool {
        matches!(self.kind, NodeKind::Resource(_))
    }

    pub fn is_link(&self) -> bool {
        matches!(self.kind, NodeKind::Link { .. })
    }

    /// directory that exists only in the preview namespace
    pub fn is_preview_only(&self) -> bool {
        match &self.kind {
            NodeKind::Directory { preview_only, .. } => *preview_only,
            NodeKind::Resource(loc) => loc.is_preview_only(),
            NodeKind::Link { .. } => false,
        }
    }

    pub fn location(&self) -> Option<&Location> {
        match &self.kind {
            NodeKind::Resource(loc) => Some(loc),
            _ => None,
        }
    }

    /// uncompressed size of a resource, 0 for anything else
    pub fn size(&self) -> u64 {
        self.location().map_or(0, Location::uncompressed_size)
    }

    /// stored size of a compressed resource, 0 when stored as-is
    pub fn compressed_size(&self) -> u64 {
        self.location().map_or(0, Location::compressed_size)
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed_size() != 0
    }

    /// file extension of a resource, without the dot
    pub fn extension(&self) -> Option<&str> {
        if !self.is_resource() {
            return None;
        }
        let file = self.file_name();
        match file.rfind('.') {
            Some(i) if i > 0 => Some(&file[i + 1..]),
            _ => None,
        }
    }

    pub fn link_target(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Link { target } => Some(target),
            _ => None,
        }
    }

    /// children of a directory; empty for other nodes
    pub fn children(&self) -> &[NodeRef] {
        match &self.kind {
            NodeKind::Directory { children, .. } => children.get().map(Vec::as_slice).unwrap_or(&[]),
            _ => &[],
        }
    }

    pub fn child_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.children().iter().map(|c| c.name())
    }

    pub(crate) fn is_complete(&self) -> bool {
        match &self.kind {
            NodeKind::Directory { children, .. } => children.get().is_some(),
            _ => true,
        }
    }

    /// seal a directory's child list
    pub(crate) fn set_children(&self, list: Vec<NodeRef>) -> Result<()> {
        match &self.kind {
            NodeKind::Directory { children, .. } => children
                .set(list)
                .map_err(|_| Error::DirectoryComplete(self.name.clone())),
            _ => Err(Error::Malformed(format!("not a directory: {}", self.name))),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Directory { children, .. } => write!(
                f,
                "Directory({}, {})",
                self.name,
                children.get().map_or("incomplete".to_string(), |c| format!("{} children", c.len()))
            ),
            NodeKind::Resource(loc) => {
                write!(f, "Resource({}, {} bytes)", self.name, loc.uncompressed_size())
            }
            NodeKind::Link { target } => write!(f, "Link({} -> {})", self.name, target),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
