use crate::error::{Error, Result};
use crate::node::{NodeKind, NodeRef};
use crate::reader::ImageReader;

/// one listed node with its full name
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub name: String,
    pub kind: ListKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListKind {
    Directory { preview_only: bool },
    Resource { size: u64, compressed_size: u64 },
    Link { target: String },
}

impl ListEntry {
    fn from_node(node: &NodeRef) -> Self {
        let kind = match node.kind() {
            NodeKind::Directory { preview_only, .. } => ListKind::Directory {
                preview_only: *preview_only,
            },
            NodeKind::Resource(_) => ListKind::Resource {
                size: node.size(),
                compressed_size: node.compressed_size(),
            },
            NodeKind::Link { target } => ListKind::Link {
                target: target.clone(),
            },
        };
        Self {
            name: node.name().to_string(),
            kind,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, ListKind::Directory { .. })
    }
}

/// list the children of the node at `path`, or the node itself if it is
/// not a directory
pub fn list(reader: &ImageReader, path: &str) -> Result<Vec<ListEntry>> {
    let node = find(reader, path)?;
    if !node.is_directory() {
        return Ok(vec![ListEntry::from_node(&node)]);
    }
    Ok(node.children().iter().map(ListEntry::from_node).collect())
}

/// list everything below `path`, depth first; links are not followed
pub fn list_recursive(reader: &ImageReader, path: &str) -> Result<Vec<ListEntry>> {
    let node = find(reader, path)?;
    if !node.is_directory() {
        return Ok(vec![ListEntry::from_node(&node)]);
    }

    let mut entries = Vec::new();
    list_recursive_impl(reader, &node, &mut entries)?;
    Ok(entries)
}

fn list_recursive_impl(reader: &ImageReader, dir: &NodeRef, entries: &mut Vec<ListEntry>) -> Result<()> {
    for child in dir.children() {
        entries.push(ListEntry::from_node(child));

        if child.is_directory() {
            // children are only listed once the directory is looked up
            let child = find(reader, child.name())?;
            list_recursive_impl(reader, &child, entries)?;
        }
    }
    Ok(())
}

fn find(reader: &ImageReader, path: &str) -> Result<NodeRef> {
    let name = if path.is_empty() || path == "/" {
        crate::node::MODULES_ROOT
    } else {
        path.trim_end_matches('/')
    };
    reader
        .find_node(name)?
        .ok_or_else(|| Error::PathNotFound(name.to_string()))
}

impl std::fmt::Display for ListEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ListKind::Directory { preview_only } => {
                let marker = if *preview_only { "dir*" } else { "dir " };
                write!(f, "{} {:>10}    {}", marker, "-", self.name)
            }
            ListKind::Resource {
                size,
                compressed_size,
            } => {
                let marker = if *compressed_size != 0 { "zres" } else { "res " };
                write!(f, "{} {:>10}    {}", marker, size, self.name)
            }
            ListKind::Link { target } => {
                write!(f, "link {:>10}    {} -> {}", "-", self.name, target)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::builder::ImageBuilder;
    use crate::preview::PreviewMode;
    use tempfile::{tempdir, TempDir};

    fn test_reader(preview: PreviewMode) -> (TempDir, ImageReader) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("modules");
        let mut b = ImageBuilder::new();
        b.add_resource("app", "com/acme/Main.class", b"main");
        b.add_compressed_resource("app", "com/acme/data.bin", &[7u8; 64]);
        b.add_preview_resource("app", "com/acme/Next.class", b"next");
        b.write_to(&path);
        let reader = ImageReader::open(&path, preview).unwrap();
        (dir, reader)
    }

    fn names(entries: &[ListEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_list_root() {
        let (_dir, reader) = test_reader(PreviewMode::Disabled);
        let entries = list(&reader, "/").unwrap();
        assert_eq!(names(&entries), vec!["/modules/app"]);
        assert!(entries[0].is_directory());
    }

    #[test]
    fn test_list_directory() {
        let (_dir, reader) = test_reader(PreviewMode::Disabled);
        let entries = list(&reader, "/modules/app/com/acme/").unwrap();
        assert_eq!(
            names(&entries),
            vec!["/modules/app/com/acme/Main.class", "/modules/app/com/acme/data.bin"]
        );
        assert!(matches!(
            entries[1].kind,
            ListKind::Resource { size: 64, compressed_size } if compressed_size > 0
        ));
    }

    #[test]
    fn test_list_single_resource() {
        let (_dir, reader) = test_reader(PreviewMode::Disabled);
        let entries = list(&reader, "/modules/app/com/acme/Main.class").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].kind,
            ListKind::Resource {
                size: 4,
                compressed_size: 0
            }
        );
        assert!(entries[0].to_string().ends_with("/modules/app/com/acme/Main.class"));
    }

    #[test]
    fn test_list_recursive_with_preview() {
        let (_dir, reader) = test_reader(PreviewMode::Enabled);
        let entries = list_recursive(&reader, "/modules/app").unwrap();
        assert_eq!(
            names(&entries),
            vec![
                // the preview tree lives under META-INF and is never listed
                "/modules/app/META-INF",
                "/modules/app/com",
                "/modules/app/com/acme",
                "/modules/app/com/acme/Main.class",
                "/modules/app/com/acme/data.bin",
                "/modules/app/com/acme/Next.class",
            ]
        );
    }

    #[test]
    fn test_list_packages_shows_links() {
        let (_dir, reader) = test_reader(PreviewMode::Disabled);
        let entries = list(&reader, "/packages/com.acme").unwrap();
        assert_eq!(
            entries[0].kind,
            ListKind::Link {
                target: "/modules/app".to_string()
            }
        );
        assert!(entries[0].to_string().contains("-> /modules/app"));
    }

    #[test]
    fn test_list_missing() {
        let (_dir, reader) = test_reader(PreviewMode::Disabled);
        assert!(matches!(
            list(&reader, "/modules/app/nope"),
            Err(Error::PathNotFound(_))
        ));
    }
}
