//! reader handles and the process-wide registry of shared readers
//!
//! opening the same container twice with the same preview setting hands
//! out two handles over one [`SharedImage`]. the shared reader lives until
//! its last handle is closed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, IoResultExt, Result};
use crate::image::ImageHeader;
use crate::node::{Node, NodeRef, MODULES_ROOT, PACKAGES_ROOT};
use crate::preview::PreviewMode;
use crate::shared::SharedImage;

type RegistryKey = (PathBuf, bool);

struct Registered {
    shared: Arc<SharedImage>,
    openers: usize,
}

static REGISTRY: LazyLock<Mutex<HashMap<RegistryKey, Registered>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// a closeable handle onto a shared image reader
pub struct ImageReader {
    shared: Arc<SharedImage>,
    key: RegistryKey,
    closed: AtomicBool,
}

impl ImageReader {
    /// open `path`, reusing the shared reader if one is already open for
    /// the same file and preview setting
    pub fn open(path: impl AsRef<Path>, mode: PreviewMode) -> Result<Self> {
        let path = path.as_ref();
        let canonical = path.canonicalize().with_path(path)?;
        let preview = mode.resolve();
        let key = (canonical, preview);

        let mut registry = REGISTRY.lock();
        let shared = match registry.get_mut(&key) {
            Some(entry) => {
                entry.openers += 1;
                debug!(path = %key.0.display(), preview, openers = entry.openers, "reusing shared image");
                entry.shared.clone()
            }
            None => {
                let shared = Arc::new(SharedImage::open(&key.0, preview)?);
                registry.insert(
                    key.clone(),
                    Registered {
                        shared: shared.clone(),
                        openers: 1,
                    },
                );
                shared
            }
        };

        Ok(Self {
            shared,
            key,
            closed: AtomicBool::new(false),
        })
    }

    /// release this handle; the last handle closes the shared reader
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyClosed);
        }

        let mut registry = REGISTRY.lock();
        let Some(entry) = registry.get_mut(&self.key) else {
            return Ok(());
        };
        if !Arc::ptr_eq(&entry.shared, &self.shared) {
            return Ok(());
        }

        entry.openers -= 1;
        if entry.openers == 0 {
            registry.remove(&self.key);
            self.shared.close();
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn shared(&self) -> Result<&SharedImage> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(&self.shared)
    }

    /// look up a node by its full name, e.g. `/modules/java.base/java/lang`
    pub fn find_node(&self, name: &str) -> Result<Option<NodeRef>> {
        self.shared()?.find_node(name)
    }

    /// look up a resource by module and module-relative path
    pub fn find_resource_node(&self, module: &str, path: &str) -> Result<Option<NodeRef>> {
        self.shared()?.find_resource_node(module, path)
    }

    pub fn contains_resource(&self, module: &str, path: &str) -> Result<bool> {
        self.shared()?.contains_resource(module, path)
    }

    pub fn get_resource_bytes(&self, node: &Node) -> Result<Vec<u8>> {
        self.shared()?.resource_bytes(node)
    }

    /// resource content, shared with the container when stored uncompressed
    pub fn get_resource_buffer(&self, node: &Node) -> Result<Bytes> {
        self.shared()?.resource_buffer(node)
    }

    /// follow a link to its target; other nodes resolve to themselves
    pub fn resolve_link(&self, node: &NodeRef) -> Result<NodeRef> {
        match node.link_target() {
            Some(target) => self
                .find_node(target)?
                .ok_or_else(|| Error::Malformed(format!("dangling link {} -> {}", node.name(), target))),
            None => Ok(node.clone()),
        }
    }

    /// module holding the resources of `package`
    pub fn package_to_module(&self, package: &str) -> Result<Option<String>> {
        self.shared()?.package_to_module(package)
    }

    pub fn module_names(&self) -> Result<Vec<String>> {
        self.root_child_names(MODULES_ROOT)
    }

    pub fn package_names(&self) -> Result<Vec<String>> {
        self.root_child_names(PACKAGES_ROOT)
    }

    fn root_child_names(&self, root: &str) -> Result<Vec<String>> {
        let node = self
            .find_node(root)?
            .ok_or_else(|| Error::Malformed(format!("missing {}", root)))?;
        Ok(node.children().iter().map(|c| c.file_name().to_string()).collect())
    }

    pub fn is_preview_mode(&self) -> bool {
        self.shared.preview_mode()
    }

    pub fn image_path(&self) -> &Path {
        self.shared.path()
    }

    pub fn header(&self) -> Result<&ImageHeader> {
        Ok(self.shared()?.image().header())
    }

    /// size of the container file in bytes
    pub fn image_size(&self) -> Result<usize> {
        Ok(self.shared()?.image().size())
    }

    #[cfg(test)]
    fn shares_with(&self, other: &ImageReader) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Drop for ImageReader {
    fn drop(&mut self) {
        if !self.is_closed() {
            let _ = self.close();
        }
    }
}

impl std::fmt::Debug for ImageReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageReader")
            .field("path", &self.key.0)
            .field("preview", &self.key.1)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn registered_openers(path: &Path, preview: bool) -> usize {
    let Ok(canonical) = path.canonicalize() else {
        return 0;
    };
    REGISTRY
        .lock()
        .get(&(canonical, preview))
        .map_or(0, |entry| entry.openers)
}
