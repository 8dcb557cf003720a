//! the shared, cache-owning reader behind every open handle
//!
//! nodes are built lazily and cached by name for the life of the shared
//! reader. the roots and all package directories are built up front, and
//! in preview mode the preview namespace is folded into the normal tree
//! before any lookup runs.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::image::BasicImage;
use crate::location::{Location, LocationType};
use crate::module_ref::{ModuleReference, FLAGS_HAS_CONTENT, FLAGS_HAS_NORMAL_VERSION, FLAGS_HAS_PREVIEW_VERSION};
use crate::node::{Node, NodeRef, MODULES_PREFIX, MODULES_ROOT, PACKAGES_PREFIX, PACKAGES_ROOT};

const PREVIEW_DIR: &str = "META-INF/preview";

#[derive(Default)]
struct NodeCache {
    nodes: HashMap<String, NodeRef>,
    /// preview-only children waiting for their directory to be completed
    pending_previews: HashMap<String, Vec<NodeRef>>,
}

impl NodeCache {
    fn insert(&mut self, node: Node) -> NodeRef {
        let node = Arc::new(node);
        self.nodes.insert(node.name().to_string(), node.clone());
        node
    }

    fn cached(&self, name: &str) -> Result<NodeRef> {
        self.nodes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Malformed(format!("{} was not cached", name)))
    }

    fn add_pending(&mut self, dir_name: &str, node: NodeRef) {
        self.pending_previews
            .entry(dir_name.to_string())
            .or_default()
            .push(node);
    }
}

/// a package with preview content and the modules contributing it
struct PreviewPackage {
    package: String,
    modules: Vec<String>,
}

#[derive(Default)]
struct MergeStats {
    shadowed: usize,
    preview_only_resources: usize,
    preview_only_dirs: usize,
}

pub(crate) struct SharedImage {
    image: BasicImage,
    preview_mode: bool,
    cache: Mutex<NodeCache>,
    closed: AtomicBool,
}

impl SharedImage {
    pub(crate) fn open(path: &Path, preview_mode: bool) -> Result<Self> {
        Self::new(BasicImage::open(path)?, preview_mode)
    }

    #[cfg(test)]
    pub(crate) fn from_bytes(data: Vec<u8>, preview_mode: bool) -> Result<Self> {
        let image = BasicImage::from_bytes(std::path::PathBuf::from("<memory>"), Bytes::from(data))?;
        Self::new(image, preview_mode)
    }

    fn new(image: BasicImage, preview_mode: bool) -> Result<Self> {
        let shared = Self {
            image,
            preview_mode,
            cache: Mutex::new(NodeCache::default()),
            closed: AtomicBool::new(false),
        };

        {
            let mut cache = shared.cache.lock();
            let previews = shared.build_packages_root(&mut cache)?;
            if preview_mode {
                shared.merge_previews(&mut cache, previews)?;
            }
            shared.build_modules_root(&mut cache)?;

            debug!(
                path = %shared.image.path().display(),
                preview_mode,
                cached = cache.nodes.len(),
                "opened shared image"
            );
        }

        Ok(shared)
    }

    pub(crate) fn image(&self) -> &BasicImage {
        &self.image
    }

    pub(crate) fn path(&self) -> &Path {
        self.image.path()
    }

    pub(crate) fn preview_mode(&self) -> bool {
        self.preview_mode
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// lock the cache, failing if the image was closed before the lock was taken
    fn lock_open(&self) -> Result<MutexGuard<'_, NodeCache>> {
        let cache = self.cache.lock();
        self.ensure_open()?;
        Ok(cache)
    }

    /// drop every cached node; the shared image is unusable afterwards
    pub(crate) fn close(&self) {
        let mut cache = self.cache.lock();
        self.closed.store(true, Ordering::Release);
        let dropped = cache.nodes.len();
        cache.nodes.clear();
        cache.pending_previews.clear();
        debug!(path = %self.path().display(), dropped, "closed shared image");
    }

    /// number of nodes currently cached
    pub(crate) fn cached_nodes(&self) -> usize {
        self.cache.lock().nodes.len()
    }

    fn location_type(&self, loc: &Location) -> Result<LocationType> {
        loc.location_type(self.image.strings())
    }

    // construction

    /// build `/packages` and every visible package directory, returning the
    /// packages with preview content
    fn build_packages_root(&self, cache: &mut NodeCache) -> Result<Vec<PreviewPackage>> {
        let root_loc = self
            .image
            .find_location(PACKAGES_ROOT)?
            .ok_or_else(|| Error::Malformed("missing /packages".to_string()))?;

        let mut children = Vec::new();
        let mut previews = Vec::new();

        for offset in self.image.resource_u32s(&root_loc)? {
            let loc = self.image.location_at(offset)?;
            if self.location_type(&loc)? != LocationType::PackagesDirectory {
                return Err(Error::Malformed(format!("unexpected entry in /packages at {}", offset)));
            }
            let name = loc.full_name(self.image.strings())?;
            let refs = self.image.resource_u32s(&loc)?;

            // a package only present in preview form is invisible outside preview mode
            let visible = ModuleReference::read_name_offsets(&refs, true, self.preview_mode)?
                .next()
                .is_some();
            if !visible {
                continue;
            }

            if self.preview_mode {
                let modules = ModuleReference::read_name_offsets(&refs, false, true)?
                    .map(|o| self.image.strings().get(o).map(str::to_string))
                    .collect::<Result<Vec<_>>>()?;
                if !modules.is_empty() {
                    previews.push(PreviewPackage {
                        package: name[PACKAGES_PREFIX.len()..].to_string(),
                        modules,
                    });
                }
            }

            children.push(cache.insert(Node::directory(name, false)));
        }

        let root = cache.insert(Node::directory(PACKAGES_ROOT, false));
        root.set_children(children)?;
        Ok(previews)
    }

    fn build_modules_root(&self, cache: &mut NodeCache) -> Result<()> {
        let root_loc = self
            .image
            .find_location(MODULES_ROOT)?
            .ok_or_else(|| Error::Malformed("missing /modules".to_string()))?;
        let root = cache.insert(Node::directory(MODULES_ROOT, false));
        self.complete_modules_directory(cache, &root, &root_loc)
    }

    // preview overlay

    fn merge_previews(&self, cache: &mut NodeCache, mut previews: Vec<PreviewPackage>) -> Result<()> {
        // most specific packages first: more segments, then by name
        previews.sort_by(|a, b| {
            segment_count(&b.package)
                .cmp(&segment_count(&a.package))
                .then_with(|| a.package.cmp(&b.package))
        });

        let mut visited = HashSet::new();
        let mut stats = MergeStats::default();

        for preview in &previews {
            let pkg_path = preview.package.replace('.', "/");
            for module in &preview.modules {
                let dir_name = format!("{}{}/{}", MODULES_PREFIX, module, pkg_path);
                if visited.contains(&dir_name) {
                    continue;
                }

                let preview_name = format!("{}{}/{}/{}", MODULES_PREFIX, module, PREVIEW_DIR, pkg_path);
                let loc = self
                    .image
                    .find_location(&preview_name)?
                    .ok_or(Error::MissingPreviewDirectory(preview_name))?;

                self.merge_preview_directory(cache, &dir_name, &loc, &mut visited, &mut stats)?;

                if loc.is_preview_only() {
                    let node = cache.cached(&dir_name)?;
                    cache.add_pending(parent_name(&dir_name), node);
                }
            }
        }

        debug!(
            packages = previews.len(),
            shadowed = stats.shadowed,
            preview_only_resources = stats.preview_only_resources,
            preview_only_dirs = stats.preview_only_dirs,
            "merged preview namespace"
        );
        Ok(())
    }

    /// fold one preview directory into the tree under its normal name
    ///
    /// resources are cached under the normal name, shadowing any normal
    /// version. preview-only children are queued for their parent. a
    /// preview-only directory is sealed here, everything else is spliced
    /// when the normal directory is completed.
    fn merge_preview_directory(
        &self,
        cache: &mut NodeCache,
        dir_name: &str,
        loc: &Location,
        visited: &mut HashSet<String>,
        stats: &mut MergeStats,
    ) -> Result<()> {
        visited.insert(dir_name.to_string());
        let strings = self.image.strings();

        for offset in self.image.resource_u32s(loc)? {
            let child = self.image.location_at(offset)?;
            match self.location_type(&child)? {
                LocationType::Resource => {
                    let mut name = format!("{}/{}", dir_name, child.base(strings)?);
                    if child.extension_offset() != 0 {
                        name.push('.');
                        name.push_str(child.extension(strings)?);
                    }
                    let preview_only = child.is_preview_only();
                    let node = cache.insert(Node::resource(name, child));
                    if preview_only {
                        stats.preview_only_resources += 1;
                        cache.add_pending(dir_name, node);
                    } else {
                        stats.shadowed += 1;
                    }
                }
                LocationType::ModulesDirectory => {
                    let name = format!("{}/{}", dir_name, child.base(strings)?);
                    if visited.contains(&name) {
                        continue;
                    }
                    self.merge_preview_directory(cache, &name, &child, visited, stats)?;
                    if child.is_preview_only() {
                        let node = cache.cached(&name)?;
                        cache.add_pending(dir_name, node);
                    }
                }
                other => {
                    return Err(Error::Malformed(format!(
                        "{:?} entry inside preview directory {}",
                        other, dir_name
                    )));
                }
            }
        }

        if loc.is_preview_only() {
            let children = cache.pending_previews.remove(dir_name).unwrap_or_default();
            let node = cache.insert(Node::directory(dir_name, true));
            node.set_children(children)?;
            stats.preview_only_dirs += 1;
        }
        Ok(())
    }

    // completion

    fn ensure_complete(&self, cache: &mut NodeCache, node: &NodeRef) -> Result<()> {
        if node.is_complete() {
            return Ok(());
        }
        let loc = self
            .image
            .find_location(node.name())?
            .ok_or_else(|| Error::Malformed(format!("no entry for directory {}", node.name())))?;
        match self.location_type(&loc)? {
            LocationType::ModulesDirectory | LocationType::ModulesRoot => {
                self.complete_modules_directory(cache, node, &loc)
            }
            LocationType::PackagesDirectory | LocationType::PackagesRoot => {
                self.complete_packages_directory(cache, node, &loc)
            }
            LocationType::Resource => Err(Error::Malformed(format!(
                "directory {} backed by a resource entry",
                node.name()
            ))),
        }
    }

    fn complete_modules_directory(&self, cache: &mut NodeCache, dir: &NodeRef, loc: &Location) -> Result<()> {
        // only a module's own META-INF holds the preview namespace
        let hidden_preview = dir
            .name()
            .strip_prefix(MODULES_PREFIX)
            .and_then(|rest| rest.strip_suffix("/META-INF"))
            .filter(|module| !module.contains('/'))
            .map(|_| format!("{}/preview", dir.name()));

        let offsets = self.image.resource_u32s(loc)?;
        let mut children = Vec::with_capacity(offsets.len());

        for offset in offsets {
            let child = self.image.location_at(offset)?;
            let node = match self.location_type(&child)? {
                LocationType::ModulesDirectory => {
                    let name = child.full_name(self.image.strings())?;
                    if hidden_preview.as_deref() == Some(name.as_str()) {
                        continue;
                    }
                    match cache.nodes.get(&name) {
                        Some(node) => node.clone(),
                        None => cache.insert(Node::directory(name, false)),
                    }
                }
                LocationType::Resource => {
                    let name = format!("{}{}", MODULES_ROOT, child.full_name(self.image.strings())?);
                    match cache.nodes.get(&name) {
                        Some(node) => node.clone(),
                        None => cache.insert(Node::resource(name, child)),
                    }
                }
                other => {
                    return Err(Error::Malformed(format!(
                        "{:?} entry inside {}",
                        other,
                        dir.name()
                    )));
                }
            };
            children.push(node);
        }

        if let Some(previews) = cache.pending_previews.remove(dir.name()) {
            children.extend(previews);
        }

        trace!(dir = dir.name(), children = children.len(), "completed modules directory");
        dir.set_children(children)
    }

    fn complete_packages_directory(&self, cache: &mut NodeCache, dir: &NodeRef, loc: &Location) -> Result<()> {
        let refs = self.image.resource_u32s(loc)?;
        let mut children = Vec::new();

        for offset in ModuleReference::read_name_offsets(&refs, true, self.preview_mode)? {
            let module = self.image.strings().get(offset)?;
            let name = format!("{}/{}", dir.name(), module);
            let node = match cache.nodes.get(&name) {
                Some(node) => node.clone(),
                None => cache.insert(Node::link(name, format!("{}{}", MODULES_PREFIX, module))),
            };
            children.push(node);
        }

        // invisible packages are never built, so an empty listing means a broken index
        if children.is_empty() {
            return Err(Error::Malformed(format!("package directory {} has no modules", dir.name())));
        }

        trace!(dir = dir.name(), children = children.len(), "completed package directory");
        dir.set_children(children)
    }

    // lookups

    pub(crate) fn find_node(&self, name: &str) -> Result<Option<NodeRef>> {
        let mut cache = self.lock_open()?;

        if let Some(node) = cache.nodes.get(name).cloned() {
            self.ensure_complete(&mut cache, &node)?;
            return Ok(Some(node));
        }

        if let Some(rest) = name.strip_prefix(MODULES_PREFIX) {
            return self.build_module_node(&mut cache, name, rest);
        }
        if let Some(rest) = name.strip_prefix(PACKAGES_PREFIX) {
            return self.build_package_link(&mut cache, name, rest);
        }
        Ok(None)
    }

    /// `rest` is `name` without the `/modules/` prefix
    fn build_module_node(&self, cache: &mut NodeCache, name: &str, rest: &str) -> Result<Option<NodeRef>> {
        let Some((_, path)) = rest.split_once('/') else {
            // unknown module; every real module root is cached at construction
            return Ok(None);
        };
        if is_preview_path(path) {
            return Ok(None);
        }

        if let Some(loc) = self.image.find_location(name)? {
            if self.location_type(&loc)? == LocationType::ModulesDirectory {
                let node = cache.insert(Node::directory(name, false));
                self.complete_modules_directory(cache, &node, &loc)?;
                return Ok(Some(node));
            }
        }

        // resources are stored without the /modules prefix
        let stored = &name[MODULES_ROOT.len()..];
        match self.image.find_location(stored)? {
            Some(loc) if self.location_type(&loc)? == LocationType::Resource => {
                Ok(Some(cache.insert(Node::resource(name, loc))))
            }
            _ => Ok(None),
        }
    }

    /// `rest` is `name` without the `/packages/` prefix
    fn build_package_link(&self, cache: &mut NodeCache, name: &str, rest: &str) -> Result<Option<NodeRef>> {
        let Some((package, module)) = rest.split_once('/') else {
            return Ok(None);
        };
        if module.is_empty() || module.contains('/') {
            return Ok(None);
        }

        let dir_name = format!("{}{}", PACKAGES_PREFIX, package);
        let Some(dir) = cache.nodes.get(&dir_name).cloned() else {
            return Ok(None);
        };
        self.ensure_complete(cache, &dir)?;
        Ok(cache.nodes.get(name).cloned())
    }

    pub(crate) fn find_resource_node(&self, module: &str, path: &str) -> Result<Option<NodeRef>> {
        let mut cache = self.lock_open()?;
        if !is_valid_resource_query(module, path) {
            return Ok(None);
        }

        let name = format!("{}{}/{}", MODULES_PREFIX, module, path);

        if let Some(node) = cache.nodes.get(&name) {
            return Ok(node.is_resource().then(|| node.clone()));
        }

        match self.image.find_location_in_module(module, path)? {
            Some(loc) if self.location_type(&loc)? == LocationType::Resource => {
                Ok(Some(cache.insert(Node::resource(name, loc))))
            }
            _ => Ok(None),
        }
    }

    /// existence check that skips the node cache unless preview mode needs it
    pub(crate) fn contains_resource(&self, module: &str, path: &str) -> Result<bool> {
        self.ensure_open()?;
        if !is_valid_resource_query(module, path) {
            return Ok(false);
        }

        if let Some(loc) = self.image.find_location_in_module(module, path)? {
            if self.location_type(&loc)? == LocationType::Resource {
                return Ok(true);
            }
        }

        if !self.preview_mode {
            return Ok(false);
        }

        // preview-only resources have no normal entry and live only in the cache
        let name = format!("{}{}/{}", MODULES_PREFIX, module, path);
        let cache = self.lock_open()?;
        Ok(cache.nodes.get(&name).is_some_and(|n| n.is_resource()))
    }

    pub(crate) fn resource_bytes(&self, node: &Node) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let loc = node
            .location()
            .ok_or_else(|| Error::NotAResource(node.name().to_string()))?;
        self.image.resource_bytes(loc)
    }

    pub(crate) fn resource_buffer(&self, node: &Node) -> Result<Bytes> {
        self.ensure_open()?;
        let loc = node
            .location()
            .ok_or_else(|| Error::NotAResource(node.name().to_string()))?;
        self.image.resource_buffer(loc)
    }

    /// module holding the package's resources
    pub(crate) fn package_to_module(&self, package: &str) -> Result<Option<String>> {
        self.ensure_open()?;
        let name = format!("{}{}", PACKAGES_PREFIX, package);
        let Some(loc) = self.image.find_location(&name)? else {
            return Ok(None);
        };
        if self.location_type(&loc)? != LocationType::PackagesDirectory {
            return Ok(None);
        }

        let mut version_mask = FLAGS_HAS_NORMAL_VERSION;
        if self.preview_mode {
            version_mask |= FLAGS_HAS_PREVIEW_VERSION;
        }

        let refs = self.image.resource_u32s(&loc)?;
        for (flags, name_offset) in ModuleReference::read_entries(&refs)? {
            if flags & FLAGS_HAS_CONTENT != 0 && flags & version_mask != 0 {
                return Ok(Some(self.image.strings().get(name_offset)?.to_string()));
            }
        }
        Ok(None)
    }
}

fn segment_count(package: &str) -> usize {
    package.split('.').count()
}

fn parent_name(name: &str) -> &str {
    name.rfind('/').map_or(name, |i| &name[..i])
}

/// true for the preview namespace and anything inside it
fn is_preview_path(path: &str) -> bool {
    path == PREVIEW_DIR || path.strip_prefix(PREVIEW_DIR).is_some_and(|rest| rest.starts_with('/'))
}

fn is_valid_resource_query(module: &str, path: &str) -> bool {
    !module.is_empty()
        && !module.contains('/')
        && !path.is_empty()
        && !path.starts_with('/')
        && !is_preview_path(path)
}

impl std::fmt::Debug for SharedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedImage")
            .field("path", &self.path())
            .field("preview_mode", &self.preview_mode)
            .field("closed", &self.is_closed())
            .finish()
    }
}
