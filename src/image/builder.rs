//! writes well-formed containers for tests

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::image::decompress::{compress_zstd, ZSTD_DECOMPRESSOR};
use crate::image::header::{ByteOrder, ImageHeader, MAJOR_VERSION, MINOR_VERSION};
use crate::image::strings::{
    hash_code, StringTableBuilder, HASH_MULTIPLIER, MODULES_STRING_OFFSET, PACKAGES_STRING_OFFSET,
};
use crate::location::{
    compress, Attributes, ATTRIBUTE_BASE, ATTRIBUTE_COMPRESSED, ATTRIBUTE_COUNT,
    ATTRIBUTE_EXTENSION, ATTRIBUTE_MODULE, ATTRIBUTE_OFFSET, ATTRIBUTE_PARENT,
    ATTRIBUTE_PREVIEW_FLAGS, ATTRIBUTE_UNCOMPRESSED, FLAGS_HAS_PREVIEW_VERSION,
    FLAGS_IS_PREVIEW_ONLY, FLAGS_IS_PREVIEW_VERSION,
};
use crate::module_ref::ModuleReference;

const PREVIEW_INFIX: &str = "META-INF/preview/";

struct ResourceSpec {
    content: Vec<u8>,
    compress: bool,
}

enum Entry {
    ModulesRoot,
    PackagesRoot,
    /// `/modules/<module>[/<path>]`
    ModuleDir { module: String, path: String },
    /// `/packages/<package>`
    PackageDir { package: String },
    /// `/<module>/<path>`
    Resource { module: String, path: String },
}

/// assembles a container in memory
pub struct ImageBuilder {
    byte_order: ByteOrder,
    // (module, path) -> content, where path may carry the preview infix
    resources: BTreeMap<(String, String), ResourceSpec>,
    // (module, dir path) entries left out of the container
    omitted: BTreeSet<(String, String)>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self {
            byte_order: ByteOrder::native(),
            resources: BTreeMap::new(),
            omitted: BTreeSet::new(),
        }
    }

    pub fn byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn add_resource(&mut self, module: &str, path: &str, content: &[u8]) -> &mut Self {
        self.insert(module, path.to_string(), content, false)
    }

    pub fn add_compressed_resource(&mut self, module: &str, path: &str, content: &[u8]) -> &mut Self {
        self.insert(module, path.to_string(), content, true)
    }

    /// add the preview version of `path`, stored under META-INF/preview
    pub fn add_preview_resource(&mut self, module: &str, path: &str, content: &[u8]) -> &mut Self {
        self.insert(module, format!("{}{}", PREVIEW_INFIX, path), content, false)
    }

    /// leave the directory entry out of the container and its parent's listing;
    /// package references still describe it
    pub fn omit_directory(&mut self, module: &str, path: &str) -> &mut Self {
        self.omitted.insert((module.to_string(), path.to_string()));
        self
    }

    fn insert(&mut self, module: &str, path: String, content: &[u8], compress: bool) -> &mut Self {
        self.resources.insert(
            (module.to_string(), path),
            ResourceSpec {
                content: content.to_vec(),
                compress,
            },
        );
        self
    }

    pub fn write_to(&self, path: &Path) {
        std::fs::write(path, self.build()).unwrap();
    }

    pub fn build(&self) -> Vec<u8> {
        let order = self.byte_order;

        // module directory tree: (module, dir path) -> child entry names
        let mut dirs: BTreeMap<(String, String), BTreeSet<String>> = BTreeMap::new();
        for (module, path) in self.resources.keys() {
            let mut parent = String::new();
            dirs.entry((module.clone(), parent.clone())).or_default();
            let segments: Vec<&str> = path.split('/').collect();
            for (i, segment) in segments.iter().enumerate() {
                let child = join(&parent, segment);
                let is_leaf = i == segments.len() - 1;
                dirs.entry((module.clone(), parent.clone()))
                    .or_default()
                    .insert(child_name(module, &child, is_leaf));
                if !is_leaf {
                    dirs.entry((module.clone(), child.clone())).or_default();
                }
                parent = child;
            }
        }

        // packages: package -> module -> reference
        let mut packages: BTreeMap<String, BTreeMap<String, ModuleReference>> = BTreeMap::new();
        for ((module, path), children) in &dirs {
            if path.is_empty() {
                continue;
            }
            let (pkg_path, is_preview) = match path.strip_prefix(PREVIEW_INFIX) {
                Some(rest) => (rest.to_string(), true),
                None if path.starts_with("META-INF") => continue,
                None => (path.clone(), false),
            };
            let has_resources = children.iter().any(|c| !c.starts_with("/modules/"));
            let reference = if has_resources {
                ModuleReference::for_package(module.clone(), is_preview)
            } else {
                ModuleReference::for_empty_package(module.clone(), is_preview)
            };
            let package = pkg_path.replace('/', ".");
            let per_module = packages.entry(package).or_default();
            let merged = match per_module.get(module) {
                Some(existing) => existing.merge(&reference).unwrap(),
                None => reference,
            };
            per_module.insert(module.clone(), merged);
        }

        for (module, path) in &self.omitted {
            if dirs.remove(&(module.clone(), path.clone())).is_some() {
                let (parent, _) = split_parent(path);
                if let Some(children) = dirs.get_mut(&(module.clone(), parent.to_string())) {
                    children.remove(&child_name(module, path, false));
                }
            }
        }

        // every entry, in a fixed order
        let mut entries = vec![Entry::ModulesRoot, Entry::PackagesRoot];
        for (module, path) in dirs.keys() {
            entries.push(Entry::ModuleDir {
                module: module.clone(),
                path: path.clone(),
            });
        }
        for package in packages.keys() {
            entries.push(Entry::PackageDir {
                package: package.clone(),
            });
        }
        for (module, path) in self.resources.keys() {
            entries.push(Entry::Resource {
                module: module.clone(),
                path: path.clone(),
            });
        }

        let names: Vec<String> = entries.iter().map(entry_name).collect();
        let index_of: BTreeMap<&str, usize> =
            names.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();

        let mut strings = StringTableBuilder::new();
        let zstd_name = strings.add(ZSTD_DECOMPRESSOR);

        // lay out content; directory contents are patched once location offsets exist
        let mut content: Vec<u8> = Vec::new();
        let mut attributes: Vec<Attributes> = Vec::with_capacity(entries.len());
        for entry in &entries {
            let mut a = [0u64; ATTRIBUTE_COUNT];
            match entry {
                Entry::ModulesRoot | Entry::PackagesRoot => {
                    let (base, count) = match entry {
                        Entry::ModulesRoot => (
                            MODULES_STRING_OFFSET,
                            dirs.keys().filter(|(_, p)| p.is_empty()).count(),
                        ),
                        _ => (PACKAGES_STRING_OFFSET, packages.len()),
                    };
                    a[ATTRIBUTE_BASE] = base as u64;
                    a[ATTRIBUTE_OFFSET] = content.len() as u64;
                    a[ATTRIBUTE_UNCOMPRESSED] = count as u64 * 4;
                    content.resize(content.len() + count * 4, 0);
                }
                Entry::ModuleDir { module, path } => {
                    let full = if path.is_empty() {
                        module.clone()
                    } else {
                        join(module, path)
                    };
                    let (parent, base) = split_parent(&full);
                    a[ATTRIBUTE_MODULE] = MODULES_STRING_OFFSET as u64;
                    if !parent.is_empty() {
                        a[ATTRIBUTE_PARENT] = strings.add(parent) as u64;
                    }
                    a[ATTRIBUTE_BASE] = strings.add(base) as u64;
                    let count = dirs[&(module.clone(), path.clone())].len();
                    a[ATTRIBUTE_OFFSET] = content.len() as u64;
                    a[ATTRIBUTE_UNCOMPRESSED] = count as u64 * 4;
                    a[ATTRIBUTE_PREVIEW_FLAGS] = self.dir_flags(&dirs, module, path);
                    content.resize(content.len() + count * 4, 0);
                }
                Entry::PackageDir { package } => {
                    a[ATTRIBUTE_MODULE] = PACKAGES_STRING_OFFSET as u64;
                    a[ATTRIBUTE_BASE] = strings.add(package) as u64;
                    let count = packages[package].len();
                    a[ATTRIBUTE_OFFSET] = content.len() as u64;
                    a[ATTRIBUTE_UNCOMPRESSED] = count as u64 * 8;
                    content.resize(content.len() + count * 8, 0);
                }
                Entry::Resource { module, path } => {
                    let spec = &self.resources[&(module.clone(), path.clone())];
                    let (parent, file) = split_parent(path);
                    let (base, ext) = match file.rfind('.') {
                        Some(i) if i > 0 => (&file[..i], &file[i + 1..]),
                        _ => (file, ""),
                    };
                    a[ATTRIBUTE_MODULE] = strings.add(module) as u64;
                    if !parent.is_empty() {
                        a[ATTRIBUTE_PARENT] = strings.add(parent) as u64;
                    }
                    a[ATTRIBUTE_BASE] = strings.add(base) as u64;
                    if !ext.is_empty() {
                        a[ATTRIBUTE_EXTENSION] = strings.add(ext) as u64;
                    }
                    a[ATTRIBUTE_OFFSET] = content.len() as u64;
                    a[ATTRIBUTE_UNCOMPRESSED] = spec.content.len() as u64;
                    if spec.compress {
                        let packed = compress_zstd(&spec.content, order, zstd_name);
                        a[ATTRIBUTE_COMPRESSED] = packed.len() as u64;
                        content.extend(packed);
                    } else {
                        content.extend(&spec.content);
                    }
                    a[ATTRIBUTE_PREVIEW_FLAGS] = self.resource_flags(module, path);
                }
            }
            attributes.push(a);
        }

        // location streams
        let mut locations = Vec::new();
        let mut location_offsets = Vec::with_capacity(entries.len());
        for a in &attributes {
            location_offsets.push(locations.len() as u32);
            locations.extend(compress(a));
        }

        // directory contents
        let module_roots: Vec<u32> = dirs
            .keys()
            .filter(|(_, p)| p.is_empty())
            .map(|(m, _)| location_offsets[index_of[format!("/modules/{}", m).as_str()]])
            .collect();
        let package_dirs: Vec<u32> = packages
            .keys()
            .map(|p| location_offsets[index_of[format!("/packages/{}", p).as_str()]])
            .collect();
        for (i, entry) in entries.iter().enumerate() {
            let values: Vec<u32> = match entry {
                Entry::ModulesRoot => module_roots.clone(),
                Entry::PackagesRoot => package_dirs.clone(),
                Entry::ModuleDir { module, path } => dirs[&(module.clone(), path.clone())]
                    .iter()
                    .map(|child| location_offsets[index_of[child.as_str()]])
                    .collect(),
                Entry::PackageDir { package } => {
                    let mut refs: Vec<ModuleReference> =
                        packages[package].values().cloned().collect();
                    refs.sort();
                    let mut out = Vec::new();
                    ModuleReference::write(&refs, &mut out, |name| strings.add(name)).unwrap();
                    out
                }
                Entry::Resource { .. } => continue,
            };
            let start = attributes[i][ATTRIBUTE_OFFSET] as usize;
            for (j, v) in values.iter().enumerate() {
                content[start + j * 4..start + j * 4 + 4].copy_from_slice(&order.u32_bytes(*v));
            }
        }

        let strings = strings.finish();
        let (redirect, slots) = perfect_hash(&names);

        let header = ImageHeader {
            byte_order: order,
            major_version: MAJOR_VERSION,
            minor_version: MINOR_VERSION,
            flags: 0,
            resource_count: self.resources.len() as u32,
            table_length: names.len() as u32,
            locations_size: locations.len() as u32,
            strings_size: strings.len() as u32,
        };

        let mut out = header.to_bytes().to_vec();
        for r in &redirect {
            out.extend(order.u32_bytes(*r as u32));
        }
        for entry_index in &slots {
            out.extend(order.u32_bytes(location_offsets[*entry_index]));
        }
        out.extend(locations);
        out.extend(strings);
        out.extend(content);
        out
    }

    fn resource_flags(&self, module: &str, path: &str) -> u64 {
        match path.strip_prefix(PREVIEW_INFIX) {
            Some(normal) => {
                let has_normal = self
                    .resources
                    .contains_key(&(module.to_string(), normal.to_string()));
                FLAGS_IS_PREVIEW_VERSION | if has_normal { 0 } else { FLAGS_IS_PREVIEW_ONLY }
            }
            None => {
                let key = (module.to_string(), format!("{}{}", PREVIEW_INFIX, path));
                if self.resources.contains_key(&key) {
                    FLAGS_HAS_PREVIEW_VERSION
                } else {
                    0
                }
            }
        }
    }

    fn dir_flags(&self, dirs: &BTreeMap<(String, String), BTreeSet<String>>, module: &str, path: &str) -> u64 {
        match path.strip_prefix(PREVIEW_INFIX) {
            Some(normal) => {
                let has_normal = dirs.contains_key(&(module.to_string(), normal.to_string()));
                FLAGS_IS_PREVIEW_VERSION | if has_normal { 0 } else { FLAGS_IS_PREVIEW_ONLY }
            }
            None => {
                let key = (module.to_string(), format!("{}{}", PREVIEW_INFIX, path));
                if !path.is_empty() && dirs.contains_key(&key) {
                    FLAGS_HAS_PREVIEW_VERSION
                } else {
                    0
                }
            }
        }
    }
}

fn join(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}/{}", parent, child)
    }
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    }
}

/// entry name for a child of a module directory
fn child_name(module: &str, path: &str, is_resource: bool) -> String {
    if is_resource {
        format!("/{}/{}", module, path)
    } else {
        format!("/modules/{}/{}", module, path)
    }
}

fn entry_name(entry: &Entry) -> String {
    match entry {
        Entry::ModulesRoot => "/modules".to_string(),
        Entry::PackagesRoot => "/packages".to_string(),
        Entry::ModuleDir { module, path } if path.is_empty() => format!("/modules/{}", module),
        Entry::ModuleDir { module, path } => format!("/modules/{}/{}", module, path),
        Entry::PackageDir { package } => format!("/packages/{}", package),
        Entry::Resource { module, path } => format!("/{}/{}", module, path),
    }
}

/// build redirect and slot tables; `slots[i]` is the entry index stored in slot `i`
fn perfect_hash(names: &[String]) -> (Vec<i32>, Vec<usize>) {
    let length = names.len() as u32;
    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); names.len()];
    for (i, name) in names.iter().enumerate() {
        buckets[(hash_code(name.as_bytes(), HASH_MULTIPLIER) % length) as usize].push(i);
    }

    let mut order: Vec<usize> = (0..buckets.len()).collect();
    order.sort_by_key(|&b| std::cmp::Reverse(buckets[b].len()));

    let mut redirect = vec![0i32; names.len()];
    let mut slots: Vec<Option<usize>> = vec![None; names.len()];

    for &b in order.iter().filter(|&&b| buckets[b].len() > 1) {
        let mut seed: u32 = 1;
        loop {
            let candidate: Vec<usize> = buckets[b]
                .iter()
                .map(|&i| (hash_code(names[i].as_bytes(), seed) % length) as usize)
                .collect();
            let distinct: BTreeSet<usize> = candidate.iter().copied().collect();
            if distinct.len() == candidate.len() && candidate.iter().all(|&s| slots[s].is_none()) {
                for (&i, &s) in buckets[b].iter().zip(&candidate) {
                    slots[s] = Some(i);
                }
                redirect[b] = seed as i32;
                break;
            }
            seed += 1;
        }
    }

    let mut free = (0..names.len()).filter(|&s| slots[s].is_none()).collect::<Vec<_>>().into_iter();
    for &b in order.iter().filter(|&&b| buckets[b].len() == 1) {
        let slot = free.next().unwrap();
        slots[slot] = Some(buckets[b][0]);
        redirect[b] = -1 - slot as i32;
    }

    (redirect, slots.into_iter().map(|s| s.unwrap()).collect())
}
