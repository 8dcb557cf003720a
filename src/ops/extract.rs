use std::fs;
use std::io::Write;
use std::path::{Component, Path};

use tracing::{debug, info};

use crate::error::{Error, IoResultExt, Result};
use crate::node::{NodeRef, MODULES_PREFIX, MODULES_ROOT};
use crate::reader::ImageReader;

/// options controlling extraction
#[derive(Clone, Debug)]
pub struct ExtractOptions {
    /// overwrite files that already exist (default: true)
    pub overwrite: bool,
    /// only extract these modules; all modules when empty
    pub modules: Vec<String>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            overwrite: true,
            modules: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractStats {
    pub directories: usize,
    pub files: usize,
    pub bytes: u64,
}

/// write every resource to `dest/<module>/<path>`
pub fn extract(reader: &ImageReader, dest: &Path, opts: &ExtractOptions) -> Result<ExtractStats> {
    let root = reader
        .find_node(MODULES_ROOT)?
        .ok_or_else(|| Error::PathNotFound(MODULES_ROOT.to_string()))?;

    fs::create_dir_all(dest).with_path(dest)?;

    let mut stats = ExtractStats::default();
    for module in root.children() {
        if !opts.modules.is_empty() && !opts.modules.iter().any(|m| m == module.file_name()) {
            continue;
        }
        extract_dir(reader, module, dest, opts, &mut stats)?;
    }

    info!(
        dest = %dest.display(),
        files = stats.files,
        bytes = stats.bytes,
        "extracted image"
    );
    Ok(stats)
}

fn extract_dir(
    reader: &ImageReader,
    dir: &NodeRef,
    dest: &Path,
    opts: &ExtractOptions,
    stats: &mut ExtractStats,
) -> Result<()> {
    // children are only populated once the directory has been looked up
    let dir = reader
        .find_node(dir.name())?
        .ok_or_else(|| Error::PathNotFound(dir.name().to_string()))?;

    let target = dest.join(relative_path(&dir)?);
    fs::create_dir_all(&target).with_path(&target)?;
    stats.directories += 1;

    for child in dir.children() {
        if child.is_directory() {
            extract_dir(reader, child, dest, opts, stats)?;
        } else if child.is_resource() {
            extract_resource(reader, child, dest, opts, stats)?;
        }
    }
    Ok(())
}

fn extract_resource(
    reader: &ImageReader,
    node: &NodeRef,
    dest: &Path,
    opts: &ExtractOptions,
    stats: &mut ExtractStats,
) -> Result<()> {
    let target = dest.join(relative_path(node)?);
    if target.exists() && !opts.overwrite {
        debug!(path = %target.display(), "skipping existing file");
        return Ok(());
    }

    let content = reader.get_resource_buffer(node)?;
    let mut file = fs::File::create(&target).with_path(&target)?;
    file.write_all(&content).with_path(&target)?;

    stats.files += 1;
    stats.bytes += content.len() as u64;
    Ok(())
}

/// `<module>/<path>` for a node below `/modules`; only plain segments
/// are accepted so every target stays inside the destination
fn relative_path(node: &NodeRef) -> Result<&Path> {
    let name = node.name().strip_prefix(MODULES_PREFIX).unwrap_or(node.name());
    let path = Path::new(name);
    if path.components().all(|c| matches!(c, Component::Normal(_))) {
        Ok(path)
    } else {
        Err(Error::Malformed(format!("entry {} escapes the extraction root", node.name())))
    }
}
