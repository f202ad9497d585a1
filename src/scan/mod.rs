//! Input discovery
//!
//! Responsible for:
//! - Walking two directory trees and pairing files by relative path
//! - Turning names present on one side only into orphan records
//! - Collecting request bodies for request mode
//! - Applying include filters (exact or glob) on relative paths
//! - Deterministic ordering of results

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::dispatch::Side;
use crate::models::{ErrorKind, FilePair, RequestPairUnit, UnitResult};
use crate::rules::pattern_matcher::path_matches_filters;

/// A file with no counterpart on the other side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanFile {
    pub id: String,
    /// Path of the side that exists
    pub path: PathBuf,
    /// Side the file is missing from
    pub missing: Side,
}

impl OrphanFile {
    pub fn into_result(self) -> UnitResult {
        let message = format!(
            "{}: no counterpart on side {}",
            self.path.display(),
            self.missing
        );
        UnitResult::error(self.id, ErrorKind::Read, message)
    }
}

/// Everything found under the two roots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDiscovery {
    pub pairs: Vec<FilePair>,
    pub orphans: Vec<OrphanFile>,
}

impl FileDiscovery {
    /// Number of units the batch will report
    pub fn unit_count(&self) -> usize {
        self.pairs.len() + self.orphans.len()
    }
}

/// Discovery stopped by a signal before both listings were complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Discovery interrupted before the input listing completed")]
pub struct DiscoveryInterrupted;

/// Request-mode settings applied to every discovered body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestTemplate {
    pub content_type: String,
    pub headers_a: Vec<(String, String)>,
    pub headers_b: Vec<(String, String)>,
}

/// Pair files under `root_a` and `root_b` by relative path
pub fn discover_file_pairs(
    root_a: &Path,
    root_b: &Path,
    filters: &[String],
    interrupted: &Arc<AtomicBool>,
) -> Result<FileDiscovery> {
    let side_a = collect_files(root_a, filters, interrupted)?;
    let mut side_b = collect_files(root_b, filters, interrupted)?;

    let mut discovery = FileDiscovery::default();
    for (id, path_a) in side_a {
        match side_b.remove(&id) {
            Some(path_b) => discovery.pairs.push(FilePair { id, path_a, path_b }),
            None => discovery.orphans.push(OrphanFile {
                id,
                path: path_a,
                missing: Side::B,
            }),
        }
    }
    discovery
        .orphans
        .extend(side_b.into_iter().map(|(id, path)| OrphanFile {
            id,
            path,
            missing: Side::A,
        }));
    discovery.orphans.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(discovery)
}

/// One request unit per file under `root`
pub fn discover_requests(
    root: &Path,
    filters: &[String],
    template: &RequestTemplate,
    interrupted: &Arc<AtomicBool>,
) -> Result<Vec<RequestPairUnit>> {
    let files = collect_files(root, filters, interrupted)?;
    let mut units = Vec::with_capacity(files.len());
    for (relative_id, path) in files {
        let body = fs::read(&path).with_context(|| format!("Failed to read request {}", path.display()))?;
        units.push(RequestPairUnit {
            relative_id,
            body: Arc::from(body),
            headers_a: template.headers_a.clone(),
            headers_b: template.headers_b.clone(),
            content_type: template.content_type.clone(),
        });
    }
    Ok(units)
}

/// Relative path (forward slashes) to absolute path, sorted
fn collect_files(
    root: &Path,
    filters: &[String],
    interrupted: &Arc<AtomicBool>,
) -> Result<BTreeMap<String, PathBuf>> {
    if interrupted.load(Ordering::Relaxed) {
        return Err(DiscoveryInterrupted.into());
    }
    let mut files = BTreeMap::new();
    if root.is_file() {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        files.insert(name, root.to_path_buf());
        return Ok(files);
    }
    if !root.is_dir() {
        anyhow::bail!("Path does not exist: {}", root.display());
    }
    walk(root, root, filters, interrupted, &mut files)?;
    Ok(files)
}

fn walk(
    root: &Path,
    dir: &Path,
    filters: &[String],
    interrupted: &Arc<AtomicBool>,
    files: &mut BTreeMap<String, PathBuf>,
) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("Failed to read directory {}", dir.display()))?;
    for entry in entries {
        // A partial listing would turn unseen files into orphans
        if interrupted.load(Ordering::Relaxed) {
            return Err(DiscoveryInterrupted.into());
        }

        let entry_path = entry?.path();
        if entry_path.is_dir() {
            walk(root, &entry_path, filters, interrupted, files)?;
        } else if entry_path.is_file() {
            let Some(relative) = relative_id(root, &entry_path) else {
                continue;
            };
            if path_matches_filters(&relative, filters) {
                files.insert(relative, entry_path);
            }
        }
    }
    Ok(())
}

fn relative_id(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    Some(parts.join("/"))
}
