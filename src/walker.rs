use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use crate::error::Result;

/// A file found under a walk root.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the walk root (the file name when the root is a
    /// file).
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    /// Last modification time as seconds since the Unix epoch.
    pub mtime: u64,
}

impl DiscoveredFile {
    pub fn is_text(&self) -> bool {
        is_text_document(&self.absolute_path)
    }
}

/// Which files a walk returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// Only documents the indexer can read (`.md`, `.txt`).
    TextDocuments,
    /// Every regular file.
    AllFiles,
}

/// Extensions the indexer reads as plain text.
const TEXT_EXTENSIONS: &[&str] = &["md", "txt"];

pub fn is_text_document(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        })
}

/// Discover files under `root`.
///
/// A file root yields itself when it passes the filter. Hidden entries
/// (names starting with `.`) are skipped. Subdirectories are only
/// entered when `recursive` is set. Results are sorted by relative path.
pub fn discover_files(
    root: &Path,
    recursive: bool,
    filter: Filter,
) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();

    if canonical_root.is_file() {
        if passes(filter, &canonical_root) {
            let name = canonical_root
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_default();
            results.push(make_discovered(name, &canonical_root)?);
        }
        return Ok(results);
    }

    let walk = Walk {
        root: &canonical_root,
        recursive,
        filter,
    };
    walk.dir(&canonical_root, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

struct Walk<'a> {
    root: &'a Path,
    recursive: bool,
    filter: Filter,
}

impl Walk<'_> {
    fn dir(
        &self,
        current: &Path,
        results: &mut Vec<DiscoveredFile>,
    ) -> Result<()> {
        for entry in std::fs::read_dir(current)? {
            let entry = entry?;
            let file_name = entry.file_name();
            if file_name.to_string_lossy().starts_with('.') {
                continue;
            }

            let path = entry.path();
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                if self.recursive {
                    self.dir(&path, results)?;
                }
            } else if file_type.is_symlink() {
                // Broken links are skipped; directory links are never
                // followed so a link back into the tree cannot loop.
                let Ok(resolved) = path.canonicalize() else {
                    continue;
                };
                if resolved.is_file() && passes(self.filter, &resolved) {
                    let relative = self.relative(&path);
                    results.push(make_discovered(relative, &resolved)?);
                }
            } else if file_type.is_file() && passes(self.filter, &path) {
                let absolute = path.canonicalize()?;
                results.push(make_discovered(self.relative(&path), &absolute)?);
            }
        }

        Ok(())
    }

    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(self.root).unwrap_or(path).to_path_buf()
    }
}

fn passes(filter: Filter, path: &Path) -> bool {
    match filter {
        Filter::TextDocuments => is_text_document(path),
        Filter::AllFiles => true,
    }
}

fn make_discovered(
    relative_path: PathBuf,
    absolute_path: &Path,
) -> Result<DiscoveredFile> {
    let mtime = std::fs::metadata(absolute_path)?
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    Ok(DiscoveredFile {
        relative_path,
        absolute_path: absolute_path.to_path_buf(),
        mtime,
    })
}
