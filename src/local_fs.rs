//! Filesystem collaborator backed by `std::fs`.
//!
//! Paths arrive validated and resolved. Failures on a path are reported
//! in its [`PathOutcome`] instead of failing the whole request.

use std::{
    io,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{
    collaborators::{FilesystemOps, FsAction, FsRequest, PathOutcome},
    error::Result,
};

/// Entries reported by a single list or tree request.
const MAX_ENTRIES: usize = 500;

/// Depth below the root shown by a tree request.
const TREE_DEPTH: usize = 3;

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFilesystem;

impl FilesystemOps for LocalFilesystem {
    fn apply(&self, request: &FsRequest) -> Result<Vec<PathOutcome>> {
        let path = request.path.as_path();
        debug!(
            action = ?request.action,
            path = %path.display(),
            "filesystem request"
        );

        let outcomes = match request.action {
            FsAction::List | FsAction::Navigate => list(path, 0),
            FsAction::Tree => list(path, TREE_DEPTH),
            FsAction::CreateDir => vec![outcome(path, create_dir(path))],
            FsAction::CreateFile => vec![outcome(path, create_file(path))],
            FsAction::Move => vec![with_destination(request, move_path)],
            FsAction::Copy => vec![with_destination(request, copy_path)],
            FsAction::Delete => vec![outcome(path, delete(path))],
        };

        Ok(outcomes)
    }
}

fn outcome(path: &Path, result: io::Result<String>) -> PathOutcome {
    match result {
        Ok(detail) => PathOutcome {
            path: path.to_path_buf(),
            success: true,
            detail,
        },
        Err(e) => PathOutcome {
            path: path.to_path_buf(),
            success: false,
            detail: e.to_string(),
        },
    }
}

fn with_destination(
    request: &FsRequest,
    op: impl FnOnce(&Path, &Path) -> io::Result<String>,
) -> PathOutcome {
    match &request.destination {
        Some(to) => outcome(&request.path, op(&request.path, to)),
        None => PathOutcome {
            path: request.path.clone(),
            success: false,
            detail: "no destination given".to_string(),
        },
    }
}

/// The directory itself, then its entries down to `depth` levels.
fn list(root: &Path, depth: usize) -> Vec<PathOutcome> {
    let metadata = match std::fs::metadata(root) {
        Ok(m) => m,
        Err(e) => return vec![outcome(root, Err(e))],
    };
    if !metadata.is_dir() {
        return vec![outcome(root, Ok(describe(&metadata)))];
    }

    let mut outcomes = vec![outcome(root, Ok("directory".to_string()))];
    walk(root, depth, &mut outcomes);
    outcomes
}

fn walk(dir: &Path, depth: usize, outcomes: &mut Vec<PathOutcome>) {
    let mut entries: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => {
            entries.filter_map(|e| e.ok().map(|e| e.path())).collect()
        }
        Err(e) => {
            outcomes.push(outcome(dir, Err(e)));
            return;
        }
    };
    entries.sort();

    for entry in entries {
        if outcomes.len() > MAX_ENTRIES {
            return;
        }
        let Ok(metadata) = std::fs::symlink_metadata(&entry) else {
            continue;
        };
        outcomes.push(outcome(&entry, Ok(describe(&metadata))));
        if metadata.is_dir() && depth > 0 {
            walk(&entry, depth - 1, outcomes);
        }
    }
}

fn describe(metadata: &std::fs::Metadata) -> String {
    if metadata.is_dir() {
        "directory".to_string()
    } else if metadata.file_type().is_symlink() {
        "symlink".to_string()
    } else {
        format!("file, {} bytes", metadata.len())
    }
}

fn create_dir(path: &Path) -> io::Result<String> {
    if path.is_dir() {
        return Ok("already exists".to_string());
    }
    std::fs::create_dir_all(path)?;
    Ok("created directory".to_string())
}

fn create_file(path: &Path) -> io::Result<String> {
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    Ok("created file".to_string())
}

/// Where `from` ends up: inside `to` when `to` is a directory.
fn landing(from: &Path, to: &Path) -> io::Result<PathBuf> {
    let target = match from.file_name() {
        Some(name) if to.is_dir() => to.join(name),
        _ => to.to_path_buf(),
    };
    if target.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", target.display()),
        ));
    }
    Ok(target)
}

fn move_path(from: &Path, to: &Path) -> io::Result<String> {
    let metadata = std::fs::symlink_metadata(from)?;
    let target = landing(from, to)?;
    refuse_nesting(from, &target)?;

    match std::fs::rename(from, &target) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            copy_recursive(from, &target)?;
            if metadata.is_dir() {
                std::fs::remove_dir_all(from)?;
            } else {
                std::fs::remove_file(from)?;
            }
        }
        Err(e) => return Err(e),
    }
    Ok(format!("moved to {}", target.display()))
}

fn copy_path(from: &Path, to: &Path) -> io::Result<String> {
    std::fs::symlink_metadata(from)?;
    let target = landing(from, to)?;
    refuse_nesting(from, &target)?;
    copy_recursive(from, &target)?;
    Ok(format!("copied to {}", target.display()))
}

/// A directory cannot be moved or copied to a place inside itself.
fn refuse_nesting(from: &Path, target: &Path) -> io::Result<()> {
    let source = from.canonicalize()?;
    let Some(parent) = target.parent() else {
        return Ok(());
    };
    let parent = match parent.canonicalize() {
        Ok(parent) => parent,
        // A parent that does not exist yet cannot be inside the source.
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if parent.starts_with(&source) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "cannot place {} inside itself ({})",
                from.display(),
                target.display()
            ),
        ));
    }
    Ok(())
}

/// Copy a file or directory tree. Symlinks are copied as links and never
/// followed.
fn copy_recursive(from: &Path, to: &Path) -> io::Result<()> {
    let file_type = std::fs::symlink_metadata(from)?.file_type();
    if file_type.is_symlink() {
        copy_link(from, to)
    } else if file_type.is_dir() {
        std::fs::create_dir_all(to)?;
        for entry in std::fs::read_dir(from)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &to.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        std::fs::copy(from, to).map(|_| ())
    }
}

#[cfg(unix)]
fn copy_link(from: &Path, to: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(std::fs::read_link(from)?, to)
}

#[cfg(not(unix))]
fn copy_link(from: &Path, _to: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cannot copy symlink {}", from.display()),
    ))
}

fn delete(path: &Path) -> io::Result<String> {
    let metadata = std::fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        if std::fs::read_dir(path)?.next().is_some() {
            return Err(io::Error::other("directory is not empty"));
        }
        std::fs::remove_dir(path)?;
        Ok("removed directory".to_string())
    } else {
        std::fs::remove_file(path)?;
        Ok("removed file".to_string())
    }
}
