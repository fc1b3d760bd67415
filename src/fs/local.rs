use jwalk::WalkDir;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, SyncError};

/// A regular file found under the build directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Absolute (or root-joined) path on disk.
    pub path: PathBuf,
    /// Object key: path relative to the root, `/`-separated.
    pub key: String,
    pub size: u64,
}

impl LocalFile {
    /// File name component of the key, used for content-type detection.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Check that `root` exists and is a directory.
pub fn validate_root(root: &Path) -> Result<()> {
    match std::fs::metadata(root) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(SyncError::config(format!(
            "Build directory {} is not a directory.",
            root.display()
        ))),
        Err(_) => Err(SyncError::config(
            "Build directory does not exist. Cannot publish something before you build it.",
        )),
    }
}

/// Build the object key for `path` under `root`.
///
/// Fails for paths outside the root and for names that are not valid UTF-8;
/// a lossy conversion could map two files onto one key.
pub fn key_for(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| SyncError::Scan {
        path: path.to_path_buf(),
        reason: format!("not under {}", root.display()),
    })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => {
                let name = name.to_str().ok_or_else(|| SyncError::Scan {
                    path: path.to_path_buf(),
                    reason: "file name is not valid UTF-8".to_string(),
                })?;
                parts.push(name);
            }
            Component::CurDir => {}
            _ => {
                return Err(SyncError::Scan {
                    path: path.to_path_buf(),
                    reason: "unexpected path component".to_string(),
                })
            }
        }
    }

    if parts.is_empty() {
        return Err(SyncError::Scan {
            path: path.to_path_buf(),
            reason: "path is the build directory itself".to_string(),
        });
    }
    Ok(parts.join("/"))
}

/// Walk `root` and return every regular file, sorted by key.
///
/// Directories are descended into but never returned. Symlinks are
/// followed when they point at a file; symlinked directories are not
/// descended into. Entries that cannot be stat'ed are returned with size 0.
pub fn scan_local(root: &Path) -> Result<Vec<LocalFile>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .skip_hidden(false)
        .follow_links(false)
        .sort(true)
    {
        let entry = entry.map_err(|e| SyncError::Scan {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;

        if entry.file_type().is_dir() {
            continue;
        }

        let path = entry.path();
        // Follows symlinks. Unreadable entries such as dangling links are
        // kept so the upload fails for them and the remote copy survives.
        let size = match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot stat entry");
                0
            }
        };

        files.push(LocalFile {
            key: key_for(root, &path)?,
            path,
            size,
        });
    }

    files.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(files)
}

/// [`scan_local`] on the blocking pool.
pub async fn scan_local_async(root: &Path) -> Result<Vec<LocalFile>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || scan_local(&root))
        .await
        .map_err(|e| SyncError::Scan {
            path: PathBuf::new(),
            reason: e.to_string(),
        })?
}
