use anyhow::{Context, Result};
use std::fs::{self, create_dir_all};
use std::path::{Path, PathBuf};

// Local cache tree: <root>/datasets and <root>/models
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn datasets(&self) -> PathBuf {
        self.root.join("datasets")
    }

    pub fn models(&self) -> PathBuf {
        self.root.join("models")
    }

    pub fn dataset_dir(&self, name: &str) -> PathBuf {
        self.datasets().join(name)
    }

    pub fn model_dir(&self, name: &str) -> PathBuf {
        self.models().join(name)
    }

    // Create both subdirectories. Ok if they already exist.
    pub fn ensure(&self) -> Result<()> {
        for dir in [self.datasets(), self.models()] {
            create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

// Absolute path for display, falls back to the path as given
pub fn display_abs(path: &Path) -> String {
    fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

// Put a file fetched into the hub cache at `local`.
// The hub hands out snapshot paths that are relative symlinks into blobs/,
// so the real file is resolved first. Hard-links it when possible, copies
// otherwise (different filesystem).
pub fn place(cached: &Path, local: &Path) -> Result<()> {
    let cached = fs::canonicalize(cached)
        .with_context(|| format!("failed to resolve {}", cached.display()))?;
    let cached = cached.as_path();
    if let Some(parent) = local.parent() {
        create_dir_all(parent)?;
    }
    // symlink_metadata so a dangling link left by an older run is replaced too
    if fs::symlink_metadata(local).is_ok() {
        fs::remove_file(local)
            .with_context(|| format!("failed to replace {}", local.display()))?;
    }
    if fs::hard_link(cached, local).is_err() {
        fs::copy(cached, local).with_context(|| {
            format!("failed to copy {} → {}", cached.display(), local.display())
        })?;
    }
    Ok(())
}
