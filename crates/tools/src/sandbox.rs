//! Sandbox management.
//!
//! Each evolution attempt runs inside a timestamped directory holding a clone
//! of the canonical domain file, a mirrored storage tree (the jail), and a
//! writable skills directory. Only this component writes the sandbox root;
//! the effector writes under the storage mirror and evolution under the
//! skills directory. Sandboxes are retained after the run for postmortem.

use common::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// The triple of paths owned by one sandbox.
#[derive(Debug, Clone)]
pub struct SandboxPaths {
    pub root: PathBuf,
    pub domain_file: PathBuf,
    pub storage_root: PathBuf,
    pub skills_dir: PathBuf,
}

/// Creates and resets per-attempt sandboxes.
pub struct SandboxManager {
    runs_dir: PathBuf,
    canonical_storage: PathBuf,
    canonical_domain: PathBuf,
    current: Option<SandboxPaths>,
}

impl SandboxManager {
    pub fn new(
        runs_dir: impl Into<PathBuf>,
        canonical_storage: impl Into<PathBuf>,
        canonical_domain: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runs_dir: runs_dir.into(),
            canonical_storage: canonical_storage.into(),
            canonical_domain: canonical_domain.into(),
            current: None,
        }
    }

    /// Create a fresh sandbox: clone the domain, mirror the storage tree,
    /// prepare the skills directory.
    pub async fn create(&mut self) -> Result<SandboxPaths> {
        let stamp = common::chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let mut root = self.runs_dir.join(format!("sandbox_{}", stamp));
        // Same-second creations get a numeric suffix.
        let mut counter = 1;
        while root.exists() {
            root = self.runs_dir.join(format!("sandbox_{}_{}", stamp, counter));
            counter += 1;
        }
        tokio::fs::create_dir_all(&root).await?;
        info!(sandbox = %root.display(), "initializing sandbox");

        let domain_file = root.join("domain_exp.pddl");
        if self.canonical_domain.exists() {
            tokio::fs::copy(&self.canonical_domain, &domain_file).await?;
            debug!("mirrored domain PDDL");
        }

        let storage_root = root.join("storage");
        if self.canonical_storage.exists() {
            mirror_tree(&self.canonical_storage, &storage_root).await?;
            debug!("mirrored storage jail");
        } else {
            tokio::fs::create_dir_all(&storage_root).await?;
        }

        let skills_dir = root.join("skills");
        tokio::fs::create_dir_all(&skills_dir).await?;

        let paths = SandboxPaths {
            root,
            domain_file,
            storage_root,
            skills_dir,
        };
        self.current = Some(paths.clone());
        Ok(paths)
    }

    /// Delete and re-mirror the storage tree only; the domain file and any
    /// deployed skills survive.
    pub async fn reset_storage(&self) -> Result<()> {
        let paths = self.paths()?;
        if paths.storage_root.exists() {
            tokio::fs::remove_dir_all(&paths.storage_root).await?;
        }
        if self.canonical_storage.exists() {
            mirror_tree(&self.canonical_storage, &paths.storage_root).await?;
        } else {
            tokio::fs::create_dir_all(&paths.storage_root).await?;
        }
        info!("sandbox storage reset");
        Ok(())
    }

    /// Paths of the active sandbox.
    pub fn paths(&self) -> Result<&SandboxPaths> {
        self.current
            .as_ref()
            .ok_or_else(|| Error::Validation("no sandbox created yet".to_string()))
    }
}

/// Recursively copy a directory tree.
async fn mirror_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::Internal(e.to_string()))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            tokio::fs::create_dir_all(&target).await?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(entry.path(), &target).await?;
        }
    }
    Ok(())
}
