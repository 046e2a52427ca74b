//! Path validation against authorized roots.
//!
//! Every path a session touches goes through a [`PathValidator`] first. The
//! validator canonicalizes the candidate (resolving `..` components and
//! symlinks) and approves it only if the real path lies inside one of the
//! configured roots.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors returned by path validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The path does not exist.
    #[error("no such file or directory: {0}")]
    NotFound(PathBuf),

    /// The real path is outside every authorized root.
    #[error("path is outside the authorized roots: {0}")]
    OutsideRoot(PathBuf),

    /// A directory was required.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Permission denied while resolving the path.
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Approves filesystem paths before a session may use them.
pub trait PathValidator: Send + Sync {
    /// Returns the canonical real path if and only if it lies within an
    /// authorized root.
    fn validate(&self, path: &Path) -> Result<PathBuf, ValidationError>;

    /// Like [`validate`](Self::validate), but additionally requires a directory.
    fn validate_dir(&self, path: &Path) -> Result<PathBuf, ValidationError> {
        let canonical = self.validate(path)?;
        if !canonical.is_dir() {
            return Err(ValidationError::NotADirectory(canonical));
        }
        Ok(canonical)
    }
}

/// Validator that accepts paths under a fixed set of root directories.
///
/// Roots that do not exist are ignored. A validator with no usable roots
/// rejects everything.
#[derive(Debug, Clone)]
pub struct RootValidator {
    roots: Vec<PathBuf>,
}

impl RootValidator {
    /// Create a validator for the given roots.
    pub fn new(roots: Vec<PathBuf>) -> Self {
        let roots = roots
            .into_iter()
            .filter_map(|root| match fs::canonicalize(&root) {
                Ok(canonical) => Some(canonical),
                Err(e) => {
                    tracing::warn!(root = %root.display(), error = %e, "Ignoring unusable root");
                    None
                }
            })
            .collect();
        Self { roots }
    }

    /// Returns the canonical roots.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl PathValidator for RootValidator {
    fn validate(&self, path: &Path) -> Result<PathBuf, ValidationError> {
        let canonical = fs::canonicalize(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ValidationError::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => {
                ValidationError::PermissionDenied(path.to_path_buf())
            }
            _ => ValidationError::Io(e),
        })?;

        if self.roots.iter().any(|root| canonical.starts_with(root)) {
            Ok(canonical)
        } else {
            Err(ValidationError::OutsideRoot(path.to_path_buf()))
        }
    }
}
