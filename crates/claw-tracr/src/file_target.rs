//! Persistence of flushed buffers.
//!
//! This module provides:
//! - [`FileTarget`]: Appends each key's text to `<base_dir>/<key>.log`
//! - [`DiscardTarget`]: Drops everything (base directory unavailable)
//! - [`open_target`]: Picks one of the two at startup

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::traits::FlushTarget;

/// Extension of persisted files.
pub const LOG_EXTENSION: &str = "log";

/// Replacement for path-unsafe characters in keys.
const SEPARATOR_REPLACEMENT: &str = "__";

/// Turns a correlation key into a safe file stem.
///
/// Path separators (`/`, `\`) and NUL are replaced with `__`, so a key can
/// never escape the base directory.
#[must_use]
pub fn sanitize_key(key: &str) -> String {
    key.replace(['/', '\\', '\0'], SEPARATOR_REPLACEMENT)
}

/// Appends flushed text to one file per correlation key.
#[derive(Debug, Clone)]
pub struct FileTarget {
    base_dir: PathBuf,
}

impl FileTarget {
    /// Creates a target writing under `base_dir`.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Returns the file `key` is persisted to.
    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.{LOG_EXTENSION}", sanitize_key(key)))
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Appends `text` to the file for `key`, creating the file if needed.
    ///
    /// The file is opened, written in full, flushed and closed on every
    /// call. The first error encountered is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or written.
    pub fn append(&self, key: &str, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(key))?;
        file.write_all(text.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

impl FlushTarget for FileTarget {
    fn write(&self, key: &str, text: &str) -> Result<()> {
        self.append(key, text)
    }
}

/// A target that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardTarget;

impl FlushTarget for DiscardTarget {
    fn write(&self, _key: &str, _text: &str) -> Result<()> {
        Ok(())
    }

    fn persists(&self) -> bool {
        false
    }
}

/// Returns true if `base_dir` exists and is a directory.
#[must_use]
pub fn base_dir_exists(base_dir: &Path) -> bool {
    fs::metadata(base_dir).is_ok_and(|m| m.is_dir())
}

/// Picks the flush target for `base_dir`.
///
/// If the directory is missing the engine degrades to discarding: buffers
/// are still evicted on schedule but never written. This is logged once.
#[must_use]
pub fn open_target(base_dir: &Path) -> Arc<dyn FlushTarget> {
    if base_dir_exists(base_dir) {
        Arc::new(FileTarget::new(base_dir))
    } else {
        tracing::warn!(
            target: "claw_tracr",
            base_dir = %base_dir.display(),
            "base directory not found, will discard everything"
        );
        Arc::new(DiscardTarget)
    }
}
