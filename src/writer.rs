//! Output writer: the only code that touches the output root.
//!
//! - [`OutputWriter::write`] persists one file, creating parent directories
//!   and clearing stale files or directories that stand in the way. Existing
//!   files with identical bytes are left alone so their mtimes survive.
//! - [`finalize`] prunes everything the run did not produce.
//! - [`Spool`] holds captured bodies on disk between the capture and write
//!   passes, keyed by digest.
//!
//! `OutputWriter` is `Sync`: the write pass shares one writer across
//! worker threads.

use crate::config::ConfigError;
use crate::error::FreezeError;
use crate::manifest::{RunManifest, digest};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;
use wax::{CandidatePath, Glob, Pattern};

/// What a write did to the file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOutcome {
    Created,
    Updated,
    /// Same bytes were already there; the file was not rewritten.
    Unchanged,
}

#[derive(Debug)]
struct Written {
    url: String,
    digest: String,
}

pub struct OutputWriter {
    root: PathBuf,
    written: Mutex<HashMap<String, Written>>,
    /// Held while clearing stale entries and creating parent directories.
    layout: Mutex<()>,
}

impl OutputWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            written: Mutex::new(HashMap::new()),
            layout: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` for `url` at `rel` (relative to the root, `/` separated).
    ///
    /// Writing the same bytes to the same path twice in one run is a no-op.
    /// Writing different bytes is a [`FreezeError::PathCollision`].
    pub fn write(&self, rel: &str, url: &str, bytes: &[u8]) -> Result<WriteOutcome, FreezeError> {
        let digest = digest(bytes);
        {
            let mut written = self
                .written
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(previous) = written.get(rel) {
                if previous.digest == digest {
                    return Ok(WriteOutcome::Unchanged);
                }
                return Err(FreezeError::PathCollision {
                    path: rel.to_string(),
                    first_url: previous.url.clone(),
                    second_url: url.to_string(),
                });
            }
            written.insert(
                rel.to_string(),
                Written {
                    url: url.to_string(),
                    digest,
                },
            );
        }

        let dest = self.root.join(rel);
        {
            let _layout = self
                .layout
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            self.clear_way(&dest)?;
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| FreezeError::write(parent, e))?;
            }
        }

        let outcome = match fs::metadata(&dest) {
            Ok(meta) if meta.len() == bytes.len() as u64 => {
                let existing = fs::read(&dest).map_err(|e| FreezeError::write(&dest, e))?;
                if existing == bytes {
                    debug!(path = rel, "unchanged");
                    return Ok(WriteOutcome::Unchanged);
                }
                WriteOutcome::Updated
            }
            Ok(_) => WriteOutcome::Updated,
            Err(_) => WriteOutcome::Created,
        };

        let mut file = File::create(&dest).map_err(|e| FreezeError::write(&dest, e))?;
        file.write_all(bytes)
            .map_err(|e| FreezeError::write(&dest, e))?;
        debug!(path = rel, ?outcome, "wrote");
        Ok(outcome)
    }

    /// Remove a stale directory where `dest` must be a file, and stale files
    /// where its ancestors must be directories.
    fn clear_way(&self, dest: &Path) -> Result<(), FreezeError> {
        if dest.is_dir() {
            debug!(path = %dest.display(), "removing stale directory");
            tolerate_missing(fs::remove_dir_all(dest)).map_err(|e| FreezeError::write(dest, e))?;
        }
        let Ok(relative) = dest.strip_prefix(&self.root) else {
            return Ok(());
        };
        let mut ancestor = self.root.clone();
        let components: Vec<_> = relative.components().collect();
        for component in components.iter().take(components.len().saturating_sub(1)) {
            ancestor.push(component);
            if ancestor.is_file() {
                debug!(path = %ancestor.display(), "removing stale file");
                tolerate_missing(fs::remove_file(&ancestor))
                    .map_err(|e| FreezeError::write(&ancestor, e))?;
            }
        }
        Ok(())
    }
}

/// A stale entry may vanish between the check and the removal.
fn tolerate_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Delete every file under `root` that is not in `manifest` and matches no
/// `ignore` glob, then every directory left empty.
///
/// Returns the removed file paths, relative to `root`, sorted.
pub fn finalize(
    root: &Path,
    manifest: &RunManifest,
    ignore: &[String],
) -> Result<Vec<String>, FreezeError> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let globs = ignore
        .iter()
        .map(|p| {
            Glob::new(p).map_err(|e| {
                FreezeError::Config(ConfigError::Validation(format!(
                    "destination_ignore: invalid glob '{p}': {e}"
                )))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let ignored = |rel: &str| {
        let candidate = CandidatePath::from(rel);
        globs.iter().any(|g| g.matched(&candidate).is_some())
    };

    let mut removed = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            FreezeError::write(&path, io::Error::other(e))
        })?;
        let path = entry.path();
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let rel = to_slash(relative);
        if ignored(&rel) {
            continue;
        }

        if entry.file_type().is_dir() {
            let empty = fs::read_dir(path)
                .map_err(|e| FreezeError::write(path, e))?
                .next()
                .is_none();
            if empty {
                debug!(path = %rel, "removing empty directory");
                fs::remove_dir(path).map_err(|e| FreezeError::write(path, e))?;
            }
        } else if !manifest.contains(&rel) {
            debug!(path = %rel, "removing stale file");
            fs::remove_file(path).map_err(|e| FreezeError::write(path, e))?;
            removed.push(rel);
        }
    }
    removed.sort();
    Ok(removed)
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Content-addressed scratch store for captured bodies.
///
/// One file per digest, so aliased URLs share storage. Removed on drop.
pub struct Spool {
    dir: TempDir,
}

impl Spool {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            dir: tempfile::Builder::new().prefix("freeze-spool-").tempdir()?,
        })
    }

    fn path(&self, digest: &str) -> PathBuf {
        self.dir.path().join(digest)
    }

    pub fn store(&self, digest: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.path(digest);
        if path.exists() {
            return Ok(());
        }
        fs::write(path, bytes)
    }

    pub fn load(&self, digest: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path(digest))
    }
}
