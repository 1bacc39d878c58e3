//! Run manifest: every file a freezing run produced.
//!
//! The manifest is keyed by resolved path (relative to the output root, `/`
//! separators) and records which URLs produced each file. Several URLs share
//! one entry only when their bodies are byte-identical. The entry's `digest`
//! is the SHA-256 of the body, which is what makes that check possible
//! without keeping bodies in memory.
//!
//! Finalize prunes everything under the output root that is not a key of
//! [`RunManifest::entries`].

use crate::error::BindingError;
use crate::writer::WriteOutcome;
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::Path;

/// SHA-256 of `bytes`, as lowercase hex.
pub fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// One output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    /// URLs whose response is this file, in capture order.
    pub urls: Vec<String>,
    pub status: u16,
    pub content_type: String,
    pub digest: String,
    pub size: u64,
}

/// A URL whose failure status was declared expected by its generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedUrl {
    pub url: String,
    pub status: u16,
    pub origin: String,
}

/// Counts of what the write and finalize passes did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub removed: u32,
}

impl WriteStats {
    pub fn record(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Created => self.created += 1,
            WriteOutcome::Updated => self.updated += 1,
            WriteOutcome::Unchanged => self.unchanged += 1,
        }
    }

    /// Files the write pass touched or confirmed.
    pub fn total(&self) -> u32 {
        self.created + self.updated + self.unchanged
    }
}

impl fmt::Display for WriteStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.created == 0 && self.updated == 0 && self.removed == 0 {
            return write!(f, "{} unchanged", self.unchanged);
        }
        write!(
            f,
            "{} created, {} updated, {} unchanged",
            self.created, self.updated, self.unchanged
        )?;
        if self.removed > 0 {
            write!(f, ", {} removed", self.removed)?;
        }
        write!(f, " ({} total)", self.total())
    }
}

/// Result of one freezing run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunManifest {
    pub entries: BTreeMap<String, ManifestEntry>,
    pub skipped: Vec<SkippedUrl>,
    /// Bad bindings collected in lenient mode.
    #[serde(serialize_with = "as_messages")]
    pub binding_errors: Vec<BindingError>,
    /// Stale files deleted by finalize.
    pub removed: Vec<String>,
    pub stats: WriteStats,
}

fn as_messages<S: Serializer>(errors: &[BindingError], s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(errors.iter().map(ToString::to_string))
}

impl RunManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn entry(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    /// Resolved paths, sorted.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// The file a URL was frozen to, if any.
    pub fn path_for(&self, url: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, e)| e.urls.iter().any(|u| u == url))
            .map(|(p, _)| p.as_str())
    }

    /// Write the manifest as pretty JSON.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(urls: &[&str], body: &[u8]) -> ManifestEntry {
        ManifestEntry {
            urls: urls.iter().map(|u| u.to_string()).collect(),
            status: 200,
            content_type: "text/html".into(),
            digest: digest(body),
            size: body.len() as u64,
        }
    }

    #[test]
    fn digest_is_sha256_hex() {
        assert_eq!(
            digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(digest(b"Post 1"), digest(b"Post 2"));
    }

    #[test]
    fn path_for_finds_aliases() {
        let mut m = RunManifest::new();
        m.entries.insert(
            "post/1/index.html".into(),
            entry(&["/post/1", "/post/1/"], b"Post 1"),
        );
        assert_eq!(m.path_for("/post/1/"), Some("post/1/index.html"));
        assert_eq!(m.path_for("/post/2"), None);
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn paths_are_sorted() {
        let mut m = RunManifest::new();
        m.entries.insert("b/index.html".into(), entry(&["/b"], b"b"));
        m.entries.insert("a/index.html".into(), entry(&["/a"], b"a"));
        assert_eq!(m.paths().collect::<Vec<_>>(), vec!["a/index.html", "b/index.html"]);
    }

    #[test]
    fn save_writes_json_with_binding_messages() {
        let tmp = TempDir::new().unwrap();
        let mut m = RunManifest::new();
        m.entries.insert("index.html".into(), entry(&["/"], b"home"));
        m.binding_errors.push(BindingError {
            rule: "post".into(),
            binding: "{id: abc}".into(),
            problem: crate::error::BindingProblem::NotAbsolute("abc".into()),
        });
        let path = tmp.path().join("manifest.json");
        m.save(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["entries"]["index.html"]["urls"][0], "/");
        assert!(
            json["binding_errors"][0]
                .as_str()
                .unwrap()
                .contains("'post'")
        );
    }

    // =========================================================================
    // WriteStats
    // =========================================================================

    #[test]
    fn stats_display_all_unchanged() {
        let s = WriteStats {
            unchanged: 4,
            ..Default::default()
        };
        assert_eq!(s.to_string(), "4 unchanged");
    }

    #[test]
    fn stats_display_with_changes() {
        let mut s = WriteStats::default();
        s.record(WriteOutcome::Created);
        s.record(WriteOutcome::Created);
        s.record(WriteOutcome::Unchanged);
        assert_eq!(s.to_string(), "2 created, 0 updated, 1 unchanged (3 total)");
        s.removed = 2;
        assert_eq!(
            s.to_string(),
            "2 created, 0 updated, 1 unchanged, 2 removed (3 total)"
        );
    }
}
