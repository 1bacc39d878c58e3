//! Path resolution: which file each URL becomes.
//!
//! ## Rules
//!
//! 1. The fragment is dropped. The query is handled per [`QueryPolicy`]:
//!    `hash` appends `-q<hex>` to the file stem, `ignore` drops it, `reject`
//!    fails.
//! 2. The path is percent-decoded. `.` and `..` segments, empty interior
//!    segments, backslashes and NUL are refused: they either escape the
//!    output root or cannot round-trip through a file server.
//! 3. A path ending in `/`, or whose last segment has no extension, gets
//!    `index.<ext>` appended, with `<ext>` taken from the content type.
//! 4. A path that already has an extension is kept as is. If the extension
//!    does not map to the response's content type a warning is logged.
//!
//! ```text
//! /                       text/html   →  index.html
//! /about                  text/plain  →  about/index.txt
//! /post/1/                text/html   →  post/1/index.html
//! /feed.xml?page=2        text/xml    →  feed-q<hash>.xml
//! /search?q=rust          text/html   →  search/index-q<hash>.html
//! ```
//!
//! ## Collisions
//!
//! [`CollisionTable`] remembers every claimed path. Two URLs may share a path
//! only when their bodies have the same digest. A path that is a file for one
//! URL and a directory for another can never be materialized either.

use crate::config::{FreezerConfig, QueryConfig, QueryPolicy};
use crate::error::FreezeError;
use crate::manifest::digest;
use percent_encoding::percent_decode_str;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Maps URLs plus content types to output paths.
#[derive(Debug, Clone)]
pub struct PathResolver {
    mimetypes: BTreeMap<String, String>,
    default_mimetype: String,
    query: QueryConfig,
    warn_mismatch: bool,
}

impl PathResolver {
    pub fn new(config: &FreezerConfig) -> Self {
        Self {
            mimetypes: config.mimetypes.clone(),
            default_mimetype: config.default_mimetype.clone(),
            query: config.query.clone(),
            warn_mismatch: !config.ignore_mimetype_warnings,
        }
    }

    /// Normalized content type of a response: parameters stripped,
    /// lowercased, `default_mimetype` when absent.
    pub fn content_type(&self, header: Option<&str>) -> String {
        header
            .and_then(|h| h.split(';').next())
            .map(|essence| essence.trim().to_ascii_lowercase())
            .filter(|essence| !essence.is_empty())
            .unwrap_or_else(|| self.default_mimetype.clone())
    }

    /// File extension for a normalized content type.
    ///
    /// Unknown types fall back to the extension of `default_mimetype`.
    pub fn extension_for(&self, content_type: &str) -> &str {
        self.mimetypes
            .get(content_type)
            .or_else(|| self.mimetypes.get(&self.default_mimetype))
            .map(String::as_str)
            .unwrap_or("bin")
    }

    /// Resolve a site-relative URL to a path relative to the output root.
    pub fn resolve(&self, url: &str, content_type: &str) -> Result<String, FreezeError> {
        let unresolvable = |reason: &str| FreezeError::UnresolvablePath {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let without_fragment = url.split_once('#').map_or(url, |(u, _)| u);
        let (raw_path, query) = match without_fragment.split_once('?') {
            Some((p, q)) if !q.is_empty() => (p, Some(q)),
            Some((p, _)) => (p, None),
            None => (without_fragment, None),
        };

        let suffix = match (query, self.query.policy) {
            (None, _) | (Some(_), QueryPolicy::Ignore) => String::new(),
            (Some(q), QueryPolicy::Hash) => {
                let mut hex = digest(q.as_bytes());
                hex.truncate(self.query.hash_length);
                format!("-q{hex}")
            }
            (Some(_), QueryPolicy::Reject) => {
                return Err(unresolvable("query strings are rejected by the query policy"));
            }
        };

        let decoded = percent_decode_str(raw_path)
            .decode_utf8()
            .map_err(|_| unresolvable("path is not valid UTF-8 after percent-decoding"))?;
        let Some(rest) = decoded.strip_prefix('/') else {
            return Err(unresolvable("URL must start with '/'"));
        };
        let (rest, trailing_slash) = match rest.strip_suffix('/') {
            Some(r) => (r, true),
            None => (rest, false),
        };

        let mut segments: Vec<&str> = Vec::new();
        if !rest.is_empty() {
            for segment in rest.split('/') {
                match segment {
                    "" => return Err(unresolvable("empty path segment")),
                    "." | ".." => return Err(unresolvable("relative path segment")),
                    s if s.contains(['\\', '\0']) => {
                        return Err(unresolvable("backslash or NUL in path"));
                    }
                    s => segments.push(s),
                }
            }
        }

        let ext = self.extension_for(content_type);
        let last_extension = segments.last().copied().and_then(split_extension);
        let file = match last_extension {
            Some((stem, url_ext)) if !trailing_slash => {
                self.check_mimetype(url, url_ext, content_type);
                segments.pop();
                format!("{stem}{suffix}.{url_ext}")
            }
            _ => format!("index{suffix}.{ext}"),
        };

        let mut path = segments.join("/");
        if !path.is_empty() {
            path.push('/');
        }
        path.push_str(&file);
        Ok(path)
    }

    /// Warn when `url_ext` does not map to `content_type`. Returns whether a
    /// warning was logged.
    fn check_mimetype(&self, url: &str, url_ext: &str, content_type: &str) -> bool {
        if !self.warn_mismatch {
            return false;
        }
        let known = self.mimetypes.iter().any(|(_, e)| e == url_ext);
        let matches = self
            .mimetypes
            .iter()
            .any(|(m, e)| e == url_ext && m == content_type);
        if matches || (!known && content_type == self.default_mimetype) {
            return false;
        }
        warn!(
            url,
            content_type,
            extension = url_ext,
            "extension does not match content type; a file server will serve it differently"
        );
        true
    }
}

/// Split `name.ext` into `(name, ext)`. Dotfiles and trailing dots have no
/// extension.
fn split_extension(segment: &str) -> Option<(&str, &str)> {
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some((stem, ext))
}

/// Result of claiming a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// First URL at this path.
    New,
    /// Another URL already produced identical bytes here.
    Alias,
}

#[derive(Debug)]
struct FileClaim {
    url: String,
    digest: String,
}

/// Every path claimed this run, plus every directory those paths imply.
#[derive(Debug, Default)]
pub struct CollisionTable {
    files: HashMap<String, FileClaim>,
    /// Directory → first URL that needed it.
    dirs: HashMap<String, String>,
}

impl CollisionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&mut self, path: &str, url: &str, digest: &str) -> Result<Claim, FreezeError> {
        let collision = |first_url: &str, at: &str| FreezeError::PathCollision {
            path: at.to_string(),
            first_url: first_url.to_string(),
            second_url: url.to_string(),
        };

        if let Some(existing) = self.files.get(path) {
            if existing.digest == digest {
                return Ok(Claim::Alias);
            }
            return Err(collision(&existing.url, path));
        }
        if let Some(first_url) = self.dirs.get(path) {
            return Err(collision(first_url, path));
        }
        let ancestors: Vec<&str> = path
            .match_indices('/')
            .map(|(i, _)| &path[..i])
            .collect();
        for dir in &ancestors {
            if let Some(existing) = self.files.get(*dir) {
                return Err(collision(&existing.url, dir));
            }
        }

        for dir in ancestors {
            self.dirs
                .entry(dir.to_string())
                .or_insert_with(|| url.to_string());
        }
        self.files.insert(
            path.to_string(),
            FileClaim {
                url: url.to_string(),
                digest: digest.to_string(),
            },
        );
        Ok(Claim::New)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> PathResolver {
        PathResolver::new(&FreezerConfig::default())
    }

    fn resolve(url: &str, ct: &str) -> String {
        resolver().resolve(url, ct).unwrap()
    }

    // =========================================================================
    // Index convention and extensions
    // =========================================================================

    #[test]
    fn root_is_index_html() {
        assert_eq!(resolve("/", "text/html"), "index.html");
    }

    #[test]
    fn extensionless_path_gets_index_file() {
        assert_eq!(resolve("/post/1", "text/html"), "post/1/index.html");
        assert_eq!(resolve("/about", "text/plain"), "about/index.txt");
    }

    #[test]
    fn trailing_slash_gets_index_file() {
        assert_eq!(resolve("/post/1/", "text/html"), "post/1/index.html");
        // Even when the last segment looks like a file name
        assert_eq!(resolve("/v1.2/", "text/html"), "v1.2/index.html");
    }

    #[test]
    fn existing_extension_is_not_doubled() {
        assert_eq!(resolve("/feed.xml", "application/xml"), "feed.xml");
        assert_eq!(resolve("/static/css/site.css", "text/css"), "static/css/site.css");
    }

    #[test]
    fn dotfile_has_no_extension() {
        assert_eq!(resolve("/.well-known", "application/json"), ".well-known/index.json");
    }

    #[test]
    fn unknown_content_type_uses_default_extension() {
        assert_eq!(resolve("/blob", "application/x-weird"), "blob/index.bin");
    }

    #[test]
    fn mismatched_extension_is_kept() {
        // Warned about, but never rewritten
        assert_eq!(resolve("/data.json", "text/html"), "data.json");
    }

    #[test]
    fn mimetype_mismatch_warns() {
        let r = resolver();
        assert!(r.check_mimetype("/data.json", "json", "text/html"));
        assert!(r.check_mimetype("/feed.xml", "xml", "application/json"));
    }

    #[test]
    fn matching_mimetype_does_not_warn() {
        let r = resolver();
        assert!(!r.check_mimetype("/data.json", "json", "application/json"));
        // Either mapping of a shared extension counts as a match
        assert!(!r.check_mimetype("/feed.xml", "xml", "text/xml"));
        assert!(!r.check_mimetype("/feed.xml", "xml", "application/xml"));
        // Unknown extension served with the default type
        assert!(!r.check_mimetype("/blob.dat", "dat", "application/octet-stream"));
    }

    #[test]
    fn ignore_mimetype_warnings_silences_mismatch() {
        let config = FreezerConfig {
            ignore_mimetype_warnings: true,
            ..FreezerConfig::default()
        };
        let r = PathResolver::new(&config);
        assert!(!r.check_mimetype("/data.json", "json", "text/html"));
        assert_eq!(r.resolve("/data.json", "text/html").unwrap(), "data.json");
    }

    #[test]
    fn content_type_is_normalized() {
        let r = resolver();
        assert_eq!(r.content_type(Some("Text/HTML; charset=utf-8")), "text/html");
        assert_eq!(r.content_type(None), "application/octet-stream");
        assert_eq!(r.content_type(Some("  ")), "application/octet-stream");
    }

    #[test]
    fn percent_encoded_paths_are_decoded() {
        assert_eq!(resolve("/tag/caf%C3%A9", "text/html"), "tag/café/index.html");
        assert_eq!(resolve("/a%20b.txt", "text/plain"), "a b.txt");
    }

    #[test]
    fn fragment_is_dropped() {
        assert_eq!(resolve("/about#team", "text/html"), "about/index.html");
    }

    // =========================================================================
    // Query policy
    // =========================================================================

    #[test]
    fn query_hash_suffix_is_stable_and_distinct() {
        let a = resolve("/search?q=rust", "text/html");
        let b = resolve("/search?q=go", "text/html");
        assert!(a.starts_with("search/index-q"));
        assert!(a.ends_with(".html"));
        assert_eq!(a.len(), "search/index-q".len() + 8 + ".html".len());
        assert_ne!(a, b);
        assert_eq!(a, resolve("/search?q=rust", "text/html"));
    }

    #[test]
    fn query_hash_goes_before_existing_extension() {
        let p = resolve("/feed.xml?page=2", "application/xml");
        assert!(p.starts_with("feed-q"));
        assert!(p.ends_with(".xml"));
    }

    #[test]
    fn empty_query_is_no_query() {
        assert_eq!(resolve("/search?", "text/html"), "search/index.html");
    }

    #[test]
    fn query_hash_length_is_configurable() {
        let mut config = FreezerConfig::default();
        config.query.hash_length = 16;
        let p = PathResolver::new(&config)
            .resolve("/s?q=1", "text/html")
            .unwrap();
        assert_eq!(p.len(), "s/index-q".len() + 16 + ".html".len());
    }

    #[test]
    fn query_ignore_policy_drops_query() {
        let mut config = FreezerConfig::default();
        config.query.policy = QueryPolicy::Ignore;
        let r = PathResolver::new(&config);
        assert_eq!(r.resolve("/s?q=1", "text/html").unwrap(), "s/index.html");
    }

    #[test]
    fn query_reject_policy_fails() {
        let mut config = FreezerConfig::default();
        config.query.policy = QueryPolicy::Reject;
        let err = PathResolver::new(&config)
            .resolve("/s?q=1", "text/html")
            .unwrap_err();
        assert!(matches!(err, FreezeError::UnresolvablePath { .. }));
    }

    // =========================================================================
    // Unsafe paths
    // =========================================================================

    #[test]
    fn unsafe_paths_are_rejected() {
        let r = resolver();
        for url in [
            "/../etc/passwd",
            "/a/./b",
            "/a//b",
            "/a%2F..%2Fb",
            "/a%5Cb",
            "/a%00b",
            "relative",
            "/%FF",
        ] {
            let err = r.resolve(url, "text/html").unwrap_err();
            assert!(
                matches!(err, FreezeError::UnresolvablePath { .. }),
                "{url} should be unresolvable"
            );
        }
    }

    // =========================================================================
    // CollisionTable
    // =========================================================================

    #[test]
    fn identical_bytes_are_aliases() {
        let mut t = CollisionTable::new();
        let d = digest(b"same");
        assert_eq!(t.claim("a/index.html", "/a", &d).unwrap(), Claim::New);
        assert_eq!(t.claim("a/index.html", "/a/", &d).unwrap(), Claim::Alias);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn differing_bytes_collide_naming_both_urls() {
        let mut t = CollisionTable::new();
        t.claim("gallery/photo/index.html", "/gallery/photo", &digest(b"one"))
            .unwrap();
        let err = t
            .claim("gallery/photo/index.html", "/gallery/photo/", &digest(b"two"))
            .unwrap_err();
        let FreezeError::PathCollision {
            path,
            first_url,
            second_url,
        } = err
        else {
            panic!("expected collision");
        };
        assert_eq!(path, "gallery/photo/index.html");
        assert_eq!(first_url, "/gallery/photo");
        assert_eq!(second_url, "/gallery/photo/");
    }

    #[test]
    fn file_and_directory_at_same_path_collide() {
        let mut t = CollisionTable::new();
        t.claim("docs/guide.txt", "/docs/guide.txt", &digest(b"g"))
            .unwrap();
        let err = t
            .claim("docs/guide.txt/index.html", "/docs/guide.txt/", &digest(b"h"))
            .unwrap_err();
        assert!(matches!(err, FreezeError::PathCollision { ref path, .. } if path == "docs/guide.txt"));

        // And the other way round
        let mut t = CollisionTable::new();
        t.claim("x/y/index.html", "/x/y", &digest(b"y")).unwrap();
        let err = t.claim("x/y", "/x/y-file", &digest(b"f")).unwrap_err();
        assert!(matches!(err, FreezeError::PathCollision { ref first_url, .. } if first_url == "/x/y"));
    }
}
