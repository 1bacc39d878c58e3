//! Freezer configuration.
//!
//! Handles loading, validating, and merging a `freezer.toml` file. User values
//! are merged key-by-key on top of the stock defaults, so a file only needs
//! the keys it wants to change. This includes the MIME table: adding one
//! `[mimetypes]` entry extends the defaults instead of replacing them.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! output_root = "build"          # Destination directory
//! # base_url = "https://example.com/blog/"  # Handed to handlers for absolute links
//! redirect_follow_limit = 10     # Hard cap on redirect chain depth
//! redirect_policy = "write"      # write | follow | ignore | error
//! remove_extra_files = true      # Prune files not produced by this run
//! destination_ignore = []        # Globs never pruned, e.g. [".git/**", "CNAME"]
//! with_no_argument_rules = true  # Freeze rules without variable segments automatically
//! follow_links = true            # Freeze in-site URLs handlers report linking to
//! lenient_bindings = false       # Collect bad bindings instead of aborting
//! default_mimetype = "application/octet-stream"
//! ignore_mimetype_warnings = false
//!
//! [query]
//! policy = "hash"                # hash | ignore | reject
//! hash_length = 8                # Hex chars of the query hash suffix (4-64)
//!
//! [mimetypes]
//! "text/html" = "html"
//! "text/plain" = "txt"
//! # ...
//!
//! [processing]
//! max_workers = 4                # Parallel writers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// What to do with a 3xx response that carries a `Location`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectPolicy {
    /// Write the redirect's own body; freeze the in-site target separately.
    #[default]
    Write,
    /// Dispatch the chain inline and write the final body at the original path.
    Follow,
    /// Write nothing for the redirecting URL; still freeze the target.
    Ignore,
    /// Treat any redirect as an unexpected status.
    Error,
}

/// How URLs that carry a query string are mapped to files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryPolicy {
    /// Suffix the filename with a stable hash of the query.
    #[default]
    Hash,
    /// Drop the query; the collision table decides whether that is safe.
    Ignore,
    /// Refuse URLs with a query string.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryConfig {
    pub policy: QueryPolicy,
    pub hash_length: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            policy: QueryPolicy::Hash,
            hash_length: 8,
        }
    }
}

/// Parallel write settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel writers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_workers: Option<usize>,
}

/// Resolve the effective worker count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)`, at least 1
pub fn effective_workers(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_workers
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// Freezer configuration loaded from `freezer.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FreezerConfig {
    pub output_root: PathBuf,
    /// Site base URL. Passed to every dispatch so handlers can render
    /// absolute links, and decides which absolute redirect and link targets
    /// belong to the site. Never fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub redirect_follow_limit: usize,
    pub redirect_policy: RedirectPolicy,
    pub remove_extra_files: bool,
    pub destination_ignore: Vec<String>,
    pub with_no_argument_rules: bool,
    pub follow_links: bool,
    pub lenient_bindings: bool,
    pub default_mimetype: String,
    pub ignore_mimetype_warnings: bool,
    pub query: QueryConfig,
    /// Content type → file extension (without the dot).
    pub mimetypes: BTreeMap<String, String>,
    pub processing: ProcessingConfig,
}

const DEFAULT_MIMETYPES: &[(&str, &str)] = &[
    ("application/atom+xml", "atom"),
    ("application/javascript", "js"),
    ("application/json", "json"),
    ("application/ld+json", "jsonld"),
    ("application/manifest+json", "webmanifest"),
    ("application/octet-stream", "bin"),
    ("application/pdf", "pdf"),
    ("application/rss+xml", "rss"),
    ("application/wasm", "wasm"),
    ("application/xml", "xml"),
    ("audio/mpeg", "mp3"),
    ("font/otf", "otf"),
    ("font/ttf", "ttf"),
    ("font/woff", "woff"),
    ("font/woff2", "woff2"),
    ("image/avif", "avif"),
    ("image/gif", "gif"),
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/svg+xml", "svg"),
    ("image/vnd.microsoft.icon", "ico"),
    ("image/webp", "webp"),
    ("image/x-icon", "ico"),
    ("text/css", "css"),
    ("text/csv", "csv"),
    ("text/html", "html"),
    ("text/javascript", "js"),
    ("text/markdown", "md"),
    ("text/plain", "txt"),
    ("text/xml", "xml"),
    ("video/mp4", "mp4"),
];

pub fn default_mimetypes() -> BTreeMap<String, String> {
    DEFAULT_MIMETYPES
        .iter()
        .map(|(mime, ext)| (mime.to_string(), ext.to_string()))
        .collect()
}

impl Default for FreezerConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("build"),
            base_url: None,
            redirect_follow_limit: 10,
            redirect_policy: RedirectPolicy::Write,
            remove_extra_files: true,
            destination_ignore: Vec::new(),
            with_no_argument_rules: true,
            follow_links: true,
            lenient_bindings: false,
            default_mimetype: "application/octet-stream".to_string(),
            ignore_mimetype_warnings: false,
            query: QueryConfig::default(),
            mimetypes: default_mimetypes(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl FreezerConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_root.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "output_root must not be empty".into(),
            ));
        }
        if !(4..=64).contains(&self.query.hash_length) {
            return Err(ConfigError::Validation(
                "query.hash_length must be 4-64".into(),
            ));
        }
        for (mime, ext) in &self.mimetypes {
            if !mime.contains('/') || *mime != mime.to_ascii_lowercase() {
                return Err(ConfigError::Validation(format!(
                    "mimetypes: '{mime}' is not a lowercase type/subtype"
                )));
            }
            if ext.is_empty() || ext.contains(['.', '/', '\\']) {
                return Err(ConfigError::Validation(format!(
                    "mimetypes: extension '{ext}' for '{mime}' must be non-empty, without dots or slashes"
                )));
            }
        }
        if !self.mimetypes.contains_key(&self.default_mimetype) {
            return Err(ConfigError::Validation(format!(
                "default_mimetype '{}' has no entry in [mimetypes]",
                self.default_mimetype
            )));
        }
        self.parsed_base_url()?;
        for pattern in &self.destination_ignore {
            if let Err(err) = wax::Glob::new(pattern) {
                return Err(ConfigError::Validation(format!(
                    "destination_ignore: invalid glob '{pattern}': {err}"
                )));
            }
        }
        Ok(())
    }

    /// The parsed `base_url`, if configured.
    pub fn parsed_base_url(&self) -> Result<Option<Url>, ConfigError> {
        let Some(raw) = &self.base_url else {
            return Ok(None);
        };
        let url = Url::parse(raw)
            .map_err(|e| ConfigError::Validation(format!("base_url '{raw}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ConfigError::Validation(format!(
                "base_url '{raw}' must be an http(s) URL with a host"
            )));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(ConfigError::Validation(format!(
                "base_url '{raw}' must not carry a query or fragment"
            )));
        }
        Ok(Some(url))
    }

    /// The configured `base_url`, or `http://localhost/` when unset.
    pub fn site_base(&self) -> Result<Url, ConfigError> {
        match self.parsed_base_url()? {
            Some(url) => Ok(url),
            None => Url::parse(DEFAULT_BASE_URL)
                .map_err(|e| ConfigError::Validation(format!("default base URL: {e}"))),
        }
    }
}

const DEFAULT_BASE_URL: &str = "http://localhost/";

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(FreezerConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<FreezerConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: FreezerConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path`, merged on top of stock defaults and validated.
///
/// A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<FreezerConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `freezer.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Freezer Configuration
# =====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.

# Directory the static site is written to.
output_root = "build"

# Base URL the site will be served from. Handlers receive it with every
# request to render absolute links. Absolute redirect and link targets are
# frozen only when they share its origin and path prefix. Never fetched.
# base_url = "https://example.com/"

# Maximum number of redirect hops between an enumerated URL and a target.
# Exceeding it aborts the run.
redirect_follow_limit = 10

# What to do with 3xx responses that carry a Location header:
#   write  - write the redirect body, freeze the target separately
#   follow - write the final target's body at the redirecting path
#   ignore - write nothing for the redirecting URL, still freeze the target
#   error  - abort the run
redirect_policy = "write"

# Delete files in output_root that this run did not produce.
remove_extra_files = true

# Glob patterns (relative to output_root) that are never deleted.
destination_ignore = []

# Freeze rules without variable segments without registering a generator.
with_no_argument_rules = true

# Freeze in-site URLs that handlers report linking to.
follow_links = true

# Collect bindings that do not fit their rule instead of aborting.
lenient_bindings = false

# Content type assumed when a response does not declare one.
default_mimetype = "application/octet-stream"

# Silence warnings when a URL's extension disagrees with its content type.
ignore_mimetype_warnings = false

# ---------------------------------------------------------------------------
# Query strings
# ---------------------------------------------------------------------------
[query]
# hash   - "search?q=x" -> "search/index-q<hash>.html"
# ignore - drop the query (identical content may share a file)
# reject - abort on URLs with a query string
policy = "hash"
# Hex characters of the SHA-256 query hash (4-64).
hash_length = 8

# ---------------------------------------------------------------------------
# Content type -> file extension. Entries merge with the built-in table.
# ---------------------------------------------------------------------------
[mimetypes]
"text/html" = "html"
"text/plain" = "txt"
"text/css" = "css"
"application/json" = "json"
"application/octet-stream" = "bin"

# ---------------------------------------------------------------------------
# Parallel writing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel writers. Omit for auto (= number of CPU cores).
# max_workers = 4
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = FreezerConfig::default();
        assert_eq!(config.output_root, PathBuf::from("build"));
        assert_eq!(config.redirect_follow_limit, 10);
        assert_eq!(config.redirect_policy, RedirectPolicy::Write);
        assert_eq!(config.query.policy, QueryPolicy::Hash);
        assert!(config.remove_extra_files);
        assert_eq!(config.mimetypes["text/html"], "html");
        assert_eq!(config.mimetypes["text/plain"], "txt");
    }

    #[test]
    fn validate_default_config_passes() {
        assert!(FreezerConfig::default().validate().is_ok());
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
redirect_policy = "follow"

[query]
policy = "reject"
"#;
        let config: FreezerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.redirect_policy, RedirectPolicy::Follow);
        assert_eq!(config.query.policy, QueryPolicy::Reject);
        // Unspecified defaults preserved
        assert_eq!(config.query.hash_length, 8);
        assert_eq!(config.redirect_follow_limit, 10);
    }

    // =========================================================================
    // load_config tests
    // =========================================================================

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("freezer.toml")).unwrap();
        assert_eq!(config, FreezerConfig::default());
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("freezer.toml");
        fs::write(
            &path,
            r#"
output_root = "public"
base_url = "https://example.com/blog/"
destination_ignore = [".git/**", "CNAME"]
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.output_root, PathBuf::from("public"));
        assert_eq!(
            config.base_url.as_deref(),
            Some("https://example.com/blog/")
        );
        assert_eq!(config.destination_ignore, vec![".git/**", "CNAME"]);
    }

    #[test]
    fn mimetype_overlay_extends_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("freezer.toml");
        fs::write(
            &path,
            r#"
[mimetypes]
"application/x-custom" = "custom"
"text/plain" = "text"
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.mimetypes["application/x-custom"], "custom");
        assert_eq!(config.mimetypes["text/plain"], "text");
        // Untouched defaults survive the merge
        assert_eq!(config.mimetypes["text/html"], "html");
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("freezer.toml");
        fs::write(&path, "this is not valid toml [[[").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Toml(_))));
    }

    // =========================================================================
    // Unknown key rejection tests
    // =========================================================================

    #[test]
    fn unknown_key_rejected() {
        let result: Result<FreezerConfig, _> = toml::from_str("output_rot = \"x\"");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("unknown field"));
    }

    #[test]
    fn unknown_nested_key_rejected() {
        let result: Result<FreezerConfig, _> = toml::from_str("[query]\npolcy = \"hash\"");
        assert!(result.is_err());
    }

    #[test]
    fn unknown_policy_rejected() {
        let result: Result<FreezerConfig, _> = toml::from_str("redirect_policy = \"bounce\"");
        assert!(result.is_err());
    }

    // =========================================================================
    // Validation tests
    // =========================================================================

    #[test]
    fn validate_hash_length_bounds() {
        let mut config = FreezerConfig::default();
        config.query.hash_length = 4;
        assert!(config.validate().is_ok());
        config.query.hash_length = 64;
        assert!(config.validate().is_ok());
        config.query.hash_length = 3;
        assert!(config.validate().is_err());
        config.query.hash_length = 65;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_extension_without_dot() {
        let mut config = FreezerConfig::default();
        config
            .mimetypes
            .insert("text/html".into(), ".html".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains(".html"));
    }

    #[test]
    fn validate_mime_must_be_lowercase() {
        let mut config = FreezerConfig::default();
        config.mimetypes.insert("Text/HTML".into(), "html".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_default_mimetype_must_be_mapped() {
        let mut config = FreezerConfig::default();
        config.default_mimetype = "application/x-unknown".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("default_mimetype"));
    }

    #[test]
    fn validate_base_url() {
        let mut config = FreezerConfig::default();
        config.base_url = Some("https://example.com/blog/".into());
        assert!(config.validate().is_ok());

        config.base_url = Some("not a url".into());
        assert!(config.validate().is_err());

        config.base_url = Some("ftp://example.com/".into());
        assert!(config.validate().is_err());

        config.base_url = Some("https://example.com/?x=1".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn site_base_defaults_to_localhost() {
        let mut config = FreezerConfig::default();
        assert_eq!(config.site_base().unwrap().as_str(), "http://localhost/");
        config.base_url = Some("https://example.com/blog/".into());
        assert_eq!(
            config.site_base().unwrap().as_str(),
            "https://example.com/blog/"
        );
    }

    #[test]
    fn validate_destination_ignore_globs() {
        let mut config = FreezerConfig::default();
        config.destination_ignore = vec![".git/**".into()];
        assert!(config.validate().is_ok());
        config.destination_ignore = vec!["[".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_config_validates_values() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("freezer.toml");
        fs::write(&path, "[query]\nhash_length = 200\n").unwrap();
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::Validation(_))
        ));
    }

    // =========================================================================
    // Workers
    // =========================================================================

    #[test]
    fn effective_workers_auto() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(effective_workers(&ProcessingConfig::default()), cores);
    }

    #[test]
    fn effective_workers_user_constrains_down() {
        let config = ProcessingConfig {
            max_workers: Some(1),
        };
        assert_eq!(effective_workers(&config), 1);
    }

    #[test]
    fn effective_workers_zero_means_one() {
        let config = ProcessingConfig {
            max_workers: Some(0),
        };
        assert_eq!(effective_workers(&config), 1);
    }

    // =========================================================================
    // Stock config
    // =========================================================================

    #[test]
    fn stock_config_toml_is_valid_and_matches_defaults() {
        let value: toml::Value = toml::from_str(stock_config_toml()).unwrap();
        let config = resolve_config(stock_defaults_value().unwrap(), Some(value)).unwrap();
        assert_eq!(config, FreezerConfig::default());
    }

    #[test]
    fn merge_toml_table_merge() {
        let base: toml::Value = toml::from_str("[a]\nx = 1\ny = 2").unwrap();
        let overlay: toml::Value = toml::from_str("[a]\ny = 3\nz = 4").unwrap();
        let merged = merge_toml(base, overlay);
        let a = merged.get("a").unwrap();
        assert_eq!(a.get("x").unwrap().as_integer(), Some(1));
        assert_eq!(a.get("y").unwrap().as_integer(), Some(3));
        assert_eq!(a.get("z").unwrap().as_integer(), Some(4));
    }
}
