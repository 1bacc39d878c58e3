//! Shared test utilities for the freezer test suite.
//!
//! Provides a scriptable in-process application, a temp-dir config fixture,
//! and output-tree assertions.
//!
//! # Usage
//!
//! ```rust,ignore
//! use crate::test_helpers::*;
//!
//! let app = MockApp::new()
//!     .rule("about", "/about")
//!     .page("/about", "text/plain", "About us");
//! let (tmp, config) = temp_config();
//! let mut freezer = Freezer::new(app, GeneratorRegistry::new(), config);
//! freezer.run().unwrap();
//!
//! assert_eq!(read_output(tmp.path(), "about/index.txt"), "About us");
//! assert_tree(tmp.path(), &["about/index.txt"]);
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;
use url::Url;
use walkdir::WalkDir;

use crate::app::{Application, Method, Response, RouteRule};
use crate::config::FreezerConfig;

// =========================================================================
// MockApp
// =========================================================================

/// Application with a fixed routing table and scripted responses.
///
/// Unknown URLs answer 404. Every dispatch is recorded.
#[derive(Default)]
pub struct MockApp {
    rules: Vec<RouteRule>,
    responses: HashMap<String, Response>,
    calls: Mutex<Vec<(Method, String)>>,
    bases: Mutex<Vec<String>>,
}

impl MockApp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `GET` rule.
    pub fn rule(mut self, name: &str, pattern: &str) -> Self {
        self.rules.push(RouteRule::new(name, pattern).unwrap());
        self
    }

    pub fn with_rule(mut self, rule: RouteRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Answer `url` with a 200 of the given content type.
    pub fn page(self, url: &str, content_type: &str, body: &str) -> Self {
        self.respond(url, Response::ok(content_type, body))
    }

    pub fn respond(mut self, url: &str, response: Response) -> Self {
        self.responses.insert(url.to_string(), response);
        self
    }

    /// Replace a response between runs.
    pub fn set(&mut self, url: &str, response: Response) {
        self.responses.insert(url.to_string(), response);
    }

    /// URLs dispatched so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, url)| url.clone())
            .collect()
    }

    /// Base URL passed with each dispatch, in order.
    pub fn bases(&self) -> Vec<String> {
        self.bases.lock().unwrap().clone()
    }
}

impl Application for MockApp {
    fn rules(&self) -> Vec<RouteRule> {
        self.rules.clone()
    }

    fn dispatch(&self, method: Method, url: &str, base: &Url) -> Response {
        self.calls.lock().unwrap().push((method, url.to_string()));
        self.bases.lock().unwrap().push(base.to_string());
        self.responses
            .get(url)
            .cloned()
            .unwrap_or_else(|| Response::new(404))
    }
}

// =========================================================================
// Fixtures
// =========================================================================

/// Default config writing into a fresh temp directory.
pub fn temp_config() -> (TempDir, FreezerConfig) {
    let tmp = TempDir::new().unwrap();
    let config = FreezerConfig {
        output_root: tmp.path().to_path_buf(),
        ..FreezerConfig::default()
    };
    (tmp, config)
}

// =========================================================================
// Output assertions
// =========================================================================

/// Read an output file as UTF-8. Panics with the path on failure.
pub fn read_output(root: &Path, rel: &str) -> String {
    std::fs::read_to_string(root.join(rel))
        .unwrap_or_else(|e| panic!("cannot read output '{rel}': {e}"))
}

/// All files under `root`, relative, `/` separated, sorted.
pub fn output_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .collect();
    files.sort();
    files
}

/// Assert the output tree contains exactly `expected` files.
pub fn assert_tree(root: &Path, expected: &[&str]) {
    let mut expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    expected.sort();
    assert_eq!(output_files(root), expected, "output tree mismatch");
}
