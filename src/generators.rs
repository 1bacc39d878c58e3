//! URL generator registry.
//!
//! A rule with variable segments cannot be frozen until something says which
//! values those segments take. Application code supplies that knowledge by
//! registering *generators*: callables producing a lazy sequence of
//! [`Binding`]s for a rule.
//!
//! ```rust,ignore
//! let mut registry = GeneratorRegistry::new();
//! registry.register("post", || (1..=2).map(|id| Binding::new().with("id", id)));
//! registry
//!     .register("legacy", || [Binding::new().with("slug", "gone")])
//!     .expect_status(404);
//! registry.register_urls("sitemap", || ["/sitemap.xml", "/robots.txt"]);
//! ```
//!
//! Generators are called once per run, so the sequence is restartable across
//! runs but consumed at most once within one. Several generators for the same
//! rule are unioned in registration order.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tracing::warn;
use walkdir::WalkDir;

/// Concrete values for a rule's variable segments.
///
/// Values naming no segment of the rule end up in the query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binding {
    values: BTreeMap<String, String>,
}

impl Binding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, segment: impl Into<String>, value: impl ToString) -> Self {
        self.values.insert(segment.into(), value.to_string());
        self
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    pub fn get(&self, segment: &str) -> Option<&str> {
        self.values.get(segment).map(String::as_str)
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for Binding {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.to_string()))
                .collect(),
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}: {v}")?;
        }
        f.write_str("}")
    }
}

type BindingFn = Box<dyn Fn() -> Box<dyn Iterator<Item = Binding>>>;
type UrlFn = Box<dyn Fn() -> Box<dyn Iterator<Item = String>>>;

enum Source {
    Bindings(BindingFn),
    Urls(UrlFn),
}

/// A registered generator plus its per-URL markers.
pub struct Generator {
    source: Source,
    expected_statuses: Vec<u16>,
}

impl Generator {
    /// Declare that URLs from this generator may answer with `status`.
    ///
    /// Such responses are skipped with a warning instead of failing the run.
    pub fn expect_status(&mut self, status: u16) -> &mut Self {
        if !self.expected_statuses.contains(&status) {
            self.expected_statuses.push(status);
        }
        self
    }

    pub fn expected_statuses(&self) -> &[u16] {
        &self.expected_statuses
    }

    fn bindings(&self) -> Box<dyn Iterator<Item = Binding>> {
        match &self.source {
            Source::Bindings(f) => f(),
            Source::Urls(_) => Box::new(std::iter::empty()),
        }
    }

    fn urls(&self) -> Box<dyn Iterator<Item = String>> {
        match &self.source {
            Source::Urls(f) => f(),
            Source::Bindings(_) => Box::new(std::iter::empty()),
        }
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.source {
            Source::Bindings(_) => "bindings",
            Source::Urls(_) => "urls",
        };
        f.debug_struct("Generator")
            .field("kind", &kind)
            .field("expected_statuses", &self.expected_statuses)
            .finish()
    }
}

/// Rule name → generators, plus generators of raw URLs.
#[derive(Debug, Default)]
pub struct GeneratorRegistry {
    by_rule: BTreeMap<String, Vec<Generator>>,
    url_generators: Vec<(String, Generator)>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a binding generator with `rule`.
    pub fn register<F, I>(&mut self, rule: &str, f: F) -> &mut Generator
    where
        F: Fn() -> I + 'static,
        I: IntoIterator<Item = Binding>,
        I::IntoIter: 'static,
    {
        let source = Source::Bindings(Box::new(move || Box::new(f().into_iter())));
        let generators = self.by_rule.entry(rule.to_string()).or_default();
        generators.push(Generator {
            source,
            expected_statuses: Vec::new(),
        });
        let last = generators.len() - 1;
        &mut generators[last]
    }

    /// Register a generator yielding concrete URLs (`/sitemap.xml`) that are
    /// not tied to any rule. `label` identifies it in error reports.
    pub fn register_urls<F, I, S>(&mut self, label: &str, f: F) -> &mut Generator
    where
        F: Fn() -> I + 'static,
        I: IntoIterator<Item = S>,
        I::IntoIter: 'static,
        S: Into<String> + 'static,
    {
        let source = Source::Urls(Box::new(move || Box::new(f().into_iter().map(Into::into))));
        self.url_generators.push((
            label.to_string(),
            Generator {
                source,
                expected_statuses: Vec::new(),
            },
        ));
        let last = self.url_generators.len() - 1;
        &mut self.url_generators[last].1
    }

    /// Drop every generator registered for `rule`. Returns whether any existed.
    pub fn remove(&mut self, rule: &str) -> bool {
        self.by_rule.remove(rule).is_some()
    }

    pub fn has_generator(&self, rule: &str) -> bool {
        self.by_rule.get(rule).is_some_and(|g| !g.is_empty())
    }

    /// Names of all rules with at least one registered generator.
    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.by_rule.keys().map(String::as_str)
    }

    pub fn generators_for(&self, rule: &str) -> &[Generator] {
        self.by_rule.get(rule).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Lazy union of all bindings registered for `rule`, each paired with the
    /// generator that produced it.
    pub fn bindings_for<'a>(
        &'a self,
        rule: &str,
    ) -> Box<dyn Iterator<Item = (&'a Generator, Binding)> + 'a> {
        Box::new(
            self.generators_for(rule)
                .iter()
                .flat_map(|g| g.bindings().map(move |b| (g, b))),
        )
    }

    /// Lazy union of all raw-URL generators: `(label, generator, url)`.
    pub fn urls(&self) -> Box<dyn Iterator<Item = (&str, &Generator, String)> + '_> {
        Box::new(
            self.url_generators
                .iter()
                .flat_map(|(label, g)| g.urls().map(move |u| (label.as_str(), g, u))),
        )
    }
}

/// Generator for a static-file rule such as `/static/{filename:path}`.
///
/// Walks `root` at every run and yields one `{filename: <relative path>}`
/// binding per file, sorted by path, with `/` separators.
pub fn static_files(root: impl Into<PathBuf>) -> impl Fn() -> Box<dyn Iterator<Item = Binding>> {
    let root = root.into();
    move || {
        let base = root.clone();
        let walk = WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |entry| match entry {
                Ok(e) if e.file_type().is_file() => {
                    let rel = e.path().strip_prefix(&base).ok()?;
                    let parts: Vec<String> = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    Some(Binding::new().with("filename", parts.join("/")))
                }
                Ok(_) => None,
                Err(err) => {
                    warn!("skipping unreadable static file: {err}");
                    None
                }
            });
        Box::new(walk)
    }
}
