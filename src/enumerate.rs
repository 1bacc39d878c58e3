//! URL enumeration: which URLs exist.
//!
//! The [`Enumerator`] walks the routing table in declaration order. For each
//! rule it pulls bindings from the [`GeneratorRegistry`] one at a time,
//! substitutes them into the pattern and yields a [`UrlItem`] per freezable
//! method. Raw-URL generators come after all rules. Nothing is materialized
//! up front, so peak memory does not grow with the size of the site.
//!
//! ## Deduplication
//!
//! A `(url, method)` pair is yielded at most once per run, however many
//! generators produce it. Later duplicates are dropped silently.
//!
//! ## Pending queue
//!
//! Redirect targets and linked URLs discovered while capturing are fed back
//! with [`Enumerator::enqueue`]. Queued items are yielded before the next
//! generated one, subject to the same deduplication.

use crate::app::{Method, RouteRule};
use crate::error::{BindingError, BindingProblem, FreezeError};
use crate::generators::{Binding, Generator, GeneratorRegistry};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use tracing::{debug, warn};

/// Where a URL item came from. Used in error reports and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Rule { rule: String, binding: Binding },
    UrlGenerator { label: String },
    Redirect { from: String },
    Link { from: String },
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rule { rule, binding } if binding.values().is_empty() => {
                write!(f, "rule '{rule}'")
            }
            Self::Rule { rule, binding } => write!(f, "rule '{rule}' {binding}"),
            Self::UrlGenerator { label } => write!(f, "generator '{label}'"),
            Self::Redirect { from } => write!(f, "redirect from {from}"),
            Self::Link { from } => write!(f, "link from {from}"),
        }
    }
}

/// One concrete `(url, method)` pair slated for capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlItem {
    /// Site-relative URL: path plus optional query, starting with `/`.
    pub url: String,
    pub method: Method,
    pub origin: Origin,
    /// Statuses the producing generator declared acceptable.
    pub expected_statuses: Vec<u16>,
    /// Redirect hops between this URL and the enumerated URL that led here.
    pub redirect_depth: usize,
}

impl UrlItem {
    pub fn new(url: impl Into<String>, origin: Origin) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            origin,
            expected_statuses: Vec::new(),
            redirect_depth: 0,
        }
    }

    pub fn rule(&self) -> Option<&str> {
        match &self.origin {
            Origin::Rule { rule, .. } => Some(rule),
            _ => None,
        }
    }

    pub fn expects(&self, status: u16) -> bool {
        self.expected_statuses.contains(&status)
    }
}

type RuleBindings<'a> = Box<dyn Iterator<Item = (Option<&'a Generator>, Binding)> + 'a>;
type RawUrls<'a> = Box<dyn Iterator<Item = (&'a str, &'a Generator, String)> + 'a>;

struct RuleCursor<'a> {
    rule: usize,
    bindings: RuleBindings<'a>,
}

/// Options that shape enumeration.
#[derive(Debug, Clone, Copy)]
pub struct EnumerateOptions {
    /// Emit the literal URL of rules without variable segments.
    pub with_no_argument_rules: bool,
}

impl Default for EnumerateOptions {
    fn default() -> Self {
        Self {
            with_no_argument_rules: true,
        }
    }
}

/// Lazy, deduplicating sequence of URL items.
pub struct Enumerator<'a> {
    rules: Vec<RouteRule>,
    registry: &'a GeneratorRegistry,
    options: EnumerateOptions,
    next_rule: usize,
    cursor: Option<RuleCursor<'a>>,
    raw_urls: Option<RawUrls<'a>>,
    ready: VecDeque<Result<UrlItem, BindingError>>,
    pending: VecDeque<UrlItem>,
    seen: HashSet<(String, Method)>,
    duplicates: usize,
}

impl<'a> Enumerator<'a> {
    /// Check the routing table against the registry and prepare enumeration.
    ///
    /// Fails with [`FreezeError::MissingGenerator`] for the first freezable
    /// rule that has variable segments but no generator.
    pub fn new(
        rules: Vec<RouteRule>,
        registry: &'a GeneratorRegistry,
        options: EnumerateOptions,
    ) -> Result<Self, FreezeError> {
        for rule in &rules {
            if rule.freezable_methods().next().is_none() {
                continue;
            }
            if !rule.is_static() && !registry.has_generator(&rule.name) {
                return Err(FreezeError::MissingGenerator {
                    rule: rule.name.clone(),
                });
            }
        }

        Ok(Self {
            rules,
            registry,
            options,
            next_rule: 0,
            cursor: None,
            raw_urls: Some(registry.urls()),
            ready: VecDeque::new(),
            pending: VecDeque::new(),
            seen: HashSet::new(),
            duplicates: 0,
        })
    }

    /// Feed a discovered URL back into the run.
    pub fn enqueue(&mut self, item: UrlItem) {
        self.pending.push_back(item);
    }

    /// Whether `(url, method)` has already been yielded this run.
    pub fn has_seen(&self, url: &str, method: Method) -> bool {
        self.seen.contains(&(url.to_string(), method))
    }

    /// Number of items dropped as duplicates so far.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    fn first_sighting(&mut self, item: &UrlItem) -> bool {
        let fresh = self.seen.insert((item.url.clone(), item.method));
        if !fresh {
            self.duplicates += 1;
            debug!(url = %item.url, origin = %item.origin, "duplicate URL collapsed");
        }
        fresh
    }

    /// Pull the next binding (or raw URL) into `ready`. False when exhausted.
    fn refill(&mut self) -> bool {
        loop {
            if let Some(cursor) = &mut self.cursor {
                if let Some((generator, binding)) = cursor.bindings.next() {
                    let rule = &self.rules[cursor.rule];
                    let expected = generator
                        .map(|g| g.expected_statuses().to_vec())
                        .unwrap_or_default();
                    match rule.pattern.build(binding.values(), &rule.defaults) {
                        Ok(url) => {
                            for method in rule.freezable_methods() {
                                self.ready.push_back(Ok(UrlItem {
                                    url: url.clone(),
                                    method,
                                    origin: Origin::Rule {
                                        rule: rule.name.clone(),
                                        binding: binding.clone(),
                                    },
                                    expected_statuses: expected.clone(),
                                    redirect_depth: 0,
                                }));
                            }
                        }
                        Err(problem) => self.ready.push_back(Err(BindingError {
                            rule: rule.name.clone(),
                            binding: binding.to_string(),
                            problem: problem.into(),
                        })),
                    }
                    return true;
                }
                self.cursor = None;
            }

            if self.next_rule < self.rules.len() {
                let index = self.next_rule;
                self.next_rule += 1;
                let rule = &self.rules[index];
                if rule.freezable_methods().next().is_none() {
                    debug!(rule = %rule.name, "no freezable method, skipping");
                    continue;
                }
                if !self.registry.has_generator(&rule.name) && !self.options.with_no_argument_rules
                {
                    debug!(rule = %rule.name, "no generator and default generator disabled");
                    continue;
                }

                let registered = self
                    .registry
                    .bindings_for(&rule.name)
                    .map(|(g, b)| (Some(g), b));
                let bindings: RuleBindings<'a> =
                    if rule.is_static() && self.options.with_no_argument_rules {
                        Box::new(std::iter::once((None, Binding::new())).chain(registered))
                    } else {
                        Box::new(registered)
                    };
                self.cursor = Some(RuleCursor {
                    rule: index,
                    bindings,
                });
                continue;
            }

            if let Some(raw_urls) = &mut self.raw_urls {
                if let Some((label, generator, url)) = raw_urls.next() {
                    if url.starts_with('/') {
                        self.ready.push_back(Ok(UrlItem {
                            url,
                            method: Method::Get,
                            origin: Origin::UrlGenerator {
                                label: label.to_string(),
                            },
                            expected_statuses: generator.expected_statuses().to_vec(),
                            redirect_depth: 0,
                        }));
                    } else {
                        self.ready.push_back(Err(BindingError {
                            rule: label.to_string(),
                            binding: format!("\"{url}\""),
                            problem: BindingProblem::NotAbsolute(url),
                        }));
                    }
                    return true;
                }
                self.raw_urls = None;
            }

            return false;
        }
    }
}

impl Iterator for Enumerator<'_> {
    type Item = Result<UrlItem, BindingError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                if self.first_sighting(&item) {
                    return Some(Ok(item));
                }
                continue;
            }
            match self.ready.pop_front() {
                Some(Ok(item)) => {
                    if self.first_sighting(&item) {
                        return Some(Ok(item));
                    }
                }
                Some(Err(err)) => return Some(Err(err)),
                None => {
                    if !self.refill() {
                        if self.duplicates > 0 {
                            debug!(duplicates = self.duplicates, "enumeration finished");
                        }
                        return None;
                    }
                }
            }
        }
    }
}

/// Warn about generators registered for rules the application does not have.
pub(crate) fn warn_orphan_generators(rules: &[RouteRule], registry: &GeneratorRegistry) {
    for name in registry.rule_names() {
        if !rules.iter().any(|r| r.name == name) {
            warn!(rule = %name, "generator registered for unknown rule");
        }
    }
}
