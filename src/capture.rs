//! Capture engine: what each URL produces.
//!
//! [`CaptureEngine::capture`] dispatches one [`UrlItem`] through the host
//! application in-process and applies the status policy:
//!
//! | Status | Result |
//! |--------|--------|
//! | 2xx | captured |
//! | 3xx with `Location` | handled per [`RedirectPolicy`] |
//! | 3xx without `Location` | captured |
//! | anything else, declared expected | skipped with a warning |
//! | anything else | [`FreezeError::CaptureStatus`] |
//!
//! Redirect and link targets are normalized against the site's base URL by
//! [`SiteScope`]. Targets outside the site are dropped; in-site targets come
//! back as site-relative URLs for the enumerator's pending queue.
//!
//! Nothing is written here.

use crate::app::{Application, Method, Response};
use crate::config::RedirectPolicy;
use crate::enumerate::UrlItem;
use crate::error::FreezeError;
use std::collections::HashMap;
use tracing::{debug, warn};
use url::Url;

/// The site's URL space: an origin plus a path prefix.
#[derive(Debug, Clone)]
pub struct SiteScope {
    base: Url,
}

impl SiteScope {
    /// Scope rooted at `base`. A base path without a trailing `/` is treated
    /// as a directory.
    pub fn new(mut base: Url) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.set_query(None);
        base.set_fragment(None);
        Self { base }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Resolve `href` as seen from the site-relative URL `from`.
    ///
    /// Returns the site-relative target (path plus query, no fragment), or
    /// `None` when the target lies outside the site.
    pub fn resolve(&self, from: &str, href: &str) -> Option<String> {
        let page = self.base.join(from.trim_start_matches('/')).ok()?;
        let target = match page.join(href) {
            Ok(url) => url,
            Err(err) => {
                warn!(from, href, "unparseable target URL: {err}");
                return None;
            }
        };
        if target.origin() != self.base.origin() {
            debug!(from, href, "target is off-site");
            return None;
        }
        let rest = target.path().strip_prefix(self.base.path())?;
        let mut relative = format!("/{rest}");
        if let Some(query) = target.query() {
            relative.push('?');
            relative.push_str(query);
        }
        Some(relative)
    }
}

/// A successfully captured response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Raw `Content-Type` header, if the response set one.
    pub content_type: Option<String>,
    /// In-site redirect target, site-relative.
    pub redirect: Option<String>,
    /// In-site URLs the handler linked to, site-relative.
    pub links: Vec<String>,
}

/// Outcome of capturing one URL item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    Captured(Captured),
    /// Failure status the generator declared expected. Nothing is written.
    Skipped { status: u16 },
    /// Redirect under [`RedirectPolicy::Ignore`]. Only the target is frozen.
    Ignored { redirect: Option<String> },
}

fn is_redirect(response: &Response) -> bool {
    (300..400).contains(&response.status) && response.header("Location").is_some()
}

pub struct CaptureEngine<'a, A: Application + ?Sized> {
    app: &'a A,
    scope: &'a SiteScope,
    policy: RedirectPolicy,
    limit: usize,
    follow_links: bool,
}

impl<'a, A: Application + ?Sized> CaptureEngine<'a, A> {
    pub fn new(
        app: &'a A,
        scope: &'a SiteScope,
        policy: RedirectPolicy,
        limit: usize,
        follow_links: bool,
    ) -> Self {
        Self {
            app,
            scope,
            policy,
            limit,
            follow_links,
        }
    }

    pub fn capture(&self, item: &UrlItem) -> Result<Capture, FreezeError> {
        let response = self.app.dispatch(item.method, &item.url, self.scope.base());
        debug!(url = %item.url, status = response.status, "dispatched");

        if is_redirect(&response) {
            return self.capture_redirect(item, response);
        }
        if !(200..400).contains(&response.status) {
            return self.unexpected(item, &item.url, response.status);
        }
        Ok(Capture::Captured(self.captured(&item.url, response, None)))
    }

    fn capture_redirect(
        &self,
        item: &UrlItem,
        response: Response,
    ) -> Result<Capture, FreezeError> {
        let location = response.header("Location").unwrap_or_default();
        let target = self.scope.resolve(&item.url, location);
        match self.policy {
            RedirectPolicy::Error => Err(self.status_error(item, &item.url, response.status)),
            RedirectPolicy::Ignore => {
                debug!(url = %item.url, ?target, "redirect ignored");
                Ok(Capture::Ignored { redirect: target })
            }
            RedirectPolicy::Write => Ok(Capture::Captured(self.captured(
                &item.url, response, target,
            ))),
            RedirectPolicy::Follow => {
                let Some(first) = target.clone() else {
                    return Ok(Capture::Captured(self.captured(&item.url, response, None)));
                };
                let mut chain = vec![item.url.clone(), first.clone()];
                let mut current = first;
                loop {
                    if chain.len() - 1 > self.limit {
                        return Err(FreezeError::RedirectLimit {
                            url: current,
                            limit: self.limit,
                        });
                    }
                    let next = self.app.dispatch(Method::Get, &current, self.scope.base());
                    if !is_redirect(&next) {
                        if !(200..400).contains(&next.status) {
                            return self.unexpected(item, &current, next.status);
                        }
                        let mut captured = self.captured(&current, next, None);
                        captured.redirect = target;
                        return Ok(Capture::Captured(captured));
                    }
                    let location = next.header("Location").unwrap_or_default();
                    let Some(hop) = self.scope.resolve(&current, location) else {
                        let mut captured = self.captured(&current, next, None);
                        captured.redirect = target;
                        return Ok(Capture::Captured(captured));
                    };
                    if let Some(start) = chain.iter().position(|u| *u == hop) {
                        let mut cycle = chain.split_off(start);
                        cycle.push(hop);
                        return Err(FreezeError::RedirectCycle { cycle });
                    }
                    chain.push(hop.clone());
                    current = hop;
                }
            }
        }
    }

    fn captured(&self, from: &str, response: Response, redirect: Option<String>) -> Captured {
        let content_type = response.header("Content-Type").map(str::to_string);
        let links = if self.follow_links {
            response
                .links
                .iter()
                .filter_map(|href| self.scope.resolve(from, href))
                .collect()
        } else {
            Vec::new()
        };
        Captured {
            status: response.status,
            headers: response.headers,
            body: response.body,
            content_type,
            redirect,
            links,
        }
    }

    fn unexpected(&self, item: &UrlItem, url: &str, status: u16) -> Result<Capture, FreezeError> {
        if item.expects(status) {
            warn!(url, status, origin = %item.origin, "skipping URL with expected status");
            return Ok(Capture::Skipped { status });
        }
        Err(self.status_error(item, url, status))
    }

    fn status_error(&self, item: &UrlItem, url: &str, status: u16) -> FreezeError {
        FreezeError::CaptureStatus {
            url: url.to_string(),
            method: item.method,
            status,
            origin: item.origin.to_string(),
        }
    }
}

/// Redirect edges seen this run, for cycle detection.
///
/// A cycle is reported whichever URL of it was captured first, because each
/// new edge is checked by walking forward from its target.
#[derive(Debug, Default)]
pub struct RedirectGraph {
    edges: HashMap<String, String>,
}

impl RedirectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `source → target`, failing if it closes a cycle.
    ///
    /// Edges that would close a cycle are never stored, so the walk from
    /// `target` always terminates.
    pub fn add(&mut self, source: &str, target: &str) -> Result<(), FreezeError> {
        let mut chain = vec![source.to_string(), target.to_string()];
        let mut current = target.to_string();
        while current != source {
            let Some(next) = self.edges.get(&current) else {
                break;
            };
            chain.push(next.clone());
            current = next.clone();
        }
        if current == source {
            return Err(FreezeError::RedirectCycle { cycle: chain });
        }
        self.edges.insert(source.to_string(), target.to_string());
        Ok(())
    }
}
