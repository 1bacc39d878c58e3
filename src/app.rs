//! Boundary with the host application.
//!
//! The freezer never looks inside the host's router. It needs two things:
//! the list of route rules (to know which URLs exist) and an in-process
//! dispatch function (to know what each URL produces). Both are expressed by
//! the [`Application`] trait.
//!
//! Every dispatch carries the site's base URL (`base_url`, or
//! `http://localhost/` when unset). Handlers that render absolute links build
//! them from it, so `--base-url` changes those links in the frozen output.
//!
//! ```rust,ignore
//! struct Blog { posts: Vec<Post> }
//!
//! impl Application for Blog {
//!     fn rules(&self) -> Vec<RouteRule> {
//!         vec![
//!             RouteRule::new("index", "/").unwrap(),
//!             RouteRule::new("post", "/post/{id:int}").unwrap(),
//!         ]
//!     }
//!
//!     fn dispatch(&self, method: Method, url: &str, base: &Url) -> Response {
//!         // route the request through the host's handler stack,
//!         // rendering absolute links against `base`
//!     }
//! }
//! ```

use crate::pattern::{Pattern, PatternError};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    /// Methods whose responses can be captured as static files.
    ///
    /// Only `GET` qualifies: `HEAD` has no body and everything else mutates.
    pub fn is_freezable(&self) -> bool {
        matches!(self, Self::Get)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rule of the host's routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub name: String,
    pub pattern: Pattern,
    pub methods: Vec<Method>,
    /// Values used for variable segments a binding leaves out.
    pub defaults: BTreeMap<String, String>,
}

impl RouteRule {
    /// A `GET` rule with no defaults.
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, PatternError> {
        Ok(Self {
            name: name.into(),
            pattern: Pattern::parse(pattern)?,
            methods: vec![Method::Get],
            defaults: BTreeMap::new(),
        })
    }

    pub fn with_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn with_default(mut self, segment: impl Into<String>, value: impl ToString) -> Self {
        self.defaults.insert(segment.into(), value.to_string());
        self
    }

    /// True when every variable segment is covered by a default, so the rule
    /// yields a URL without any generator.
    pub fn is_static(&self) -> bool {
        self.pattern
            .variables()
            .all(|name| self.defaults.contains_key(name))
    }

    /// Allowed methods that can be frozen, in declaration order.
    pub fn freezable_methods(&self) -> impl Iterator<Item = Method> + '_ {
        self.methods.iter().copied().filter(Method::is_freezable)
    }
}

/// Response produced by an in-process dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// In-site URLs the handler generated while rendering this response.
    pub links: Vec<String>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            links: Vec::new(),
        }
    }

    /// A 200 response with the given body and content type.
    pub fn ok(content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self::new(200)
            .with_header("Content-Type", content_type)
            .with_body(body)
    }

    /// A redirect to `location` with an empty body.
    pub fn redirect(status: u16, location: &str) -> Self {
        Self::new(status).with_header("Location", location)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_link(mut self, url: &str) -> Self {
        self.links.push(url.to_string());
        self
    }

    /// First header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The host application as seen by the freezer.
pub trait Application {
    /// The routing table, in declaration order.
    fn rules(&self) -> Vec<RouteRule>;

    /// Dispatch a request through the host's routing and handler stack.
    ///
    /// `url` is site-relative (path plus optional query). `base` is the URL
    /// the site will be served from; absolute links must be built from it.
    ///
    /// Must be an in-process call: no network transport is involved.
    /// Handler failures are reported as 5xx responses.
    fn dispatch(&self, method: Method, url: &str, base: &Url) -> Response;
}
