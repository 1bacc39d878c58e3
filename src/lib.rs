//! # Site Freezer
//!
//! Turns a dynamically-served web application into a directory of static
//! files that reproduce every response byte for byte, so the result can be
//! served by any plain file server.
//!
//! # Architecture: Two Passes
//!
//! A run separates "which URLs exist" from "what each URL produces":
//!
//! ```text
//! 1. Enumerate   routing table + generators  →  URL items      (lazy, deduplicated)
//! 2. Capture     URL items → dispatch        →  spool + manifest (nothing written yet)
//! 3. Write       manifest + spool            →  output root     (parallel)
//! 4. Finalize    output root − manifest      →  stale files removed
//! ```
//!
//! Enumeration is pulled one item at a time, so a site with a million pages
//! costs no more memory than one with ten. Nothing reaches the output root
//! until every URL has been captured and every path claimed without
//! conflict, so a collision aborts the run before either URL's file exists.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`app`] | Boundary with the host: `Application` trait, route rules, responses |
//! | [`pattern`] | Route pattern parsing, segment converters, URL building |
//! | [`generators`] | Registry of binding generators per rule, raw-URL generators, static files |
//! | [`enumerate`] | Lazy, deduplicating URL enumeration with a pending queue |
//! | [`capture`] | In-process dispatch, status policy, redirect handling and cycle detection |
//! | [`resolve`] | URL → file path mapping, MIME extensions, query policy, collision table |
//! | [`writer`] | Scoped file writes, content-addressed spool, stale-file pruning |
//! | [`manifest`] | Run manifest, write statistics, content digests |
//! | [`freezer`] | Orchestrator: run state machine, events, cancellation |
//! | [`config`] | `freezer.toml` loading, merging with stock defaults, validation |
//! | [`error`] | Fatal error kinds and their exit codes |
//! | [`output`] | CLI output formatting for events, URL listings and summaries |
//! | [`cli`] | Clap command surface and logging setup for host binaries |
//!
//! # Design Decisions
//!
//! ## The Host Is a Black Box
//!
//! The freezer never looks inside the host's router. It consumes two
//! capabilities through [`app::Application`]: the list of route rules and a
//! synchronous in-process dispatch that also carries the site's base URL.
//! Handlers, templates and middleware stay the host's business.
//!
//! ## No Silent Gaps
//!
//! A rule with variable segments and no generator fails the run before the
//! first dispatch. A 4xx/5xx fails the run unless the generator that produced
//! the URL declared that status expected.
//!
//! ## Paths Are a Function of URL and Content Type
//!
//! `/post/1` serving `text/html` always becomes `post/1/index.html`.
//! Query strings get a stable hash suffix, because a file server cannot
//! multiplex on them. Two URLs may share a file only when their bytes are
//! identical; anything else is a [`error::FreezeError::PathCollision`]
//! naming both URLs.
//!
//! ## Redirects Are Bounded
//!
//! In-site redirect targets are frozen too. `redirect_follow_limit` is a hard
//! cap on hops from an enumerated URL. A target past it fails the run only if
//! no rule or generator enumerates it by the end of the capture pass, so rule
//! order never changes the outcome. A redirect graph catches cycles whichever
//! URL of the cycle is reached first.
//!
//! ## Idempotent Output
//!
//! Files whose bytes did not change are not rewritten, so repeated runs keep
//! mtimes stable and finalize removes nothing. Finalize never runs after a
//! failure or a cancellation: a half-written mirror is never pruned against an
//! incomplete manifest.

pub mod app;
pub mod capture;
pub mod cli;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod freezer;
pub mod generators;
pub mod manifest;
pub mod output;
pub mod pattern;
pub mod resolve;
pub mod writer;

pub use app::{Application, Method, Response, RouteRule};
pub use config::FreezerConfig;
pub use error::FreezeError;
pub use freezer::{CancelToken, FreezeEvent, FreezeState, Freezer};
pub use generators::{Binding, GeneratorRegistry};
pub use manifest::RunManifest;
pub use url::Url;

#[cfg(test)]
pub(crate) mod test_helpers;
