//! Freezer: owns the run lifecycle.
//!
//! ```text
//! Idle → Enumerating → Capturing → Writing → Finalizing → Done
//!   any state ──fatal error or cancellation──→ Failed
//! ```
//!
//! ## Two passes
//!
//! The capture pass pulls URL items one at a time, captures each response,
//! resolves its path and claims that path in the collision table. Bodies go
//! to a content-addressed [`Spool`] on disk, not to the output root. Only
//! once every URL has been captured without a collision does the write pass
//! copy spooled bodies into place, in parallel. A collision therefore leaves
//! no file behind for either URL, and memory stays flat however large the
//! site is.
//!
//! ## Cancellation
//!
//! [`CancelToken::cancel`] aborts the run at the next URL item boundary with
//! [`FreezeError::Cancelled`]. Files already written stay. Finalize never runs
//! on an aborted or failed run, so a half-written mirror is never pruned.

use crate::app::{Application, Method};
use crate::capture::{Capture, CaptureEngine, RedirectGraph, SiteScope};
use crate::config::{FreezerConfig, effective_workers};
use crate::enumerate::{EnumerateOptions, Enumerator, Origin, UrlItem, warn_orphan_generators};
use crate::error::FreezeError;
use crate::generators::GeneratorRegistry;
use crate::manifest::{ManifestEntry, RunManifest, SkippedUrl, digest};
use crate::resolve::{Claim, CollisionTable, PathResolver};
use crate::writer::{OutputWriter, Spool, WriteOutcome, finalize};
use rayon::prelude::*;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeState {
    Idle,
    Enumerating,
    Capturing,
    Writing,
    Finalizing,
    Done,
    Failed,
}

/// Progress events streamed while a run is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreezeEvent {
    UrlCaptured {
        url: String,
        path: String,
        status: u16,
        /// Bytes are identical to an earlier URL at the same path.
        alias: bool,
    },
    UrlSkipped {
        url: String,
        status: u16,
    },
    FileWritten {
        path: String,
        outcome: WriteOutcome,
    },
    StaleRemoved {
        path: String,
    },
}

/// Shared flag to abort an in-flight run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), FreezeError> {
        if self.is_cancelled() {
            return Err(FreezeError::Cancelled);
        }
        Ok(())
    }
}

pub struct Freezer<A: Application> {
    app: A,
    registry: GeneratorRegistry,
    config: FreezerConfig,
    state: FreezeState,
    events: Option<Sender<FreezeEvent>>,
    cancel: CancelToken,
}

impl<A: Application> Freezer<A> {
    pub fn new(app: A, registry: GeneratorRegistry, config: FreezerConfig) -> Self {
        Self {
            app,
            registry,
            config,
            state: FreezeState::Idle,
            events: None,
            cancel: CancelToken::new(),
        }
    }

    /// Stream [`FreezeEvent`]s to `tx` during runs.
    pub fn with_events(mut self, tx: Sender<FreezeEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Token that aborts the current run. Each run clears a previous
    /// cancellation when it starts.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> FreezeState {
        self.state
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    pub fn registry(&self) -> &GeneratorRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut GeneratorRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &FreezerConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut FreezerConfig {
        &mut self.config
    }

    /// Run the full pipeline once, starting from [`FreezeState::Idle`].
    pub fn run(&mut self) -> Result<RunManifest, FreezeError> {
        self.state = FreezeState::Idle;
        self.cancel.reset();

        let run = Run {
            app: &self.app,
            registry: &self.registry,
            config: &self.config,
            events: self.events.as_ref(),
            cancel: &self.cancel,
        };
        match run.execute(&mut self.state) {
            Ok(manifest) => {
                self.state = FreezeState::Done;
                Ok(manifest)
            }
            Err(err) => {
                warn!(state = ?self.state, "freeze failed: {err}");
                self.state = FreezeState::Failed;
                Err(err)
            }
        }
    }

    /// The enumeration pass alone: every URL item a run would capture,
    /// without dispatching anything.
    ///
    /// Redirect targets and linked URLs are only discovered while capturing,
    /// so they are not listed.
    pub fn enumerate_urls(&self) -> Result<Vec<UrlItem>, FreezeError> {
        let enumerator = Enumerator::new(
            self.app.rules(),
            &self.registry,
            enumerate_options(&self.config),
        )?;
        let mut items = Vec::new();
        for next in enumerator {
            match next {
                Ok(item) => items.push(item),
                Err(err) if self.config.lenient_bindings => warn!("{err}"),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(items)
    }
}

fn enumerate_options(config: &FreezerConfig) -> EnumerateOptions {
    EnumerateOptions {
        with_no_argument_rules: config.with_no_argument_rules,
    }
}

/// Borrowed view of a freezer for the duration of one run.
struct Run<'a, A: Application> {
    app: &'a A,
    registry: &'a GeneratorRegistry,
    config: &'a FreezerConfig,
    events: Option<&'a Sender<FreezeEvent>>,
    cancel: &'a CancelToken,
}

impl<A: Application> Run<'_, A> {
    fn emit(&self, event: FreezeEvent) {
        emit(self.events, event);
    }

    fn execute(&self, state: &mut FreezeState) -> Result<RunManifest, FreezeError> {
        self.config.validate()?;
        let root = self.config.output_root.as_path();

        *state = FreezeState::Enumerating;
        let rules = self.app.rules();
        info!(rules = rules.len(), output = %root.display(), "freezing");
        warn_orphan_generators(&rules, self.registry);
        let mut enumerator =
            Enumerator::new(rules, self.registry, enumerate_options(self.config))?;

        *state = FreezeState::Capturing;
        let spool = Spool::new().map_err(|e| FreezeError::write(&std::env::temp_dir(), e))?;
        let mut manifest = self.capture_all(&mut enumerator, &spool)?;

        self.cancel.check()?;
        *state = FreezeState::Writing;
        self.write_all(&mut manifest, &spool)?;

        self.cancel.check()?;
        *state = FreezeState::Finalizing;
        if self.config.remove_extra_files {
            let removed = finalize(root, &manifest, &self.config.destination_ignore)?;
            for path in &removed {
                self.emit(FreezeEvent::StaleRemoved { path: path.clone() });
            }
            manifest.stats.removed = removed.len() as u32;
            manifest.removed = removed;
        }

        info!(
            files = manifest.len(),
            skipped = manifest.skipped.len(),
            "freeze complete: {}",
            manifest.stats
        );
        Ok(manifest)
    }

    fn capture_all(
        &self,
        enumerator: &mut Enumerator<'_>,
        spool: &Spool,
    ) -> Result<RunManifest, FreezeError> {
        let scope = SiteScope::new(self.config.site_base()?);
        let engine = CaptureEngine::new(
            self.app,
            &scope,
            self.config.redirect_policy,
            self.config.redirect_follow_limit,
            self.config.follow_links,
        );
        let resolver = PathResolver::new(self.config);
        let mut table = CollisionTable::new();
        let mut graph = RedirectGraph::new();
        let mut manifest = RunManifest::new();
        // Targets past the hop limit. Fatal only if nothing else enumerates them.
        let mut over_limit: Vec<String> = Vec::new();

        loop {
            self.cancel.check()?;
            let Some(next) = enumerator.next() else {
                break;
            };
            let item = match next {
                Ok(item) => item,
                Err(err) if self.config.lenient_bindings => {
                    warn!("{err}");
                    manifest.binding_errors.push(err);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let captured = match engine.capture(&item)? {
                Capture::Captured(captured) => captured,
                Capture::Skipped { status } => {
                    manifest.skipped.push(SkippedUrl {
                        url: item.url.clone(),
                        status,
                        origin: item.origin.to_string(),
                    });
                    self.emit(FreezeEvent::UrlSkipped {
                        url: item.url,
                        status,
                    });
                    continue;
                }
                Capture::Ignored { redirect } => {
                    if let Some(target) = redirect {
                        self.discover_redirect(
                            enumerator,
                            &mut graph,
                            &mut over_limit,
                            &item,
                            target,
                        )?;
                    }
                    continue;
                }
            };

            if let Some(target) = captured.redirect.clone() {
                self.discover_redirect(
                    enumerator,
                    &mut graph,
                    &mut over_limit,
                    &item,
                    target,
                )?;
            }
            for link in &captured.links {
                if !enumerator.has_seen(link, Method::Get) {
                    enumerator.enqueue(UrlItem::new(
                        link.clone(),
                        Origin::Link {
                            from: item.url.clone(),
                        },
                    ));
                }
            }

            let content_type = resolver.content_type(captured.content_type.as_deref());
            let path = resolver.resolve(&item.url, &content_type)?;
            let body_digest = digest(&captured.body);
            let alias = match table.claim(&path, &item.url, &body_digest)? {
                Claim::Alias => {
                    if let Some(entry) = manifest.entries.get_mut(&path) {
                        entry.urls.push(item.url.clone());
                    }
                    true
                }
                Claim::New => {
                    spool
                        .store(&body_digest, &captured.body)
                        .map_err(|e| FreezeError::write(Path::new(&path), e))?;
                    manifest.entries.insert(
                        path.clone(),
                        ManifestEntry {
                            urls: vec![item.url.clone()],
                            status: captured.status,
                            content_type,
                            digest: body_digest,
                            size: captured.body.len() as u64,
                        },
                    );
                    false
                }
            };
            debug!(url = %item.url, path = %path, alias, "captured");
            self.emit(FreezeEvent::UrlCaptured {
                url: item.url,
                path,
                status: captured.status,
                alias,
            });
        }

        if let Some(url) = over_limit
            .into_iter()
            .find(|url| !enumerator.has_seen(url, Method::Get))
        {
            return Err(FreezeError::RedirectLimit {
                url,
                limit: self.config.redirect_follow_limit,
            });
        }
        Ok(manifest)
    }

    /// Record a redirect edge and queue its target, within the hop limit.
    ///
    /// A target past the limit is set aside in `over_limit` instead of
    /// failing: a rule or generator may still enumerate it later.
    fn discover_redirect(
        &self,
        enumerator: &mut Enumerator<'_>,
        graph: &mut RedirectGraph,
        over_limit: &mut Vec<String>,
        item: &UrlItem,
        target: String,
    ) -> Result<(), FreezeError> {
        graph.add(&item.url, &target)?;
        if enumerator.has_seen(&target, Method::Get) {
            return Ok(());
        }
        let limit = self.config.redirect_follow_limit;
        let depth = item.redirect_depth + 1;
        if depth > limit {
            debug!(url = %target, limit, "redirect target past hop limit, deferred");
            over_limit.push(target);
            return Ok(());
        }
        let mut next = UrlItem::new(
            target,
            Origin::Redirect {
                from: item.url.clone(),
            },
        );
        next.redirect_depth = depth;
        enumerator.enqueue(next);
        Ok(())
    }

    fn write_all(&self, manifest: &mut RunManifest, spool: &Spool) -> Result<(), FreezeError> {
        let root = self.config.output_root.as_path();
        fs::create_dir_all(root).map_err(|e| FreezeError::write(root, e))?;
        let writer = OutputWriter::new(root);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(effective_workers(&self.config.processing))
            .build()?;
        let cancel = self.cancel;
        let events = self.events;

        let entries: Vec<(&String, &ManifestEntry)> = manifest.entries.iter().collect();
        let outcomes: Vec<WriteOutcome> = pool.install(|| {
            entries
                .par_iter()
                .map(|(path, entry)| {
                    cancel.check()?;
                    let bytes = spool
                        .load(&entry.digest)
                        .map_err(|e| FreezeError::write(Path::new(path.as_str()), e))?;
                    let url = entry.urls.first().map(String::as_str).unwrap_or_default();
                    let outcome = writer.write(path, url, &bytes)?;
                    emit(
                        events,
                        FreezeEvent::FileWritten {
                            path: path.to_string(),
                            outcome,
                        },
                    );
                    Ok(outcome)
                })
                .collect::<Result<Vec<_>, FreezeError>>()
        })?;

        for outcome in outcomes {
            manifest.stats.record(outcome);
        }
        Ok(())
    }
}

fn emit(events: Option<&Sender<FreezeEvent>>, event: FreezeEvent) {
    if let Some(tx) = events {
        // A dropped receiver only means nobody is listening.
        let _ = tx.send(event);
    }
}
