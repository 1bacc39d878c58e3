//! Fatal error kinds of a freezing run.
//!
//! Every variant carries enough context (URL, rule name, path) to locate the
//! offending route or generator. Any of them moves the run to
//! [`FreezeState::Failed`](crate::freezer::FreezeState::Failed); nothing
//! already written is rolled back.

use crate::app::Method;
use crate::config::ConfigError;
use crate::pattern::BuildError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A generator produced a binding that cannot become a URL.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("bad binding {binding} from generator for '{rule}': {problem}")]
pub struct BindingError {
    /// Rule name, or generator label for raw-URL generators.
    pub rule: String,
    pub binding: String,
    pub problem: BindingProblem,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingProblem {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("generated URL must start with '/': {0}")]
    NotAbsolute(String),
}

#[derive(Error, Debug)]
pub enum FreezeError {
    #[error("rule '{rule}' has variable segments but no registered generator")]
    MissingGenerator { rule: String },
    #[error(transparent)]
    GenerationBinding(#[from] BindingError),
    #[error("{method} {url} returned unexpected status {status} (from {origin})")]
    CaptureStatus {
        url: String,
        method: Method,
        status: u16,
        origin: String,
    },
    #[error("'{first_url}' and '{second_url}' collide at '{path}'")]
    PathCollision {
        path: String,
        first_url: String,
        second_url: String,
    },
    #[error("redirect cycle: {}", .cycle.join(" -> "))]
    RedirectCycle { cycle: Vec<String> },
    #[error("redirect to '{url}' is more than {limit} hops away from any enumerated URL")]
    RedirectLimit { url: String, limit: usize },
    #[error("cannot map '{url}' to a file: {reason}")]
    UnresolvablePath { url: String, reason: String },
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to start write workers: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("run cancelled")]
    Cancelled,
}

impl FreezeError {
    pub(crate) fn write(path: &Path, source: io::Error) -> Self {
        Self::Write {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Process exit code for this error category. Never zero.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::MissingGenerator { .. } => 2,
            Self::GenerationBinding(_) => 3,
            Self::CaptureStatus { .. } => 4,
            Self::PathCollision { .. } => 5,
            Self::RedirectCycle { .. } | Self::RedirectLimit { .. } => 6,
            Self::UnresolvablePath { .. } => 7,
            Self::Write { .. } => 8,
            Self::Config(_) => 9,
            Self::ThreadPool(_) => 10,
            Self::Cancelled => 130,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collision_message_names_both_urls() {
        let err = FreezeError::PathCollision {
            path: "gallery/photo".into(),
            first_url: "/gallery/photo".into(),
            second_url: "/gallery/photo/".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/gallery/photo'"));
        assert!(msg.contains("/gallery/photo/'"));
        assert!(msg.contains("'gallery/photo'"));
    }

    #[test]
    fn cycle_message_lists_chain() {
        let err = FreezeError::RedirectCycle {
            cycle: vec!["/a".into(), "/b".into(), "/a".into()],
        };
        assert_eq!(err.to_string(), "redirect cycle: /a -> /b -> /a");
    }

    #[test]
    fn write_error_reports_path_and_cause() {
        let err = FreezeError::write(
            Path::new("out/index.html"),
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("out/index.html"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn binding_error_names_rule_and_segment() {
        let err: FreezeError = BindingError {
            rule: "post".into(),
            binding: "{id: abc}".into(),
            problem: BuildError::Missing {
                segment: "slug".into(),
            }
            .into(),
        }
        .into();
        let msg = err.to_string();
        assert!(msg.contains("'post'"));
        assert!(msg.contains("slug"));
    }

    #[test]
    fn exit_codes_are_nonzero_and_distinct_per_category() {
        let errors = [
            FreezeError::MissingGenerator { rule: "r".into() },
            FreezeError::CaptureStatus {
                url: "/".into(),
                method: Method::Get,
                status: 500,
                origin: "rule 'index'".into(),
            },
            FreezeError::PathCollision {
                path: "p".into(),
                first_url: "/a".into(),
                second_url: "/b".into(),
            },
            FreezeError::RedirectCycle { cycle: vec![] },
            FreezeError::UnresolvablePath {
                url: "/".into(),
                reason: "x".into(),
            },
            FreezeError::Cancelled,
        ];
        let codes: Vec<u8> = errors.iter().map(FreezeError::exit_code).collect();
        assert!(codes.iter().all(|&c| c != 0));
        let mut unique = codes.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), codes.len());
    }
}
