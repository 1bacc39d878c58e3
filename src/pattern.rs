//! Route pattern parsing and URL building.
//!
//! A route pattern is literal URL text with variable placeholders:
//!
//! ```text
//! /post/{id:int}              → int variable "id"
//! /tag/{name}                 → string variable (the default kind)
//! /static/{filename:path}     → path variable, may contain slashes
//! /archive/{year:int}/{slug}  → several variables
//! /files/{stem}.txt           → variables may share a segment with literal text
//! ```
//!
//! ## Segment kinds
//!
//! | Kind | Accepts |
//! |------|---------|
//! | `string` | any non-empty value without `/` |
//! | `int` | ASCII digits only (`0`, `42`; no sign) |
//! | `float` | `digits.digits` (`1.5`) |
//! | `path` | non-empty `/`-separated pieces, no empty pieces |
//! | `uuid` | canonical 8-4-4-4-12 hex form |
//!
//! ## Building URLs
//!
//! [`Pattern::build`] substitutes a set of values into the placeholders,
//! percent-encoding them. Values named by a placeholder are consumed; any left
//! over become the query string, sorted by key. Rule defaults fill placeholders
//! the values leave out.

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Characters escaped inside a single path piece. `/` is escaped too, so a
/// `string` value can never introduce an extra segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/');

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern must start with '/': {0}")]
    MissingLeadingSlash(String),
    #[error("unclosed '{{' in pattern: {0}")]
    Unclosed(String),
    #[error("unmatched '}}' in pattern: {0}")]
    Unmatched(String),
    #[error("empty variable name in pattern: {0}")]
    EmptyName(String),
    #[error("unknown segment kind '{kind}' in pattern: {pattern}")]
    UnknownKind { kind: String, pattern: String },
    #[error("variable '{name}' appears more than once in pattern: {pattern}")]
    DuplicateName { name: String, pattern: String },
}

/// Why a set of values could not be turned into a URL.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("no value for segment '{segment}'")]
    Missing { segment: String },
    #[error("value '{value}' for segment '{segment}' is not a valid {kind}")]
    Invalid {
        segment: String,
        value: String,
        kind: SegmentKind,
    },
}

/// Type constraint of a variable segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    String,
    Int,
    Float,
    Path,
    Uuid,
}

impl SegmentKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "" | "string" => Some(Self::String),
            "int" => Some(Self::Int),
            "float" => Some(Self::Float),
            "path" => Some(Self::Path),
            "uuid" => Some(Self::Uuid),
            _ => None,
        }
    }

    /// Whether `value` satisfies this constraint.
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            Self::String => !value.is_empty() && !value.contains('/'),
            Self::Int => is_digits(value),
            Self::Float => value
                .split_once('.')
                .is_some_and(|(whole, frac)| is_digits(whole) && is_digits(frac)),
            Self::Path => !value.is_empty() && value.split('/').all(|piece| !piece.is_empty()),
            Self::Uuid => is_uuid(value),
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Path => "path",
            Self::Uuid => "uuid",
        };
        f.write_str(name)
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_uuid(s: &str) -> bool {
    s.len() == 36
        && s.bytes().enumerate().all(|(i, b)| match i {
            8 | 13 | 18 | 23 => b == b'-',
            _ => b.is_ascii_hexdigit(),
        })
}

/// One piece of a parsed pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Variable { name: String, kind: SegmentKind },
}

/// A parsed route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Parse a pattern like `/post/{id:int}`.
    pub fn parse(source: &str) -> Result<Self, PatternError> {
        if !source.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash(source.to_string()));
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(pos) = rest.find(['{', '}']) {
            if rest.as_bytes()[pos] == b'}' {
                return Err(PatternError::Unmatched(source.to_string()));
            }
            literal.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            let close = after
                .find('}')
                .ok_or_else(|| PatternError::Unclosed(source.to_string()))?;
            let inner = &after[..close];
            if inner.contains('{') {
                return Err(PatternError::Unclosed(source.to_string()));
            }

            let (name, kind_name) = match inner.split_once(':') {
                Some((name, kind)) => (name.trim(), kind.trim()),
                None => (inner.trim(), ""),
            };
            if name.is_empty() {
                return Err(PatternError::EmptyName(source.to_string()));
            }
            let kind =
                SegmentKind::from_name(kind_name).ok_or_else(|| PatternError::UnknownKind {
                    kind: kind_name.to_string(),
                    pattern: source.to_string(),
                })?;
            let duplicate = segments
                .iter()
                .any(|s| matches!(s, Segment::Variable { name: n, .. } if n == name));
            if duplicate {
                return Err(PatternError::DuplicateName {
                    name: name.to_string(),
                    pattern: source.to_string(),
                });
            }

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Variable {
                name: name.to_string(),
                kind,
            });
            rest = &after[close + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Names of the variable segments, in order of appearance.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Variable { name, .. } => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// True when the pattern has no variable segments.
    pub fn is_static(&self) -> bool {
        self.variables().next().is_none()
    }

    /// Substitute `values` (falling back to `defaults`) into the pattern.
    ///
    /// Values that name no segment are appended as a sorted query string.
    pub fn build(
        &self,
        values: &BTreeMap<String, String>,
        defaults: &BTreeMap<String, String>,
    ) -> Result<String, BuildError> {
        let mut url = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => url.push_str(text),
                Segment::Variable { name, kind } => {
                    let value = values
                        .get(name)
                        .or_else(|| defaults.get(name))
                        .ok_or_else(|| BuildError::Missing {
                            segment: name.clone(),
                        })?;
                    if !kind.accepts(value) {
                        return Err(BuildError::Invalid {
                            segment: name.clone(),
                            value: value.clone(),
                            kind: *kind,
                        });
                    }
                    url.push_str(&encode_value(value, *kind));
                }
            }
        }

        let extras: Vec<(&String, &String)> = values
            .iter()
            .filter(|(key, _)| !self.variables().any(|v| v == key.as_str()))
            .collect();
        if !extras.is_empty() {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(extras)
                .finish();
            url.push('?');
            url.push_str(&query);
        }
        Ok(url)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn encode_value(value: &str, kind: SegmentKind) -> String {
    match kind {
        SegmentKind::Path => value
            .split('/')
            .map(|piece| utf8_percent_encode(piece, SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/"),
        _ => utf8_percent_encode(value, SEGMENT).to_string(),
    }
}
