//! URL template compilation and path matching.
//!
//! # Responsibilities
//! - Compile a route template (`/v1/accounts/{address}`) into a [`Pattern`]
//! - Match a concrete request path against a pattern
//! - Extract captured path variables
//!
//! # Template Syntax
//! ```text
//! /blocks                literal segment
//! /blocks/{height}       named capture, one segment
//! /blocks/{height=*}     same as above
//! /files/{path=**}       trailing wildcard, consumes the rest of the path
//! /items/*               positional capture, named "0", "1", ... by position
//! /blobs/**              positional trailing wildcard
//! /things:batch          custom verb suffix
//! /                      zero segments (index route)
//! ```
//!
//! # Design Decisions
//! - Literal segments are case-sensitive
//! - No regex, no backtracking: a path is split once and compared segment by segment
//! - Captured values are percent-decoded after matching

use std::collections::BTreeMap;
use std::fmt;

use percent_encoding::percent_decode_str;
use thiserror::Error;

/// Captured path variables, keyed by field path (or position for anonymous captures).
pub type Captures = BTreeMap<String, String>;

/// Why a template was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternFault {
    #[error("template must start with '/'")]
    MissingLeadingSlash,
    #[error("empty path segment")]
    EmptySegment,
    #[error("unbalanced brace in segment {0:?}")]
    UnbalancedBrace(String),
    #[error("invalid field path {0:?}")]
    InvalidFieldPath(String),
    #[error("unsupported capture pattern {0:?}")]
    UnsupportedCapture(String),
    #[error("wildcard must be the last segment")]
    WildcardNotLast,
    #[error("capture {0:?} appears more than once")]
    DuplicateCapture(String),
    #[error("empty custom verb")]
    EmptyVerb,
}

/// A route template that could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed pattern {template:?}: {reason}")]
pub struct MalformedPattern {
    pub template: String,
    pub reason: PatternFault,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Capture(String),
    Wildcard(String),
}

/// Structural view of a segment, capture names erased.
#[derive(Debug, PartialEq, Eq)]
enum Shape<'a> {
    Literal(&'a str),
    One,
    Rest,
}

impl Segment {
    fn shape(&self) -> Shape<'_> {
        match self {
            Segment::Literal(l) => Shape::Literal(l),
            Segment::Capture(_) => Shape::One,
            Segment::Wildcard(_) => Shape::Rest,
        }
    }
}

/// A compiled URL template.
#[derive(Debug, Clone)]
pub struct Pattern {
    template: String,
    segments: Vec<Segment>,
    verb: Option<String>,
}

impl Pattern {
    /// Compile a template.
    pub fn compile(template: &str) -> Result<Self, MalformedPattern> {
        let fail = |reason| MalformedPattern {
            template: template.to_string(),
            reason,
        };

        let rest = template
            .strip_prefix('/')
            .ok_or_else(|| fail(PatternFault::MissingLeadingSlash))?;

        let (rest, verb) = split_verb(rest);
        if let Some(verb) = verb {
            if verb.is_empty() {
                return Err(fail(PatternFault::EmptyVerb));
            }
        }

        let mut segments = Vec::new();
        if !rest.is_empty() {
            let parts: Vec<&str> = rest.split('/').collect();
            let mut position = 0usize;
            for (i, part) in parts.iter().enumerate() {
                let segment = parse_segment(part, &mut position).map_err(fail)?;
                if matches!(segment, Segment::Wildcard(_)) && i + 1 != parts.len() {
                    return Err(fail(PatternFault::WildcardNotLast));
                }
                segments.push(segment);
            }
        }

        let mut seen = Vec::new();
        for segment in &segments {
            if let Segment::Capture(name) | Segment::Wildcard(name) = segment {
                if seen.contains(&name) {
                    return Err(fail(PatternFault::DuplicateCapture(name.clone())));
                }
                seen.push(name);
            }
        }

        Ok(Self {
            template: template.to_string(),
            segments,
            verb: verb.map(str::to_string),
        })
    }

    /// The template this pattern was compiled from.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// True for the zero-segment pattern (`/`).
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Names of all capture slots, in path order.
    pub fn capture_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Capture(name) | Segment::Wildcard(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn has_captures(&self) -> bool {
        self.capture_names().next().is_some()
    }

    /// The concrete path this pattern matches, if it has no capture slots.
    pub fn literal_path(&self) -> Option<String> {
        if self.has_captures() {
            return None;
        }
        let mut path = String::from("/");
        let literals: Vec<&str> = self
            .segments
            .iter()
            .filter_map(|s| match s {
                Segment::Literal(l) => Some(l.as_str()),
                _ => None,
            })
            .collect();
        path.push_str(&literals.join("/"));
        if let Some(verb) = &self.verb {
            path.push(':');
            path.push_str(verb);
        }
        Some(path)
    }

    /// True when both patterns accept exactly the same paths.
    pub fn same_shape(&self, other: &Pattern) -> bool {
        self.verb == other.verb
            && self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| a.shape() == b.shape())
    }

    /// Match a request path (mount prefix already stripped).
    pub fn match_path(&self, path: &str) -> Option<Captures> {
        let path = path.strip_prefix('/').unwrap_or(path);
        let path = match &self.verb {
            Some(verb) => {
                let (head, tail) = path.rsplit_once(':')?;
                if tail != verb {
                    return None;
                }
                head
            }
            None => path,
        };

        let components: Vec<&str> = if path.is_empty() {
            Vec::new()
        } else {
            path.split('/').collect()
        };

        let mut captures = Captures::new();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(literal) => {
                    if components.get(i) != Some(&literal.as_str()) {
                        return None;
                    }
                }
                Segment::Capture(name) => {
                    let value = components.get(i).filter(|c| !c.is_empty())?;
                    captures.insert(name.clone(), decode(value));
                }
                Segment::Wildcard(name) => {
                    let rest = components.get(i..)?.join("/");
                    if rest.is_empty() {
                        return None;
                    }
                    captures.insert(name.clone(), decode(&rest));
                    return Some(captures);
                }
            }
        }

        (components.len() == self.segments.len()).then_some(captures)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Split a trailing `:verb` off the final segment, ignoring colons inside braces.
fn split_verb(rest: &str) -> (&str, Option<&str>) {
    let last_start = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
    let last = &rest[last_start..];
    match last.rfind(':') {
        Some(i) if !last[i..].contains('}') => {
            let at = last_start + i;
            (&rest[..at], Some(&rest[at + 1..]))
        }
        _ => (rest, None),
    }
}

fn parse_segment(part: &str, position: &mut usize) -> Result<Segment, PatternFault> {
    match part {
        "" => Err(PatternFault::EmptySegment),
        "*" => Ok(Segment::Capture(take_position(position))),
        "**" => Ok(Segment::Wildcard(take_position(position))),
        _ if part.starts_with('{') && part.ends_with('}') && part.len() >= 2 => {
            let inner = &part[1..part.len() - 1];
            if inner.contains('{') || inner.contains('}') {
                return Err(PatternFault::UnbalancedBrace(part.to_string()));
            }
            let (field, capture) = match inner.split_once('=') {
                Some((field, capture)) => (field, Some(capture)),
                None => (inner, None),
            };
            if !is_field_path(field) {
                return Err(PatternFault::InvalidFieldPath(field.to_string()));
            }
            *position += 1;
            match capture {
                None | Some("*") => Ok(Segment::Capture(field.to_string())),
                Some("**") => Ok(Segment::Wildcard(field.to_string())),
                Some(other) => Err(PatternFault::UnsupportedCapture(other.to_string())),
            }
        }
        _ if part.contains('{') || part.contains('}') => {
            Err(PatternFault::UnbalancedBrace(part.to_string()))
        }
        _ => Ok(Segment::Literal(part.to_string())),
    }
}

fn take_position(position: &mut usize) -> String {
    let name = position.to_string();
    *position += 1;
    name
}

fn is_field_path(path: &str) -> bool {
    !path.is_empty()
        && path.split('.').all(|ident| {
            let mut chars = ident.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}
