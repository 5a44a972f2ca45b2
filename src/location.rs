//! Location identifiers
//!
//! The engine treats location identifiers as opaque strings owned by the
//! renderer. [`TextRange`] is the one structured address it builds itself:
//! a span of text nodes inside a single content unit, which the renderer
//! resolves into a [`LocationId`].
//!
//! The reference renderer uses a reduced EPUB CFI grammar:
//!
//! ```text
//! epubcfi(/6/4!/4/3:12)            point: section 1, text node 1, offset 12
//! epubcfi(/6/4!/4,/3:12,/5:2)      range: node 1 offset 12 .. node 2 offset 2
//!         │ │   │  └── text node step (odd = text, 2n+1)
//!         │ │   └───── body
//!         │ └───────── spine item step (2 * (section + 1))
//!         └─────────── spine element
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque, renderer-specific location string
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(String);

impl LocationId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LocationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for LocationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Where the viewport currently is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// First visible position
    pub start: LocationId,
    /// Last visible position
    pub end: LocationId,
    /// Content unit being displayed
    pub section: usize,
}

/// A text node and a character offset inside it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePoint {
    pub node: usize,
    pub offset: usize,
}

/// A span of text inside one content unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRange {
    pub section: usize,
    pub start: NodePoint,
    pub end: NodePoint,
}

/// Parsed form of the reduced CFI grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cfi {
    Point { section: usize, at: NodePoint },
    Range(TextRange),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CfiParseError {
    #[error("CFI must start with 'epubcfi(' and end with ')'")]
    MissingWrapper,

    #[error("Expected spine step '/6/<n>!'")]
    ExpectedSpine,

    #[error("Invalid step '{0}'")]
    InvalidStep(String),

    #[error("Invalid range format")]
    InvalidRange,
}

impl Cfi {
    pub fn section(&self) -> usize {
        match self {
            Cfi::Point { section, .. } => *section,
            Cfi::Range(range) => range.section,
        }
    }

    /// The start position, for both points and ranges
    pub fn start(&self) -> NodePoint {
        match self {
            Cfi::Point { at, .. } => *at,
            Cfi::Range(range) => range.start,
        }
    }
}

/// Spine-level CFI pointing at the start of a section
pub fn section_cfi(section: usize) -> LocationId {
    LocationId(format!("epubcfi(/6/{}!/4)", spine_step(section)))
}

pub fn point_cfi(section: usize, at: NodePoint) -> LocationId {
    LocationId(format!(
        "epubcfi(/6/{}!/4/{}:{})",
        spine_step(section),
        node_step(at.node),
        at.offset
    ))
}

pub fn range_cfi(range: &TextRange) -> LocationId {
    LocationId(format!(
        "epubcfi(/6/{}!/4,/{}:{},/{}:{})",
        spine_step(range.section),
        node_step(range.start.node),
        range.start.offset,
        node_step(range.end.node),
        range.end.offset
    ))
}

pub fn parse(input: &str) -> Result<Cfi, CfiParseError> {
    let body = input
        .strip_prefix("epubcfi(")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or(CfiParseError::MissingWrapper)?;

    let rest = body.strip_prefix("/6/").ok_or(CfiParseError::ExpectedSpine)?;
    let (spine, local) = rest.split_once('!').ok_or(CfiParseError::ExpectedSpine)?;
    let spine: usize = spine.parse().map_err(|_| CfiParseError::ExpectedSpine)?;
    if spine < 2 || spine % 2 != 0 {
        return Err(CfiParseError::ExpectedSpine);
    }
    let section = spine / 2 - 1;

    let local = local.strip_prefix("/4").ok_or_else(|| CfiParseError::InvalidStep(local.to_string()))?;

    if local.is_empty() {
        return Ok(Cfi::Point {
            section,
            at: NodePoint { node: 0, offset: 0 },
        });
    }

    if let Some(range) = local.strip_prefix(',') {
        let (start, end) = range.split_once(',').ok_or(CfiParseError::InvalidRange)?;
        return Ok(Cfi::Range(TextRange {
            section,
            start: parse_node_point(start)?,
            end: parse_node_point(end)?,
        }));
    }

    Ok(Cfi::Point {
        section,
        at: parse_node_point(local)?,
    })
}

fn parse_node_point(step: &str) -> Result<NodePoint, CfiParseError> {
    let invalid = || CfiParseError::InvalidStep(step.to_string());
    let (node, offset) = step
        .strip_prefix('/')
        .and_then(|s| s.split_once(':'))
        .ok_or_else(invalid)?;
    let node: usize = node.parse().map_err(|_| invalid())?;
    if node % 2 == 0 {
        return Err(invalid());
    }
    Ok(NodePoint {
        node: (node - 1) / 2,
        offset: offset.parse().map_err(|_| invalid())?,
    })
}

fn spine_step(section: usize) -> usize {
    (section + 1) * 2
}

fn node_step(node: usize) -> usize {
    node * 2 + 1
}
