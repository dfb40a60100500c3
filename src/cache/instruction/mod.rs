//! Marker-comment content instructions.
//!
//! Upstream renderers embed `<!--instruction:{tag}-->` markers in HTML.
//! Each registered [`Instruction`] owns one sanitised tag and computes the
//! content substituted at its markers:
//!
//! - [`InstructionKind::Ephemeral`] content replaces the marker once, before
//!   the body is stored, so cached copies carry the baked result and no marker.
//! - [`InstructionKind::Perpetual`] content is inserted right after the marker
//!   on every serve; the marker stays in the stored body.

mod builtin;
mod pipeline;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub use builtin::{GeneratedAt, Nonce, ServedAt, StaticInstruction};
pub use pipeline::{Pipeline, PipelineError};

use super::request::RequestDescriptor;
use super::visitor::Visitor;

pub const MARKER_PREFIX: &str = "instruction:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstructionKind {
    Ephemeral,
    Perpetual,
}

impl InstructionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ephemeral => "ephemeral",
            Self::Perpetual => "perpetual",
        }
    }
}

/// Inputs available while computing instruction content.
#[derive(Debug, Clone, Copy)]
pub struct InstructionContext<'a> {
    pub request: &'a RequestDescriptor,
    pub visitor: &'a Visitor,
    pub now: OffsetDateTime,
}

impl<'a> InstructionContext<'a> {
    pub fn new(request: &'a RequestDescriptor, visitor: &'a Visitor) -> Self {
        Self {
            request,
            visitor,
            now: OffsetDateTime::now_utc(),
        }
    }
}

pub trait Instruction: Send + Sync {
    /// Literal tag; matched after [`sanitize_tag`].
    fn tag(&self) -> &str;

    fn kind(&self) -> InstructionKind;

    /// HTML inserted at the marker. Evaluated at most once per pipeline run.
    fn content(&self, context: &InstructionContext<'_>) -> String;
}

/// Keep ASCII letters only; every other character is dropped.
///
/// Digits are dropped too, so `foo-1` becomes `foo`, not `foo1`. Tags that
/// differ only in digits or punctuation collide and are rejected by
/// [`Pipeline`] at registration.
pub fn sanitize_tag(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_alphabetic).collect()
}

/// Marker comment for `tag`, sanitised.
pub fn marker(tag: &str) -> String {
    format!("<!--{MARKER_PREFIX}{}-->", sanitize_tag(tag))
}
