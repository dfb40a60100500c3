use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use super::{Instruction, InstructionContext, InstructionKind};

fn timestamp(context: &InstructionContext<'_>) -> String {
    context
        .now
        .format(&Rfc3339)
        .unwrap_or_else(|_| context.now.unix_timestamp().to_string())
}

/// Bakes the render time into the stored page.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeneratedAt;

impl Instruction for GeneratedAt {
    fn tag(&self) -> &str {
        "generated"
    }

    fn kind(&self) -> InstructionKind {
        InstructionKind::Ephemeral
    }

    fn content(&self, context: &InstructionContext<'_>) -> String {
        format!("<!-- page generated at {} -->", timestamp(context))
    }
}

/// Stamps every delivery, cached or not.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServedAt;

impl Instruction for ServedAt {
    fn tag(&self) -> &str {
        "servedat"
    }

    fn kind(&self) -> InstructionKind {
        InstructionKind::Perpetual
    }

    fn content(&self, context: &InstructionContext<'_>) -> String {
        format!("<!-- served at {} -->", timestamp(context))
    }
}

/// Fresh random token per delivery, for forms and inline scripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Nonce;

impl Instruction for Nonce {
    fn tag(&self) -> &str {
        "nonce"
    }

    fn kind(&self) -> InstructionKind {
        InstructionKind::Perpetual
    }

    fn content(&self, _context: &InstructionContext<'_>) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Operator-configured instruction with fixed content.
#[derive(Debug, Clone)]
pub struct StaticInstruction {
    tag: String,
    kind: InstructionKind,
    content: String,
}

impl StaticInstruction {
    pub fn new(tag: impl Into<String>, kind: InstructionKind, content: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            kind,
            content: content.into(),
        }
    }
}

impl Instruction for StaticInstruction {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn kind(&self) -> InstructionKind {
        self.kind
    }

    fn content(&self, _context: &InstructionContext<'_>) -> String {
        self.content.clone()
    }
}
