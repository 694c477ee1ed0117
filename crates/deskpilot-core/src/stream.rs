use serde::Serialize;

use crate::message::{Chunk, ChunkKind, Message, Role};

/// Identity of an in-progress logical message: the grouping key a renderer
/// needs to open and flush blocks without re-deriving merge logic.
///
/// Console boundaries never carry a format, so that `active_line` and
/// `output` chunks fall inside one console block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Boundary {
    pub role: Role,
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl Boundary {
    /// The boundary a chunk opens when it does not continue the previous one.
    #[must_use]
    pub fn opening(chunk: &Chunk) -> Self {
        let format = if chunk.kind == ChunkKind::Console {
            None
        } else {
            chunk.format.clone()
        };
        Self {
            role: chunk.role,
            kind: chunk.kind,
            format,
        }
    }

    /// Continuation test: role and kind must match exactly, and the format
    /// must match whenever this boundary already carries one. A formatless
    /// boundary still accepts chunks that introduce a format.
    #[must_use]
    pub fn accepts(&self, chunk: &Chunk) -> bool {
        self.role == chunk.role
            && self.kind == chunk.kind
            && (self.format.is_none() || chunk.format == self.format)
    }
}

/// Event yielded to live stream consumers. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A logical message opened.
    Start(Boundary),
    /// The most recent unmatched `Start` closed.
    End(Boundary),
    /// A raw chunk, re-emitted after any log mutation it caused.
    Chunk(Chunk),
    /// Synthetic screenshot injected into the log ahead of a code message.
    Screenshot(Message),
    /// Approval request; the cycle will not continue past it in manual mode.
    Confirmation(Chunk),
}

impl StreamEvent {
    #[must_use]
    pub fn is_terminal_boundary(&self) -> bool {
        matches!(self, Self::End(_))
    }
}
