use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Format tag on console chunks that report the line currently executing.
/// A chunk with this format and *no* content marks the end of an execution run.
pub const ACTIVE_LINE: &str = "active_line";

/// Who produced a message: the human, the model, or the execution back end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Computer,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Computer => "computer",
        }
    }
}

/// Wire-level kind tag shared by chunks and logged messages.
///
/// `Confirmation` and `Review` only ever appear on chunks; they are never
/// stored in the conversation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Message,
    Code,
    Console,
    Image,
    Confirmation,
    Review,
}

impl ChunkKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Code => "code",
            Self::Console => "console",
            Self::Image => "image",
            Self::Confirmation => "confirmation",
            Self::Review => "review",
        }
    }
}

/// One logged conversation record.
///
/// The wire shape is `{"role", "type", "format"?, "content"}`; the variant is
/// keyed by `type` and each variant carries exactly the fields that are valid
/// for it:
///
/// | variant   | `type`    | `format`                         |
/// |-----------|-----------|----------------------------------|
/// | `Text`    | `message` | forbidden                        |
/// | `Code`    | `code`    | optional (language)              |
/// | `Console` | `console` | optional (`output`)              |
/// | `Image`   | `image`   | required (`path`, `base64`, ...) |
///
/// Identity is positional: a message is addressed by its index in the log,
/// and only the most recent entry of its kind may still grow its content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    #[serde(rename = "message")]
    Text {
        role: Role,
        content: String,
    },
    Code {
        role: Role,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
        content: String,
    },
    Console {
        role: Role,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
        content: String,
    },
    Image {
        role: Role,
        format: String,
        content: String,
    },
}

impl Message {
    #[must_use]
    pub fn role(&self) -> Role {
        match self {
            Self::Text { role, .. }
            | Self::Code { role, .. }
            | Self::Console { role, .. }
            | Self::Image { role, .. } => *role,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ChunkKind {
        match self {
            Self::Text { .. } => ChunkKind::Message,
            Self::Code { .. } => ChunkKind::Code,
            Self::Console { .. } => ChunkKind::Console,
            Self::Image { .. } => ChunkKind::Image,
        }
    }

    #[must_use]
    pub fn format(&self) -> Option<&str> {
        match self {
            Self::Text { .. } => None,
            Self::Code { format, .. } | Self::Console { format, .. } => format.as_deref(),
            Self::Image { format, .. } => Some(format),
        }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::Text { content, .. }
            | Self::Code { content, .. }
            | Self::Console { content, .. }
            | Self::Image { content, .. } => content,
        }
    }

    /// Grows the entry in place. Valid only on the open (most recent) entry.
    pub fn push_content(&mut self, more: &str) {
        match self {
            Self::Text { content, .. }
            | Self::Code { content, .. }
            | Self::Console { content, .. }
            | Self::Image { content, .. } => content.push_str(more),
        }
    }

    pub fn set_content(&mut self, replacement: String) {
        match self {
            Self::Text { content, .. }
            | Self::Code { content, .. }
            | Self::Console { content, .. }
            | Self::Image { content, .. } => *content = replacement,
        }
    }

    /// Empty console/output placeholder: the result slot for a code block
    /// whose run produced no output.
    #[must_use]
    pub fn empty_console_output() -> Self {
        Self::Console {
            role: Role::Computer,
            format: Some("output".to_string()),
            content: String::new(),
        }
    }
}

/// How the aggregator treats a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkClass {
    /// Folded into the conversation log.
    Persisted,
    /// Shown to live consumers, never logged.
    Ephemeral,
    /// Drives the state machine itself (confirmations, run-complete marker).
    Control,
}

/// Transient unit yielded by a response source.
///
/// A chunk is always folded into a [`Message`] or discarded; it is never
/// stored as-is. `content` is absent only on the run-complete marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub role: Role,
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Chunk {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            kind: ChunkKind::Message,
            format: None,
            content: Some(content.into()),
        }
    }

    pub fn code(role: Role, language: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role,
            kind: ChunkKind::Code,
            format: Some(language.into()),
            content: Some(content.into()),
        }
    }

    pub fn console_output(content: impl Into<String>) -> Self {
        Self {
            role: Role::Computer,
            kind: ChunkKind::Console,
            format: Some("output".to_string()),
            content: Some(content.into()),
        }
    }

    /// Line-highlight progress marker for the line currently executing.
    pub fn active_line(line: u32) -> Self {
        Self {
            role: Role::Computer,
            kind: ChunkKind::Console,
            format: Some(ACTIVE_LINE.to_string()),
            content: Some(line.to_string()),
        }
    }

    /// Marker signalling that the current execution run has ended.
    #[must_use]
    pub fn run_complete() -> Self {
        Self {
            role: Role::Computer,
            kind: ChunkKind::Console,
            format: Some(ACTIVE_LINE.to_string()),
            content: None,
        }
    }

    pub fn confirmation(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            kind: ChunkKind::Confirmation,
            format: None,
            content: Some(content.into()),
        }
    }

    #[must_use]
    pub fn is_run_complete_marker(&self) -> bool {
        self.format.as_deref() == Some(ACTIVE_LINE) && self.content.is_none()
    }

    /// Single source of truth for persisted/ephemeral/control classification.
    /// The merge logic never re-derives this.
    #[must_use]
    pub fn classify(&self) -> ChunkClass {
        if self.kind == ChunkKind::Confirmation {
            return ChunkClass::Control;
        }
        if self.format.as_deref() == Some(ACTIVE_LINE) {
            return if self.content.is_none() {
                ChunkClass::Control
            } else {
                ChunkClass::Ephemeral
            };
        }
        if self.kind == ChunkKind::Review {
            return ChunkClass::Ephemeral;
        }
        ChunkClass::Persisted
    }

    /// Validates the per-variant field table and produces the log entry.
    pub fn into_message(self) -> Result<Message, ChunkError> {
        let kind = self.kind;
        let content = |content: Option<String>| content.ok_or(ChunkError::MissingContent { kind });
        match kind {
            ChunkKind::Message => {
                if let Some(format) = self.format {
                    return Err(ChunkError::UnexpectedFormat { kind, format });
                }
                Ok(Message::Text {
                    role: self.role,
                    content: content(self.content)?,
                })
            }
            ChunkKind::Code => Ok(Message::Code {
                role: self.role,
                format: self.format,
                content: content(self.content)?,
            }),
            ChunkKind::Console => Ok(Message::Console {
                role: self.role,
                format: self.format,
                content: content(self.content)?,
            }),
            ChunkKind::Image => Ok(Message::Image {
                role: self.role,
                format: self.format.ok_or(ChunkError::MissingFormat { kind })?,
                content: content(self.content)?,
            }),
            ChunkKind::Confirmation | ChunkKind::Review => {
                Err(ChunkError::NotPersistable { kind })
            }
        }
    }
}

/// Ingestion-time validation failures for chunk → message conversion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    #[error("{} chunk has no content", kind.as_str())]
    MissingContent { kind: ChunkKind },
    #[error("{} chunk requires a format", kind.as_str())]
    MissingFormat { kind: ChunkKind },
    #[error("{} chunk carries an unexpected format `{format}`", kind.as_str())]
    UnexpectedFormat { kind: ChunkKind, format: String },
    #[error("{} chunks are never logged", kind.as_str())]
    NotPersistable { kind: ChunkKind },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_wire_shape_round_trips() {
        let message = Message::Code {
            role: Role::Assistant,
            format: Some("python".to_string()),
            content: "print(1)".to_string(),
        };
        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({
                "role": "assistant",
                "type": "code",
                "format": "python",
                "content": "print(1)",
            })
        );
        let back: Message = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, message);
    }

    #[test]
    fn text_message_omits_format_on_the_wire() {
        let value =
            serde_json::to_value(Message::Text {
                role: Role::User,
                content: "hi".to_string(),
            })
            .expect("serialize");
        assert_eq!(value["type"], "message");
        assert!(value.get("format").is_none());
    }

    #[test]
    fn classification_table() {
        assert_eq!(
            Chunk::text(Role::Assistant, "hello").classify(),
            ChunkClass::Persisted
        );
        assert_eq!(
            Chunk::code(Role::Assistant, "python", "1").classify(),
            ChunkClass::Persisted
        );
        assert_eq!(Chunk::console_output("ok").classify(), ChunkClass::Persisted);
        assert_eq!(Chunk::active_line(3).classify(), ChunkClass::Ephemeral);
        assert_eq!(Chunk::run_complete().classify(), ChunkClass::Control);
        assert_eq!(
            Chunk::confirmation(Role::Computer, "{}").classify(),
            ChunkClass::Control
        );
        let review = Chunk {
            role: Role::Assistant,
            kind: ChunkKind::Review,
            format: None,
            content: Some("looks fine".to_string()),
        };
        assert_eq!(review.classify(), ChunkClass::Ephemeral);
    }

    #[test]
    fn into_message_validates_per_variant_fields() {
        let no_content = Chunk {
            role: Role::Assistant,
            kind: ChunkKind::Code,
            format: Some("python".to_string()),
            content: None,
        };
        assert_eq!(
            no_content.into_message(),
            Err(ChunkError::MissingContent {
                kind: ChunkKind::Code
            })
        );

        let image_without_format = Chunk {
            role: Role::User,
            kind: ChunkKind::Image,
            format: None,
            content: Some("shot.png".to_string()),
        };
        assert_eq!(
            image_without_format.into_message(),
            Err(ChunkError::MissingFormat {
                kind: ChunkKind::Image
            })
        );

        let formatted_text = Chunk {
            role: Role::User,
            kind: ChunkKind::Message,
            format: Some("markdown".to_string()),
            content: Some("hi".to_string()),
        };
        assert!(matches!(
            formatted_text.into_message(),
            Err(ChunkError::UnexpectedFormat { .. })
        ));

        assert_eq!(
            Chunk::confirmation(Role::Computer, "{}").into_message(),
            Err(ChunkError::NotPersistable {
                kind: ChunkKind::Confirmation
            })
        );
    }

    #[test]
    fn run_complete_marker_requires_absent_content() {
        assert!(Chunk::run_complete().is_run_complete_marker());
        assert!(!Chunk::active_line(1).is_run_complete_marker());
    }
}
