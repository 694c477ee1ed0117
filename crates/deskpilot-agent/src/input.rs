use anyhow::anyhow;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use deskpilot_core::{Message, Result};

/// Caller input to a chat cycle, in any of the three accepted shapes.
///
/// JSON ingestion accepts a bare string, a single message object (role
/// defaulting to `user` when absent), or an array that replaces the log
/// wholesale.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatInput {
    Text(String),
    Message(Message),
    Transcript(Vec<Message>),
}

impl ChatInput {
    pub(crate) fn kind_label(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Message(_) => "message",
            Self::Transcript(_) => "transcript",
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::String(text) => Ok(Self::Text(text)),
            Value::Array(items) => {
                let mut messages = Vec::with_capacity(items.len());
                for item in items {
                    messages.push(parse_message(item)?);
                }
                Ok(Self::Transcript(messages))
            }
            value @ Value::Object(_) => Ok(Self::Message(parse_message(value)?)),
            other => Err(anyhow!("unsupported chat input shape: {other}")),
        }
    }
}

fn parse_message(mut value: Value) -> Result<Message> {
    if let Value::Object(map) = &mut value {
        map.entry("role")
            .or_insert_with(|| Value::String("user".to_string()));
    }
    Ok(serde_json::from_value(value)?)
}

impl From<&str> for ChatInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ChatInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Message> for ChatInput {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

impl From<Vec<Message>> for ChatInput {
    fn from(messages: Vec<Message>) -> Self {
        Self::Transcript(messages)
    }
}

impl<'de> Deserialize<'de> for ChatInput {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}
