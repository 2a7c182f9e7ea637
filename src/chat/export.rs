//! Conversation export as a JSON document or a plain-text transcript.

use std::fmt::Write as _;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::message::Role;
use crate::store::{ConversationSummary, Message};
use crate::utils::time::format_rfc3339;

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Txt,
}

impl ExportFormat {
    /// File extension for this format.
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Txt => "txt",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "txt" => Ok(ExportFormat::Txt),
            _ => Err(Error::unsupported_format(s.trim())),
        }
    }
}

/// The JSON export document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub conversation: ConversationSummary,
    pub messages: Vec<ExportedMessage>,
}

/// One message in a JSON export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedMessage {
    pub role: String,
    pub content: String,
    #[serde(with = "crate::utils::time")]
    pub timestamp: OffsetDateTime,
    pub tokens_used: i64,
    pub cost: f64,
}

impl From<&Message> for ExportedMessage {
    fn from(message: &Message) -> Self {
        ExportedMessage {
            role: message.role.clone(),
            content: message.content.clone(),
            timestamp: message.timestamp,
            tokens_used: message.tokens_used,
            cost: message.cost,
        }
    }
}

/// Renders a conversation in `format`.
pub fn render(
    format: ExportFormat,
    conversation: &ConversationSummary,
    messages: &[Message],
) -> Result<String> {
    match format {
        ExportFormat::Json => render_json(conversation, messages),
        ExportFormat::Txt => Ok(render_txt(conversation, messages)),
    }
}

/// Only system, user and assistant rows are exported, the same rows a load
/// brings back.
fn render_json(conversation: &ConversationSummary, messages: &[Message]) -> Result<String> {
    let document = ExportDocument {
        conversation: conversation.clone(),
        messages: messages
            .iter()
            .filter(|message| message.known_role().is_some())
            .map(ExportedMessage::from)
            .collect(),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

fn render_txt(conversation: &ConversationSummary, messages: &[Message]) -> String {
    let info = &conversation.conversation;
    let mut out = String::new();
    let _ = writeln!(out, "Title: {}", info.title);
    let _ = writeln!(out, "Model: {}", info.model);
    let _ = writeln!(out, "Persona: {}", info.persona_id);
    let _ = writeln!(out, "Created: {}", format_rfc3339(&info.created_at));
    let _ = writeln!(out, "{}", "-".repeat(50));
    for message in messages {
        let speaker = match message.known_role() {
            Some(Role::User) => "You",
            Some(Role::Assistant) => "Assistant",
            Some(Role::System) | None => continue,
        };
        let _ = writeln!(out, "\n{speaker}: {}", message.content);
    }
    out
}
