//! Slash command parsing for the chat application.
//!
//! This module handles parsing of special commands that start with `/`,
//! allowing users to control the chat session without sending messages
//! to the API.

use crate::settings::MAX_TEMPERATURE;
use crate::store::DEFAULT_LIST_LIMIT;

/// Category given to personas created from the command line.
pub const CUSTOM_CATEGORY: &str = "custom";

/// A parsed chat command.
///
/// These commands control the chat session and are not sent to the API.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Display help information.
    Help,

    /// List the model catalog.
    Models,

    /// Change the model.
    Model(String),

    /// Show the active model.
    Current,

    /// List personas.
    Personas,

    /// Switch to another persona.
    Persona(String),

    /// Create a persona from a prompt typed on the command line.
    PersonaNew {
        id: String,
        name: String,
        content: String,
    },

    /// Start a new conversation, optionally titled.
    New(Option<String>),

    /// List recent conversations.
    History(u32),

    /// Search conversation titles and messages.
    Search(String),

    /// Load a past conversation.
    Load(i64),

    /// Delete a conversation.
    Delete(i64),

    /// Rename a conversation.
    Rename(i64, String),

    /// Export a conversation in the named format.
    Export(i64, String),

    /// Show store-wide statistics.
    Stats,

    /// Remove duplicate system messages.
    Clean,

    /// Show the cost estimate for the next message.
    Cost,

    /// Set the sampling temperature.
    Temperature(f64),

    /// Set the maximum tokens per response.
    MaxTokens(u32),

    /// Turn streaming on or off.
    Stream(bool),

    /// Show the current configuration.
    ShowConfig,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it
/// should be sent as a message.  A bare `exit` also ends the session.
///
/// # Examples
///
/// ```
/// # use confab::chat::{parse_command, ChatCommand};
/// assert_eq!(parse_command("/quit"), Some(ChatCommand::Quit));
/// assert_eq!(parse_command("exit"), Some(ChatCommand::Quit));
/// assert!(parse_command("/model gpt-4o").is_some());
/// assert!(parse_command("Hello there!").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();

    if input.eq_ignore_ascii_case("exit") {
        return Some(ChatCommand::Quit);
    }
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "help" | "?" => ChatCommand::Help,
        "models" => ChatCommand::Models,
        "model" | "switch" => match argument {
            Some(model) => ChatCommand::Model(model.to_string()),
            None => ChatCommand::Invalid(format!("/{command} requires a model name")),
        },
        "current" => ChatCommand::Current,
        "personas" => ChatCommand::Personas,
        "persona" => match argument {
            Some(id) => ChatCommand::Persona(id.to_string()),
            None => ChatCommand::Invalid("/persona requires a persona id".to_string()),
        },
        "persona-new" => parse_persona_new(argument),
        "new" => ChatCommand::New(argument.map(|s| s.to_string())),
        "history" => match argument {
            Some(arg) => parse_u32_command(Some(arg), ChatCommand::History, "/history"),
            None => ChatCommand::History(DEFAULT_LIST_LIMIT),
        },
        "search" => match argument {
            Some(query) => ChatCommand::Search(query.to_string()),
            None => ChatCommand::Invalid("/search requires a query".to_string()),
        },
        "load" => parse_id_command(argument, ChatCommand::Load, "/load"),
        "delete" => parse_id_command(argument, ChatCommand::Delete, "/delete"),
        "rename" => parse_rename(argument),
        "export" => parse_export(argument),
        "stats" => ChatCommand::Stats,
        "clean" => ChatCommand::Clean,
        "cost" => ChatCommand::Cost,
        "temperature" => match argument {
            Some(arg) => match parse_f64_in_range(arg, 0.0, MAX_TEMPERATURE) {
                Ok(value) => ChatCommand::Temperature(value),
                Err(err) => ChatCommand::Invalid(format!("/temperature {err}")),
            },
            None => ChatCommand::Invalid("/temperature requires a value".to_string()),
        },
        "max_tokens" => parse_u32_command(argument, ChatCommand::MaxTokens, "/max_tokens"),
        "stream" => match argument.and_then(parse_on_off) {
            Some(value) => ChatCommand::Stream(value),
            None => ChatCommand::Invalid("/stream expects 'on' or 'off'".to_string()),
        },
        "config" => ChatCommand::ShowConfig,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{command}")),
    };

    Some(result)
}

fn parse_persona_new(argument: Option<&str>) -> ChatCommand {
    const USAGE: &str = "/persona-new expects '<id> [name] | <prompt>'";
    let Some((head, content)) = argument.and_then(|arg| arg.split_once('|')) else {
        return ChatCommand::Invalid(USAGE.to_string());
    };
    let content = content.trim();
    let mut head = head.trim().splitn(2, char::is_whitespace);
    let Some(id) = head.next().filter(|id| !id.is_empty()) else {
        return ChatCommand::Invalid(USAGE.to_string());
    };
    if content.is_empty() {
        return ChatCommand::Invalid("/persona-new requires prompt text after '|'".to_string());
    }
    let name = head
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(id);
    ChatCommand::PersonaNew {
        id: id.to_string(),
        name: name.to_string(),
        content: content.to_string(),
    }
}

fn parse_rename(argument: Option<&str>) -> ChatCommand {
    let Some((id, title)) = argument.and_then(|arg| arg.split_once(char::is_whitespace)) else {
        return ChatCommand::Invalid("/rename expects '<id> <title>'".to_string());
    };
    match id.parse::<i64>() {
        Ok(id) => ChatCommand::Rename(id, title.trim().to_string()),
        Err(_) => ChatCommand::Invalid("/rename expects a numeric conversation id".to_string()),
    }
}

fn parse_export(argument: Option<&str>) -> ChatCommand {
    let Some(arg) = argument else {
        return ChatCommand::Invalid("/export expects '<id> [json|txt]'".to_string());
    };
    let mut parts = arg.split_whitespace();
    let id = parts.next().and_then(|id| id.parse::<i64>().ok());
    let format = parts.next().unwrap_or("json");
    match (id, parts.next()) {
        (Some(id), None) => ChatCommand::Export(id, format.to_string()),
        _ => ChatCommand::Invalid("/export expects '<id> [json|txt]'".to_string()),
    }
}

fn parse_id_command<F>(argument: Option<&str>, constructor: F, name: &str) -> ChatCommand
where
    F: Fn(i64) -> ChatCommand,
{
    match argument {
        Some(arg) => match arg.parse::<i64>() {
            Ok(value) => constructor(value),
            Err(_) => ChatCommand::Invalid(format!("{name} expects a numeric conversation id")),
        },
        None => ChatCommand::Invalid(format!("{name} requires a conversation id")),
    }
}

fn parse_u32_command<F>(argument: Option<&str>, constructor: F, name: &str) -> ChatCommand
where
    F: Fn(u32) -> ChatCommand,
{
    match argument {
        Some(arg) => match arg.parse::<u32>() {
            Ok(value) if value > 0 => constructor(value),
            _ => ChatCommand::Invalid(format!("{name} expects a positive integer")),
        },
        None => ChatCommand::Invalid(format!("{name} requires a value")),
    }
}

fn parse_f64_in_range(value: &str, min: f64, max: f64) -> Result<f64, String> {
    let parsed: f64 = value
        .parse()
        .map_err(|_| format!("expects a value between {min} and {max}"))?;
    if parsed.is_finite() && parsed >= min && parsed <= max {
        Ok(parsed)
    } else {
        Err(format!("expects a value between {min} and {max}"))
    }
}

fn parse_on_off(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "on" | "true" | "yes" => Some(true),
        "off" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /models                       List available models
  /model <id>                   Change the model (e.g., /model gpt-4o)
  /current                      Show the current model
  /personas                     List personas
  /persona <id>                 Switch persona
  /persona-new <id> [name] | <prompt>
                                Create a persona from a prompt
  /new [title]                  Start a new conversation
  /history [n]                  List recent conversations (default 20)
  /search <text>                Search titles and messages (case-sensitive)
  /load <id>                    Load a past conversation
  /delete <id>                  Delete a conversation
  /rename <id> <title>          Rename a conversation
  /export <id> [json|txt]       Export a conversation to a file
  /stats                        Show statistics across all conversations
  /clean                        Remove duplicate system messages
  /cost                         Show estimated cost for the next message
  /temperature <v>              Set temperature 0.0-2.0
  /max_tokens <n>               Set maximum response tokens
  /stream on|off                Stream replies as they arrive
  /config                       Show current configuration
  /help                         Show this help message
  /quit                         Exit the chat (or type 'exit')"#
}
