//! Interactive chat over persisted conversations.
//!
//! This module provides the pieces of the `confab` REPL:
//!
//! - [`config`]: CLI argument parsing and the on-disk layout
//! - [`session`]: the conversation session controller
//! - [`commands`]: slash command parsing
//! - [`export`]: JSON and plain-text conversation exports

mod commands;
mod config;
mod export;
mod session;

pub use crate::render::{PlainTextRenderer, Renderer};
pub use commands::{CUSTOM_CATEGORY, ChatCommand, help_text, parse_command};
pub use config::{
    ChatArgs, ChatConfig, EXPORTS_DIR, HOME_VAR, PROMPTS_DIR, resolve_home,
};
pub use export::{ExportDocument, ExportFormat, ExportedMessage, render as render_export};
pub use session::{ChatSession, PersonaSwitch, SessionState, TurnOutcome};
