//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and the on-disk
//! layout of everything a session persists.

use std::env;
use std::path::{Path, PathBuf};

use arrrg_derive::CommandLine;

use crate::settings::CONFIG_FILE;
use crate::store::DB_FILE;

/// Environment variable that overrides the home directory.
pub const HOME_VAR: &str = "CONFAB_HOME";

/// Directory under the home holding the persona registry.
pub const PROMPTS_DIR: &str = "prompts";

/// Directory under the home that receives export files.
pub const EXPORTS_DIR: &str = "exports";

/// Command-line arguments for the confab tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Directory holding configuration, personas, and conversations.
    #[arrrg(optional, "Data directory (default: $CONFAB_HOME or the platform data dir)", "DIR")]
    pub home: Option<String>,

    /// Model to use for this session.
    #[arrrg(optional, "Model to use (default: the configured model)", "MODEL")]
    pub model: Option<String>,

    /// Persona to use for this session.
    #[arrrg(optional, "Persona to use (default: the current persona)", "PERSONA")]
    pub persona: Option<String>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    /// Request whole replies instead of streams.
    #[arrrg(flag, "Disable streaming replies")]
    pub no_stream: bool,
}

/// Configuration for a chat session.
///
/// Overrides left as `None` keep whatever the persisted configuration says.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// Root of the persisted state.
    pub home: PathBuf,

    /// Model override.
    pub model: Option<String>,

    /// Persona override.
    pub persona: Option<String>,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// Streaming override.
    pub stream: Option<bool>,
}

impl ChatConfig {
    /// Creates a configuration rooted at `home` with no overrides.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            model: None,
            persona: None,
            use_color: true,
            stream: None,
        }
    }

    /// Sets the model override.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the persona override.
    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }

    /// Sets the streaming override.
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    pub fn config_file(&self) -> PathBuf {
        self.home.join(CONFIG_FILE)
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.home.join(PROMPTS_DIR)
    }

    pub fn db_file(&self) -> PathBuf {
        self.home.join(DB_FILE)
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.home.join(EXPORTS_DIR)
    }
}

impl From<ChatArgs> for ChatConfig {
    fn from(args: ChatArgs) -> Self {
        let home = resolve_home(
            args.home.as_deref(),
            env::var(HOME_VAR).ok().as_deref(),
            dirs::data_dir().as_deref(),
        );
        ChatConfig {
            home,
            model: args.model,
            persona: args.persona,
            use_color: !args.no_color,
            stream: args.no_stream.then_some(false),
        }
    }
}

/// Picks the home directory: flag, then environment, then the platform data
/// directory, then `./.confab`.
pub fn resolve_home(flag: Option<&str>, env: Option<&str>, data_dir: Option<&Path>) -> PathBuf {
    let explicit = flag
        .or(env)
        .map(str::trim)
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from);
    explicit
        .or_else(|| data_dir.map(|dir| dir.join("confab")))
        .unwrap_or_else(|| PathBuf::from(".confab"))
}
