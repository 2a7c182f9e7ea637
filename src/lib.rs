// Public modules
pub mod chat;
pub mod client;
pub mod completion;
pub mod error;
pub mod message;
pub mod model;
pub mod observability;
pub mod persona;
pub mod render;
pub mod settings;
pub mod store;
pub mod utils;

mod sse;

// Re-exports
pub use client::OpenAiClient;
pub use completion::{Completion, CompletionRequest, TextStream};
pub use error::{Error, Result};
pub use message::{ChatMessage, Role};
pub use model::{KnownModel, ModelInfo};
pub use observability::register_biometrics;
pub use persona::{Persona, PersonaRegistry};
pub use settings::{CostEstimate, SessionSettings};
pub use store::{Conversation, ConversationSummary, Message, Store, StoreStats};
