//! The boundary between a chat session and the service that writes replies.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;

use crate::error::Result;
use crate::message::ChatMessage;
use crate::model::KnownModel;
use crate::settings::SessionSettings;

/// Reply fragments in arrival order; concatenated they form the full reply.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One request for an assistant reply.
///
/// Serializes to the chat-completions request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: KnownModel,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub stream: bool,
}

impl CompletionRequest {
    /// Builds a request for `messages` under the given settings.
    ///
    /// The token budget is capped at the model's ceiling.
    pub fn new(settings: &SessionSettings, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: settings.model(),
            messages,
            temperature: settings.temperature(),
            max_tokens: settings.effective_max_tokens(),
            stream: settings.stream(),
        }
    }
}

/// A service that produces assistant replies for a message history.
///
/// Failures are reported whole; implementations never return a partial
/// reply from [`complete`](Completion::complete).
#[async_trait]
pub trait Completion: Send + Sync {
    /// Returns the full reply.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Returns the reply as a stream of fragments.
    async fn stream(&self, request: &CompletionRequest) -> Result<TextStream>;
}
