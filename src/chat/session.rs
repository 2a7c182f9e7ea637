//! Core chat session management.
//!
//! This module provides the `ChatSession` struct which keeps the in-memory
//! message list of the active conversation in step with the store, and
//! drives the completion service for each turn.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use time::OffsetDateTime;
use time::macros::format_description;

use crate::chat::commands::CUSTOM_CATEGORY;
use crate::chat::config::ChatConfig;
use crate::chat::export::{self, ExportFormat};
use crate::completion::{Completion, CompletionRequest};
use crate::error::{Error, Result};
use crate::message::{ChatMessage, Role};
use crate::observability::{SESSION_PERSONA_REWRITES, SESSION_TURNS, STREAM_INTERRUPTS};
use crate::persona::PersonaRegistry;
use crate::render::Renderer;
use crate::settings::{CostEstimate, SessionSettings};
use crate::store::{ConversationSummary, Store, StoreStats};
use crate::utils::fs::write_atomic;

/// Label printed in front of assistant replies.
const REPLY_LABEL: &str = "Assistant";

/// Which conversation, if any, the session is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoConversation,
    Active { conversation_id: i64 },
}

/// What happened during one call to [`ChatSession::send`].
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// The reply as stored: the full text, the partial text of an
    /// interrupted stream, or an `Error: ...` line.
    pub reply: String,
    /// The estimate computed before the request was made.
    pub estimate: CostEstimate,
    /// The user stopped the stream early.
    pub interrupted: bool,
    /// The completion service failed.
    pub failed: bool,
}

/// Effect of a persona switch on the active conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonaSwitch {
    /// The system prompt already matched.
    Unchanged,
    /// The system prompt was replaced and a new system row stored.
    Rewritten,
}

struct Reply {
    text: String,
    interrupted: bool,
    error: Option<Error>,
}

impl Reply {
    fn failed(error: Error) -> Self {
        Self {
            text: String::new(),
            interrupted: false,
            error: Some(error),
        }
    }
}

/// A chat session that manages conversation state and completion calls.
pub struct ChatSession<C: Completion> {
    client: C,
    store: Store,
    personas: PersonaRegistry,
    settings: SessionSettings,
    messages: Vec<ChatMessage>,
    state: SessionState,
}

impl<C: Completion> ChatSession<C> {
    /// Creates a session with no active conversation.
    pub fn new(
        client: C,
        store: Store,
        personas: PersonaRegistry,
        settings: SessionSettings,
    ) -> Self {
        Self {
            client,
            store,
            personas,
            settings,
            messages: Vec::new(),
            state: SessionState::NoConversation,
        }
    }

    /// Opens everything under `config.home` and applies the overrides in
    /// `config`, persisting them.
    pub async fn open(client: C, config: &ChatConfig) -> Result<Self> {
        let mut settings = SessionSettings::load(config.config_file());
        let mut personas = PersonaRegistry::load(config.prompts_dir());
        let store = Store::open(&config.db_file()).await?;
        if let Some(model) = &config.model {
            settings.set_model(model)?;
        }
        if let Some(persona) = &config.persona {
            personas.set_current(persona)?;
        }
        if let Some(stream) = config.stream {
            settings.set_stream(stream)?;
        }
        tracing::info!(
            home = %config.home.display(),
            model = %settings.model(),
            persona = personas.current_id(),
            "opened chat session"
        );
        Ok(Self::new(client, store, personas, settings))
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn personas(&self) -> &PersonaRegistry {
        &self.personas
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Identifier of the active conversation.
    pub fn conversation_id(&self) -> Option<i64> {
        match self.state {
            SessionState::Active { conversation_id } => Some(conversation_id),
            SessionState::NoConversation => None,
        }
    }

    /// The in-memory message list sent with the next request.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Starts a conversation under the current model and persona.
    ///
    /// Without a title, one is made from the current time.  The persona's
    /// system prompt becomes the first stored message.
    pub async fn start_new(&mut self, title: Option<&str>) -> Result<i64> {
        let title = match title.map(str::trim).filter(|title| !title.is_empty()) {
            Some(title) => title.to_string(),
            None => default_title(OffsetDateTime::now_utc()),
        };
        let prompt = self.personas.resolve_content(None);
        let conversation_id = self
            .store
            .start_conversation(
                &title,
                self.settings.model().id(),
                self.personas.current_id(),
                &prompt,
            )
            .await?;
        self.messages = vec![ChatMessage::system(prompt)];
        self.state = SessionState::Active { conversation_id };
        Ok(conversation_id)
    }

    /// Sends one user turn and stores the reply.
    ///
    /// Starts a conversation when none is active.  Completion failures do
    /// not fail the turn: they are stored as an `Error: ...` reply and
    /// reported through [`TurnOutcome::failed`].  Store failures are
    /// returned.
    ///
    /// The stored cost is the estimate made before the request, not what
    /// the provider charged.
    pub async fn send(&mut self, text: &str, renderer: &mut dyn Renderer) -> Result<TurnOutcome> {
        let conversation_id = match self.state {
            SessionState::Active { conversation_id } => conversation_id,
            SessionState::NoConversation => self.start_new(None).await?,
        };
        self.store
            .add_message(conversation_id, Role::User, text, 0, 0.0)
            .await?;
        self.messages.push(ChatMessage::user(text));
        SESSION_TURNS.click();

        let estimate = self.settings.estimate_cost(&self.messages);
        renderer.print_info(&format!(
            "Estimated cost: ${:.6} (~{} tokens)",
            estimate.total,
            estimate.total_tokens()
        ));

        let request = CompletionRequest::new(&self.settings, self.messages.clone());
        let reply = if request.stream {
            self.stream_reply(&request, renderer).await
        } else {
            self.complete_reply(&request, renderer).await
        };

        if let Some(err) = reply.error {
            tracing::warn!(conversation_id, error = %err, "turn failed");
            renderer.print_error(&err.to_string());
            let content = format!("Error: {err}");
            self.store
                .add_message(conversation_id, Role::Assistant, &content, 0, 0.0)
                .await?;
            self.messages.push(ChatMessage::assistant(content.clone()));
            return Ok(TurnOutcome {
                reply: content,
                estimate,
                interrupted: false,
                failed: true,
            });
        }

        if !reply.text.is_empty() {
            self.store
                .add_message(
                    conversation_id,
                    Role::Assistant,
                    &reply.text,
                    estimate.total_tokens(),
                    estimate.total,
                )
                .await?;
            self.messages.push(ChatMessage::assistant(reply.text.clone()));
        }
        Ok(TurnOutcome {
            reply: reply.text,
            estimate,
            interrupted: reply.interrupted,
            failed: false,
        })
    }

    async fn complete_reply(
        &self,
        request: &CompletionRequest,
        renderer: &mut dyn Renderer,
    ) -> Reply {
        match self.client.complete(request).await {
            Ok(text) => {
                renderer.start_response(REPLY_LABEL);
                renderer.print_text(&text);
                renderer.finish_response();
                Reply {
                    text,
                    interrupted: false,
                    error: None,
                }
            }
            Err(err) => Reply::failed(err),
        }
    }

    async fn stream_reply(&self, request: &CompletionRequest, renderer: &mut dyn Renderer) -> Reply {
        let mut stream = match self.client.stream(request).await {
            Ok(stream) => stream,
            Err(err) => return Reply::failed(err),
        };
        renderer.start_response(REPLY_LABEL);
        let mut text = String::new();
        while let Some(fragment) = stream.next().await {
            match fragment {
                Ok(fragment) => {
                    renderer.print_text(&fragment);
                    text.push_str(&fragment);
                }
                Err(err) => {
                    renderer.finish_response();
                    return Reply::failed(err);
                }
            }
            if renderer.should_interrupt() {
                STREAM_INTERRUPTS.click();
                renderer.print_interrupted();
                return Reply {
                    text,
                    interrupted: true,
                    error: None,
                };
            }
        }
        renderer.finish_response();
        Reply {
            text,
            interrupted: false,
            error: None,
        }
    }

    /// Makes `id` the current persona.
    ///
    /// The active conversation's system message is rewritten, and a new
    /// system row stored, only when the persona's prompt differs from it.
    /// A conversation without a leading system message gets the new one
    /// appended, matching where the store puts it.  When the store write
    /// fails the previous persona is restored and the messages are left
    /// alone.
    pub async fn switch_persona(&mut self, id: &str) -> Result<PersonaSwitch> {
        let previous = self.personas.current_id().to_string();
        self.personas.set_current(id)?;
        let SessionState::Active { conversation_id } = self.state else {
            return Ok(PersonaSwitch::Unchanged);
        };
        let prompt = self.personas.resolve_content(None);
        let leading_system = match self.messages.first() {
            Some(first) if first.role == Role::System && first.content == prompt => {
                return Ok(PersonaSwitch::Unchanged);
            }
            Some(first) => first.role == Role::System,
            None => false,
        };
        if let Err(err) = self
            .store
            .add_message(conversation_id, Role::System, &prompt, 0, 0.0)
            .await
        {
            if let Err(restore) = self.personas.set_current(&previous) {
                tracing::warn!(error = %restore, persona = %previous, "failed to restore persona");
            }
            return Err(err);
        }
        if leading_system {
            self.messages[0] = ChatMessage::system(prompt);
        } else {
            self.messages.push(ChatMessage::system(prompt));
        }
        SESSION_PERSONA_REWRITES.click();
        tracing::debug!(conversation_id, persona = id, "rewrote system prompt");
        Ok(PersonaSwitch::Rewritten)
    }

    /// Selects the model for subsequent turns.
    pub fn switch_model(&mut self, id: &str) -> Result<()> {
        self.settings.set_model(id)
    }

    pub fn set_temperature(&mut self, temperature: f64) -> Result<()> {
        self.settings.set_temperature(temperature)
    }

    pub fn set_max_tokens(&mut self, max_tokens: u32) -> Result<()> {
        self.settings.set_max_tokens(max_tokens)
    }

    pub fn set_stream(&mut self, stream: bool) -> Result<()> {
        self.settings.set_stream(stream)
    }

    /// Registers a custom persona whose system prompt is `content`.
    pub fn create_persona(&mut self, id: &str, name: &str, content: &str) -> Result<()> {
        self.personas
            .create_custom(id, name, "Custom persona", content, CUSTOM_CATEGORY)
    }

    /// Replaces the in-memory list with a stored conversation and makes it
    /// active.
    ///
    /// Rows with unknown roles are skipped.  A conversation without stored
    /// messages is reported as not found.
    pub async fn load_conversation(&mut self, conversation_id: i64) -> Result<&[ChatMessage]> {
        let rows = self.store.get_messages(conversation_id).await?;
        if rows.is_empty() {
            return Err(Error::conversation_not_found(conversation_id));
        }
        self.messages = rows
            .iter()
            .filter_map(|row| {
                row.known_role()
                    .map(|role| ChatMessage::new(role, row.content.clone()))
            })
            .collect();
        self.state = SessionState::Active { conversation_id };
        tracing::info!(conversation_id, messages = self.messages.len(), "loaded conversation");
        Ok(&self.messages)
    }

    /// Renders a stored conversation as `json` or `txt`.
    pub async fn export_conversation(&self, conversation_id: i64, format: &str) -> Result<String> {
        let format: ExportFormat = format.parse()?;
        self.render_export(conversation_id, format).await
    }

    /// Writes an export to `dir/conversation_<id>.<format>` and returns its
    /// path.
    pub async fn export_to_file(
        &self,
        conversation_id: i64,
        format: &str,
        dir: &Path,
    ) -> Result<PathBuf> {
        let format: ExportFormat = format.parse()?;
        let text = self.render_export(conversation_id, format).await?;
        let path = dir.join(format!(
            "conversation_{conversation_id}.{}",
            format.extension()
        ));
        write_atomic(&path, text.as_bytes())?;
        tracing::info!(conversation_id, path = %path.display(), "exported conversation");
        Ok(path)
    }

    async fn render_export(&self, conversation_id: i64, format: ExportFormat) -> Result<String> {
        let info = self
            .store
            .get_conversation_info(conversation_id)
            .await?
            .ok_or_else(|| Error::conversation_not_found(conversation_id))?;
        let messages = self.store.get_messages(conversation_id).await?;
        export::render(format, &info, &messages)
    }

    /// Deletes a conversation, detaching from it when it is the active one.
    pub async fn delete_conversation(&mut self, conversation_id: i64) -> Result<bool> {
        let deleted = self.store.delete_conversation(conversation_id).await?;
        if self.conversation_id() == Some(conversation_id) {
            self.messages.clear();
            self.state = SessionState::NoConversation;
        }
        Ok(deleted)
    }

    pub async fn rename_conversation(&self, conversation_id: i64, title: &str) -> Result<bool> {
        self.store
            .update_conversation_title(conversation_id, title)
            .await
    }

    /// Estimates the cost of the next turn.
    ///
    /// `pending` is counted as a user message.  With no active conversation
    /// the current persona's prompt is counted as well.
    pub fn estimate_cost(&self, pending: Option<&str>) -> CostEstimate {
        let mut messages = if self.messages.is_empty() {
            vec![ChatMessage::system(self.personas.resolve_content(None))]
        } else {
            self.messages.clone()
        };
        if let Some(pending) = pending {
            messages.push(ChatMessage::user(pending));
        }
        self.settings.estimate_cost(&messages)
    }

    pub async fn list_conversations(&self, limit: u32) -> Result<Vec<ConversationSummary>> {
        self.store.list_conversations(limit).await
    }

    pub async fn search_conversations(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<ConversationSummary>> {
        self.store.search_conversations(query, limit).await
    }

    pub async fn conversation_info(
        &self,
        conversation_id: i64,
    ) -> Result<Option<ConversationSummary>> {
        self.store.get_conversation_info(conversation_id).await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.get_stats().await
    }

    /// Removes repeated system rows from every conversation.
    pub async fn clean_duplicate_system_messages(&self) -> Result<u64> {
        self.store.clean_duplicate_system_messages().await
    }
}

fn default_title(now: OffsetDateTime) -> String {
    let format = format_description!("Chat [year]-[month]-[day] [hour]:[minute]");
    now.format(&format)
        .unwrap_or_else(|_| format!("Chat {}", now.unix_timestamp()))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::stream;
    use tempfile::TempDir;

    use super::*;
    use crate::completion::TextStream;
    use crate::persona::FALLBACK_PROMPT;

    enum Script {
        Reply(&'static str),
        Fragments(Vec<Result<String>>),
        Fail(&'static str),
    }

    struct ScriptedCompletion {
        scripts: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedCompletion {
        fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn next(&self, request: &CompletionRequest) -> Script {
            self.requests.lock().unwrap().push(request.clone());
            self.scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Script::Fail("no scripted reply"))
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Completion for ScriptedCompletion {
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            match self.next(request) {
                Script::Reply(text) => Ok(text.to_string()),
                Script::Fragments(fragments) => fragments.into_iter().collect(),
                Script::Fail(message) => Err(Error::completion(message, Some(503))),
            }
        }

        async fn stream(&self, request: &CompletionRequest) -> Result<TextStream> {
            match self.next(request) {
                Script::Reply(text) => Ok(Box::pin(stream::iter(vec![Ok(text.to_string())]))),
                Script::Fragments(fragments) => Ok(Box::pin(stream::iter(fragments))),
                Script::Fail(message) => Err(Error::completion(message, Some(503))),
            }
        }
    }

    #[derive(Default)]
    struct RecordingRenderer {
        text: String,
        infos: Vec<String>,
        errors: Vec<String>,
        fragments: usize,
        interrupt_after: Option<usize>,
        interrupted: bool,
    }

    impl Renderer for RecordingRenderer {
        fn print_text(&mut self, text: &str) {
            self.fragments += 1;
            self.text.push_str(text);
        }

        fn print_error(&mut self, error: &str) {
            self.errors.push(error.to_string());
        }

        fn print_info(&mut self, info: &str) {
            self.infos.push(info.to_string());
        }

        fn finish_response(&mut self) {}

        fn print_interrupted(&mut self) {
            self.interrupted = true;
        }

        fn should_interrupt(&self) -> bool {
            self.interrupt_after
                .is_some_and(|after| self.fragments >= after)
        }
    }

    async fn session(scripts: Vec<Script>) -> (ChatSession<ScriptedCompletion>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open_in_memory().await.unwrap();
        let personas = PersonaRegistry::load(dir.path().join("prompts"));
        let mut settings = SessionSettings::default();
        settings.set_stream(false).unwrap();
        let session = ChatSession::new(
            ScriptedCompletion::new(scripts),
            store,
            personas,
            settings,
        );
        (session, dir)
    }

    fn fragments(parts: &[&str]) -> Script {
        Script::Fragments(parts.iter().map(|part| Ok(part.to_string())).collect())
    }

    async fn stored_roles(session: &ChatSession<ScriptedCompletion>, id: i64) -> Vec<String> {
        session
            .store()
            .get_messages(id)
            .await
            .unwrap()
            .into_iter()
            .map(|message| message.role)
            .collect()
    }

    #[test]
    fn default_title_uses_minutes() {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(default_title(now), "Chat 2023-11-14 22:13");
    }

    #[tokio::test]
    async fn new_session_has_no_conversation() {
        let (session, _dir) = session(vec![]).await;
        assert_eq!(session.state(), SessionState::NoConversation);
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn start_new_stores_exactly_one_system_message() {
        let (mut session, _dir) = session(vec![]).await;

        let id = session.start_new(None).await.unwrap();

        assert_eq!(session.state(), SessionState::Active { conversation_id: id });
        let stored = session.store().get_messages(id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].role, "system");
        assert_eq!(stored[0].content, FALLBACK_PROMPT);
        assert_eq!(session.messages(), &[ChatMessage::system(FALLBACK_PROMPT)]);

        let info = session.conversation_info(id).await.unwrap().unwrap();
        assert!(info.conversation.title.starts_with("Chat "));
        assert_eq!(info.conversation.model, "gpt-4o-mini");
        assert_eq!(info.conversation.persona_id, "default");
    }

    #[tokio::test]
    async fn start_new_keeps_given_title() {
        let (mut session, _dir) = session(vec![]).await;
        let id = session.start_new(Some("  Planning  ")).await.unwrap();
        let info = session.conversation_info(id).await.unwrap().unwrap();
        assert_eq!(info.conversation.title, "Planning");
    }

    #[tokio::test]
    async fn send_starts_a_conversation_and_stores_the_turn() {
        let (mut session, _dir) = session(vec![Script::Reply("Hello!")]).await;
        let mut renderer = RecordingRenderer::default();

        let outcome = session.send("Hi", &mut renderer).await.unwrap();

        assert_eq!(outcome.reply, "Hello!");
        assert!(!outcome.failed);
        assert!(!outcome.interrupted);
        assert_eq!(renderer.text, "Hello!");
        assert!(renderer.infos[0].starts_with("Estimated cost: $"));

        let id = session.conversation_id().unwrap();
        assert_eq!(stored_roles(&session, id).await, vec!["system", "user", "assistant"]);
        let stored = session.store().get_messages(id).await.unwrap();
        assert_eq!(stored[1].cost, 0.0);
        assert_eq!(stored[2].tokens_used, i64::from(outcome.estimate.total_tokens()));
        assert!((stored[2].cost - outcome.estimate.total).abs() < 1e-9);

        let requests = session.client().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].messages,
            vec![ChatMessage::system(FALLBACK_PROMPT), ChatMessage::user("Hi")]
        );
        assert!(!requests[0].stream);
    }

    #[tokio::test]
    async fn estimate_is_taken_before_the_call() {
        let (mut session, _dir) = session(vec![Script::Reply("ok")]).await;
        let expected = session.estimate_cost(Some("What is Rust?"));

        let outcome = session
            .send("What is Rust?", &mut RecordingRenderer::default())
            .await
            .unwrap();

        assert_eq!(outcome.estimate, expected);
    }

    #[tokio::test]
    async fn streamed_fragments_form_the_reply() {
        let (mut session, _dir) = session(vec![fragments(&["Hel", "lo", " there"])]).await;
        session.set_stream(true).unwrap();
        let mut renderer = RecordingRenderer::default();

        let outcome = session.send("Hi", &mut renderer).await.unwrap();

        assert_eq!(outcome.reply, "Hello there");
        assert_eq!(renderer.fragments, 3);
        assert!(session.client().requests()[0].stream);
        assert_eq!(session.messages().last(), Some(&ChatMessage::assistant("Hello there")));
    }

    #[tokio::test]
    async fn failures_are_stored_as_error_replies() {
        let (mut session, _dir) =
            session(vec![Script::Fail("service unavailable"), Script::Reply("back")]).await;
        let mut renderer = RecordingRenderer::default();

        let outcome = session.send("Hi", &mut renderer).await.unwrap();

        assert!(outcome.failed);
        assert!(outcome.reply.starts_with("Error: "));
        assert!(outcome.reply.contains("service unavailable"));
        assert_eq!(renderer.errors.len(), 1);
        let id = session.conversation_id().unwrap();
        let stored = session.store().get_messages(id).await.unwrap();
        assert_eq!(stored[2].content, outcome.reply);
        assert_eq!(stored[2].cost, 0.0);
        assert_eq!(stored[2].tokens_used, 0);

        let outcome = session.send("Again", &mut renderer).await.unwrap();
        assert_eq!(outcome.reply, "back");
        assert_eq!(stored_roles(&session, id).await.len(), 5);
    }

    #[tokio::test]
    async fn mid_stream_errors_fail_the_turn() {
        let script = Script::Fragments(vec![
            Ok("partial".to_string()),
            Err(Error::completion("stream broke", None)),
        ]);
        let (mut session, _dir) = session(vec![script]).await;
        session.set_stream(true).unwrap();

        let outcome = session
            .send("Hi", &mut RecordingRenderer::default())
            .await
            .unwrap();

        assert!(outcome.failed);
        assert!(outcome.reply.contains("stream broke"));
    }

    #[tokio::test]
    async fn interrupts_commit_the_partial_reply() {
        let (mut session, _dir) = session(vec![fragments(&["Hel", "lo", " world"])]).await;
        session.set_stream(true).unwrap();
        let mut renderer = RecordingRenderer {
            interrupt_after: Some(2),
            ..RecordingRenderer::default()
        };

        let outcome = session.send("Hi", &mut renderer).await.unwrap();

        assert!(outcome.interrupted);
        assert!(!outcome.failed);
        assert_eq!(outcome.reply, "Hello");
        assert!(renderer.interrupted);
        let id = session.conversation_id().unwrap();
        let stored = session.store().get_messages(id).await.unwrap();
        assert_eq!(stored.last().unwrap().content, "Hello");
    }

    #[tokio::test]
    async fn interrupt_before_any_text_stores_nothing() {
        let (mut session, _dir) = session(vec![fragments(&[""])]).await;
        session.set_stream(true).unwrap();
        let mut renderer = RecordingRenderer {
            interrupt_after: Some(0),
            ..RecordingRenderer::default()
        };

        let outcome = session.send("Hi", &mut renderer).await.unwrap();

        assert!(outcome.interrupted);
        let id = session.conversation_id().unwrap();
        assert_eq!(stored_roles(&session, id).await, vec!["system", "user"]);
    }

    #[tokio::test]
    async fn persona_switches_rewrite_only_on_change() {
        let (mut session, _dir) = session(vec![]).await;
        let id = session.start_new(Some("personas")).await.unwrap();
        session
            .create_persona("pirate", "Pirate", "Talk like a pirate.")
            .unwrap();
        session
            .create_persona("poet", "Poet", "Answer in verse.")
            .unwrap();

        assert_eq!(
            session.switch_persona("pirate").await.unwrap(),
            PersonaSwitch::Rewritten
        );
        assert_eq!(
            session.switch_persona("pirate").await.unwrap(),
            PersonaSwitch::Unchanged
        );
        assert_eq!(
            session.switch_persona("poet").await.unwrap(),
            PersonaSwitch::Rewritten
        );
        assert_eq!(
            session.switch_persona("default").await.unwrap(),
            PersonaSwitch::Rewritten
        );

        assert_eq!(session.messages()[0], ChatMessage::system(FALLBACK_PROMPT));
        assert_eq!(session.messages().len(), 1);
        let roles = stored_roles(&session, id).await;
        assert_eq!(roles, vec!["system"; 4]);

        assert_eq!(session.clean_duplicate_system_messages().await.unwrap(), 3);
        assert_eq!(stored_roles(&session, id).await, vec!["system"]);
    }

    #[tokio::test]
    async fn unknown_persona_changes_nothing() {
        let (mut session, _dir) = session(vec![]).await;
        let id = session.start_new(None).await.unwrap();

        let err = session.switch_persona("nobody").await.unwrap_err();

        assert!(err.is_validation());
        assert_eq!(session.personas().current_id(), "default");
        assert_eq!(stored_roles(&session, id).await, vec!["system"]);
    }

    #[tokio::test]
    async fn persona_switch_without_conversation_is_unchanged() {
        let (mut session, _dir) = session(vec![]).await;
        session.create_persona("pirate", "Pirate", "Arr.").unwrap();

        let switch = session.switch_persona("pirate").await.unwrap();

        assert_eq!(switch, PersonaSwitch::Unchanged);
        assert_eq!(session.personas().current_id(), "pirate");
        assert_eq!(session.estimate_cost(None).input_tokens, 1.0);
    }

    #[tokio::test]
    async fn failed_persona_switch_restores_the_previous_persona() {
        let (mut session, dir) = session(vec![]).await;
        let id = session.start_new(None).await.unwrap();
        session
            .create_persona("pirate", "Pirate", "Talk like a pirate.")
            .unwrap();
        assert!(session.store().delete_conversation(id).await.unwrap());

        let err = session.switch_persona("pirate").await.unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(session.personas().current_id(), "default");
        assert_eq!(session.messages(), &[ChatMessage::system(FALLBACK_PROMPT)]);
        let reloaded = PersonaRegistry::load(dir.path().join("prompts"));
        assert_eq!(reloaded.current_id(), "default");
    }

    #[tokio::test]
    async fn persona_switch_appends_when_no_system_message_leads() {
        let (mut session, _dir) = session(vec![]).await;
        let id = session
            .store()
            .create_conversation("bare", "gpt-4o-mini", "default")
            .await
            .unwrap();
        session
            .store()
            .add_message(id, Role::User, "hello", 0, 0.0)
            .await
            .unwrap();
        session.load_conversation(id).await.unwrap();
        session
            .create_persona("pirate", "Pirate", "Talk like a pirate.")
            .unwrap();

        let switch = session.switch_persona("pirate").await.unwrap();

        assert_eq!(switch, PersonaSwitch::Rewritten);
        let in_memory = session.messages().to_vec();
        assert_eq!(
            in_memory,
            vec![
                ChatMessage::user("hello"),
                ChatMessage::system("Talk like a pirate."),
            ]
        );
        let reloaded = session.load_conversation(id).await.unwrap().to_vec();
        assert_eq!(reloaded, in_memory);
    }

    #[tokio::test]
    async fn load_replaces_the_message_list() {
        let (mut session, _dir) = session(vec![Script::Reply("first reply")]).await;
        let first = session.start_new(Some("first")).await.unwrap();
        session
            .send("first question", &mut RecordingRenderer::default())
            .await
            .unwrap();
        let second = session.start_new(Some("second")).await.unwrap();
        assert_eq!(session.messages().len(), 1);

        let loaded = session.load_conversation(first).await.unwrap().to_vec();

        assert_eq!(
            loaded,
            vec![
                ChatMessage::system(FALLBACK_PROMPT),
                ChatMessage::user("first question"),
                ChatMessage::assistant("first reply"),
            ]
        );
        assert_eq!(session.conversation_id(), Some(first));
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn load_of_empty_or_missing_conversation_is_not_found() {
        let (mut session, _dir) = session(vec![]).await;
        let empty = session
            .store()
            .create_conversation("empty", "gpt-4o-mini", "default")
            .await
            .unwrap();

        assert!(session.load_conversation(empty).await.unwrap_err().is_not_found());
        assert!(session.load_conversation(999).await.unwrap_err().is_not_found());
        assert_eq!(session.state(), SessionState::NoConversation);
    }

    #[tokio::test]
    async fn exports_render_and_write_files() {
        let (mut session, dir) = session(vec![Script::Reply("Hi there")]).await;
        session
            .send("Hello", &mut RecordingRenderer::default())
            .await
            .unwrap();
        let id = session.conversation_id().unwrap();

        let json = session.export_conversation(id, "json").await.unwrap();
        let document: export::ExportDocument = serde_json::from_str(&json).unwrap();
        let roles: Vec<&str> = document.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
        assert_eq!(document.conversation.message_count, 3);

        let txt = session.export_conversation(id, "TXT").await.unwrap();
        assert!(txt.contains("You: Hello"));
        assert!(txt.contains("Assistant: Hi there"));
        assert!(!txt.contains(FALLBACK_PROMPT));

        let err = session.export_conversation(id, "pdf").await.unwrap_err();
        assert!(err.is_unsupported_format());
        let err = session.export_conversation(404, "json").await.unwrap_err();
        assert!(err.is_not_found());

        let exports = dir.path().join("exports");
        let path = session.export_to_file(id, "txt", &exports).await.unwrap();
        assert_eq!(path, exports.join(format!("conversation_{id}.txt")));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), txt);
    }

    #[tokio::test]
    async fn deleting_the_active_conversation_detaches() {
        let (mut session, _dir) = session(vec![]).await;
        let other = session.start_new(Some("other")).await.unwrap();
        let active = session.start_new(Some("active")).await.unwrap();

        assert!(session.delete_conversation(other).await.unwrap());
        assert_eq!(session.conversation_id(), Some(active));

        assert!(session.delete_conversation(active).await.unwrap());
        assert_eq!(session.state(), SessionState::NoConversation);
        assert!(session.messages().is_empty());
        assert!(!session.delete_conversation(active).await.unwrap());
    }

    #[tokio::test]
    async fn rename_reports_existence() {
        let (mut session, _dir) = session(vec![]).await;
        let id = session.start_new(Some("old")).await.unwrap();

        assert!(session.rename_conversation(id, "new").await.unwrap());
        assert!(!session.rename_conversation(id + 100, "new").await.unwrap());
        let info = session.conversation_info(id).await.unwrap().unwrap();
        assert_eq!(info.conversation.title, "new");
    }

    #[tokio::test]
    async fn model_switch_applies_to_the_next_request() {
        let (mut session, _dir) = session(vec![Script::Reply("ok")]).await;
        session.switch_model("gpt-4o").unwrap();
        assert!(session.switch_model("gpt-5").unwrap_err().is_validation());

        session
            .send("Hi", &mut RecordingRenderer::default())
            .await
            .unwrap();

        assert_eq!(
            session.client().requests()[0].model,
            crate::model::KnownModel::Gpt4o
        );
    }
}
