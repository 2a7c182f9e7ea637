//! Interactive chat client with persisted conversations.
//!
//! This binary provides a REPL over an OpenAI-compatible chat-completions
//! API.  Every turn is stored, so past conversations can be listed, searched,
//! reloaded and exported.
//!
//! # Usage
//!
//! ```bash
//! # Basic usage with the persisted settings
//! confab
//!
//! # Use another model and persona for this session
//! confab --model gpt-4o --persona default
//!
//! # Keep everything under a specific directory, without colors or streaming
//! confab --home ./chat-data --no-color --no-stream
//! ```
//!
//! Set `CONFAB_API_KEY` (or `OPENAI_API_KEY`) before starting.  Logging goes
//! to stderr and is controlled by `CONFAB_LOG` (default `warn`).
//!
//! Type `/help` at the prompt for the list of commands.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use confab::chat::{
    ChatArgs, ChatCommand, ChatConfig, ChatSession, PersonaSwitch, PlainTextRenderer, Renderer,
    help_text, parse_command,
};
use confab::model::catalog;
use confab::store::{ConversationSummary, DEFAULT_SEARCH_LIMIT};
use confab::utils::time::format_rfc3339;
use confab::{OpenAiClient, Result};

type Session = ChatSession<OpenAiClient>;

/// Main entry point for the confab application.
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_env("CONFAB_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (args, _) = ChatArgs::from_command_line_relaxed("confab [OPTIONS]");
    let config = ChatConfig::from(args);
    let use_color = config.use_color;

    let client = OpenAiClient::new(None)?;
    let mut session = ChatSession::open(client, &config).await?;
    let mut rl = DefaultEditor::new()?;

    // Flag for interrupt handling during streaming
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::Relaxed);
    })?;
    let mut renderer = PlainTextRenderer::with_color_and_interrupt(use_color, interrupted.clone());

    println!(
        "confab (model: {}, persona: {})",
        session.settings().model(),
        session.personas().current_id()
    );
    println!("Type /help for commands, /quit to exit\n");

    loop {
        // Reset interrupt flag before each input
        interrupted.store(false, Ordering::Relaxed);

        match rl.readline("You: ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                if let Some(command) = parse_command(line) {
                    if command == ChatCommand::Quit {
                        println!("Goodbye!");
                        break;
                    }
                    if let Err(err) = run_command(&mut session, command, &config, &mut renderer).await
                    {
                        renderer.print_error(&err.to_string());
                    }
                    continue;
                }

                if let Err(err) = session.send(line, &mut renderer).await {
                    renderer.print_error(&err.to_string());
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl+D - exit
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {err}"));
                break;
            }
        }
    }

    Ok(())
}

async fn run_command(
    session: &mut Session,
    command: ChatCommand,
    config: &ChatConfig,
    renderer: &mut dyn Renderer,
) -> Result<()> {
    match command {
        ChatCommand::Help => {
            for line in help_text().lines() {
                println!("    {line}");
            }
        }
        ChatCommand::Models => print_models(session),
        ChatCommand::Model(id) => {
            session.switch_model(&id)?;
            renderer.print_info(&format!("Model changed to: {}", session.settings().model()));
        }
        ChatCommand::Current => {
            let info = session.settings().model_info();
            renderer.print_info(&format!("Current model: {} ({})", info.model, info.name));
        }
        ChatCommand::Personas => print_personas(session),
        ChatCommand::Persona(id) => match session.switch_persona(&id).await? {
            PersonaSwitch::Rewritten => {
                renderer.print_info(&format!("Persona switched to {id}; system prompt updated."))
            }
            PersonaSwitch::Unchanged => renderer.print_info(&format!("Persona set to {id}.")),
        },
        ChatCommand::PersonaNew { id, name, content } => {
            session.create_persona(&id, &name, &content)?;
            renderer.print_info(&format!("Created persona {id}. Use /persona {id} to switch."));
        }
        ChatCommand::New(title) => {
            let id = session.start_new(title.as_deref()).await?;
            renderer.print_info(&format!("Started conversation {id}."));
        }
        ChatCommand::History(limit) => {
            let conversations = session.list_conversations(limit).await?;
            print_conversations("Recent conversations", &conversations);
        }
        ChatCommand::Search(query) => {
            let conversations = session
                .search_conversations(&query, DEFAULT_SEARCH_LIMIT)
                .await?;
            print_conversations(&format!("Matches for {query:?}"), &conversations);
        }
        ChatCommand::Load(id) => {
            let messages = session.load_conversation(id).await?;
            let count = messages.len();
            renderer.print_info(&format!("Loaded conversation {id} ({count} messages)."));
        }
        ChatCommand::Delete(id) => {
            if session.delete_conversation(id).await? {
                renderer.print_info(&format!("Deleted conversation {id}."));
            } else {
                renderer.print_error(&format!("No conversation with id {id}."));
            }
        }
        ChatCommand::Rename(id, title) => {
            if session.rename_conversation(id, &title).await? {
                renderer.print_info(&format!("Renamed conversation {id} to {title:?}."));
            } else {
                renderer.print_error(&format!("No conversation with id {id}."));
            }
        }
        ChatCommand::Export(id, format) => {
            let path = session
                .export_to_file(id, &format, &config.exports_dir())
                .await?;
            renderer.print_info(&format!("Exported to {}", path.display()));
        }
        ChatCommand::Stats => {
            let stats = session.stats().await?;
            println!("    Statistics:");
            println!("      Conversations: {}", stats.total_conversations);
            println!("      Messages: {}", stats.total_messages);
            println!("      Estimated total cost: ${:.6}", stats.total_cost);
            println!("      Models used: {}", stats.distinct_models);
            println!("      Personas used: {}", stats.distinct_personas);
        }
        ChatCommand::Clean => {
            let removed = session.clean_duplicate_system_messages().await?;
            renderer.print_info(&format!("Removed {removed} duplicate system messages."));
        }
        ChatCommand::Cost => {
            let estimate = session.estimate_cost(None);
            renderer.print_info(&format!(
                "Estimated cost of the next turn: ${:.6} (~{} input + ~{} output tokens; approximate)",
                estimate.total, estimate.input_tokens as u64, estimate.output_tokens as u64
            ));
        }
        ChatCommand::Temperature(value) => {
            session.set_temperature(value)?;
            renderer.print_info(&format!("temperature set to {value:.2}"));
        }
        ChatCommand::MaxTokens(value) => {
            session.set_max_tokens(value)?;
            renderer.print_info(&format!("max_tokens set to {value}"));
        }
        ChatCommand::Stream(on) => {
            session.set_stream(on)?;
            renderer.print_info(if on {
                "Streaming enabled."
            } else {
                "Streaming disabled."
            });
        }
        ChatCommand::ShowConfig => print_config(session, config),
        ChatCommand::Invalid(message) => renderer.print_error(&message),
        ChatCommand::Quit => {}
    }
    Ok(())
}

fn print_models(session: &Session) {
    let current = session.settings().model();
    println!("    Available models:");
    for info in catalog() {
        let marker = if info.model == current { "*" } else { " " };
        println!(
            "    {marker} {:<14} {} - {} (max {} tokens, ${}/1K in, ${}/1K out)",
            info.model.id(),
            info.name,
            info.description,
            info.max_tokens,
            info.input_cost_per_1k,
            info.output_cost_per_1k
        );
    }
}

fn print_personas(session: &Session) {
    let current = session.personas().current_id();
    println!("    Personas:");
    for (id, persona) in session.personas().list() {
        let marker = if id == current { "*" } else { " " };
        println!(
            "    {marker} {id:<14} [{}] {} - {}",
            persona.category, persona.name, persona.description
        );
    }
}

fn print_conversations(heading: &str, conversations: &[ConversationSummary]) {
    if conversations.is_empty() {
        println!("    No conversations.");
        return;
    }
    println!("    {heading}:");
    for summary in conversations {
        let conversation = &summary.conversation;
        println!(
            "      [{}] {} ({}, {} messages, ${:.6}) updated {}",
            conversation.id,
            conversation.title,
            conversation.model,
            summary.message_count,
            summary.total_cost,
            format_rfc3339(&conversation.updated_at)
        );
    }
}

fn print_config(session: &Session, config: &ChatConfig) {
    let settings = session.settings();
    println!("    Current Configuration:");
    println!("      Home: {}", config.home.display());
    println!("      Model: {}", settings.model());
    println!("      Persona: {}", session.personas().current_id());
    println!("      Temperature: {:.2}", settings.temperature());
    println!(
        "      Max tokens: {} (sent: {})",
        settings.max_tokens(),
        settings.effective_max_tokens()
    );
    println!(
        "      Streaming: {}",
        if settings.stream() { "on" } else { "off" }
    );
    match session.conversation_id() {
        Some(id) => println!("      Conversation: {id}"),
        None => println!("      Conversation: (none)"),
    }
}
