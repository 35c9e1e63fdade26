//! Chat command — interactive REPL over the memory agent
//!
//! Readline editing and history, one agent turn per line. The last few
//! turns ride along for pronoun resolution; anything longer-lived belongs
//! to the conversation layer outside the retrieval core.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Local;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::agent::Agent;
use crate::cli::Cli;
use crate::config::{api_key, Config, DataPaths, API_KEY_ENV};
use crate::embedding::EmbeddingClient;
use crate::llm::{ChatClient, ChatMessage};
use crate::retriever::Snapshot;

/// Turns kept for pronoun resolution.
const MAX_HISTORY_MESSAGES: usize = 12;

pub(crate) fn cmd_chat(cli: &Cli, config: &Config, data_dir: &Path) -> Result<()> {
    let _span = tracing::info_span!("cmd_chat").entered();

    let paths = DataPaths::new(data_dir);
    let snapshot = Snapshot::load(&paths)
        .context("Index failed to load; run 'mnemo index --full' to rebuild it")?;

    let Some(key) = api_key() else {
        bail!("{} is not set; chat needs the remote endpoints", API_KEY_ENV);
    };
    let embedder = EmbeddingClient::new(&config.api_base(), &key, &config.embedding_model())?;
    let chat = ChatClient::new(&config.api_base(), &key, &config.chat_model())?;
    let agent = Agent::new(&chat, &snapshot, &embedder);

    let history_path = paths.root.join("chat_history");
    let mut editor = DefaultEditor::new()?;
    let _ = editor.load_history(&history_path);

    if !cli.quiet {
        println!(
            "mnemo chat — {} entries indexed. Type 'exit' to quit.",
            snapshot.ntotal()
        );
    }

    let mut history: Vec<ChatMessage> = Vec::new();
    loop {
        match editor.readline("mnemo> ") {
            Ok(line) => {
                let message = line.trim();
                if message.is_empty() {
                    continue;
                }
                if matches!(message.to_ascii_lowercase().as_str(), "exit" | "quit") {
                    break;
                }
                let _ = editor.add_history_entry(message);

                match agent.answer(message, &history, Local::now().date_naive()) {
                    Ok(outcome) => {
                        if let Some(action) = &outcome.action {
                            if cli.verbose {
                                eprintln!(
                                    "{}",
                                    format!(
                                        "[search: {} date: {}]",
                                        action.query,
                                        action.date.as_deref().unwrap_or("None")
                                    )
                                    .dimmed()
                                );
                            }
                        }
                        println!("{}", outcome.answer);
                        history.push(ChatMessage::user(message));
                        history.push(ChatMessage::assistant(outcome.answer.clone()));
                        if history.len() > MAX_HISTORY_MESSAGES {
                            history.drain(..history.len() - MAX_HISTORY_MESSAGES);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Chat turn failed");
                        eprintln!("Error: {}", e);
                    }
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Readline error");
                eprintln!("Error: {}", e);
                break;
            }
        }
    }

    if let Err(e) = editor.save_history(&history_path) {
        tracing::warn!(error = %e, "Failed to save chat history");
    }
    Ok(())
}
