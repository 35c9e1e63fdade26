//! Add command — save one journal entry
//!
//! Entry text comes from the arguments or, when absent, from stdin — the
//! tail end of the voice-transcription pipeline pipes here. The record is
//! durable before the command returns; indexing is left to the dirty flag.

use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Local;

use crate::cli::Cli;
use crate::config::DataPaths;
use crate::record::{generate_id, JournalRecord, SOURCE_VOICE};
use crate::status::DirtyFlag;
use crate::store::Store;

pub(crate) fn cmd_add(
    cli: &Cli,
    data_dir: &Path,
    text: &[String],
    date: Option<String>,
    time: Option<String>,
) -> Result<()> {
    let content = if text.is_empty() {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read entry text from stdin")?;
        buf
    } else {
        text.join(" ")
    };
    let content = content.trim();
    if content.is_empty() {
        bail!("No entry text provided");
    }

    let paths = DataPaths::new(data_dir);
    let store = Store::open(&paths.records);

    let now = Local::now();
    let record = JournalRecord {
        id: store.unique_id(&generate_id(now))?,
        source: SOURCE_VOICE.to_string(),
        date: date.or_else(|| Some(now.format("%Y-%m-%d").to_string())),
        time: time.or_else(|| Some(now.format("%H:%M").to_string())),
        content: content.to_string(),
        conversation_id: None,
        user_id: None,
    };

    store
        .append(record.clone())
        .context("Failed to save the record")?;
    DirtyFlag::new(&paths.dirty_flag).set()?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    if !cli.quiet {
        eprintln!(
            "Saved to {}; index marked stale. Run 'mnemo index' to refresh.",
            paths.records.display()
        );
    }
    Ok(())
}
