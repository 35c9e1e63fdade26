//! Status and stats commands

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::cli::Cli;
use crate::config::DataPaths;
use crate::index::FlatIndex;
use crate::indexer::load_indexed_ids;
use crate::record::SubChunk;
use crate::status::{DirtyFlag, IndexState, StatusFile};
use crate::store::Store;

/// Show the rebuild status record.
pub(crate) fn cmd_status(cli: &Cli, data_dir: &Path) -> Result<()> {
    let paths = DataPaths::new(data_dir);
    let status = StatusFile::new(&paths.status).load();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let state = match status.status {
        IndexState::Idle => "idle".dimmed(),
        IndexState::Running => "running".cyan(),
        IndexState::Completed => "completed".green(),
        IndexState::Failed => "failed".red(),
    };
    println!("Status:   {}", state);
    println!("Progress: {}%", status.progress);
    println!("Message:  {}", status.message);
    println!("Updated:  {}", status.timestamp);
    if DirtyFlag::new(&paths.dirty_flag).is_set() {
        println!("{}", "Dirty flag set: the index is stale.".yellow());
    }
    Ok(())
}

/// Show corpus and index statistics.
pub(crate) fn cmd_stats(cli: &Cli, data_dir: &Path) -> Result<()> {
    let paths = DataPaths::new(data_dir);

    let records = Store::open(&paths.records).count()?;
    let metadata: Vec<SubChunk> = match std::fs::read_to_string(&paths.metadata) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
        Err(_) => Vec::new(),
    };
    let index = FlatIndex::load(&paths.index).ok();
    let ntotal = index.as_ref().map(FlatIndex::ntotal).unwrap_or(0);
    let dim = index.as_ref().map(FlatIndex::dim).unwrap_or(0);
    let indexed_ids = load_indexed_ids(&paths.indexed_ids).len();
    let dirty = DirtyFlag::new(&paths.dirty_flag).is_set();

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "records": records,
                "chunks": metadata.len(),
                "vectors": ntotal,
                "dimension": dim,
                "indexed_ids": indexed_ids,
                "dirty": dirty,
            }))?
        );
        return Ok(());
    }

    println!("Data dir:  {}", paths.root.display());
    println!("Records:   {}", records);
    println!("Chunks:    {}", metadata.len());
    println!("Vectors:   {} (dim {})", ntotal, dim);
    println!("Indexed:   {} ids", indexed_ids);
    if metadata.len() != ntotal {
        println!(
            "{}",
            format!(
                "Warning: metadata lists {} chunks but the index holds {} vectors. Run 'mnemo index --full'.",
                metadata.len(),
                ntotal
            )
            .red()
        );
    }
    if dirty {
        println!("{}", "Dirty flag set: run 'mnemo index' to refresh.".yellow());
    }
    Ok(())
}
