//! Search command — hybrid retrieval from the shell

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Local;
use colored::Colorize;

use crate::cli::Cli;
use crate::config::{api_key, Config, DataPaths, API_KEY_ENV};
use crate::embedding::EmbeddingClient;
use crate::retriever::{Hit, HitOrigin, Retriever, Snapshot};

pub(crate) fn cmd_search(cli: &Cli, config: &Config, data_dir: &Path, query: &str) -> Result<()> {
    let paths = DataPaths::new(data_dir);
    let snapshot = Snapshot::load(&paths)
        .context("Index failed to load; run 'mnemo index --full' to rebuild it")?;
    if snapshot.ntotal() == 0 && !cli.quiet {
        eprintln!("Index is empty. Run 'mnemo index' after adding entries.");
    }

    let Some(key) = api_key() else {
        bail!("{} is not set; cannot embed the query", API_KEY_ENV);
    };
    let embedder = EmbeddingClient::new(&config.api_base(), &key, &config.embedding_model())?;

    let retriever = Retriever::new(&snapshot, &embedder);
    let hits = retriever.search(
        query,
        cli.date.as_deref(),
        cli.limit,
        Local::now().date_naive(),
    )?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("{}", "No matching records found.".dimmed());
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        print_hit(i + 1, hit);
    }
    Ok(())
}

fn print_hit(rank: usize, hit: &Hit) {
    let origin = match hit.origin {
        HitOrigin::Keyword => "keyword".green(),
        HitOrigin::Vector => format!("vector d={:.3}", hit.distance).cyan(),
    };
    println!(
        "{} {} {} [{}]",
        format!("{}.", rank).bold(),
        hit.date.as_deref().unwrap_or("no-date").yellow(),
        hit.id.dimmed(),
        origin,
    );
    println!("   {}", hit.content);
}
