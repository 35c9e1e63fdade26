//! Index command — build or update the vector index
//!
//! Interactive runs drive a progress bar and keep the status record
//! current. `--porcelain` runs print `PROGRESS <pct> <message>` lines on
//! stdout instead; the rebuild supervisor parses those, owns the status
//! record itself, and reads the exit code (0 success, 1 any error, errors
//! on stderr).

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::{check_interrupted, reset_interrupted, setup_signal_handler, Cli};
use crate::config::{api_key, Config, DataPaths, API_KEY_ENV};
use crate::embedding::EmbeddingClient;
use crate::indexer::{IndexReport, Indexer, ProgressSink};
use crate::status::{IndexStatus, StatusFile};
use crate::store::Store;

pub(crate) fn cmd_index(
    cli: &Cli,
    config: &Config,
    data_dir: &Path,
    full: bool,
    porcelain: bool,
) -> Result<()> {
    reset_interrupted();
    setup_signal_handler();

    let paths = DataPaths::new(data_dir);
    std::fs::create_dir_all(&paths.root)
        .with_context(|| format!("Failed to create {}", paths.root.display()))?;

    let Some(key) = api_key() else {
        bail!("{} is not set; cannot reach the embedding endpoint", API_KEY_ENV);
    };
    let embedder = EmbeddingClient::new(&config.api_base(), &key, &config.embedding_model())?;
    let store = Store::open(&paths.records);
    let indexer = Indexer::new(&store, &paths, &embedder);

    let status = StatusFile::new(&paths.status);
    let result = if porcelain {
        let sink = PorcelainSink;
        if full {
            indexer.full_rebuild(&sink)
        } else {
            indexer.incremental(&sink)
        }
    } else {
        let sink = InteractiveSink::new(status.clone(), cli.quiet);
        let result = if full {
            indexer.full_rebuild(&sink)
        } else {
            indexer.incremental(&sink)
        };
        sink.finish();
        result
    };

    match result {
        Ok(report) => {
            if !porcelain {
                status.write(&IndexStatus::completed(format!(
                    "{} vectors indexed",
                    report.ntotal
                )))?;
            }
            if !cli.quiet && !porcelain {
                print_summary(&report, full);
            }
            Ok(())
        }
        Err(e) => {
            if !porcelain {
                status.write(&IndexStatus::failed(e.to_string()))?;
            }
            Err(e).context("Indexing failed")
        }
    }
}

fn print_summary(report: &IndexReport, full: bool) {
    println!();
    println!("Index complete:");
    println!("  Records:  {}", report.records);
    if full {
        println!("  Chunks:   {}", report.chunks);
    } else {
        println!("  New:      {}", report.chunks);
    }
    println!("  Embedded: {}", report.embedded);
    if report.skipped > 0 {
        println!("  Skipped:  {} (embedding failures, see logs)", report.skipped);
    }
    println!("  Total:    {} vectors", report.ntotal);
}

/// Machine-parsable progress for the rebuild supervisor.
struct PorcelainSink;

impl ProgressSink for PorcelainSink {
    fn report(&self, pct: u8, message: &str) {
        println!("PROGRESS {} {}", pct, message);
        let _ = std::io::stdout().flush();
    }

    fn interrupted(&self) -> bool {
        check_interrupted()
    }
}

/// Progress bar plus status-record updates for interactive runs.
struct InteractiveSink {
    bar: Option<Mutex<ProgressBar>>,
    status: StatusFile,
}

impl InteractiveSink {
    fn new(status: StatusFile, quiet: bool) -> Self {
        let bar = if quiet {
            None
        } else {
            let bar = ProgressBar::new(100);
            bar.set_style(
                ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% {msg}")
                    .expect("static template"),
            );
            Some(Mutex::new(bar))
        };
        Self { bar, status }
    }

    fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.lock().unwrap_or_else(|p| p.into_inner()).finish_and_clear();
        }
    }
}

impl ProgressSink for InteractiveSink {
    fn report(&self, pct: u8, message: &str) {
        if let Some(bar) = &self.bar {
            let bar = bar.lock().unwrap_or_else(|p| p.into_inner());
            bar.set_position(pct as u64);
            bar.set_message(message.to_string());
        }
        if let Err(e) = self.status.write(&IndexStatus::running(pct, message)) {
            tracing::warn!(error = %e, "Failed to write status record");
        }
    }

    fn interrupted(&self) -> bool {
        check_interrupted()
    }
}
