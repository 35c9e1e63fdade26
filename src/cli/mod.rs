//! CLI implementation for mnemo

mod commands;
pub(crate) mod signal;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Config;

pub(crate) use signal::{check_interrupted, reset_interrupted, setup_signal_handler};

#[derive(Parser)]
#[command(name = "mnemo")]
#[command(about = "Personal digital memory: search and ask questions over your voice journal")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Search query (quote multi-word queries)
    query: Option<String>,

    /// Max results
    #[arg(short = 'n', long, default_value = "5")]
    limit: usize,

    /// Date filter (YYYY-MM-DD, YYYY-MM, last_week, 3_days_ago, 2024-11-下旬, ...)
    #[arg(short = 'd', long)]
    date: Option<String>,

    /// Data directory (defaults to ./.mnemo)
    #[arg(long, env = "MNEMO_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Show debug info (sets RUST_LOG=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Save a journal entry from arguments or stdin
    Add {
        /// Entry text; reads stdin when omitted
        text: Vec<String>,
        /// Entry date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<String>,
        /// Entry time (HH:MM, defaults to now)
        #[arg(long)]
        time: Option<String>,
    },
    /// Build or update the vector index
    Index {
        /// Rebuild everything instead of only new entries
        #[arg(long)]
        full: bool,
        /// Machine-parsable PROGRESS lines on stdout (used by the rebuild
        /// supervisor)
        #[arg(long, hide = true)]
        porcelain: bool,
    },
    /// Ask the memory agent a question interactively
    Chat,
    /// Start the HTTP server
    Serve {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port (defaults to config / MNEMO_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// API key protecting the HTTP surface
        #[arg(long, env = "MNEMO_API_KEY")]
        api_key: Option<String>,
        /// Path to a file containing the API key (alternative to --api-key)
        #[arg(long)]
        api_key_file: Option<PathBuf>,
        /// Required when binding to non-localhost (exposes your journal)
        #[arg(long, hide = true)]
        dangerously_allow_network_bind: bool,
    },
    /// Show the index rebuild status record
    Status,
    /// Show corpus and index statistics
    Stats,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Run CLI with pre-parsed arguments (main.rs inspects the verbose flag
/// before dispatching).
pub fn run_with(cli: Cli) -> Result<()> {
    let data_dir = data_dir(&cli);
    let config = Config::load(&data_dir);

    match cli.command {
        Some(Commands::Add {
            ref text,
            ref date,
            ref time,
        }) => commands::cmd_add(&cli, &data_dir, text, date.clone(), time.clone()),
        Some(Commands::Index { full, porcelain }) => {
            commands::cmd_index(&cli, &config, &data_dir, full, porcelain)
        }
        Some(Commands::Chat) => commands::cmd_chat(&cli, &config, &data_dir),
        Some(Commands::Serve {
            ref bind,
            port,
            ref api_key,
            ref api_key_file,
            dangerously_allow_network_bind,
        }) => commands::cmd_serve(
            &config,
            &data_dir,
            bind,
            port,
            api_key.clone(),
            api_key_file.clone(),
            dangerously_allow_network_bind,
        ),
        Some(Commands::Status) => commands::cmd_status(&cli, &data_dir),
        Some(Commands::Stats) => commands::cmd_stats(&cli, &data_dir),
        Some(Commands::Completions { shell }) => {
            cmd_completions(shell);
            Ok(())
        }
        None => match &cli.query {
            Some(query) => commands::cmd_search(&cli, &config, &data_dir, query),
            None => {
                println!("Usage: mnemo <query> or mnemo <command>");
                println!("Run 'mnemo --help' for more information.");
                Ok(())
            }
        },
    }
}

fn data_dir(cli: &Cli) -> PathBuf {
    if let Some(dir) = &cli.data_dir {
        return dir.clone();
    }
    // A config file can move the data dir; it is looked up relative to cwd
    let probe = Config::load(&PathBuf::from(Config::DEFAULT_DATA_DIR));
    probe
        .data_dir
        .unwrap_or_else(|| PathBuf::from(Config::DEFAULT_DATA_DIR))
}

/// Generate shell completion scripts for the specified shell
fn cmd_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    clap_complete::generate(shell, &mut Cli::command(), "mnemo", &mut std::io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["mnemo"]).unwrap();
        assert_eq!(cli.limit, 5);
        assert!(!cli.json);
        assert!(!cli.quiet);
        assert!(!cli.verbose);
        assert!(cli.query.is_none());
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_bare_query() {
        let cli = Cli::try_parse_from(["mnemo", "张三 项目"]).unwrap();
        assert_eq!(cli.query.as_deref(), Some("张三 项目"));
    }

    #[test]
    fn test_cli_date_and_limit_flags() {
        let cli = Cli::try_parse_from(["mnemo", "-n", "10", "-d", "last_week", "查询"]).unwrap();
        assert_eq!(cli.limit, 10);
        assert_eq!(cli.date.as_deref(), Some("last_week"));
    }

    #[test]
    fn test_cli_index_flags() {
        let cli = Cli::try_parse_from(["mnemo", "index", "--full", "--porcelain"]).unwrap();
        match cli.command {
            Some(Commands::Index { full, porcelain }) => {
                assert!(full);
                assert!(porcelain);
            }
            _ => panic!("expected index command"),
        }
    }

    #[test]
    fn test_cli_add_collects_text() {
        let cli = Cli::try_parse_from(["mnemo", "add", "今天", "见了", "张三"]).unwrap();
        match cli.command {
            Some(Commands::Add { text, .. }) => assert_eq!(text, ["今天", "见了", "张三"]),
            _ => panic!("expected add command"),
        }
    }

    #[test]
    fn test_cli_serve_defaults() {
        let cli = Cli::try_parse_from(["mnemo", "serve"]).unwrap();
        match cli.command {
            Some(Commands::Serve {
                bind,
                port,
                dangerously_allow_network_bind,
                ..
            }) => {
                assert_eq!(bind, "127.0.0.1");
                assert_eq!(port, None);
                assert!(!dangerously_allow_network_bind);
            }
            _ => panic!("expected serve command"),
        }
    }
}
