//! Configuration file support for mnemo
//!
//! Config files are loaded in order (later overrides earlier):
//! 1. `~/.config/mnemo/config.toml` (user defaults)
//! 2. `.mnemo.toml` next to the data directory (per-journal overrides)
//!
//! CLI flags override all config file values. Secrets come from the
//! environment (with `.env` support via dotenvy), never from config files.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::embedding::DEFAULT_EMBEDDING_MODEL;

/// Required for embedding and chat calls.
pub const API_KEY_ENV: &str = "EMBEDDING_API_KEY";
/// Optional override of the remote API base URL.
pub const API_BASE_ENV: &str = "EMBEDDING_API_BASE";
/// Optional override of the embedding model.
pub const EMBEDDING_MODEL_ENV: &str = "EMBEDDING_MODEL";
/// Optional override of the chat model.
pub const CHAT_MODEL_ENV: &str = "CHAT_MODEL";
/// Optional override of the vector-index path.
pub const INDEX_PATH_ENV: &str = "INDEX_PATH";
/// Optional override of the metadata-list path.
pub const METADATA_PATH_ENV: &str = "METADATA_PATH";
/// Optional override of the HTTP port.
pub const PORT_ENV: &str = "MNEMO_PORT";

/// Configuration options loaded from config files
///
/// # Example
///
/// ```toml
/// # ~/.config/mnemo/config.toml or .mnemo.toml
/// data_dir = ".mnemo"
/// api_base = "https://space.example.com/backend"
/// embedding_model = "text-embedding-3-small"
/// chat_model = "gpt-4o-mini"
/// limit = 10          # Default retrieval depth
/// port = 8900
/// quiet = false
/// verbose = false
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the record log, index, and state files
    pub data_dir: Option<PathBuf>,
    /// Base URL of the OpenAI-compatible remote API
    pub api_base: Option<String>,
    pub embedding_model: Option<String>,
    pub chat_model: Option<String>,
    /// Default retrieval depth (overridden by -n)
    pub limit: Option<usize>,
    /// HTTP port for `mnemo serve`
    pub port: Option<u16>,
    /// Enable quiet mode by default
    pub quiet: Option<bool>,
    /// Enable verbose mode by default
    pub verbose: Option<bool>,
}

impl Config {
    /// Load configuration from user and data-root config files.
    pub fn load(data_root: &Path) -> Self {
        let user_config = dirs::config_dir()
            .map(|d| d.join("mnemo/config.toml"))
            .and_then(|p| Self::load_file(&p))
            .unwrap_or_default();

        let local_path = data_root
            .parent()
            .unwrap_or(data_root)
            .join(".mnemo.toml");
        let local_config = Self::load_file(&local_path).unwrap_or_default();

        let merged = user_config.override_with(local_config);
        tracing::debug!(
            data_dir = ?merged.data_dir,
            api_base = ?merged.api_base,
            limit = ?merged.limit,
            port = ?merged.port,
            "Effective config after merge"
        );
        merged
    }

    /// Load configuration from a specific file
    fn load_file(path: &Path) -> Option<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read config {}: {}", path.display(), e);
                return None;
            }
        };

        match toml::from_str::<Self>(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!("Failed to parse config {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Layer another config on top (other overrides self where present)
    fn override_with(self, other: Self) -> Self {
        Config {
            data_dir: other.data_dir.or(self.data_dir),
            api_base: other.api_base.or(self.api_base),
            embedding_model: other.embedding_model.or(self.embedding_model),
            chat_model: other.chat_model.or(self.chat_model),
            limit: other.limit.or(self.limit),
            port: other.port.or(self.port),
            quiet: other.quiet.or(self.quiet),
            verbose: other.verbose.or(self.verbose),
        }
    }

    // ===== Accessors with defaults (env overrides config file) =====

    pub const DEFAULT_DATA_DIR: &'static str = ".mnemo";
    pub const DEFAULT_API_BASE: &'static str = "https://api.openai.com";
    pub const DEFAULT_CHAT_MODEL: &'static str = "gpt-4o-mini";
    pub const DEFAULT_LIMIT: usize = 5;
    pub const DEFAULT_PORT: u16 = 8900;

    pub fn api_base(&self) -> String {
        env_nonempty(API_BASE_ENV)
            .or_else(|| self.api_base.clone())
            .unwrap_or_else(|| Self::DEFAULT_API_BASE.to_string())
    }

    pub fn embedding_model(&self) -> String {
        env_nonempty(EMBEDDING_MODEL_ENV)
            .or_else(|| self.embedding_model.clone())
            .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string())
    }

    pub fn chat_model(&self) -> String {
        env_nonempty(CHAT_MODEL_ENV)
            .or_else(|| self.chat_model.clone())
            .unwrap_or_else(|| Self::DEFAULT_CHAT_MODEL.to_string())
    }

    pub fn limit_or_default(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }

    pub fn port(&self) -> u16 {
        env_nonempty(PORT_ENV)
            .and_then(|p| p.parse().ok())
            .or(self.port)
            .unwrap_or(Self::DEFAULT_PORT)
    }

    pub fn quiet_or_default(&self) -> bool {
        self.quiet.unwrap_or(false)
    }

    pub fn verbose_or_default(&self) -> bool {
        self.verbose.unwrap_or(false)
    }
}

/// Read the API key from the environment. `.env` files are loaded by the
/// binary before config resolution.
pub fn api_key() -> Option<String> {
    env_nonempty(API_KEY_ENV)
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Canonical on-disk layout under one data directory.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub root: PathBuf,
    /// Chunk store: ordered record log
    pub records: PathBuf,
    /// Metadata list, parallel to the index
    pub metadata: PathBuf,
    /// Binary flat-L2 vector index
    pub index: PathBuf,
    /// Set of already-embedded sub-chunk IDs
    pub indexed_ids: PathBuf,
    /// Dirty flag sentinel
    pub dirty_flag: PathBuf,
    /// Rebuild status record
    pub status: PathBuf,
}

impl DataPaths {
    /// Layout rooted at `root`, honoring `INDEX_PATH`/`METADATA_PATH`
    /// overrides from the environment.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let index = env_nonempty(INDEX_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| root.join("index.bin"));
        let metadata = env_nonempty(METADATA_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| root.join("metadata.json"));
        Self {
            records: root.join("records.json"),
            metadata,
            index,
            indexed_ids: root.join("indexed_ids.json"),
            dirty_flag: root.join(".reindex-needed"),
            status: root.join("index_status.json"),
            root,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_load_valid_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".mnemo.toml");
        std::fs::write(&path, "limit = 10\nport = 9000\n").unwrap();

        let config = Config::load_file(&path).unwrap();
        assert_eq!(config.limit, Some(10));
        assert_eq!(config.port, Some(9000));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load_file(&dir.path().join("nope.toml")).is_none());
    }

    #[test]
    fn test_load_malformed_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".mnemo.toml");
        std::fs::write(&path, "not valid [[[").unwrap();
        assert!(Config::load_file(&path).is_none());
    }

    #[test]
    fn test_merge_override() {
        let base = Config {
            limit: Some(10),
            api_base: Some("https://a.example".into()),
            ..Default::default()
        };
        let over = Config {
            limit: Some(20),
            chat_model: Some("gpt-test".into()),
            ..Default::default()
        };

        let merged = base.override_with(over);
        assert_eq!(merged.limit, Some(20));
        assert_eq!(merged.api_base.as_deref(), Some("https://a.example"));
        assert_eq!(merged.chat_model.as_deref(), Some("gpt-test"));
    }

    #[test]
    #[serial]
    fn test_defaults_when_unset() {
        std::env::remove_var(API_BASE_ENV);
        std::env::remove_var(EMBEDDING_MODEL_ENV);
        std::env::remove_var(PORT_ENV);
        let config = Config::default();
        assert_eq!(config.api_base(), Config::DEFAULT_API_BASE);
        assert_eq!(config.embedding_model(), DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.port(), Config::DEFAULT_PORT);
        assert_eq!(config.limit_or_default(), Config::DEFAULT_LIMIT);
    }

    #[test]
    #[serial]
    fn test_env_overrides_config_file() {
        std::env::set_var(PORT_ENV, "9111");
        let config = Config {
            port: Some(8000),
            ..Default::default()
        };
        assert_eq!(config.port(), 9111);
        std::env::remove_var(PORT_ENV);
    }

    #[test]
    #[serial]
    fn test_data_paths_layout() {
        std::env::remove_var(INDEX_PATH_ENV);
        std::env::remove_var(METADATA_PATH_ENV);
        let paths = DataPaths::new("/tmp/journal/.mnemo");
        assert_eq!(paths.records, PathBuf::from("/tmp/journal/.mnemo/records.json"));
        assert_eq!(paths.index, PathBuf::from("/tmp/journal/.mnemo/index.bin"));
        assert_eq!(paths.dirty_flag, PathBuf::from("/tmp/journal/.mnemo/.reindex-needed"));
    }

    #[test]
    #[serial]
    fn test_data_paths_env_override() {
        std::env::set_var(INDEX_PATH_ENV, "/elsewhere/my.index");
        let paths = DataPaths::new("/tmp/.mnemo");
        assert_eq!(paths.index, PathBuf::from("/elsewhere/my.index"));
        std::env::remove_var(INDEX_PATH_ENV);
    }
}
