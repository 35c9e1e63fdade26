//! Serve command — start the HTTP surface

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::config::Config;
use crate::server::{self, ServeOptions, DEFAULT_REBUILD_TIMEOUT, DEFAULT_TICK_INTERVAL};

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_serve(
    config: &Config,
    data_dir: &Path,
    bind: &str,
    port: Option<u16>,
    api_key: Option<String>,
    api_key_file: Option<PathBuf>,
    dangerously_allow_network_bind: bool,
) -> Result<()> {
    // Resolve API key from either --api-key or --api-key-file
    let api_key = match (api_key, api_key_file) {
        (Some(_), Some(_)) => {
            bail!("Cannot specify both --api-key and --api-key-file");
        }
        (Some(key), None) => Some(key),
        (None, Some(path)) => {
            let key = std::fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("Failed to read API key file: {}", e))?;
            Some(key.trim().to_string())
        }
        (None, None) => None,
    };

    server::serve(
        config,
        ServeOptions {
            data_dir: data_dir.to_path_buf(),
            bind: bind.to_string(),
            port: port.unwrap_or_else(|| config.port()),
            api_key,
            allow_network_bind: dangerously_allow_network_bind,
            rebuild_timeout: DEFAULT_REBUILD_TIMEOUT,
            tick_interval: DEFAULT_TICK_INTERVAL,
        },
    )
}
