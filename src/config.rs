use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::storage::StorageObject;

/// Application-wide settings, persisted at `~/.cargohold/config.json`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Path to the SSH private key tried first during authentication, before
    /// the `~/.ssh/id_ed25519` / `~/.ssh/id_rsa` defaults.
    pub ssh_key_path: Option<PathBuf>,
    /// Path (or bare name, resolved via `PATH`) to the object-store CLI tool
    /// on *this* machine; used only when deploying a `.conf` to remote hosts.
    pub object_store_cli_path: PathBuf,
    /// Default remote name (e.g. `gdrive`) used when a job omits `--store`.
    pub default_store_remote: Option<String>,
    /// Default part-size ceiling in MiB when a job omits `--part-size-mib`.
    pub default_part_size_mib: u64,
    /// Default per-destination worker concurrency; `None` means "auto"
    /// (sized by [`crate::auto_concurrency`]).
    pub default_concurrency: Option<usize>,
    /// Base delay for the retry/backoff helper, in milliseconds.
    pub retry_backoff_base_ms: u64,
    pub version: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ssh_key_path: None,
            object_store_cli_path: PathBuf::from("rclone"),
            default_store_remote: None,
            default_part_size_mib: 1024,
            default_concurrency: None,
            retry_backoff_base_ms: 500,
            version: 1,
        }
    }
}

impl Config {
    /// Load the config, writing out a fresh default document on first run.
    pub fn init() -> anyhow::Result<Self> {
        let app_dir = crate::storage::app_dir()?;
        let config_path = app_dir.join("config.json");
        if !config_path.exists() {
            let config = Config::default();
            config.save_to(&config_path);
            return Ok(config);
        }
        Ok(Config::read_from(&config_path))
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let app_dir = crate::storage::app_dir()?;
        self.save_to(app_dir.join("config.json"));
        Ok(())
    }

    pub fn servers_db_path(&self) -> anyhow::Result<PathBuf> {
        Ok(crate::storage::app_dir()?.join("servers.db"))
    }

    pub fn session_path(&self) -> anyhow::Result<PathBuf> {
        Ok(crate::storage::app_dir()?.join("session.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.default_part_size_mib, 1024);
        assert!(cfg.default_concurrency.is_none());
        assert_eq!(cfg.object_store_cli_path, PathBuf::from("rclone"));
    }
}
