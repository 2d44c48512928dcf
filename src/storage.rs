//! Filesystem layout and the generic JSON document persistence used by the
//! `jobs` and `session` namespaces (the `servers` namespace is relational and
//! lives in [`crate::host`] instead, since it actually benefits from SQLite's
//! unique-alias constraint).

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Returns (creating if necessary) `~/.cargohold`, the root of every
/// persisted namespace: `config.json`, `servers.db`, `jobs/`, `session.json`,
/// `logs/`.
pub fn app_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot find user's home dir"))?;
    let dir = home.join(".cargohold");
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

pub fn jobs_dir() -> anyhow::Result<PathBuf> {
    let dir = app_dir()?.join("jobs");
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Blanket trait giving any `Serialize` type pretty-JSON persistence with a
/// default-on-failure read path, so a missing or corrupt document never
/// aborts startup — it just starts from `T::default()`.
pub trait StorageObject {
    fn pretty_json(&self) -> String;
    fn save_to<P: AsRef<Path>>(&self, path: P)
    where
        Self: Serialize;
    fn read_from<T: Default + DeserializeOwned + Serialize, P: AsRef<Path>>(path: P) -> T;
}

impl<T: Serialize> StorageObject for T {
    fn pretty_json(&self) -> String {
        match serde_json::to_string_pretty(self) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("warning: failed to serialize: {e}, falling back to empty object");
                "{}".to_string()
            }
        }
    }

    fn save_to<P: AsRef<Path>>(&self, path: P) {
        if let Err(e) = std::fs::write(path, self.pretty_json()) {
            eprintln!("warning: failed to write file: {e}");
        }
    }

    fn read_from<R: Default + DeserializeOwned + Serialize, P: AsRef<Path>>(path: P) -> R {
        let content = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(_) => return R::default(),
        };
        match serde_json::from_str::<R>(&content) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("warning: failed to parse JSON: {e}, using default value");
                R::default()
            }
        }
    }
}
