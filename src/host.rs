//! Host catalog: reachable remote machines, keyed by an operator-chosen
//! alias. Persisted in a small SQLite table (`servers`), mirroring the
//! relational shape a server catalog actually has — unique alias, a single
//! `last_connect` column worth indexing on eventually — rather than a plain
//! JSON blob.

use std::collections::BTreeMap;
use std::path::Path;

use cli_table::{Cell, CellStruct, Style, Table, format::Justify, print_stdout};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::credentials::EncryptionAdapter;

/// Authentication material for a [`Host`]. Exactly one of `password` or
/// `key_path` is expected to be set; both fields are ciphertext at rest
/// (see [`crate::credentials`]) and are only decrypted just before dialing.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AuthMaterial {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub password_cipher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub key_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub passphrase_cipher: Option<String>,
}

impl AuthMaterial {
    pub fn with_password(adapter: &dyn EncryptionAdapter, alias: &str, password: &str) -> anyhow::Result<Self> {
        Ok(Self {
            password_cipher: Some(adapter.encrypt(alias, password)?),
            key_path: None,
            passphrase_cipher: None,
        })
    }

    pub fn with_key(
        adapter: &dyn EncryptionAdapter,
        alias: &str,
        key_path: String,
        passphrase: Option<&str>,
    ) -> anyhow::Result<Self> {
        let passphrase_cipher =
            passphrase.map(|p| adapter.encrypt(&format!("{alias}:passphrase"), p)).transpose()?;
        Ok(Self { password_cipher: None, key_path: Some(key_path), passphrase_cipher })
    }

    pub fn password(&self, adapter: &dyn EncryptionAdapter, alias: &str) -> anyhow::Result<Option<String>> {
        self.password_cipher.as_deref().map(|c| adapter.decrypt(alias, c)).transpose()
    }

    pub fn passphrase(&self, adapter: &dyn EncryptionAdapter, alias: &str) -> anyhow::Result<Option<String>> {
        self.passphrase_cipher
            .as_deref()
            .map(|c| adapter.decrypt(&format!("{alias}:passphrase"), c))
            .transpose()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Host {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub alias: Option<String>,
    pub username: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub auth: AuthMaterial,
    #[serde(default)]
    pub last_connect: Option<String>,
}

impl Host {
    pub fn get_last_connect_display(&self) -> String {
        match &self.last_connect {
            Some(ts_str) if !ts_str.is_empty() => match ts_str.parse::<i64>() {
                Ok(ts) => {
                    let now = chrono::Local::now().timestamp();
                    let diff = now - ts;
                    if diff < 0 {
                        return "just now".to_string();
                    }
                    const MINUTE: i64 = 60;
                    const HOUR: i64 = 60 * MINUTE;
                    const DAY: i64 = 24 * HOUR;
                    if diff < MINUTE {
                        "just now".to_string()
                    } else if diff < HOUR {
                        format!("{}m ago", diff / MINUTE)
                    } else if diff < DAY {
                        format!("{}h ago", diff / HOUR)
                    } else if diff < 2 * DAY {
                        "yesterday".to_string()
                    } else {
                        format!("{}d ago", diff / DAY)
                    }
                }
                Err(_) => ts_str.clone(),
            },
            _ => "never".to_string(),
        }
    }

    pub fn set_last_connect_now(&mut self) {
        self.last_connect = Some(chrono::Local::now().timestamp().to_string());
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct HostCollection {
    hosts: BTreeMap<String, Host>,
}

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS servers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    alias TEXT UNIQUE NOT NULL,
    username TEXT NOT NULL,
    address TEXT NOT NULL,
    port INTEGER NOT NULL,
    password_cipher TEXT,
    key_path TEXT,
    passphrase_cipher TEXT,
    last_connect TEXT
)";

impl HostCollection {
    pub fn read_from_storage<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        use anyhow::Context as _;
        let conn = Connection::open(path).with_context(|| "failed to open SQLite database")?;
        conn.execute(CREATE_TABLE_SQL, []).with_context(|| "failed to create servers table")?;

        let mut stmt = conn
            .prepare(
                "SELECT id, alias, username, address, port, password_cipher, key_path, passphrase_cipher, last_connect FROM servers",
            )
            .with_context(|| "failed to prepare statement")?;
        let rows = stmt
            .query_map([], |row| {
                let alias: String = row.get(1)?;
                let host = Host {
                    id: Some(row.get(0)?),
                    alias: Some(alias.clone()),
                    username: row.get(2)?,
                    address: row.get(3)?,
                    port: row.get(4)?,
                    auth: AuthMaterial {
                        password_cipher: row.get(5)?,
                        key_path: row.get(6)?,
                        passphrase_cipher: row.get(7)?,
                    },
                    last_connect: row.get(8)?,
                };
                Ok((alias, host))
            })
            .with_context(|| "failed to query servers")?;

        let mut hosts = BTreeMap::new();
        for row in rows {
            let (alias, host) = row.with_context(|| "failed to read server row")?;
            hosts.insert(alias, host);
        }
        Ok(HostCollection { hosts })
    }

    pub fn save_to_storage<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        use anyhow::Context as _;
        let conn = Connection::open(path).with_context(|| "failed to open SQLite database")?;
        conn.execute(CREATE_TABLE_SQL, []).with_context(|| "failed to create servers table")?;
        conn.execute("DELETE FROM servers", []).with_context(|| "failed to clear table")?;

        let mut stmt = conn
            .prepare(
                "INSERT OR REPLACE INTO servers (alias, username, address, port, password_cipher, key_path, passphrase_cipher, last_connect) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .with_context(|| "failed to prepare insert statement")?;
        for (alias, host) in &self.hosts {
            stmt.execute(params![
                alias,
                host.username,
                host.address,
                host.port as i64,
                host.auth.password_cipher,
                host.auth.key_path,
                host.auth.passphrase_cipher,
                host.last_connect,
            ])
            .with_context(|| "failed to insert server")?;
        }
        Ok(())
    }

    pub fn get(&self, alias: &str) -> Option<&Host> {
        self.hosts.get(alias)
    }

    pub fn insert(&mut self, alias: &str, mut host: Host) -> &mut Self {
        if host.alias.is_none() {
            host.alias = Some(alias.to_string());
        }
        self.hosts.insert(alias.to_owned(), host);
        self
    }

    pub fn remove(&mut self, alias: &str) -> &mut Self {
        self.hosts.remove(alias);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn hosts(&self) -> &BTreeMap<String, Host> {
        &self.hosts
    }

    pub fn show_table(&self) {
        if self.is_empty() {
            return;
        }
        let title = vec![
            "Alias".cell().bold(true),
            "Username".cell().bold(true),
            "Address".cell().bold(true),
            "Port".cell().bold(true),
            "Last Connect".cell().bold(true),
        ];
        let mut table: Vec<Vec<CellStruct>> = Vec::new();
        for (alias, host) in &self.hosts {
            table.push(vec![
                alias.cell(),
                host.username.to_string().cell().justify(Justify::Right),
                host.address.to_string().cell().justify(Justify::Right),
                host.port.cell().justify(Justify::Right),
                host.get_last_connect_display().cell().justify(Justify::Right),
            ]);
        }
        if let Err(e) = print_stdout(table.table().title(title)) {
            eprintln!("warning: failed to render table: {e}");
        }
    }
}
