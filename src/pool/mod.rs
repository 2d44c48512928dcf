//! Connection Pool: a keyed cache of live remote-shell sessions.
//!
//! `acquire` dials once per host alias and keeps the session open across
//! calls; callers for the same alias serialize on that host's mutex rather
//! than opening a second `ssh2::Channel` concurrently (`ssh2::Channel` isn't
//! `Sync`-shareable in practice, so one channel at a time per session is the
//! simplest correct design — no parallel multi-channel pooling).

pub mod sftp_like;

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::credentials::EncryptionAdapter;
use crate::error::PoolError;
use crate::host::Host;
use sftp_like::{Ssh2Adapter, SftpLike};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const IO_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

pub struct ListEntry {
    pub name: String,
    pub is_dir: bool,
}

pub struct ListDirPage {
    pub items: Vec<ListEntry>,
    pub total: usize,
    pub has_more: bool,
}

struct PooledSession {
    sess: ssh2::Session,
    sftp: Box<dyn SftpLike>,
}

/// One entry's worth of session state, behind its own mutex so two callers
/// targeting different hosts never block one another.
struct Slot {
    inner: Mutex<Option<PooledSession>>,
}

/// The shell/SFTP surface every higher-level component (`driver`, `planner`,
/// `packager`, `dispatcher`) actually depends on. Splitting this out lets
/// tests drive the real Planner/Packager/Dispatcher/Orchestrator against an
/// in-process fake instead of a live SSH session, matching the `SftpLike`
/// seam's testability one level up.
pub trait RemoteShell: Send + Sync {
    fn exec(&self, alias: &str, cmd: &str) -> Result<ExecOutput, PoolError>;
    fn exec_streaming(&self, alias: &str, cmd: &str, on_chunk: &mut dyn FnMut(&str)) -> Result<ExecOutput, PoolError>;
    fn put_file(&self, alias: &str, local_path: &Path, remote_path: &Path) -> Result<(), PoolError>;
    fn get_file(&self, alias: &str, remote_path: &Path, local_path: &Path) -> Result<(), PoolError>;
    fn mkdir_p(&self, alias: &str, path: &Path) -> Result<(), crate::error::MkdirError>;
}

pub struct ConnectionPool {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self { slots: Mutex::new(HashMap::new()) }
    }

    fn slot(&self, alias: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock().expect("pool mutex poisoned");
        Arc::clone(slots.entry(alias.to_string()).or_insert_with(|| Arc::new(Slot { inner: Mutex::new(None) })))
    }

    /// Closes and drops the session for `alias`, if any. The next `acquire`
    /// for this alias redials from scratch.
    pub fn disconnect(&self, alias: &str) {
        let slot = self.slot(alias);
        *slot.inner.lock().expect("session mutex poisoned") = None;
    }

    fn dial(host: &Host, adapter: &dyn EncryptionAdapter) -> Result<PooledSession, PoolError> {
        let alias = host.alias.as_deref().unwrap_or("<unknown>");
        let addr_str = format!("{}:{}", host.address, host.port);
        let mut addrs = addr_str.to_socket_addrs().map_err(|_| PoolError::NoAddress(addr_str.clone()))?;
        let sock_addr = addrs.next().ok_or_else(|| PoolError::NoAddress(addr_str.clone()))?;
        let tcp = TcpStream::connect_timeout(&sock_addr, CONNECT_TIMEOUT)
            .map_err(|_| PoolError::NoAddress(addr_str.clone()))?;
        let _ = tcp.set_read_timeout(Some(IO_TIMEOUT));
        let _ = tcp.set_write_timeout(Some(IO_TIMEOUT));

        let mut sess = ssh2::Session::new().map_err(|_| PoolError::SessionCreateFailed(addr_str.clone()))?;
        sess.set_tcp_stream(tcp);
        sess.handshake().map_err(|_| PoolError::HandshakeFailed(addr_str.clone()))?;

        Self::authenticate(&mut sess, host, adapter, alias)?;
        if !sess.authenticated() {
            return Err(PoolError::AuthFailed(addr_str.clone()));
        }

        let sftp = sess.sftp().map_err(|e| PoolError::SftpCreateFailed(e.to_string()))?;
        Ok(PooledSession { sess, sftp: Box::new(Ssh2Adapter(sftp)) })
    }

    /// Key path (explicit, then `~/.ssh/id_ed25519`, then `~/.ssh/id_rsa`,
    /// then `~/.ssh/id_ecdsa`) first, password second.
    fn authenticate(
        sess: &mut ssh2::Session,
        host: &Host,
        adapter: &dyn EncryptionAdapter,
        alias: &str,
    ) -> Result<(), PoolError> {
        let passphrase = host
            .auth
            .passphrase(adapter, alias)
            .map_err(|e| PoolError::AuthFailed(e.to_string()))?;
        let mut key_candidates: Vec<std::path::PathBuf> = Vec::new();
        if let Some(explicit) = &host.auth.key_path {
            key_candidates.push(std::path::PathBuf::from(explicit));
        }
        if let Some(home) = dirs::home_dir() {
            for name in ["id_ed25519", "id_rsa", "id_ecdsa"] {
                key_candidates.push(home.join(".ssh").join(name));
            }
        }
        for key_path in &key_candidates {
            if !key_path.exists() {
                continue;
            }
            let _ = sess.userauth_pubkey_file(&host.username, None, key_path, passphrase.as_deref());
            if sess.authenticated() {
                return Ok(());
            }
        }

        if let Some(password) = host.auth.password(adapter, alias).map_err(|e| PoolError::AuthFailed(e.to_string()))? {
            let _ = sess.userauth_password(&host.username, &password);
        }
        Ok(())
    }

    /// Returns a live session for `host`, reusing one if open, else dialing.
    pub fn acquire(&self, host: &Host, adapter: &dyn EncryptionAdapter) -> Result<(), PoolError> {
        let alias = host.alias.as_deref().unwrap_or("<unknown>").to_string();
        let slot = self.slot(&alias);
        let mut guard = slot.inner.lock().expect("session mutex poisoned");
        if guard.is_some() {
            return Ok(());
        }
        *guard = Some(Self::dial(host, adapter)?);
        Ok(())
    }

    fn with_session<T>(
        &self,
        alias: &str,
        f: impl FnOnce(&mut ssh2::Session, &dyn SftpLike) -> Result<T, PoolError>,
    ) -> Result<T, PoolError> {
        let slot = self.slot(alias);
        let mut guard = slot.inner.lock().expect("session mutex poisoned");
        let pooled = guard.as_mut().ok_or_else(|| PoolError::Io("not connected".into()))?;
        match f(&mut pooled.sess, pooled.sftp.as_ref()) {
            Ok(v) => Ok(v),
            Err(e) => {
                // transport-level failure: drop the session so the next acquire redials
                *guard = None;
                Err(e)
            }
        }
    }

    pub fn exec(&self, alias: &str, cmd: &str) -> Result<ExecOutput, PoolError> {
        self.exec_streaming(alias, cmd, |_| {})
    }

    /// Runs `cmd` to completion, invoking `on_chunk` for every stdout chunk
    /// as it arrives (used to parse upload/download progress lines).
    pub fn exec_streaming(
        &self,
        alias: &str,
        cmd: &str,
        mut on_chunk: impl FnMut(&str),
    ) -> Result<ExecOutput, PoolError> {
        self.with_session(alias, |sess, _sftp| {
            let mut channel = sess.channel_session().map_err(|e| PoolError::Io(e.to_string()))?;
            channel.exec(cmd).map_err(|e| PoolError::Io(e.to_string()))?;

            let mut stdout = String::new();
            let mut stderr = String::new();
            let mut buf = [0u8; 8192];
            loop {
                match channel.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]);
                        on_chunk(&chunk);
                        stdout.push_str(&chunk);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                    Err(e) => return Err(PoolError::Io(e.to_string())),
                }
            }
            let _ = channel.stderr().read_to_string(&mut stderr);
            channel.wait_close().ok();
            Ok(ExecOutput { stdout: stdout.trim().to_string(), stderr: stderr.trim().to_string() })
        })
    }

    pub fn put_file(&self, alias: &str, local_path: &Path, remote_path: &Path) -> Result<(), PoolError> {
        self.with_session(alias, |_sess, sftp| {
            let mut local = std::fs::File::open(local_path).map_err(|e| PoolError::Io(e.to_string()))?;
            let mut remote = sftp.create_write(remote_path).map_err(PoolError::Io)?;
            std::io::copy(&mut local, &mut remote).map_err(|e| PoolError::Io(e.to_string()))?;
            remote.flush().map_err(|e| PoolError::Io(e.to_string()))?;
            Ok(())
        })
    }

    pub fn get_file(&self, alias: &str, remote_path: &Path, local_path: &Path) -> Result<(), PoolError> {
        self.with_session(alias, |_sess, sftp| {
            let mut remote = sftp.open_read(remote_path).map_err(PoolError::Io)?;
            let mut local = std::fs::File::create(local_path).map_err(|e| PoolError::Io(e.to_string()))?;
            std::io::copy(&mut remote, &mut local).map_err(|e| PoolError::Io(e.to_string()))?;
            Ok(())
        })
    }

    /// Directory listing with hidden dot-entries, directories-first ordering,
    /// case-insensitive by name within each group, then paginated.
    pub fn list_dir(&self, alias: &str, path: &str, limit: usize, offset: usize) -> Result<ListDirPage, PoolError> {
        let cmd = format!("ls -a -p -1 {}", shell_quote(path));
        let out = self.exec(alias, &cmd)?;
        let mut entries: Vec<ListEntry> = out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && *line != "./" && *line != "../")
            .filter(|line| !line.starts_with('.'))
            .map(|line| {
                if let Some(name) = line.strip_suffix('/') {
                    ListEntry { name: name.to_string(), is_dir: true }
                } else {
                    ListEntry { name: line.to_string(), is_dir: false }
                }
            })
            .collect();
        entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        });
        let total = entries.len();
        let page: Vec<ListEntry> = entries.into_iter().skip(offset).take(limit).collect();
        let has_more = offset + page.len() < total;
        Ok(ListDirPage { items: page, total, has_more })
    }

    /// `mkdir -p` for a single remote directory path via SFTP.
    pub fn mkdir_p(&self, alias: &str, path: &Path) -> Result<(), crate::error::MkdirError> {
        let slot = self.slot(alias);
        let guard = slot.inner.lock().expect("session mutex poisoned");
        let pooled = guard
            .as_ref()
            .ok_or_else(|| crate::error::MkdirError::SftpError(path.to_path_buf(), "not connected".into()))?;
        sftp_like::mkdir_p(pooled.sftp.as_ref(), path)
    }

    pub fn expand_tilde(&self, alias: &str, path: &str) -> Result<String, PoolError> {
        let out = self.exec(alias, "printf '%s' \"$HOME\" || echo '~'")?;
        let home = out.stdout.lines().next().unwrap_or("~").trim().to_string();
        let tail = path.trim_start_matches('~').trim_start_matches('/');
        Ok(if tail.is_empty() { home } else { format!("{}/{}", home.trim_end_matches('/'), tail) })
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteShell for ConnectionPool {
    fn exec(&self, alias: &str, cmd: &str) -> Result<ExecOutput, PoolError> {
        ConnectionPool::exec(self, alias, cmd)
    }

    fn exec_streaming(&self, alias: &str, cmd: &str, on_chunk: &mut dyn FnMut(&str)) -> Result<ExecOutput, PoolError> {
        ConnectionPool::exec_streaming(self, alias, cmd, |chunk| on_chunk(chunk))
    }

    fn put_file(&self, alias: &str, local_path: &Path, remote_path: &Path) -> Result<(), PoolError> {
        ConnectionPool::put_file(self, alias, local_path, remote_path)
    }

    fn get_file(&self, alias: &str, remote_path: &Path, local_path: &Path) -> Result<(), PoolError> {
        ConnectionPool::get_file(self, alias, remote_path, local_path)
    }

    fn mkdir_p(&self, alias: &str, path: &Path) -> Result<(), crate::error::MkdirError> {
        ConnectionPool::mkdir_p(self, alias, path)
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
