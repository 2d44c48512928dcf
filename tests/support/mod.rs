//! In-process fake [`cargohold::pool::RemoteShell`]: an in-memory virtual
//! filesystem per host alias plus a shared store namespace, interpreting the
//! exact shell command strings the real Planner/Packager/Driver/Dispatcher
//! issue. No network, no child processes — just enough command recognition
//! to drive the real orchestration code end to end.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use regex::Regex;

use cargohold::error::{MkdirError, PoolError};
use cargohold::pool::{ExecOutput, RemoteShell};

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    /// An opaque payload of `size` bytes (a seeded source file, or a file
    /// recreated by an extract).
    Data(u64),
    /// A small text file whose contents matter (a heredoc-written file list
    /// or `.conf`).
    Text(String),
    /// A zip archive: `(rel_path, size)` per member.
    Archive(Vec<(String, u64)>),
}

#[derive(Default)]
struct HostFs {
    files: HashMap<String, Node>,
}

fn find_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^cd '(.*?)' && find \. -type f -printf").unwrap())
}
fn zip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^cd '(.*?)' && zip -q '(.*?)' -@ < '(.*?)'$").unwrap())
}
fn stat_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^stat -c %s '(.*?)'$").unwrap())
}
fn check_installed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^command -v (\S+) >/dev/null").unwrap())
}
fn copyto_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\S+) copyto '(.*?)' '(.*?)' --log-level ERROR").unwrap())
}
fn deletefile_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\S+) deletefile '(.*?)' --log-level ERROR$").unwrap())
}
fn mv_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^mv -f '(.*?)' '(.*?)'$").unwrap())
}
fn unzip_single_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^unzip -o -q '(.*?)' -d '(.*?)'$").unwrap())
}
fn unzip_bulk_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^cd '(.*?)' && unzip -o -q '(.*?)'$").unwrap())
}
fn rm_glob_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^cd '(.*?)' && rm -f '(.*?)'$").unwrap())
}
fn rm_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^rm -f '(.*?)'$").unwrap())
}

fn join(folder: &str, rel: &str) -> String {
    format!("{}/{}", folder.trim_end_matches('/'), rel)
}

fn glob_matches(name: &str, glob: &str) -> bool {
    let Some((prefix, suffix)) = glob.split_once('*') else { return name == glob };
    name.starts_with(prefix) && name.ends_with(suffix) && name.len() >= prefix.len() + suffix.len()
}

#[derive(Default)]
pub struct FakeShell {
    hosts: Mutex<HashMap<String, HostFs>>,
    store: Mutex<HashMap<String, Node>>,
    unreachable: Mutex<std::collections::HashSet<String>>,
    fail_next_download: Mutex<HashMap<String, u32>>,
}

impl FakeShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_file(&self, alias: &str, path: &str, size: u64) {
        self.hosts.lock().unwrap().entry(alias.to_string()).or_default().files.insert(path.to_string(), Node::Data(size));
    }

    pub fn mark_unreachable(&self, alias: &str) {
        self.unreachable.lock().unwrap().insert(alias.to_string());
    }

    pub fn fail_next_download(&self, alias: &str, times: u32) {
        self.fail_next_download.lock().unwrap().insert(alias.to_string(), times);
    }

    pub fn has_data_file(&self, alias: &str, path: &str, size: u64) -> bool {
        self.hosts.lock().unwrap().get(alias).and_then(|h| h.files.get(path)).map(|n| *n == Node::Data(size)).unwrap_or(false)
    }

    pub fn has_node(&self, alias: &str, path: &str) -> bool {
        self.hosts.lock().unwrap().get(alias).map(|h| h.files.contains_key(path)).unwrap_or(false)
    }

    pub fn store_len(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    fn write(&self, alias: &str, path: &str, node: Node) {
        self.hosts.lock().unwrap().entry(alias.to_string()).or_default().files.insert(path.to_string(), node);
    }

    fn read(&self, alias: &str, path: &str) -> Option<Node> {
        self.hosts.lock().unwrap().get(alias).and_then(|h| h.files.get(path).cloned())
    }

    fn remove(&self, alias: &str, path: &str) -> Option<Node> {
        self.hosts.lock().unwrap().get_mut(alias).and_then(|h| h.files.remove(path))
    }

    fn interpret(&self, alias: &str, cmd: &str) -> Result<ExecOutput, PoolError> {
        let ok = |stdout: String| Ok(ExecOutput { stdout, stderr: String::new() });

        if let Some(rest) = cmd.strip_prefix("cat > ") {
            let (path_and_marker, body_and_marker) = rest.split_once('\n').unwrap_or((rest, ""));
            let (path, marker_part) = path_and_marker.split_once(" << '").unwrap_or((path_and_marker, "'"));
            let marker = marker_part.trim_end_matches('\'');
            let body = body_and_marker.strip_suffix(&format!("\n{marker}")).unwrap_or(body_and_marker).to_string();
            self.write(alias, path, Node::Text(body));
            return ok(String::new());
        }

        if let Some(c) = find_re().captures(cmd) {
            let folder = &c[1];
            let prefix = format!("{}/", folder.trim_end_matches('/'));
            let mut entries: Vec<(String, u64)> = Vec::new();
            if let Some(host) = self.hosts.lock().unwrap().get(alias) {
                for (path, node) in &host.files {
                    if let Some(rel) = path.strip_prefix(&prefix) {
                        if let Node::Data(size) = node {
                            entries.push((rel.to_string(), *size));
                        }
                    }
                }
            }
            // Real `find` order depends on directory entry order, not name;
            // sorting here just gives these tests something deterministic to
            // assert against.
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            return ok(entries.into_iter().map(|(rel, size)| format!("{size}\t{rel}")).collect::<Vec<_>>().join("\n"));
        }

        if let Some(c) = zip_re().captures(cmd) {
            let folder = &c[1];
            let archive_path = c[2].to_string();
            let list_path = &c[3];
            let Some(Node::Text(list_contents)) = self.read(alias, list_path) else {
                return Err(PoolError::Io(format!("file list not found: {list_path}")));
            };
            let mut manifest = Vec::new();
            for rel in list_contents.lines().filter(|l| !l.trim().is_empty()) {
                let full = join(folder, rel);
                let Some(Node::Data(size)) = self.read(alias, &full) else {
                    return Err(PoolError::Io(format!("source file vanished: {full}")));
                };
                manifest.push((rel.to_string(), size));
            }
            self.write(alias, &archive_path, Node::Archive(manifest));
            return ok(String::new());
        }

        if let Some(c) = stat_re().captures(cmd) {
            let path = &c[1];
            return match self.read(alias, path) {
                Some(Node::Data(size)) => ok(size.to_string()),
                Some(Node::Archive(entries)) => ok(entries.iter().map(|(_, s)| s).sum::<u64>().to_string()),
                _ => Err(PoolError::Io(format!("stat: no such file: {path}"))),
            };
        }

        if check_installed_re().is_match(cmd) {
            return ok("yes".to_string());
        }

        if let Some(c) = copyto_re().captures(cmd) {
            let src = c[2].to_string();
            let dst = c[3].to_string();
            return self.do_copyto(alias, &src, &dst);
        }

        if let Some(c) = deletefile_re().captures(cmd) {
            let target = &c[2];
            self.store.lock().unwrap().remove(target);
            return ok(String::new());
        }

        if let Some(c) = mv_re().captures(cmd) {
            let (src, dst) = (c[1].to_string(), c[2].to_string());
            let Some(node) = self.remove(alias, &src) else {
                return Err(PoolError::Io(format!("mv: no such file: {src}")));
            };
            self.write(alias, &dst, node);
            return ok(String::new());
        }

        if let Some(c) = unzip_single_re().captures(cmd) {
            let (archive_path, dest_folder) = (c[1].to_string(), c[2].to_string());
            let Some(Node::Archive(entries)) = self.read(alias, &archive_path) else {
                return Err(PoolError::Io(format!("unzip: not an archive: {archive_path}")));
            };
            for (rel, size) in entries {
                self.write(alias, &join(&dest_folder, &rel), Node::Data(size));
            }
            return ok(String::new());
        }

        if let Some(c) = unzip_bulk_re().captures(cmd) {
            let (folder, glob) = (c[1].to_string(), c[2].to_string());
            let prefix = format!("{}/", folder.trim_end_matches('/'));
            let matches: Vec<(String, Vec<(String, u64)>)> = self
                .hosts
                .lock()
                .unwrap()
                .get(alias)
                .map(|h| {
                    h.files
                        .iter()
                        .filter_map(|(path, node)| {
                            let rel = path.strip_prefix(&prefix)?;
                            let Node::Archive(entries) = node else { return None };
                            if glob_matches(rel, &glob) { Some((path.clone(), entries.clone())) } else { None }
                        })
                        .collect()
                })
                .unwrap_or_default();
            for (_, entries) in matches {
                for (rel, size) in entries {
                    self.write(alias, &join(&folder, &rel), Node::Data(size));
                }
            }
            return ok(String::new());
        }

        if let Some(c) = rm_glob_re().captures(cmd) {
            let (folder, glob) = (c[1].to_string(), c[2].to_string());
            let prefix = format!("{}/", folder.trim_end_matches('/'));
            if let Some(host) = self.hosts.lock().unwrap().get_mut(alias) {
                host.files.retain(|path, _| {
                    let Some(rel) = path.strip_prefix(&prefix) else { return true };
                    !glob_matches(rel, &glob)
                });
            }
            return ok(String::new());
        }

        if let Some(c) = rm_re().captures(cmd) {
            self.remove(alias, &c[1]);
            return ok(String::new());
        }

        if cmd.starts_with("mkdir -p") {
            return ok(String::new());
        }

        // Anything unmodeled (e.g. the install-on-host fallback path) is
        // treated as a harmless no-op success — these tests never exercise
        // the tool-install branch since `check_installed` always answers yes.
        ok(String::new())
    }

    fn do_copyto(&self, alias: &str, src: &str, dst: &str) -> Result<ExecOutput, PoolError> {
        let src_is_remote = src.contains(':') && !src.starts_with('/') && !src.starts_with('~');
        let dst_is_remote = dst.contains(':') && !dst.starts_with('/') && !dst.starts_with('~');

        if dst_is_remote && !src_is_remote {
            let Some(node) = self.read(alias, src) else {
                return Err(PoolError::Io(format!("upload: no such file: {src}")));
            };
            self.store.lock().unwrap().insert(dst.to_string(), node);
            return Ok(ExecOutput { stdout: "Transferred: 100%, 0 B/s".into(), stderr: String::new() });
        }

        if src_is_remote && !dst_is_remote {
            let mut countdown = self.fail_next_download.lock().unwrap();
            if let Some(n) = countdown.get_mut(alias) {
                if *n > 0 {
                    *n -= 1;
                    return Err(PoolError::Io(format!("simulated transient download failure for {alias}")));
                }
            }
            drop(countdown);
            let Some(node) = self.store.lock().unwrap().get(src).cloned() else {
                return Err(PoolError::Io(format!("download: not in store: {src}")));
            };
            self.write(alias, dst, node);
            return Ok(ExecOutput { stdout: "Transferred: 100%, 0 B/s".into(), stderr: String::new() });
        }

        Err(PoolError::Io(format!("copyto: ambiguous remote/local pair: '{src}' -> '{dst}'")))
    }
}

impl RemoteShell for FakeShell {
    fn exec(&self, alias: &str, cmd: &str) -> Result<ExecOutput, PoolError> {
        if self.unreachable.lock().unwrap().contains(alias) {
            return Err(PoolError::Io(format!("host '{alias}' is unreachable")));
        }
        self.interpret(alias, cmd)
    }

    fn exec_streaming(&self, alias: &str, cmd: &str, on_chunk: &mut dyn FnMut(&str)) -> Result<ExecOutput, PoolError> {
        let out = self.exec(alias, cmd)?;
        on_chunk(&out.stdout);
        Ok(out)
    }

    fn put_file(&self, alias: &str, local_path: &Path, remote_path: &Path) -> Result<(), PoolError> {
        let key = remote_path.to_string_lossy().to_string();
        let Some(node) = self.read(alias, &local_path.to_string_lossy()) else {
            return Err(PoolError::Io(format!("put_file: no such local file: {}", local_path.display())));
        };
        self.store.lock().unwrap().insert(key, node);
        Ok(())
    }

    fn get_file(&self, alias: &str, remote_path: &Path, local_path: &Path) -> Result<(), PoolError> {
        let key = remote_path.to_string_lossy().to_string();
        let Some(node) = self.store.lock().unwrap().get(&key).cloned() else {
            return Err(PoolError::Io(format!("get_file: not in store: {key}")));
        };
        self.write(alias, &local_path.to_string_lossy(), node);
        Ok(())
    }

    fn mkdir_p(&self, _alias: &str, _path: &Path) -> Result<(), MkdirError> {
        Ok(())
    }
}
