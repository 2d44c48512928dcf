//! Hand-rolled reader/writer for the object-store CLI's `.conf` file. The
//! on-disk format is `[name]` sections followed by `key = value` lines — a
//! small subset of INI, not a full dialect (no nesting, no multi-line
//! values, no comment continuation), so a dedicated parser is simpler and
//! more predictable than pulling in a general-purpose INI crate.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub remote_type: Option<String>,
}

/// Parses `.conf` content into an ordered list of remotes (name + declared
/// `type`, if present). Unknown keys are ignored.
pub fn parse_remotes(content: &str) -> Vec<RemoteEntry> {
    let mut remotes = Vec::new();
    let mut current: Option<RemoteEntry> = None;
    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            if let Some(entry) = current.take() {
                remotes.push(entry);
            }
            current = Some(RemoteEntry { name: stripped.trim().to_string(), remote_type: None });
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim();
            if key.eq_ignore_ascii_case("type") {
                if let Some(entry) = current.as_mut() {
                    entry.remote_type = Some(value.to_string());
                }
            }
        }
    }
    if let Some(entry) = current.take() {
        remotes.push(entry);
    }
    remotes
}
