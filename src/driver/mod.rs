//! Object-Store Driver: drives the object-store CLI tool (e.g. `rclone`)
//! already resident on a remote host over its exec channel. All commands run
//! on the host identified by `alias`; progress is parsed from the tool's
//! stdout as it streams back over the connection pool's `exec_streaming`.

pub mod conf;

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{DestError, OrchestratorError};
use crate::pool::RemoteShell;

/// `copyto`/similar flags shared by every transfer command: quiet logging
/// plus a steady one-line stats cadence the progress parser can key off.
const COMMON_FLAGS: &str = "--log-level ERROR --stats 1s --stats-one-line --stats-one-line-date";

/// How many times a transient `copyto`/`deletefile` failure is retried
/// through the shared backoff helper before it's surfaced to the caller.
const TRANSFER_RETRIES: usize = 3;

fn percent_speed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{1,3})%.*?([\d.]+\s?[KMGT]?i?B/s)").expect("valid regex"))
}

/// One progress sample parsed out of a stats line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSample {
    pub percent: u8,
    pub speed: String,
}

fn parse_progress_line(line: &str) -> Option<ProgressSample> {
    let caps = percent_speed_regex().captures(line)?;
    let percent: u8 = caps.get(1)?.as_str().parse().ok()?;
    let speed = caps.get(2)?.as_str().to_string();
    Some(ProgressSample { percent: percent.min(100), speed })
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

pub struct ObjectStoreDriver<'a> {
    pool: &'a dyn RemoteShell,
    tool_path: &'a str,
}

impl<'a> ObjectStoreDriver<'a> {
    pub fn new(pool: &'a dyn RemoteShell, tool_path: &'a str) -> Self {
        Self { pool, tool_path }
    }

    fn remote_spec(remote: &str, remote_path: &str) -> String {
        format!("{remote}:{}", remote_path.trim_start_matches('/'))
    }

    /// Uploads `local_path` to `remote:remote_path/remote_name`, invoking
    /// `on_progress(percent, speed)` for every parsed stats line.
    pub fn upload_file(
        &self,
        alias: &str,
        local_path: &str,
        remote: &str,
        remote_path: &str,
        remote_name: &str,
        mut on_progress: impl FnMut(u8, &str),
    ) -> Result<(), OrchestratorError> {
        let dest = format!("{}/{remote_name}", Self::remote_spec(remote, remote_path));
        let cmd = format!(
            "{} copyto {} {} {COMMON_FLAGS}",
            self.tool_path,
            shell_quote(local_path),
            shell_quote(&dest)
        );
        crate::util::retry_operation(TRANSFER_RETRIES, || {
            let mut handle_chunk = |chunk: &str| {
                for line in chunk.lines() {
                    if let Some(sample) = parse_progress_line(line) {
                        on_progress(sample.percent, &sample.speed);
                    }
                }
            };
            let out = self.pool.exec_streaming(alias, &cmd, &mut handle_chunk).map_err(|e| anyhow::anyhow!(e.to_string()))?;
            if !out.stderr.is_empty() {
                anyhow::bail!(out.stderr);
            }
            Ok(())
        })
        .map_err(|e| OrchestratorError::UploadError(e.to_string()))
    }

    /// Downloads `remote:remote_path/remote_name` to `local_path`.
    pub fn download_file(
        &self,
        alias: &str,
        remote: &str,
        remote_path: &str,
        remote_name: &str,
        local_path: &str,
        mut on_progress: impl FnMut(u8, &str),
    ) -> Result<(), DestError> {
        let src = format!("{}/{remote_name}", Self::remote_spec(remote, remote_path));
        let cmd =
            format!("{} copyto {} {} {COMMON_FLAGS}", self.tool_path, shell_quote(&src), shell_quote(local_path));
        crate::util::retry_operation(TRANSFER_RETRIES, || {
            let mut handle_chunk = |chunk: &str| {
                for line in chunk.lines() {
                    if let Some(sample) = parse_progress_line(line) {
                        on_progress(sample.percent, &sample.speed);
                    }
                }
            };
            let out = self.pool.exec_streaming(alias, &cmd, &mut handle_chunk).map_err(|e| anyhow::anyhow!(e.to_string()))?;
            if !out.stderr.is_empty() {
                anyhow::bail!(out.stderr);
            }
            Ok(())
        })
        .map_err(|e| DestError::DownloadError(e.to_string()))
    }

    /// Deletes a single file from the store — never a recursive folder delete.
    pub fn delete_file(&self, alias: &str, remote: &str, remote_path: &str, remote_name: &str) -> Result<(), DestError> {
        let target = format!("{}/{remote_name}", Self::remote_spec(remote, remote_path));
        let cmd = format!("{} deletefile {} --log-level ERROR", self.tool_path, shell_quote(&target));
        crate::util::retry_operation(TRANSFER_RETRIES, || {
            let out = self.pool.exec(alias, &cmd).map_err(|e| anyhow::anyhow!(e.to_string()))?;
            if !out.stderr.is_empty() {
                anyhow::bail!(out.stderr);
            }
            Ok(())
        })
        .map_err(|e| DestError::StoreDeleteError(e.to_string()))
    }

    /// Lists remotes configured on this host's copy of the driver's `.conf`.
    pub fn list_server_remotes(&self, alias: &str, conf_path: &str) -> Result<Vec<conf::RemoteEntry>, DestError> {
        let cmd = format!("cat {}", shell_quote(conf_path));
        let out = self.pool.exec(alias, &cmd).map_err(|e| DestError::ConfigDeployError(e.to_string()))?;
        Ok(conf::parse_remotes(&out.stdout))
    }

    /// Lists remotes parsed from the operator's local `.conf` contents.
    pub fn list_remotes(local_conf_contents: &str) -> Vec<conf::RemoteEntry> {
        conf::parse_remotes(local_conf_contents)
    }

    pub fn check_installed(&self, alias: &str) -> Result<bool, DestError> {
        let cmd = format!("command -v {} >/dev/null 2>&1 && echo yes || echo no", self.tool_path);
        let out = self.pool.exec(alias, &cmd).map_err(|e| DestError::ToolMissing(e.to_string()))?;
        Ok(out.stdout.trim() == "yes")
    }

    /// Installs the tool via the distro package manager with `sudo`; falls
    /// back to extracting a user-local copy into `~/bin` and appending it to
    /// the shell profile's `PATH` if `sudo` is unavailable or fails.
    pub fn install_on_host(&self, alias: &str) -> Result<(), DestError> {
        let sudo_cmd = format!(
            "command -v apt-get >/dev/null 2>&1 && sudo -n apt-get install -y {0} \
             || (command -v yum >/dev/null 2>&1 && sudo -n yum install -y {0}) \
             || (command -v pacman >/dev/null 2>&1 && sudo -n pacman -Sy --noconfirm {0})",
            self.tool_path
        );
        if self.pool.exec(alias, &sudo_cmd).is_ok() && self.check_installed(alias).unwrap_or(false) {
            return Ok(());
        }

        let user_local_cmd = format!(
            "mkdir -p ~/bin && curl -fsSL https://downloads.rclone.org/rclone-current-linux-amd64.zip -o /tmp/rclone.zip \
             && unzip -o /tmp/rclone.zip -d /tmp/rclone_extract \
             && cp /tmp/rclone_extract/*/rclone ~/bin/{0} \
             && chmod +x ~/bin/{0} \
             && rm -rf /tmp/rclone.zip /tmp/rclone_extract \
             && grep -q 'export PATH=\"$HOME/bin:$PATH\"' ~/.profile 2>/dev/null \
                || echo 'export PATH=\"$HOME/bin:$PATH\"' >> ~/.profile",
            self.tool_path
        );
        let out = self.pool.exec(alias, &user_local_cmd).map_err(|e| DestError::ToolInstallError(e.to_string()))?;
        if !out.stderr.is_empty() && !self.check_installed(alias).unwrap_or(false) {
            return Err(DestError::ToolInstallError(out.stderr));
        }
        Ok(())
    }

    /// Copies the operator's local `.conf` contents to
    /// `~/.config/<tool>/<tool>.conf` on the host.
    pub fn deploy_config(&self, alias: &str, local_conf_contents: &str) -> Result<(), DestError> {
        let remote_conf = format!("~/.config/{0}/{0}.conf", self.tool_path);
        let dir_cmd = format!("mkdir -p ~/.config/{}", self.tool_path);
        self.pool.exec(alias, &dir_cmd).map_err(|e| DestError::ConfigDeployError(e.to_string()))?;
        let write_cmd = format!(
            "cat > {} << 'CARGOHOLD_CONF_EOF'\n{}\nCARGOHOLD_CONF_EOF",
            remote_conf, local_conf_contents
        );
        self.pool.exec(alias, &write_cmd).map_err(|e| DestError::ConfigDeployError(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_percent_and_speed() {
        let line = "Transferred:   	   10.500 MiB / 20.000 MiB, 52%, 1.200 MiB/s, ETA 8s";
        let sample = parse_progress_line(line).expect("should parse");
        assert_eq!(sample.percent, 52);
        assert_eq!(sample.speed, "1.200 MiB/s");
    }

    #[test]
    fn ignores_lines_without_percent() {
        assert!(parse_progress_line("Transferring:").is_none());
    }

    #[test]
    fn clamps_percent_above_100() {
        let line = "weird 150% at 3.00 B/s";
        let sample = parse_progress_line(line).unwrap();
        assert_eq!(sample.percent, 100);
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("a'b"), "'a'\\''b'");
    }

    #[test]
    fn remote_spec_trims_leading_slash() {
        assert_eq!(ObjectStoreDriver::remote_spec("gdrive", "/a/b"), "gdrive:a/b");
    }
}
