//! Structured error kinds for the transfer pipeline.
//!
//! `OrchestratorError` covers failures that abort a whole Job (source-side:
//! connect, plan, package, upload). `DestError` covers failures that isolate
//! to a single `DestinationProgress` (destination-side: connect, tool
//! install, download, extract, store delete). Keeping them as separate closed
//! enums mirrors the propagation split in the design: a source failure kills
//! the job, a destination failure never crosses to another destination.

fn display_path(p: &std::path::Path) -> String {
    let s = p.to_string_lossy().to_string();
    if s.contains('\\') { s.replace('\\', "/") } else { s }
}

/// Source-side errors. Any of these aborts the Job.
#[derive(Debug, Clone)]
pub enum OrchestratorError {
    /// Dial or authentication failed while acquiring the source session.
    ConnectError(String),
    /// The object-store CLI tool is not installed on the source host.
    ToolMissing(String),
    /// Installing the object-store CLI tool on the source host failed.
    ToolInstallError(String),
    /// Folder inventory produced no files, or a `stat` in the enumeration failed.
    PlanError(String),
    /// Archive creation or the post-archive `stat` failed.
    PackageError(String),
    /// The upload of a part failed (transient or permanent; no retry in the core).
    UploadError(String),
    /// The job was cancelled by the operator. Terminal, not a failure proper.
    Cancelled,
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use OrchestratorError::*;
        match self {
            ConnectError(msg) => write!(f, "failed to connect to source host: {msg}"),
            ToolMissing(host) => write!(f, "object-store CLI tool missing on host {host}"),
            ToolInstallError(msg) => write!(f, "failed to install object-store CLI tool: {msg}"),
            PlanError(msg) => write!(f, "planning failed: {msg}"),
            PackageError(msg) => write!(f, "packaging failed: {msg}"),
            UploadError(msg) => write!(f, "upload failed: {msg}"),
            Cancelled => write!(f, "job was cancelled"),
        }
    }
}

impl std::error::Error for OrchestratorError {}

impl OrchestratorError {
    /// Whether a retry is likely to succeed if attempted again unchanged.
    /// Used by the retry/backoff helper in [`crate::util`], not by the
    /// orchestrator itself (the core never auto-retries a job-fatal error).
    pub fn is_retriable(&self) -> bool {
        use OrchestratorError::*;
        matches!(self, ConnectError(_) | ToolInstallError(_) | UploadError(_))
    }
}

/// Destination-side errors. Any of these isolates to one `DestinationProgress`;
/// other destinations and other parts continue unaffected.
#[derive(Debug, Clone)]
pub enum DestError {
    /// Dial or authentication failed while acquiring a destination session.
    ConnectError(String),
    /// The object-store CLI tool is not installed on this destination.
    ToolMissing(String),
    /// Installing the object-store CLI tool on this destination failed.
    ToolInstallError(String),
    /// Deploying the operator's `.conf` to this destination failed.
    ConfigDeployError(String),
    /// Downloading a part to the staging path failed.
    DownloadError(String),
    /// Extracting a staged archive (single-part or bulk) failed.
    ExtractError(String),
    /// Deleting the part from the intermediate store (via this destination) failed.
    StoreDeleteError(String),
}

impl std::fmt::Display for DestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use DestError::*;
        match self {
            ConnectError(msg) => write!(f, "failed to connect to destination: {msg}"),
            ToolMissing(host) => write!(f, "object-store CLI tool missing on host {host}"),
            ToolInstallError(msg) => write!(f, "failed to install object-store CLI tool: {msg}"),
            ConfigDeployError(msg) => write!(f, "failed to deploy store config: {msg}"),
            DownloadError(msg) => write!(f, "download failed: {msg}"),
            ExtractError(msg) => write!(f, "extract failed: {msg}"),
            StoreDeleteError(msg) => write!(f, "store delete failed: {msg}"),
        }
    }
}

impl std::error::Error for DestError {}

impl DestError {
    pub fn is_retriable(&self) -> bool {
        use DestError::*;
        matches!(self, ConnectError(_) | ToolInstallError(_) | DownloadError(_))
    }
}

/// Errors surfaced by the [`crate::pool`] connection pool before any
/// transfer-specific classification applies.
#[derive(Debug, Clone)]
pub enum PoolError {
    NoAddress(String),
    SessionCreateFailed(String),
    HandshakeFailed(String),
    AuthFailed(String),
    SftpCreateFailed(String),
    NoCapacity,
    Io(String),
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use PoolError::*;
        match self {
            NoAddress(addr) => write!(f, "cannot resolve address: {addr}"),
            SessionCreateFailed(addr) => write!(f, "failed to create SSH session for {addr}"),
            HandshakeFailed(addr) => write!(f, "SSH handshake failed for {addr}"),
            AuthFailed(addr) => write!(f, "SSH authentication failed for {addr}"),
            SftpCreateFailed(msg) => write!(f, "failed to open SFTP channel: {msg}"),
            NoCapacity => write!(f, "no free channel in the connection pool"),
            Io(msg) => write!(f, "transport I/O error: {msg}"),
        }
    }
}

impl std::error::Error for PoolError {}

/// `mkdir -p`-style helper error, reused by both the Packager (remote
/// staging dirs) and the Dispatcher (destination folders).
#[derive(Debug, Clone)]
pub enum MkdirError {
    ExistsAsFile(std::path::PathBuf),
    SftpError(std::path::PathBuf, String),
}

impl std::fmt::Display for MkdirError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MkdirError::ExistsAsFile(p) => {
                write!(f, "remote path exists as a file (expected a directory): {}", display_path(p))
            }
            MkdirError::SftpError(p, msg) => {
                write!(f, "failed to create remote directory {}: {msg}", display_path(p))
            }
        }
    }
}

impl std::error::Error for MkdirError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orchestrator_connect_error_is_retriable() {
        assert!(OrchestratorError::ConnectError("timeout".into()).is_retriable());
    }

    #[test]
    fn orchestrator_plan_error_is_not_retriable() {
        assert!(!OrchestratorError::PlanError("empty folder".into()).is_retriable());
    }

    #[test]
    fn dest_download_error_is_retriable() {
        assert!(DestError::DownloadError("connection reset".into()).is_retriable());
    }

    #[test]
    fn dest_extract_error_is_not_retriable() {
        assert!(!DestError::ExtractError("bad zip".into()).is_retriable());
    }
}
