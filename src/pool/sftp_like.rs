use std::path::Path;

/// Trait abstracting the SFTP operations the Packager/Dispatcher need.
/// Boxed so tests can inject an in-memory fake instead of a real `ssh2::Sftp`.
pub trait SftpLike: Send {
    fn stat_is_file(&self, p: &Path) -> Result<bool, String>;
    fn mkdir(&self, p: &Path, mode: i32) -> Result<(), String>;
    fn open_read(&self, p: &Path) -> Result<Box<dyn std::io::Read + Send>, String>;
    fn create_write(&self, p: &Path) -> Result<Box<dyn std::io::Write + Send>, String>;
    fn unlink(&self, p: &Path) -> Result<(), String>;
    fn rename(&self, from: &Path, to: &Path) -> Result<(), String>;
}

pub struct Ssh2Adapter(pub ssh2::Sftp);

impl SftpLike for Ssh2Adapter {
    fn stat_is_file(&self, p: &Path) -> Result<bool, String> {
        match self.0.stat(p) {
            Ok(st) => Ok(st.is_file()),
            Err(e) => Err(e.to_string()),
        }
    }

    fn mkdir(&self, p: &Path, mode: i32) -> Result<(), String> {
        self.0.mkdir(p, mode).map_err(|e| e.to_string())
    }

    fn open_read(&self, p: &Path) -> Result<Box<dyn std::io::Read + Send>, String> {
        self.0.open(p).map(|f| Box::new(f) as Box<dyn std::io::Read + Send>).map_err(|e| e.to_string())
    }

    fn create_write(&self, p: &Path) -> Result<Box<dyn std::io::Write + Send>, String> {
        self.0.create(p).map(|f| Box::new(f) as Box<dyn std::io::Write + Send>).map_err(|e| e.to_string())
    }

    fn unlink(&self, p: &Path) -> Result<(), String> {
        self.0.unlink(p).map_err(|e| e.to_string())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), String> {
        self.0.rename(from, to, None).map_err(|e| e.to_string())
    }
}

/// `mkdir -p` over an `SftpLike`, used by the Packager (remote staging dirs)
/// and the Dispatcher (destination folders) alike.
pub fn mkdir_p(sftp: &dyn SftpLike, path: &Path) -> Result<(), crate::error::MkdirError> {
    if path.as_os_str().is_empty() || path == Path::new("/") {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        mkdir_p(sftp, parent)?;
    }
    match sftp.stat_is_file(path) {
        Ok(true) => Err(crate::error::MkdirError::ExistsAsFile(path.to_path_buf())),
        Ok(false) => Ok(()), // already exists as a directory
        Err(_) => match sftp.mkdir(path, 0o755) {
            Ok(()) => Ok(()),
            // Another concurrent worker may have created it first; re-stat to confirm.
            Err(e) => match sftp.stat_is_file(path) {
                Ok(false) => Ok(()),
                Ok(true) => Err(crate::error::MkdirError::ExistsAsFile(path.to_path_buf())),
                Err(_) => Err(crate::error::MkdirError::SftpError(path.to_path_buf(), e)),
            },
        },
    }
}
