//! Planner: turns a source folder into an ordered list of size-bounded
//! batches via a single remote enumeration command and a first-fit packer.

use crate::error::OrchestratorError;
use crate::pool::RemoteShell;

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedFile {
    pub rel_path: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub files: Vec<PlannedFile>,
    pub total_size: u64,
}

/// Enumerates every regular file under `folder` on host `alias` via one
/// `find ... -printf` command, parsed line by line as `size<TAB>relpath`.
pub fn enumerate_remote_files(
    pool: &dyn RemoteShell,
    alias: &str,
    folder: &str,
) -> Result<Vec<PlannedFile>, OrchestratorError> {
    let quoted = format!("'{}'", folder.replace('\'', "'\\''"));
    let cmd = format!(r#"cd {quoted} && find . -type f -printf '%s\t%P\n'"#);
    let out = pool.exec(alias, &cmd).map_err(|e| OrchestratorError::PlanError(e.to_string()))?;
    if !out.stderr.is_empty() && out.stdout.is_empty() {
        return Err(OrchestratorError::PlanError(out.stderr));
    }
    let mut files = Vec::new();
    for line in out.stdout.lines() {
        let Some((size_str, rel_path)) = line.split_once('\t') else { continue };
        let Ok(size) = size_str.trim().parse::<u64>() else { continue };
        files.push(PlannedFile { rel_path: rel_path.to_string(), size });
    }
    if files.is_empty() {
        return Err(OrchestratorError::PlanError(format!("source folder '{folder}' contains no files")));
    }
    Ok(files)
}

/// First-fit packs files (in enumeration order) into batches no larger than
/// `part_size_bytes`, except a single file exceeding the ceiling forms its
/// own batch. Preserves directory locality since enumeration order groups
/// siblings together.
pub fn first_fit_pack(files: Vec<PlannedFile>, part_size_bytes: u64) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current = Batch::default();
    for file in files {
        if file.size > part_size_bytes {
            if !current.files.is_empty() {
                batches.push(std::mem::take(&mut current));
            }
            batches.push(Batch { total_size: file.size, files: vec![file] });
            continue;
        }
        if current.total_size + file.size > part_size_bytes && !current.files.is_empty() {
            batches.push(std::mem::take(&mut current));
        }
        current.total_size += file.size;
        current.files.push(file);
    }
    if !current.files.is_empty() {
        batches.push(current);
    }
    batches
}
