//! Dispatcher: the destination-side worker. Once a part lands in the
//! intermediate store, downloads it to every destination in parallel (one
//! thread per destination for that part), stages it, extracts per the
//! job's archive mode, and optionally deletes it from the store.
//!
//! Every function here operates on a single destination's
//! [`DestinationProgress`] by exclusive reference, never on the whole
//! [`Job`]/[`Part`] — that keeps the borrow discipline simple when the
//! Orchestrator fans a part out across destination threads (§5: "all
//! mutations of Job/Part/DestinationProgress happen on the orchestrator
//! task").

use crate::driver::ObjectStoreDriver;
use crate::error::DestError;
use crate::event::{Event, EventBus, LogLevel, prefix};
use crate::job::{DestStatus, DestinationProgress, DestinationSpec};
use crate::pool::RemoteShell;
use crate::store_config::ArchiveStoreConfig;
use crate::util::Throttler;

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Ensures the object-store CLI is installed and configured on `dest`
/// before any part is dispatched to it. A failure here fails every
/// `DestinationProgress` slot for this destination across the whole job.
pub fn prepare_destination(
    driver: &ObjectStoreDriver,
    dest: &DestinationSpec,
    local_conf_contents: &str,
) -> Result<(), DestError> {
    if !driver.check_installed(&dest.host_alias)? {
        driver.install_on_host(&dest.host_alias)?;
    }
    driver.deploy_config(&dest.host_alias, local_conf_contents)
}

/// Everything about one uploaded part that a destination thread needs,
/// besides the destination and store it targets. Intentionally a thin,
/// `Clone` snapshot rather than a borrow of `Part`/`Job` — a destination
/// thread owns one of these outright.
#[derive(Clone)]
pub struct PartContext {
    pub job_id: String,
    pub part_id: String,
    pub filename: String,
    pub auto_extract: bool,
    pub needs_split: bool,
    pub delete_from_store_after_all_dest_done: bool,
}

/// Downloads, stages, and (if applicable) extracts one part on one
/// destination, updating `progress` in place.
pub fn run_part_for_destination(
    pool: &dyn RemoteShell,
    driver: &ObjectStoreDriver,
    ctx: &PartContext,
    dest: &DestinationSpec,
    store: &ArchiveStoreConfig,
    progress: &mut DestinationProgress,
    bus: &EventBus,
) {
    let alias = &dest.host_alias;

    progress.advance(DestStatus::Downloading, 0);
    bus.publish(Event::PartDestProgress {
        job_id: ctx.job_id.clone(),
        part_id: ctx.part_id.clone(),
        host_id: alias.clone(),
        status: "downloading".into(),
        percent: 0,
        error: None,
    });

    let staging_path = format!("/tmp/{}", ctx.filename);
    let bus_clone = bus.clone();
    let job_id = ctx.job_id.clone();
    let part_id = ctx.part_id.clone();
    let progress_alias = alias.clone();
    let mut throttler = Throttler::new();

    let download_result =
        driver.download_file(alias, &store.remote, &store.folder, &ctx.filename, &staging_path, move |percent, _speed| {
            if throttler.allow(1) {
                bus_clone.publish(Event::PartDestProgress {
                    job_id: job_id.clone(),
                    part_id: part_id.clone(),
                    host_id: progress_alias.clone(),
                    status: "downloading".into(),
                    percent,
                    error: None,
                });
            }
        });

    if let Err(e) = download_result {
        progress.fail(e.to_string());
        bus.log(LogLevel::Error, format!("{} download failed on {alias} for {}: {e}", prefix::ERROR, ctx.filename));
        return;
    }
    progress.advance(DestStatus::Staging, 100);

    let dest_final_path = format!("{}/{}", dest.folder.trim_end_matches('/'), ctx.filename);
    let result = if !ctx.auto_extract {
        stage_only(pool, alias, &staging_path, &dest_final_path)
    } else if !ctx.needs_split {
        extract_single(pool, alias, &staging_path, &dest.folder)
    } else {
        // Split archive: stage for now, bulk extract happens after every part lands (§4.6).
        stage_only(pool, alias, &staging_path, &dest_final_path)
    };

    if let Err(e) = result {
        progress.fail(e.to_string());
        bus.log(LogLevel::Error, format!("{} staging/extract failed on {alias} for {}: {e}", prefix::ERROR, ctx.filename));
        return;
    }

    if !ctx.needs_split && ctx.auto_extract {
        progress.advance(DestStatus::Extracting, 100);
        bus.publish(Event::PartDestProgress {
            job_id: ctx.job_id.clone(),
            part_id: ctx.part_id.clone(),
            host_id: alias.clone(),
            status: "extracting".into(),
            percent: 100,
            error: None,
        });
    }

    if ctx.delete_from_store_after_all_dest_done {
        if let Err(e) = driver.delete_file(alias, &store.remote, &store.folder, &ctx.filename) {
            progress.fail(e.to_string());
            bus.log(LogLevel::Error, format!("{} store delete failed on {alias} for {}: {e}", prefix::ERROR, ctx.filename));
            return;
        }
    }

    progress.advance(DestStatus::Completed, 100);
    bus.publish(Event::PartDestProgress {
        job_id: ctx.job_id.clone(),
        part_id: ctx.part_id.clone(),
        host_id: alias.clone(),
        status: "completed".into(),
        percent: 100,
        error: None,
    });
}

fn stage_only(pool: &dyn RemoteShell, alias: &str, staging_path: &str, dest_final_path: &str) -> Result<(), DestError> {
    if let Some(parent) = std::path::Path::new(dest_final_path).parent() {
        pool.mkdir_p(alias, parent).map_err(|e| DestError::DownloadError(e.to_string()))?;
    }
    let cmd = format!("mv -f {} {}", shell_quote(staging_path), shell_quote(dest_final_path));
    pool.exec(alias, &cmd).map_err(|e| DestError::DownloadError(e.to_string()))?;
    Ok(())
}

fn extract_single(pool: &dyn RemoteShell, alias: &str, staging_path: &str, dest_folder: &str) -> Result<(), DestError> {
    pool.exec(alias, &format!("mkdir -p {}", shell_quote(dest_folder)))
        .map_err(|e| DestError::ExtractError(e.to_string()))?;
    let cmd = format!("unzip -o -q {} -d {}", shell_quote(staging_path), shell_quote(dest_folder));
    let out = pool.exec(alias, &cmd).map_err(|e| DestError::ExtractError(e.to_string()))?;
    if !out.stderr.is_empty() {
        return Err(DestError::ExtractError(out.stderr));
    }
    pool.exec(alias, &format!("rm -f {}", shell_quote(staging_path))).ok();
    Ok(())
}

/// Runs after every part has been staged on `dest` for a split-archive job:
/// a single bulk `unzip` over the `<base>.part*.zip` glob, then cleanup.
/// Failures are logged but do not fail other destinations (§4.6).
pub fn bulk_extract(pool: &dyn RemoteShell, dest: &DestinationSpec, base_name: &str, bus: &EventBus, job_id: &str) {
    let alias = &dest.host_alias;
    let glob = format!("{base_name}.part*.zip");
    let cmd = format!("cd {} && unzip -o -q {}", shell_quote(&dest.folder), shell_quote(&glob));
    let log = |level, message: String| {
        bus.publish(Event::Log(crate::event::LogRecord {
            level,
            message,
            job_id: Some(job_id.to_string()),
            host_id: Some(alias.clone()),
            part_id: None,
        }));
    };
    match pool.exec(alias, &cmd) {
        Ok(_) => {
            pool.exec(alias, &format!("cd {} && rm -f {}", shell_quote(&dest.folder), shell_quote(&glob))).ok();
            log(LogLevel::Info, format!("{} bulk extract completed on {alias}", prefix::EXTRACT));
        }
        Err(e) => log(LogLevel::Error, format!("{} bulk extract failed on {alias}: {e}", prefix::ERROR)),
    }
}

/// Thread-pool sizing helper: how many destination threads to spawn for one
/// part, bounded by the configured (or auto) concurrency.
pub fn destination_concurrency(configured: Option<usize>, destinations: usize, total_files: usize, total_bytes: u64) -> usize {
    let auto = crate::auto_concurrency::choose_auto_concurrency(total_files, total_bytes);
    configured.unwrap_or(auto).min(destinations.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_concurrency_is_capped_by_destination_count() {
        assert_eq!(destination_concurrency(Some(8), 2, 100, 1024), 2);
    }

    #[test]
    fn destination_concurrency_falls_back_to_auto() {
        assert_eq!(destination_concurrency(None, 16, 0, 0), 1);
    }
}
