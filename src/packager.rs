//! Packager: the source-side worker. Archives one batch at a time on the
//! source host (remotely, via the shared shell), uploads it to the
//! intermediate store, and emits progress/PartUploaded events.

use crate::driver::ObjectStoreDriver;
use crate::error::OrchestratorError;
use crate::event::{Event, EventBus, LogLevel, LogRecord, prefix};
use crate::job::{DestinationProgress, Job, Part, PartStatus};
use crate::planner::Batch;
use crate::pool::RemoteShell;
use crate::util::Throttler;

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Packages and uploads batch `index` (0-based) of `job`, publishing events
/// as the part progresses. Only reads `job` — the Packager never mutates
/// shared job state directly; it hands the finished [`Part`] back to the
/// Orchestrator over a channel, which is the sole writer of `Job::parts`.
#[allow(clippy::too_many_arguments)]
pub fn run_part(
    pool: &dyn RemoteShell,
    driver: &ObjectStoreDriver,
    store_remote: &str,
    store_folder: &str,
    job: &Job,
    total_parts: u32,
    batch_index: usize,
    batch: &Batch,
    bus: &EventBus,
) -> Result<Part, OrchestratorError> {
    let source_alias = &job.source_host_alias;
    let part_index = (batch_index + 1) as u32;
    let filename = job.part_filename(part_index);
    let mut part = Part::new(part_index, filename.clone());
    part.status = PartStatus::Packaging;
    part.destinations = job.destinations.iter().map(|d| DestinationProgress::pending(&d.host_alias)).collect();

    bus.publish(Event::PartStateChanged { job_id: job.id.clone(), part_id: part.id.clone(), status: "packaging".into(), percent: 0 });

    let list_path = format!("/tmp/{}.files", part.id);
    let list_contents = batch.files.iter().map(|f| f.rel_path.clone()).collect::<Vec<_>>().join("\n");
    let write_list_cmd =
        format!("cat > {} << 'CARGOHOLD_FILE_LIST_EOF'\n{}\nCARGOHOLD_FILE_LIST_EOF", list_path, list_contents);
    pool.exec(source_alias, &write_list_cmd).map_err(|e| OrchestratorError::PackageError(e.to_string()))?;

    let archive_path = format!("/tmp/{filename}");
    let zip_cmd = format!(
        "cd {} && zip -q {} -@ < {}",
        shell_quote(&job.source_folder),
        shell_quote(&archive_path),
        shell_quote(&list_path)
    );
    let zip_result = pool.exec(source_alias, &zip_cmd);
    pool.exec(source_alias, &format!("rm -f {}", shell_quote(&list_path))).ok();
    zip_result.map_err(|e| OrchestratorError::PackageError(e.to_string()))?;

    let stat_cmd = format!("stat -c %s {}", shell_quote(&archive_path));
    let stat_out = pool.exec(source_alias, &stat_cmd).map_err(|e| OrchestratorError::PackageError(e.to_string()))?;
    let size: u64 = stat_out
        .stdout
        .trim()
        .parse()
        .map_err(|_| OrchestratorError::PackageError(format!("could not stat archive: {archive_path}")))?;
    part.size = Some(size);

    part.status = PartStatus::Uploading;
    bus.publish(Event::PartStateChanged { job_id: job.id.clone(), part_id: part.id.clone(), status: "uploading".into(), percent: 0 });

    let boundary = if job.needs_split { 20 } else { 10 };
    let mut last_logged_boundary: u8 = 0;
    let mut throttler = Throttler::new();
    let job_id = job.id.clone();
    let part_id = part.id.clone();

    driver
        .upload_file(source_alias, &archive_path, store_remote, store_folder, &filename, |percent, speed| {
            let job_level_percent = (((batch_index as f64 + percent as f64 / 100.0) / total_parts.max(1) as f64)
                * 100.0)
                .floor() as u8;
            if throttler.allow(1) {
                bus.publish(Event::JobStepAdvanced {
                    job_id: job_id.clone(),
                    step: part_index,
                    total_steps: total_parts,
                    message: format!("{} uploading {filename}: {percent}% ({speed})", prefix::UPLOAD),
                });
            }
            let crossed = (percent / boundary) * boundary;
            if crossed > last_logged_boundary || (percent == 100 && last_logged_boundary < 100) {
                last_logged_boundary = crossed.max(last_logged_boundary);
                bus.log(
                    LogLevel::Info,
                    format!("{} {filename}: {percent}% at {speed} (job {job_level_percent}%)", prefix::UPLOAD),
                );
            }
            let _ = job_level_percent;
            let _ = part_id;
        })
        .map_err(|e| {
            bus.log(LogLevel::Error, format!("{} upload failed for {filename}: {e}", prefix::ERROR));
            e
        })?;

    part.store_path = Some(format!("{}/{}", store_folder.trim_end_matches('/'), filename));
    part.status = PartStatus::Uploaded;

    bus.publish(Event::PartUploaded {
        job_id: job.id.clone(),
        part_id: part.id.clone(),
        filename: filename.clone(),
        store_path: part.store_path.clone().unwrap_or_default(),
        size,
        destinations: part.destinations.iter().map(|d| d.host_alias.clone()).collect(),
    });
    bus.publish(Event::Log(LogRecord {
        level: LogLevel::Info,
        message: format!("{} {filename} uploaded ({size} bytes)", prefix::COMPLETE),
        job_id: Some(job.id.clone()),
        host_id: Some(source_alias.clone()),
        part_id: Some(part.id.clone()),
    }));

    if job.delete_local_after_upload {
        pool.exec(source_alias, &format!("rm -f {}", shell_quote(&archive_path))).ok();
        bus.log(LogLevel::Info, format!("{} removed local archive {filename}", prefix::CLEANUP));
    }

    Ok(part)
}
