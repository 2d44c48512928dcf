//! Orchestrator: drives one Job end to end. Spawns a dedicated Packager
//! thread and acts as the Dispatcher-driver itself, fanning each uploaded
//! part out across one thread per destination. This thread is the sole
//! writer of `Job`/`Part`/`DestinationProgress` state — workers only ever
//! own their own snapshots (§5: shared-state write discipline).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::dispatcher::{self, PartContext};
use crate::driver::ObjectStoreDriver;
use crate::event::{Event, EventBus, LogLevel, prefix};
use crate::job::{DestStatus, DestinationProgress, Job, JobStatus, Part, PartStatus};
use crate::packager;
use crate::planner;
use crate::pool::RemoteShell;
use crate::store_config::ArchiveStoreConfig;

/// Cooperative flags the Packager and Dispatcher-driver observe at chunk
/// boundaries: no new remote process starts while paused; cancellation is
/// best-effort and workers exit at the next checkpoint.
#[derive(Clone, Default)]
pub struct ControlFlags {
    pub paused: Arc<AtomicBool>,
    pub cancelled: Arc<AtomicBool>,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self::default()
    }

    fn wait_while_paused(&self) {
        while self.paused.load(Ordering::SeqCst) && !self.cancelled.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_secs(1));
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub struct RunInputs<'a> {
    pub pool: &'a dyn RemoteShell,
    pub stores: &'a HashMap<String, ArchiveStoreConfig>,
    pub object_store_tool_path: &'a str,
    pub local_conf_contents: &'a str,
    /// `None` means auto-size via [`crate::auto_concurrency`]; bounds how
    /// many destination threads run at once for a given part.
    pub concurrency: Option<usize>,
}

/// Runs `job` to completion on the calling thread, blocking until it
/// reaches a terminal state. Call this from a dedicated `std::thread` per
/// running job if the caller (e.g. the CLI) wants to keep its own thread free.
pub fn run_job(inputs: &RunInputs, job: &mut Job, bus: &EventBus, flags: &ControlFlags) {
    job.status = JobStatus::Running;
    job.touch();
    let _ = job.save();
    bus.publish(Event::JobStarted { job_id: job.id.clone(), name: job.name.clone() });

    let driver = ObjectStoreDriver::new(inputs.pool, inputs.object_store_tool_path);

    for (i, dest) in job.destinations.iter().enumerate() {
        bus.publish(Event::JobStepAdvanced {
            job_id: job.id.clone(),
            step: i as u32,
            total_steps: job.destinations.len() as u32,
            message: format!("{} preparing destination {}", prefix::STEP, dest.host_alias),
        });
        if let Err(e) = dispatcher::prepare_destination(&driver, dest, inputs.local_conf_contents) {
            bus.log(LogLevel::Error, format!("destination {} failed preparation: {e}", dest.host_alias));
        }
    }

    let files = match planner::enumerate_remote_files(inputs.pool, &job.source_host_alias, &job.source_folder) {
        Ok(f) => f,
        Err(e) => return fail_job(job, bus, &e.to_string()),
    };
    let batches = planner::first_fit_pack(files, job.part_size_bytes());
    if batches.is_empty() {
        return fail_job(job, bus, "planner produced no batches");
    }
    let total_size: u64 = batches.iter().map(|b| b.total_size).sum();
    job.needs_split = batches.len() > 1 || total_size > job.part_size_bytes();
    let total_parts = batches.len() as u32;

    let Some(store) = job.destinations.first().and_then(|d| inputs.stores.get(&d.store_config_name)).cloned() else {
        return fail_job(job, bus, "no store configuration for job destinations");
    };

    let (part_tx, part_rx): (Sender<Part>, Receiver<Part>) = bounded(1);
    let packager_flags = flags.clone();
    let packager_bus = bus.clone();
    let job_snapshot = job.clone();
    let pool = inputs.pool;
    let tool_path = inputs.object_store_tool_path;

    let packager_result = thread::scope(|scope| {
        let packager_handle = scope.spawn(move || -> Result<(), String> {
            let packager_driver = ObjectStoreDriver::new(pool, tool_path);
            for (i, batch) in batches.iter().enumerate() {
                packager_flags.wait_while_paused();
                if packager_flags.is_cancelled() {
                    break;
                }
                let part = packager::run_part(
                    pool,
                    &packager_driver,
                    &store.remote,
                    &store.folder,
                    &job_snapshot,
                    total_parts,
                    i,
                    batch,
                    &packager_bus,
                )
                .map_err(|e| e.to_string())?;
                if part_tx.send(part).is_err() {
                    break;
                }
            }
            Ok(())
        });

        run_dispatcher_loop(inputs, job, &part_rx, total_parts, bus, flags);

        packager_handle.join().unwrap_or_else(|_| Err("packager thread panicked".to_string()))
    });

    if flags.is_cancelled() {
        return fail_job(job, bus, "job was cancelled");
    }
    if let Err(e) = packager_result {
        return fail_job(job, bus, &e);
    }

    job.status = JobStatus::Completed;
    job.touch();
    let _ = job.save();
    bus.publish(Event::JobCompleted { job_id: job.id.clone() });
}

/// Consumes uploaded parts in order, fanning each one out across one thread
/// per destination, and appends the finished [`Part`] to `job.parts`. This
/// is the only code path that writes `job.parts`.
fn run_dispatcher_loop(
    inputs: &RunInputs,
    job: &mut Job,
    part_rx: &Receiver<Part>,
    total_parts: u32,
    bus: &EventBus,
    flags: &ControlFlags,
) {
    while let Ok(mut part) = part_rx.recv() {
        flags.wait_while_paused();
        if flags.is_cancelled() {
            break;
        }
        bus.publish(Event::Log(crate::event::LogRecord {
            level: LogLevel::Info,
            message: format!("{} dispatching {} to {} destination(s)", prefix::QUEUE, part.filename, job.destinations.len()),
            job_id: Some(job.id.clone()),
            host_id: None,
            part_id: Some(part.id.clone()),
        }));

        let ctx = PartContext {
            job_id: job.id.clone(),
            part_id: part.id.clone(),
            filename: part.filename.clone(),
            auto_extract: job.auto_extract,
            needs_split: job.needs_split,
            delete_from_store_after_all_dest_done: job.delete_from_store_after_all_dest_done,
        };

        dispatch_part_to_all_destinations(inputs, job, &ctx, &mut part, bus);
        part.status = if part.all_destinations_terminal() { PartStatus::Completed } else { PartStatus::Distributing };

        job.parts.push(part.clone());
        job.touch();
        let _ = job.save();

        if job.needs_split && job.auto_extract && job.parts.len() as u32 == total_parts && all_parts_staged(job) {
            for dest in &job.destinations {
                dispatcher::bulk_extract(inputs.pool, dest, &job.base_name, bus, &job.id);
            }
        }
    }
}

/// Re-runs a single already-failed `Part` of an otherwise-finished job: the
/// operator-requested retry (§7, scenario 6). Re-enumerates the source and
/// re-packs it into the same batches the original run used (the Job itself
/// only keeps the finished `Part`, not the file list that produced it), re-runs
/// the Packager for that one batch, then dispatches the fresh upload to every
/// destination exactly as `run_dispatcher_loop` would.
pub fn retry_part(inputs: &RunInputs, job: &mut Job, part_id: &str, bus: &EventBus, flags: &ControlFlags) -> Result<(), String> {
    let destinations = job.destinations.clone();
    let (part_index, retry_count) = {
        let part = job.part_mut(part_id).ok_or_else(|| format!("no part '{part_id}' in job '{}'", job.id))?;
        part.reset_for_retry(&destinations);
        (part.index, part.retry_count)
    };
    job.touch();
    let _ = job.save();
    bus.publish(Event::PartStateChanged { job_id: job.id.clone(), part_id: part_id.to_string(), status: "pending".into(), percent: 0 });

    if flags.is_cancelled() {
        return Err("job was cancelled".to_string());
    }

    let files = planner::enumerate_remote_files(inputs.pool, &job.source_host_alias, &job.source_folder).map_err(|e| e.to_string())?;
    let batches = planner::first_fit_pack(files, job.part_size_bytes());
    let batch_index = part_index as usize - 1;
    let batch = batches
        .get(batch_index)
        .ok_or_else(|| format!("source layout no longer produces a batch at index {part_index}; re-run 'job run' instead"))?;

    let Some(store) = job.destinations.first().and_then(|d| inputs.stores.get(&d.store_config_name)).cloned() else {
        return Err("no store configuration for job destinations".to_string());
    };

    let driver = ObjectStoreDriver::new(inputs.pool, inputs.object_store_tool_path);
    let job_snapshot = job.clone();
    let total_parts = batches.len().max(job.parts.len()) as u32;
    let mut part = packager::run_part(inputs.pool, &driver, &store.remote, &store.folder, &job_snapshot, total_parts, batch_index, batch, bus)
        .map_err(|e| e.to_string())?;
    part.retry_count = retry_count;

    let ctx = PartContext {
        job_id: job.id.clone(),
        part_id: part.id.clone(),
        filename: part.filename.clone(),
        auto_extract: job.auto_extract,
        needs_split: job.needs_split,
        delete_from_store_after_all_dest_done: job.delete_from_store_after_all_dest_done,
    };
    dispatch_part_to_all_destinations(inputs, job, &ctx, &mut part, bus);
    part.status = if part.all_destinations_terminal() { PartStatus::Completed } else { PartStatus::Distributing };

    if let Some(slot) = job.part_mut(part_id) {
        *slot = part;
    }
    job.touch();
    let _ = job.save();
    Ok(())
}

fn all_parts_staged(job: &Job) -> bool {
    job.parts.iter().all(|p| {
        p.destinations.iter().all(|d| matches!(d.status, DestStatus::Staging | DestStatus::Completed | DestStatus::Failed))
    })
}

fn dispatch_part_to_all_destinations(inputs: &RunInputs, job: &Job, ctx: &PartContext, part: &mut Part, bus: &EventBus) {
    let pool = inputs.pool;
    let tool_path = inputs.object_store_tool_path;
    let stores = inputs.stores;

    let total_bytes = part.size.unwrap_or(0);
    let batch_size = dispatcher::destination_concurrency(inputs.concurrency, job.destinations.len(), 1, total_bytes).max(1);

    for chunk in job.destinations.chunks(batch_size) {
        thread::scope(|scope| {
            let handles: Vec<_> = chunk
                .iter()
                .filter_map(|dest| {
                    let store = stores.get(&dest.store_config_name)?.clone();
                    let mut progress = part
                        .destination_mut(&dest.host_alias)
                        .map(|p| p.clone())
                        .unwrap_or_else(|| DestinationProgress::pending(&dest.host_alias));
                    let driver = ObjectStoreDriver::new(pool, tool_path);
                    let ctx = ctx.clone();
                    Some((
                        dest.host_alias.clone(),
                        scope.spawn(move || {
                            dispatcher::run_part_for_destination(pool, &driver, &ctx, dest, &store, &mut progress, bus);
                            progress
                        }),
                    ))
                })
                .collect();

            for (alias, handle) in handles {
                if let Ok(updated) = handle.join() {
                    if let Some(slot) = part.destination_mut(&alias) {
                        *slot = updated;
                    }
                }
            }
        });
    }
}

fn fail_job(job: &mut Job, bus: &EventBus, message: &str) {
    job.status = JobStatus::Failed;
    job.touch();
    let _ = job.save();
    bus.publish(Event::JobFailed { job_id: job.id.clone(), error: message.to_string() });
}
