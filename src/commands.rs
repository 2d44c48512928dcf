//! CLI command handlers: thin glue between `cli::Commands` and the
//! host/store/job data types and the orchestrator.

use anyhow::{Context, Result, bail};
use indicatif::ProgressStyle;

use crate::cli::{HostAction, JobAction, StoreAction};
use crate::config::Config;
use crate::credentials;
use crate::error::{DestError, OrchestratorError};
use crate::event::Event;
use crate::host::{AuthMaterial, Host, HostCollection};
use crate::job::{DestinationSpec, Job};
use crate::orchestrator::{self, ControlFlags, RunInputs};
use crate::pool::ConnectionPool;
use crate::store_config::{ArchiveStoreConfig, StoreConfigCollection};

fn store_collection_path(_config: &Config) -> Result<std::path::PathBuf> {
    Ok(crate::storage::app_dir()?.join("stores.json"))
}

/// Loads the host registry and dials the source host plus every destination
/// host for `job` before a run (or resume) starts. A source connect failure
/// aborts the whole command — there's nothing to package without it. A
/// destination connect failure is only logged; that destination is left to
/// fail naturally during dispatch (`DestError`'s "not connected" path),
/// preserving per-destination isolation.
fn connect_job_hosts(config: &Config, pool: &ConnectionPool, job: &Job) -> Result<()> {
    let db_path = config.servers_db_path()?;
    let hosts = HostCollection::read_from_storage(&db_path)?;
    let adapter = credentials::default_adapter();

    let source = hosts
        .get(&job.source_host_alias)
        .with_context(|| format!("no host '{}'", job.source_host_alias))?;
    pool.acquire(source, adapter.as_ref())
        .map_err(|e| anyhow::anyhow!(OrchestratorError::ConnectError(e.to_string()).to_string()))?;

    for dest in &job.destinations {
        let Some(host) = hosts.get(&dest.host_alias) else {
            bail!("no host '{}'", dest.host_alias);
        };
        if let Err(e) = pool.acquire(host, adapter.as_ref()) {
            let err = DestError::ConnectError(e.to_string());
            eprintln!("warning: {err}");
        }
    }
    Ok(())
}

pub fn handle_host(config: &Config, action: HostAction) -> Result<()> {
    let db_path = config.servers_db_path()?;
    let adapter = credentials::default_adapter();
    match action {
        HostAction::Add { alias, username, address, port, password, key_path } => {
            let mut collection = HostCollection::read_from_storage(&db_path)?;
            let auth = match (password, key_path) {
                (Some(p), None) => AuthMaterial::with_password(adapter.as_ref(), &alias, &p)?,
                (None, Some(k)) => AuthMaterial::with_key(adapter.as_ref(), &alias, k, None)?,
                _ => bail!("pass exactly one of --password or --key-path"),
            };
            let host = Host { id: None, alias: Some(alias.clone()), username, address, port, auth, last_connect: None };
            collection.insert(&alias, host);
            collection.save_to_storage(&db_path)?;
            println!("host '{alias}' added");
            Ok(())
        }
        HostAction::Rm { alias } => {
            let mut collection = HostCollection::read_from_storage(&db_path)?;
            collection.remove(&alias);
            collection.save_to_storage(&db_path)?;
            println!("host '{alias}' removed");
            Ok(())
        }
        HostAction::Rename { alias, new_alias } => {
            let mut collection = HostCollection::read_from_storage(&db_path)?;
            let mut host = collection.get(&alias).cloned().with_context(|| format!("no host '{alias}'"))?;
            host.alias = Some(new_alias.clone());
            collection.remove(&alias);
            collection.insert(&new_alias, host);
            collection.save_to_storage(&db_path)?;
            println!("host '{alias}' renamed to '{new_alias}'");
            Ok(())
        }
        HostAction::Ls => {
            let collection = HostCollection::read_from_storage(&db_path)?;
            collection.show_table();
            Ok(())
        }
    }
}

pub fn handle_store(config: &Config, action: StoreAction) -> Result<()> {
    let path = store_collection_path(config)?;
    match action {
        StoreAction::Add { name, remote, folder } => {
            let mut collection = StoreConfigCollection::read_from_storage(&path);
            collection.insert(ArchiveStoreConfig { name: name.clone(), remote, folder });
            collection.save_to_storage(&path);
            println!("store '{name}' added");
            Ok(())
        }
        StoreAction::Rm { name } => {
            let mut collection = StoreConfigCollection::read_from_storage(&path);
            collection.remove(&name);
            collection.save_to_storage(&path);
            println!("store '{name}' removed");
            Ok(())
        }
        StoreAction::Ls => {
            let collection = StoreConfigCollection::read_from_storage(&path);
            for (name, store) in collection.stores() {
                println!("{name}: {}:{}", store.remote, store.folder);
            }
            Ok(())
        }
    }
}

fn split_alias_path(spec: &str) -> Result<(String, String)> {
    let (alias, path) = spec.split_once(':').with_context(|| format!("expected <alias>:<path>, got '{spec}'"))?;
    Ok((alias.to_string(), path.to_string()))
}

pub fn handle_job(config: &Config, action: JobAction) -> Result<()> {
    match action {
        JobAction::Run { name, source, dest, store, part_size_mib, auto_extract, delete_local, delete_store, concurrency } => {
            run_job_command(config, name, source, dest, store, part_size_mib, auto_extract, delete_local, delete_store, concurrency)
        }
        JobAction::Ls => {
            for id in Job::list_ids()? {
                match Job::load(&id) {
                    Ok(job) => println!("{id}  {:?}  {} part(s)  {}", job.status, job.parts.len(), job.name),
                    Err(e) => eprintln!("warning: could not load job '{id}': {e}"),
                }
            }
            Ok(())
        }
        JobAction::Retry { job_id, part_id } => retry_job_part_command(config, job_id, part_id),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_job_command(
    config: &Config,
    name: String,
    source: String,
    dest: Vec<String>,
    store_name: String,
    part_size_mib: Option<u64>,
    auto_extract: bool,
    delete_local: bool,
    delete_store: bool,
    concurrency: Option<String>,
) -> Result<()> {
    let concurrency = match concurrency.as_deref() {
        None | Some("auto") => None,
        Some(c) => Some(c.parse::<usize>().context("--concurrency must be a number or 'auto'")?),
    };

    let (source_alias, source_folder) = split_alias_path(&source)?;
    if dest.is_empty() {
        bail!("at least one --dest is required");
    }
    let mut destinations = Vec::with_capacity(dest.len());
    for spec in &dest {
        let (alias, folder) = split_alias_path(spec)?;
        destinations.push(DestinationSpec { host_alias: alias, folder, store_config_name: store_name.clone() });
    }

    let store_path = store_collection_path(config)?;
    let stores_collection = StoreConfigCollection::read_from_storage(&store_path);
    let store = stores_collection.get(&store_name).with_context(|| format!("no store '{store_name}'"))?.clone();
    let mut stores = std::collections::HashMap::new();
    stores.insert(store_name.clone(), store);

    let job_id = format!("job-{}", chrono::Local::now().timestamp_millis());
    let mut job = Job::new(
        job_id,
        name,
        source_alias,
        source_folder,
        destinations,
        part_size_mib.unwrap_or(config.default_part_size_mib),
        delete_local,
        delete_store,
        auto_extract,
    )?;

    let pool = ConnectionPool::new();
    connect_job_hosts(config, &pool, &job)?;
    let bus = crate::event::EventBus::new();
    let flags = ControlFlags::new();
    let tool_path = config.object_store_cli_path.to_string_lossy().to_string();
    let local_conf_contents = std::fs::read_to_string(
        dirs::home_dir().unwrap_or_default().join(".config").join(&tool_path).join(format!("{tool_path}.conf")),
    )
    .unwrap_or_default();

    let inputs =
        RunInputs { pool: &pool, stores: &stores, object_store_tool_path: &tool_path, local_conf_contents: &local_conf_contents, concurrency };

    let rx = bus.subscribe();
    let progress_style = ProgressStyle::with_template("{msg}").expect("valid progress template");
    let (_mp, total_pb, header) = crate::util::init_progress_and_mp(true, 100, &progress_style);
    header.set_message(format!("job '{}' starting", job.name));

    std::thread::scope(|scope| {
        scope.spawn(|| orchestrator::run_job(&inputs, &mut job, &bus, &flags));
        while let Ok(event) = rx.recv() {
            match event {
                Event::JobStepAdvanced { message, .. } => header.set_message(message),
                Event::PartUploaded { filename, .. } => total_pb.inc(1),
                Event::Log(rec) => println!("{}", rec.message),
                Event::JobCompleted { .. } => {
                    header.finish_with_message("job completed");
                    break;
                }
                Event::JobFailed { error, .. } => {
                    header.finish_with_message(format!("job failed: {error}"));
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(())
}

/// Resumes a single failed `Part`: connects the job's hosts, re-packages and
/// re-dispatches that one part via [`orchestrator::retry_part`], printing
/// progress the same way `job run` does.
fn retry_job_part_command(config: &Config, job_id: String, part_id: String) -> Result<()> {
    let mut job = Job::load(&job_id)?;

    let store_path = store_collection_path(config)?;
    let stores_collection = StoreConfigCollection::read_from_storage(&store_path);
    let mut stores = std::collections::HashMap::new();
    for dest in &job.destinations {
        if stores.contains_key(&dest.store_config_name) {
            continue;
        }
        let store = stores_collection
            .get(&dest.store_config_name)
            .with_context(|| format!("no store '{}'", dest.store_config_name))?
            .clone();
        stores.insert(dest.store_config_name.clone(), store);
    }

    let pool = ConnectionPool::new();
    connect_job_hosts(config, &pool, &job)?;
    let bus = crate::event::EventBus::new();
    let flags = ControlFlags::new();
    let tool_path = config.object_store_cli_path.to_string_lossy().to_string();
    let local_conf_contents = std::fs::read_to_string(
        dirs::home_dir().unwrap_or_default().join(".config").join(&tool_path).join(format!("{tool_path}.conf")),
    )
    .unwrap_or_default();

    let inputs =
        RunInputs { pool: &pool, stores: &stores, object_store_tool_path: &tool_path, local_conf_contents: &local_conf_contents, concurrency: None };

    let rx = bus.subscribe();
    let progress_style = ProgressStyle::with_template("{msg}").expect("valid progress template");
    let (_mp, total_pb, header) = crate::util::init_progress_and_mp(true, 100, &progress_style);
    header.set_message(format!("retrying part '{part_id}' of job '{job_id}'"));

    // No JobCompleted/JobFailed terminal event exists for a single-part retry
    // (that's a whole-job concept), so this runs to completion on this thread
    // and drains whatever progress it published afterward, rather than
    // blocking on `rx.recv()` for an event that will never come.
    let result = orchestrator::retry_part(&inputs, &mut job, &part_id, &bus, &flags);
    while let Ok(event) = rx.try_recv() {
        match event {
            Event::JobStepAdvanced { message, .. } => header.set_message(message),
            Event::PartUploaded { filename, .. } => total_pb.inc(1),
            Event::Log(rec) => println!("{}", rec.message),
            _ => {}
        }
    }

    match result {
        Ok(()) => {
            header.finish_with_message(format!("part '{part_id}' retried"));
            println!("part '{part_id}' of job '{job_id}' retried");
            Ok(())
        }
        Err(e) => {
            header.finish_with_message(format!("retry failed: {e}"));
            bail!("retry of part '{part_id}' failed: {e}")
        }
    }
}
