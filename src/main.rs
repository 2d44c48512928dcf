use anyhow::Result;
use clap::Parser;
use std::fs::OpenOptions;
use tracing_appender::non_blocking;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use cargohold::cli::{Cli, Commands};
use cargohold::commands;
use cargohold::config::Config;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::init()?;
    cargohold::util::set_backoff_ms(config.retry_backoff_base_ms);
    init_tracing_if_requested(cli.debug);

    match cli.command {
        Commands::Host { action } => commands::handle_host(&config, action),
        Commands::Store { action } => commands::handle_store(&config, action),
        Commands::Job { action } => commands::handle_job(&config, action),
    }
}

fn init_tracing_if_requested(debug: bool) {
    // Mirrors the teacher's own canonical-log-dir-under-the-app-dir approach,
    // just rooted at `~/.cargohold` instead of `~/.hostpilot`.
    let logs_dir = match cargohold::storage::app_dir() {
        Ok(dir) => dir.join("logs"),
        Err(_) => {
            let home = dirs::home_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
            home.join(".cargohold").join("logs")
        }
    };
    let _ = std::fs::create_dir_all(&logs_dir);

    let log_path = logs_dir.join("debug.log");
    let level_str = if debug { "debug" } else { "warn" };

    match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => {
            let (non_blocking_writer, guard) = non_blocking(file);
            // Leaked so the background writer thread stays alive for the process lifetime.
            let _ = Box::leak(Box::new(guard));
            let file_layer =
                fmt::layer().with_writer(non_blocking_writer).with_ansi(false).with_filter(EnvFilter::new(level_str));
            tracing_subscriber::registry().with(file_layer).init();
        }
        Err(e) => {
            eprintln!("warning: could not open debug log at {}: {}", log_path.display(), e);
        }
    }
}
