//! Command-line surface: Host/ArchiveStoreConfig CRUD plus Job lifecycle.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "cargohold", version, about = "Bulk folder transfer orchestrator between remote hosts via an intermediate object store.")]
pub struct Cli {
    /// Raise the file logger from `warn` to `debug`.
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Host catalog CRUD.
    Host {
        #[command(subcommand)]
        action: HostAction,
    },
    /// Object-store remote/folder binding CRUD.
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
    /// Job lifecycle: run, list, retry a failed part.
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum HostAction {
    Add {
        alias: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        address: String,
        #[arg(long, default_value_t = 22)]
        port: u16,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        key_path: Option<String>,
    },
    Rm {
        alias: String,
    },
    Rename {
        alias: String,
        new_alias: String,
    },
    Ls,
}

#[derive(Subcommand, Debug)]
pub enum StoreAction {
    Add {
        name: String,
        #[arg(long)]
        remote: String,
        #[arg(long)]
        folder: String,
    },
    Rm {
        name: String,
    },
    Ls,
}

#[derive(Subcommand, Debug)]
pub enum JobAction {
    Run {
        #[arg(long)]
        name: String,
        /// `<alias>:<path>`
        #[arg(long)]
        source: String,
        /// `<alias>:<path>`, comma-separated for multiple destinations.
        #[arg(long, value_delimiter = ',')]
        dest: Vec<String>,
        #[arg(long)]
        store: String,
        #[arg(long)]
        part_size_mib: Option<u64>,
        #[arg(long)]
        auto_extract: bool,
        #[arg(long)]
        delete_local: bool,
        #[arg(long)]
        delete_store: bool,
        /// Numeric worker count, or `auto` (the default).
        #[arg(long)]
        concurrency: Option<String>,
    },
    Ls,
    Retry {
        job_id: String,
        part_id: String,
    },
}
