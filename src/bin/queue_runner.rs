//! Sequential queue runner.
//!
//! Takes the names of configuration documents saved in the runtime
//! store and drains them one after another through the launcher. Items
//! that fail validation are skipped; a trainer that dies does not stop
//! the rest of the queue.

use std::path::PathBuf;
use std::sync::mpsc;

use anyhow::Result;
use clap::Parser;
use log::info;

use loralaunch::{JobQueue, Launcher, Mode, QueueEntry, RuntimeStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run queued LoRA training configurations in order")]
struct Args {
    /// Names of saved documents in the runtime store, without .toml
    #[arg(required = true)]
    names: Vec<String>,

    /// Runtime store folder holding the queued documents
    #[arg(long, default_value = "runtime_store")]
    store: PathBuf,

    /// Validate and write the trainer documents without launching
    #[arg(long = "runtime_only")]
    runtime_only: bool,

    /// Folder holding the external trainer scripts
    #[arg(long = "scripts_dir", default_value = "sd_scripts")]
    scripts_dir: PathBuf,

    /// Python interpreter used to run the trainer
    #[arg(long, default_value = "python")]
    python: String,
}

fn main() -> Result<()> {
    loralaunch::logging::init_logger();
    let cli = Args::parse();

    let store = RuntimeStore::new(&cli.store)?;
    let mut queue = JobQueue::new();
    for name in cli.names {
        queue.push(QueueEntry::new(name));
    }
    let mode = if cli.runtime_only {
        Mode::RuntimeOnly
    } else {
        Mode::Full
    };

    let launcher = Launcher::new(cli.python, cli.scripts_dir);
    let (notify, transitions) = mpsc::channel();
    let worker = launcher.start_queue(queue, mode, store, notify)?;
    for active in transitions {
        info!("training active: {active}");
    }
    if worker.join().is_err() {
        anyhow::bail!("queue worker panicked");
    }
    Ok(())
}
