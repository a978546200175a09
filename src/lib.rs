//! Configuration and launch layer for LoRA fine-tuning jobs.
//!
//! Collects training hyperparameters, reconciles them against the rules
//! the external trainer expects, and materializes them as either a CLI
//! argument vector or the `config.toml` / `dataset.toml` document pair
//! the trainer consumes. The training process itself is out of scope;
//! this crate owns everything up to the moment it is spawned.

pub mod assemble;
pub mod config;
pub mod dataset;
pub mod error;
pub mod launch;
pub mod paths;
pub mod persist;
pub mod queue;
pub mod validate;

// Re-export the common types
pub use config::sections::ConfigSet;
pub use config::simple::CliConfig;
pub use config::{ArgMap, SavedConfig, SectionBlock};
pub use dataset::{inspect_dataset, total_steps, DatasetSubset};
pub use error::{ParseError, PathError, ProcessError, ValidationError};
pub use launch::{Launcher, Prepared, PreparedJob, RuntimeStore};
pub use queue::{JobQueue, QueueEntry};
pub use validate::{Mode, TrainerScript};

pub mod logging {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    pub fn init_logger() {
        Builder::new()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{} [{}] - {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.args()
                )
            })
            .filter(None, LevelFilter::Info)
            .init();
    }
}
