//! Command-line LoRA training launcher.
//!
//! Builds the full derived argument vector from the stock configuration
//! (optionally restored from a saved json) and forwards it to the
//! external trainer entry point. Any path or validation failure exits
//! with code 1; otherwise the trainer's own exit code is passed through.

use std::path::PathBuf;
use std::process::{self, Command};

use clap::Parser;
use log::info;

use loralaunch::assemble::build_arg_list;
use loralaunch::persist;
use loralaunch::CliConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Build and launch a LoRA training run")]
struct Args {
    /// Base model checkpoint (.ckpt or .safetensors)
    #[arg(long = "base_model")]
    base_model: PathBuf,

    /// Dataset root holding <repeats>_<label> subfolders
    #[arg(long = "img_folder")]
    img_folder: PathBuf,

    /// Folder the trained files are written to
    #[arg(long = "output_folder")]
    output_folder: PathBuf,

    /// Folder to save a configuration json file to
    #[arg(long = "save_json_path")]
    save_json_path: Option<PathBuf>,

    /// Json file to configure things from
    #[arg(long = "load_json_path")]
    load_json_path: Option<PathBuf>,

    /// Folder holding the external trainer scripts
    #[arg(long = "scripts_dir", default_value = "sd_scripts")]
    scripts_dir: PathBuf,

    /// Python interpreter used to run the trainer
    #[arg(long, default_value = "python")]
    python: String,
}

fn main() {
    loralaunch::logging::init_logger();
    let cli = Args::parse();

    let mut cfg = CliConfig {
        base_model: cli.base_model,
        img_folder: cli.img_folder,
        output_folder: cli.output_folder,
        ..CliConfig::default()
    };

    if let Some(path) = &cli.load_json_path {
        if let Err(err) = persist::load_json(path, &mut cfg, persist::prompt_resolver) {
            eprintln!("{err:#}");
            process::exit(1);
        }
    }
    if let Some(dir) = &cli.save_json_path {
        if let Err(err) = persist::save_json(&cfg, dir) {
            eprintln!("{err:#}");
            process::exit(1);
        }
    }

    let trainer_args = match build_arg_list(&cfg) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}");
            process::exit(1);
        }
    };

    let script = cli.scripts_dir.join("train_network.py");
    info!("launching {} with {} args", script.display(), trainer_args.len());
    let status = Command::new(&cli.python).arg(&script).args(&trainer_args).status();
    match status {
        Ok(status) => process::exit(status.code().unwrap_or(1)),
        Err(err) => {
            eprintln!("failed to spawn the trainer process: {err}");
            process::exit(1);
        }
    }
}
