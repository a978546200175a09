//! Job preparation and external trainer launch.
//!
//! The runtime store is an explicit context object for the transient
//! documents of the active job; nothing here relies on ambient global
//! state. One job runs at a time, launched from a worker thread that
//! blocks on the external process and reports the single
//! "training active" transition over a one-way channel.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::Context;
use log::{error, info, warn};
use toml::Value;

use crate::assemble::{config_doc_string, dataset_doc_string};
use crate::config::sections::ConfigSet;
use crate::config::truthy;
use crate::dataset::{inspect_dataset, total_steps};
use crate::error::ProcessError;
use crate::persist;
use crate::queue::JobQueue;
use crate::validate::{
    select_trainer_script, validate_args, validate_dataset_args, validate_existing_files,
    validate_restarts, validate_warmup_ratio, Mode, TrainerScript,
};

/// Directory holding the transient documents of the active job. Cleared
/// after every run except for the placeholder ignore-file.
#[derive(Debug, Clone)]
pub struct RuntimeStore {
    root: PathBuf,
}

impl RuntimeStore {
    pub const PLACEHOLDER: &'static str = ".gitignore";

    /// Open (creating if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let placeholder = root.join(Self::PLACEHOLDER);
        if !placeholder.exists() {
            fs::write(&placeholder, "*\n!.gitignore\n")?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.root.join("dataset.toml")
    }

    /// Path of a queued document saved under `name`.
    pub fn entry_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.toml"))
    }

    /// A fresh timestamped folder for dry-run output.
    pub fn preview_dir(&self) -> io::Result<PathBuf> {
        let stamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let dir = self.root.join(stamp.to_string());
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Delete the active job's documents, tolerating their absence.
    pub fn remove_job_files(&self) {
        for path in [self.config_path(), self.dataset_path()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!("could not remove {}: {err}", path.display()),
            }
        }
    }

    /// Empty the store except for the placeholder.
    pub fn clear(&self) -> io::Result<()> {
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy() == Self::PLACEHOLDER {
                continue;
            }
            let path = entry.path();
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            if let Err(err) = result {
                warn!("could not remove {}: {err}", path.display());
            }
        }
        Ok(())
    }
}

/// A validated job whose documents are on disk, ready to hand to the
/// external trainer.
#[derive(Debug)]
pub struct PreparedJob {
    pub script: TrainerScript,
    pub config_path: PathBuf,
    pub dataset_path: PathBuf,
}

/// Outcome of preparing a configuration set.
#[derive(Debug)]
pub enum Prepared {
    /// Ready to launch.
    Job(PreparedJob),
    /// Runtime-only: the documents were written for inspection, nothing
    /// will be launched.
    Preview(PathBuf),
}

/// Run the whole derivation pipeline over a configuration set and write
/// the trainer documents. Validation failures abort before anything is
/// written, so a failed job leaves no stale documents behind.
pub fn prepare_job(
    set: &ConfigSet,
    mode: Mode,
    store: &RuntimeStore,
) -> anyhow::Result<Prepared> {
    let (mut args, mut dataset_args) = set.collate();
    validate_args(&mut args, mode)?;
    validate_dataset_args(&mut dataset_args, mode)?;
    let script = select_trainer_script(&mut args);
    validate_restarts(&mut args);

    let subsets = inspect_dataset(&set.general.dataset_dir)?;
    // exactly one of the override and the derived count is active
    let steps = match set.general.max_steps {
        Some(steps) => steps,
        None => total_steps(&subsets, set.general.batch_size, set.general.num_epochs),
    };
    args.insert("max_train_steps".to_string(), Value::Integer(i64::from(steps)));
    validate_warmup_ratio(&mut args, steps)?;

    if mode == Mode::Full {
        validate_existing_files(&args)?;
        if args.remove("save_toml").map_or(false, |value| truthy(&value)) {
            auto_save(set, &mut args)?;
        }
    }

    let (config_path, dataset_path) = match mode {
        Mode::Full => (store.config_path(), store.dataset_path()),
        Mode::RuntimeOnly => {
            let dir = store.preview_dir()?;
            (dir.join("config.toml"), dir.join("dataset.toml"))
        }
    };
    fs::write(&config_path, config_doc_string(&args))
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    fs::write(&dataset_path, dataset_doc_string(&dataset_args, &subsets))
        .with_context(|| format!("failed to write {}", dataset_path.display()))?;

    match mode {
        Mode::Full => Ok(Prepared::Job(PreparedJob {
            script,
            config_path,
            dataset_path,
        })),
        Mode::RuntimeOnly => {
            let dir = config_path.parent().unwrap_or(store.root()).to_path_buf();
            info!("validated, wrote trainer documents to {}", dir.display());
            Ok(Prepared::Preview(dir))
        }
    }
}

/// Write the audit copy of the full configuration next to the run. The
/// target directory falls back to the output folder when the configured
/// one is missing; the file name comes from the output name, "last" by
/// default.
fn auto_save(set: &ConfigSet, args: &mut crate::config::ArgMap) -> anyhow::Result<()> {
    let location = args
        .remove("save_toml_location")
        .and_then(|value| value.as_str().map(PathBuf::from));
    let dir = match location {
        Some(dir) if dir.exists() => dir,
        _ => args
            .get("output_dir")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let name = args
        .get("output_name")
        .and_then(Value::as_str)
        .unwrap_or("last");
    let path = dir.join(format!("auto_save_{name}.toml"));
    persist::save_toml(&set.save(), &path)?;
    info!("saved audit copy to {}", path.display());
    Ok(())
}

/// Launches the external trainer. One job may be in flight at a time.
#[derive(Debug, Clone)]
pub struct Launcher {
    python: String,
    scripts_dir: PathBuf,
    active: Arc<AtomicBool>,
}

impl Launcher {
    pub fn new(python: impl Into<String>, scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
            scripts_dir: scripts_dir.into(),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn try_begin(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn finish(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Blocking trainer invocation; the caller is the worker thread.
    pub fn run_job(&self, job: &PreparedJob) -> Result<(), ProcessError> {
        let status = Command::new(&self.python)
            .arg(self.scripts_dir.join(job.script.file_name()))
            .arg(format!("--config_file={}", job.config_path.display()))
            .arg(format!("--dataset_config={}", job.dataset_path.display()))
            .status()
            .map_err(ProcessError::Spawn)?;
        if !status.success() {
            return Err(ProcessError::Failed { status });
        }
        Ok(())
    }

    /// Launch one prepared job on a worker thread. The `notify` channel
    /// sees `true` when training begins and `false` when it ends; a job
    /// already in flight makes this a no-op error.
    pub fn start(
        &self,
        job: PreparedJob,
        store: RuntimeStore,
        notify: Sender<bool>,
    ) -> Result<JoinHandle<()>, ProcessError> {
        if !self.try_begin() {
            return Err(ProcessError::AlreadyRunning);
        }
        let launcher = self.clone();
        let _ = notify.send(true);
        Ok(thread::spawn(move || {
            if let Err(err) = launcher.run_job(&job) {
                error!("failed to train because of error: {err}");
            }
            store.remove_job_files();
            launcher.finish();
            let _ = notify.send(false);
        }))
    }

    /// Work through the queue in order on the calling thread. A document
    /// that fails to load or validate is logged and skipped; a trainer
    /// process that dies is logged and the drain continues. The store is
    /// cleared afterwards, keeping only the placeholder.
    pub fn drain_queue(
        &self,
        queue: &mut JobQueue,
        mode: Mode,
        store: &RuntimeStore,
    ) -> io::Result<()> {
        while let Some(entry) = queue.pop_front() {
            let path = store.entry_path(&entry.name);
            let saved = match persist::load_toml(&path) {
                Ok(saved) => saved,
                Err(err) => {
                    warn!("could not load {}, skipping: {err}", entry.name);
                    continue;
                }
            };
            let set = ConfigSet::from_saved(&saved);
            let prepared = match prepare_job(&set, mode, store) {
                Ok(prepared) => prepared,
                Err(err) => {
                    warn!("some args are not valid, skipping {}: {err}", entry.name);
                    continue;
                }
            };
            if let Prepared::Job(job) = prepared {
                info!("validated, starting training...");
                if let Err(err) = self.run_job(&job) {
                    error!("failed to train because of error: {err}");
                }
                store.remove_job_files();
            }
        }
        store.clear()
    }

    /// Drain the queue from a worker thread, with the same in-flight
    /// guard and activity signal as a single job.
    pub fn start_queue(
        &self,
        mut queue: JobQueue,
        mode: Mode,
        store: RuntimeStore,
        notify: Sender<bool>,
    ) -> Result<JoinHandle<()>, ProcessError> {
        if !self.try_begin() {
            return Err(ProcessError::AlreadyRunning);
        }
        let launcher = self.clone();
        let _ = notify.send(true);
        Ok(thread::spawn(move || {
            if let Err(err) = launcher.drain_queue(&mut queue, mode, &store) {
                error!("queue drain failed: {err}");
            }
            launcher.finish();
            let _ = notify.send(false);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueEntry;
    use std::sync::mpsc;

    fn dataset_fixture(root: &Path) -> PathBuf {
        let data = root.join("data");
        fs::create_dir(&data).unwrap();
        let subset = data.join("2_thing");
        fs::create_dir(&subset).unwrap();
        fs::write(subset.join("a.png"), b"").unwrap();
        fs::write(subset.join("b.png"), b"").unwrap();
        data
    }

    fn full_fixture(root: &Path) -> ConfigSet {
        let mut set = ConfigSet::default();
        let model = root.join("base.safetensors");
        fs::write(&model, b"").unwrap();
        let out = root.join("out");
        fs::create_dir(&out).unwrap();
        set.general.base_model = model;
        set.general.dataset_dir = dataset_fixture(root);
        set.saving.output_dir = out;
        set
    }

    #[test]
    fn store_keeps_its_placeholder_through_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuntimeStore::new(dir.path().join("runtime_store")).unwrap();
        assert!(store.root().join(RuntimeStore::PLACEHOLDER).exists());

        fs::write(store.config_path(), "x").unwrap();
        fs::write(store.entry_path("queued"), "y").unwrap();
        fs::create_dir(store.root().join("12345")).unwrap();

        store.clear().unwrap();
        let left: Vec<_> = fs::read_dir(store.root())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(left, vec![RuntimeStore::PLACEHOLDER.to_string()]);
    }

    #[test]
    fn removing_job_files_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuntimeStore::new(dir.path().join("runtime_store")).unwrap();
        store.remove_job_files();
        fs::write(store.config_path(), "x").unwrap();
        store.remove_job_files();
        assert!(!store.config_path().exists());
    }

    #[test]
    fn runtime_only_writes_a_preview_and_never_launches() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuntimeStore::new(dir.path().join("runtime_store")).unwrap();
        let mut set = ConfigSet::default();
        set.general.dataset_dir = dataset_fixture(dir.path());
        set.general.num_epochs = 3;
        set.saving.auto_save = true;

        let prepared = prepare_job(&set, Mode::RuntimeOnly, &store).unwrap();
        let Prepared::Preview(preview) = prepared else {
            panic!("expected a preview");
        };
        let config: crate::config::ArgMap =
            toml::from_str(&fs::read_to_string(preview.join("config.toml")).unwrap()).unwrap();
        // 2 repeats * 2 images, batch 1, 3 epochs
        assert_eq!(
            config.get("max_train_steps").and_then(Value::as_integer),
            Some(12)
        );
        // the dry run must not leak form-only keys or trigger the audit save
        assert!(config.get("save_toml").is_none());
        assert!(config.get("sdxl").is_none());
        let dataset: toml::Value =
            toml::from_str(&fs::read_to_string(preview.join("dataset.toml")).unwrap()).unwrap();
        assert_eq!(
            dataset["datasets"][0]["subsets"][0]["num_repeats"].as_integer(),
            Some(2)
        );
    }

    #[test]
    fn full_mode_prepares_documents_and_audit_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuntimeStore::new(dir.path().join("runtime_store")).unwrap();
        let mut set = full_fixture(dir.path());
        set.saving.auto_save = true;

        let prepared = prepare_job(&set, Mode::Full, &store).unwrap();
        let Prepared::Job(job) = prepared else {
            panic!("expected a launchable job");
        };
        assert_eq!(job.script, TrainerScript::Network);
        assert!(job.config_path.exists());
        assert!(job.dataset_path.exists());
        // audit copy lands in the output folder under the default name
        assert!(set.saving.output_dir.join("auto_save_last.toml").exists());
    }

    #[test]
    fn sdxl_sets_pick_the_sdxl_entry_point() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuntimeStore::new(dir.path().join("runtime_store")).unwrap();
        let mut set = full_fixture(dir.path());
        set.general.sdxl = true;

        let Prepared::Job(job) = prepare_job(&set, Mode::Full, &store).unwrap() else {
            panic!("expected a launchable job");
        };
        assert_eq!(job.script, TrainerScript::SdxlNetwork);
    }

    #[test]
    fn validation_failure_leaves_no_documents() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuntimeStore::new(dir.path().join("runtime_store")).unwrap();
        let mut set = full_fixture(dir.path());
        set.general.color_aug = true;
        set.general.cache_latents = true;

        assert!(prepare_job(&set, Mode::Full, &store).is_err());
        assert!(!store.config_path().exists());
        assert!(!store.dataset_path().exists());
    }

    #[test]
    fn run_job_reports_abnormal_exits() {
        let dir = tempfile::tempdir().unwrap();
        let job = PreparedJob {
            script: TrainerScript::Network,
            config_path: dir.path().join("config.toml"),
            dataset_path: dir.path().join("dataset.toml"),
        };
        let ok = Launcher::new("true", dir.path());
        assert!(ok.run_job(&job).is_ok());

        let failing = Launcher::new("false", dir.path());
        assert!(matches!(
            failing.run_job(&job),
            Err(ProcessError::Failed { .. })
        ));

        let unspawnable = Launcher::new("loralaunch-no-such-binary", dir.path());
        assert!(matches!(
            unspawnable.run_job(&job),
            Err(ProcessError::Spawn(_))
        ));
    }

    #[test]
    fn start_signals_both_transitions_and_resets_the_guard() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuntimeStore::new(dir.path().join("runtime_store")).unwrap();
        let launcher = Launcher::new("true", dir.path());
        let job = PreparedJob {
            script: TrainerScript::Network,
            config_path: store.config_path(),
            dataset_path: store.dataset_path(),
        };
        let (tx, rx) = mpsc::channel();
        let handle = launcher.start(job, store, tx).unwrap();
        assert_eq!(rx.recv().unwrap(), true);
        assert_eq!(rx.recv().unwrap(), false);
        handle.join().unwrap();
        assert!(!launcher.is_active());
    }

    #[test]
    fn a_second_job_cannot_start_while_one_is_active() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuntimeStore::new(dir.path().join("runtime_store")).unwrap();
        let launcher = Launcher::new("true", dir.path());
        assert!(launcher.try_begin());

        let job = PreparedJob {
            script: TrainerScript::Network,
            config_path: store.config_path(),
            dataset_path: store.dataset_path(),
        };
        let (tx, _rx) = mpsc::channel();
        assert!(matches!(
            launcher.start(job, store, tx),
            Err(ProcessError::AlreadyRunning)
        ));
        launcher.finish();
    }

    #[test]
    fn queue_skips_broken_entries_and_clears_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuntimeStore::new(dir.path().join("runtime_store")).unwrap();

        // one unreadable entry, one valid runtime-only entry
        fs::write(store.entry_path("broken"), "not ==== toml").unwrap();
        let mut set = ConfigSet::default();
        set.general.dataset_dir = dataset_fixture(dir.path());
        persist::save_toml(&set.save(), &store.entry_path("good")).unwrap();

        let mut queue = JobQueue::new();
        queue.push(QueueEntry::new("broken"));
        queue.push(QueueEntry::new("good"));
        queue.push(QueueEntry::new("missing"));

        let launcher = Launcher::new("true", dir.path());
        launcher
            .drain_queue(&mut queue, Mode::RuntimeOnly, &store)
            .unwrap();
        assert!(queue.is_empty());

        let left: Vec<_> = fs::read_dir(store.root())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(left, vec![RuntimeStore::PLACEHOLDER.to_string()]);
    }
}
