//! Saving and loading configuration documents.
//!
//! Two shapes exist: the nested section-based document the full
//! configuration set round-trips through, and the flat json the CLI path
//! persists. Loading the flat shape reconciles differences against the
//! in-memory values field by field through a pluggable resolver, so the
//! interactive prompt can be swapped out in tests and headless runs.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::info;

use crate::config::simple::{CliConfig, SimpleConfig, REQUIRED_KEYS};
use crate::config::SavedConfig;
use crate::error::ParseError;
use crate::paths::{ensure_path, PathKind, JSON_EXTENSIONS};

/// Write the nested section document.
pub fn save_toml(config: &SavedConfig, path: &Path) -> Result<(), ParseError> {
    let text = toml::to_string_pretty(config)?;
    fs::write(path, text)?;
    Ok(())
}

/// Read a nested section document back. Absent sections or fields are
/// tolerated; the caller's defaults fill the gaps.
pub fn load_toml(path: &Path) -> Result<SavedConfig, ParseError> {
    let text = fs::read_to_string(path)?;
    Ok(toml::from_str(&text)?)
}

/// Persist the full CLI configuration as a timestamped json file inside
/// `dir`, returning the path written.
pub fn save_json(cfg: &CliConfig, dir: &Path) -> anyhow::Result<PathBuf> {
    ensure_path(dir, "save_json_path", PathKind::Directory)?;
    let path = dir.join(format!("config-{}.json", chrono::Utc::now().timestamp()));
    fs::write(&path, serde_json::to_string_pretty(cfg)?)?;
    info!("saved config to {}", path.display());
    Ok(path)
}

/// How a single loaded-vs-current difference gets settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    UseNew,
    KeepOld,
    /// Replace both with a literal value. Only offered for integer
    /// fields; a boolean has no third value to offer.
    Override(i64),
}

/// Load the flat json shape into a CLI configuration.
///
/// All of [`REQUIRED_KEYS`] must be present or nothing is applied. The
/// scalar tuning fields apply unconditionally; the fields that commonly
/// drift between machines go through `resolve` whenever the loaded value
/// disagrees with the current one.
pub fn load_json<R>(path: &Path, cfg: &mut CliConfig, mut resolve: R) -> anyhow::Result<()>
where
    R: FnMut(&str, &str, &str, bool) -> Resolution,
{
    ensure_path(path, "load_json_path", PathKind::File(JSON_EXTENSIONS))?;
    let text = fs::read_to_string(path).map_err(ParseError::from)?;
    let document: serde_json::Value = serde_json::from_str(&text).map_err(ParseError::from)?;
    for key in REQUIRED_KEYS {
        if document.get(key).is_none() {
            return Err(ParseError::MissingKey(key).into());
        }
    }
    let loaded: SimpleConfig = serde_json::from_value(document).map_err(ParseError::from)?;
    info!("json loaded, setting variables...");

    cfg.net_dim = loaded.net_dim;
    cfg.scheduler = loaded.scheduler;
    cfg.warmup_lr_ratio = loaded.warmup_lr_ratio;
    cfg.learning_rate = loaded.learning_rate;
    cfg.text_encoder_lr = loaded.text_encoder_lr;
    cfg.unet_lr = loaded.unet_lr;
    cfg.clip_skip = loaded.clip_skip;

    reconcile_u32(
        &mut cfg.train_resolution,
        loaded.train_resolution,
        "train_resolution",
        &mut resolve,
    );
    reconcile_u32(
        &mut cfg.min_bucket_resolution,
        loaded.min_bucket_resolution,
        "min_bucket_resolution",
        &mut resolve,
    );
    reconcile_u32(
        &mut cfg.max_bucket_resolution,
        loaded.max_bucket_resolution,
        "max_bucket_resolution",
        &mut resolve,
    );
    reconcile_u32(&mut cfg.batch_size, loaded.batch_size, "batch_size", &mut resolve);
    reconcile_u32(&mut cfg.num_epochs, loaded.num_epochs, "num_epochs", &mut resolve);
    reconcile_bool(
        &mut cfg.shuffle_captions,
        loaded.shuffle_captions,
        "shuffle_captions",
        &mut resolve,
    );
    reconcile_opt_u32(&mut cfg.keep_tokens, loaded.keep_tokens, "keep_tokens", &mut resolve);

    info!("completed changing variables");
    Ok(())
}

fn reconcile_u32<R>(current: &mut u32, new: u32, field: &str, resolve: &mut R)
where
    R: FnMut(&str, &str, &str, bool) -> Resolution,
{
    if *current == new {
        return;
    }
    match resolve(field, &current.to_string(), &new.to_string(), true) {
        Resolution::UseNew => *current = new,
        Resolution::KeepOld => {}
        Resolution::Override(value) => *current = value.max(0) as u32,
    }
}

fn reconcile_opt_u32<R>(current: &mut Option<u32>, new: Option<u32>, field: &str, resolve: &mut R)
where
    R: FnMut(&str, &str, &str, bool) -> Resolution,
{
    if *current == new {
        return;
    }
    let old_text = display_opt(*current);
    let new_text = display_opt(new);
    match resolve(field, &old_text, &new_text, true) {
        Resolution::UseNew => *current = new,
        Resolution::KeepOld => {}
        Resolution::Override(value) => *current = Some(value.max(0) as u32),
    }
}

fn reconcile_bool<R>(current: &mut bool, new: bool, field: &str, resolve: &mut R)
where
    R: FnMut(&str, &str, &str, bool) -> Resolution,
{
    if *current == new {
        return;
    }
    // no literal override within a boolean domain
    match resolve(field, &current.to_string(), &new.to_string(), false) {
        Resolution::UseNew => *current = new,
        Resolution::KeepOld | Resolution::Override(_) => {}
    }
}

fn display_opt(value: Option<u32>) -> String {
    match value {
        Some(number) => number.to_string(),
        None => "none".to_string(),
    }
}

/// The interactive resolver: asks on stdin, y/n, or an integer to
/// overwrite both when the field allows it.
pub fn prompt_resolver(field: &str, old: &str, new: &str, allow_override: bool) -> Resolution {
    let hint = if allow_override {
        "answer y/n or an integer to overwrite both: "
    } else {
        "answer y/n: "
    };
    loop {
        print!(
            "{field} is different, old: {old} -> new: {new}\n\
             would you like to use the new value?\n{hint}"
        );
        let _ = io::stdout().flush();
        let mut line = String::new();
        if io::stdin().read_line(&mut line).is_err() || line.is_empty() {
            return Resolution::KeepOld;
        }
        let answer = line.trim();
        if allow_override {
            if let Ok(value) = answer.parse::<i64>() {
                return Resolution::Override(value);
            }
        }
        match answer {
            "y" | "Y" => return Resolution::UseNew,
            "n" | "N" => return Resolution::KeepOld,
            _ => continue,
        }
    }
}
