//! The option reconciler.
//!
//! Applies the cross-field rules the external trainer expects before any
//! document is written: numeric coercion, enable-flag gating, conflicting
//! flags, scheduler-specific options, warmup derivation and path checks.
//! Expected domain violations come back as [`ValidationError`]; nothing
//! here panics on operator input.

use std::path::Path;

use toml::Value;

use crate::config::{as_f64, coerce_to_number, truthy, ArgMap};
use crate::error::ValidationError;
use crate::paths::{ensure_path, PathKind, MODEL_EXTENSIONS, RESUME_EXTENSIONS};

/// Validation depth. `RuntimeOnly` skips filesystem existence checks and
/// destructive side effects such as the audit auto-save, for dry runs
/// and headless pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Full,
    RuntimeOnly,
}

/// Learning-rate fields arrive as raw form text.
const LR_KEYS: &[&str] = &["learning_rate", "unet_lr", "text_encoder_lr"];

/// Secondary fields honored only while their companion flag is on. The
/// flags themselves are never trainer options and are always stripped.
const ENABLE_PAIRS: &[(&str, &str)] = &[
    ("unet_lr", "unet_lr_enabled"),
    ("text_encoder_lr", "text_encoder_lr_enabled"),
    ("warmup_ratio", "warmup_enabled"),
    ("min_snr_gamma", "min_snr_enabled"),
    ("scale_weight_norms", "scale_weight_enabled"),
];

/// Numeric options where zero means unset.
const PRUNE_IF_ZERO: &[&str] = &[
    "learning_rate",
    "unet_lr",
    "text_encoder_lr",
    "warmup_ratio",
    "keep_tokens",
    "gradient_accumulation_steps",
    "min_snr_gamma",
    "scale_weight_norms",
];

/// Which external entry point a validated configuration belongs to.
/// Selected from the model-type flag, returned alongside the config and
/// never embedded in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerScript {
    Network,
    SdxlNetwork,
}

impl TrainerScript {
    pub fn file_name(self) -> &'static str {
        match self {
            TrainerScript::Network => "train_network.py",
            TrainerScript::SdxlNetwork => "sdxl_train_network.py",
        }
    }
}

/// Normalize a raw training-argument map. Rules are applied in order and
/// each is skipped when its preconditions don't hold.
pub fn validate_args(args: &mut ArgMap, mode: Mode) -> Result<(), ValidationError> {
    for key in LR_KEYS {
        coerce_to_number(args, key);
    }

    if is_on(args, "color_aug") && is_on(args, "cache_latents") {
        return Err(ValidationError::Conflict {
            first: "color_aug",
            second: "cache_latents",
        });
    }

    apply_enable_flags(args);

    if !is_on(args, "gradient_checkpointing") {
        args.remove("gradient_accumulation_steps");
    }

    if mode == Mode::RuntimeOnly {
        // no side effects in a dry run
        args.remove("save_toml");
        args.remove("save_toml_location");
    }

    prune_unset(args);
    Ok(())
}

/// Normalize the dataset-general argument map.
pub fn validate_dataset_args(args: &mut ArgMap, _mode: Mode) -> Result<(), ValidationError> {
    coerce_to_number(args, "keep_tokens");
    // token counts are whole numbers, undo the float coercion
    let tokens = args.get("keep_tokens").and_then(as_f64).map(|value| value as i64);
    if let Some(tokens) = tokens {
        args.insert("keep_tokens".to_string(), Value::Integer(tokens));
    }
    prune_unset(args);
    Ok(())
}

/// Scheduler-specific options are silently dropped when another
/// scheduler is selected.
pub fn validate_restarts(args: &mut ArgMap) {
    let scheduler = scheduler_name(args);
    if scheduler != "cosine_with_restarts" {
        args.remove("lr_scheduler_num_cycles");
    }
    if scheduler != "polynomial" {
        args.remove("lr_scheduler_power");
    }
}

/// Schedulers with no warmup phase at all.
const NO_WARMUP_SCHEDULERS: &[&str] = &["constant"];

/// Turn a warmup ratio into a concrete warmup step count:
/// `floor(total_steps * ratio)`. The ratio key never reaches the
/// trainer.
pub fn validate_warmup_ratio(args: &mut ArgMap, total_steps: u32) -> Result<(), ValidationError> {
    let ratio = match args.remove("warmup_ratio") {
        Some(value) => as_f64(&value).unwrap_or(0.0),
        None => return Ok(()),
    };
    if ratio <= 0.0 {
        return Ok(());
    }
    let scheduler = scheduler_name(args);
    if NO_WARMUP_SCHEDULERS.contains(&scheduler.as_str()) {
        return Err(ValidationError::WarmupUnsupported { scheduler });
    }
    let warmup_steps = (f64::from(total_steps) * ratio).floor() as i64;
    args.insert("lr_warmup_steps".to_string(), Value::Integer(warmup_steps));
    Ok(())
}

/// Pick the external entry point from the model-type flag, removing the
/// flag from the map in the process.
pub fn select_trainer_script(args: &mut ArgMap) -> TrainerScript {
    let sdxl = args.remove("sdxl").map_or(false, |value| truthy(&value));
    if sdxl {
        TrainerScript::SdxlNetwork
    } else {
        TrainerScript::Network
    }
}

/// Full-mode filesystem pass: every path-valued option present in the
/// map must exist and be of the right kind. The base model and output
/// folder are required outright.
pub fn validate_existing_files(args: &ArgMap) -> Result<(), ValidationError> {
    const CHECKS: &[(&str, PathKind)] = &[
        ("pretrained_model_name_or_path", PathKind::File(MODEL_EXTENSIONS)),
        ("vae", PathKind::File(MODEL_EXTENSIONS)),
        ("network_weights", PathKind::File(RESUME_EXTENSIONS)),
        ("output_dir", PathKind::Directory),
        ("resume", PathKind::Directory),
    ];
    const REQUIRED: &[&str] = &["pretrained_model_name_or_path", "output_dir"];

    for (key, kind) in CHECKS {
        match args.get(*key).and_then(Value::as_str) {
            Some(path) => ensure_path(Path::new(path), key, *kind)?,
            None => {
                if REQUIRED.contains(key) {
                    return Err(crate::error::PathError::Missing {
                        name: key.to_string(),
                        path: Default::default(),
                    }
                    .into());
                }
            }
        }
    }
    Ok(())
}

fn scheduler_name(args: &ArgMap) -> String {
    args.get("lr_scheduler")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

fn is_on(args: &ArgMap, key: &str) -> bool {
    args.get(key).map_or(false, truthy)
}

fn apply_enable_flags(args: &mut ArgMap) {
    for (key, flag) in ENABLE_PAIRS {
        let enabled = args.remove(*flag).map_or(false, |value| truthy(&value));
        if !enabled {
            args.remove(*key);
        }
    }
}

/// Drop options that are set to nothing: false flags, empty strings,
/// empty arrays, and zeroes for the fields where zero means unset.
fn prune_unset(args: &mut ArgMap) {
    let unset: Vec<String> = args
        .iter()
        .filter_map(|(key, value)| {
            let dead = match value {
                Value::Boolean(flag) => !flag,
                Value::String(text) => text.is_empty(),
                Value::Array(items) => items.is_empty(),
                Value::Integer(_) | Value::Float(_) => {
                    PRUNE_IF_ZERO.contains(&key.as_str()) && !truthy(value)
                }
                _ => false,
            };
            dead.then(|| key.clone())
        })
        .collect();
    for key in unset {
        args.remove(&key);
    }
}
