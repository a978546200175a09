//! Argument and document assembly.
//!
//! Turns a validated configuration into what the external trainer
//! actually consumes: either an ordered `--flag=value` token list, or
//! the `config.toml` / `dataset.toml` document pair.

use std::fmt::Write as _;

use toml::Value;

use crate::config::simple::CliConfig;
use crate::config::ArgMap;
use crate::dataset::{inspect_dataset, total_steps, DatasetSubset};
use crate::error::ValidationError;
use crate::paths::{ensure_path, PathKind, MODEL_EXTENSIONS, RESUME_EXTENSIONS};

/// Build the full trainer argument vector from a CLI configuration.
///
/// The fixed prologue comes first, then the derived or overridden step
/// count, then every conditional token. Later derivations (warmup) hang
/// off the step count, so its position is load-bearing.
pub fn build_arg_list(cfg: &CliConfig) -> Result<Vec<String>, ValidationError> {
    ensure_path(&cfg.base_model, "base_model", PathKind::File(MODEL_EXTENSIONS))?;
    ensure_path(&cfg.img_folder, "img_folder", PathKind::Directory)?;
    ensure_path(&cfg.output_folder, "output_folder", PathKind::Directory)?;

    let mut args = vec![
        "--network_module=networks.lora".to_string(),
        format!(
            "--pretrained_model_name_or_path={}",
            cfg.base_model.display()
        ),
        format!("--train_data_dir={}", cfg.img_folder.display()),
        format!("--output_dir={}", cfg.output_folder.display()),
        format!("--prior_loss_weight={}", cfg.prior_loss_weight),
        format!("--caption_extension={}", cfg.caption_extension),
        format!("--resolution={}", cfg.train_resolution),
        format!("--train_batch_size={}", cfg.batch_size),
        format!("--mixed_precision={}", cfg.mixed_precision),
        format!("--save_precision={}", cfg.save_precision),
        format!("--network_dim={}", cfg.net_dim),
        format!("--save_model_as={}", cfg.save_as),
        format!("--clip_skip={}", cfg.clip_skip),
        format!("--seed={}", cfg.test_seed),
        format!("--max_token_length={}", cfg.max_clip_token_length),
        format!("--lr_scheduler={}", cfg.scheduler),
    ];

    let steps = match cfg.max_steps {
        Some(steps) => steps,
        None => {
            let subsets = inspect_dataset(&cfg.img_folder)?;
            total_steps(&subsets, cfg.batch_size, cfg.num_epochs)
        }
    };
    args.push(format!("--max_train_steps={steps}"));

    push_optional_args(cfg, steps, &mut args)?;
    Ok(args)
}

fn push_optional_args(
    cfg: &CliConfig,
    steps: u32,
    args: &mut Vec<String>,
) -> Result<(), ValidationError> {
    if let Some(reg) = &cfg.reg_img_folder {
        ensure_path(reg, "reg_img_folder", PathKind::Directory)?;
        args.push(format!("--reg_data_dir={}", reg.display()));
    }

    if let Some(weights) = &cfg.lora_model_for_resume {
        ensure_path(
            weights,
            "lora_model_for_resume",
            PathKind::File(RESUME_EXTENSIONS),
        )?;
        args.push(format!("--network_weights={}", weights.display()));
    }

    match cfg.save_at_n_epochs {
        Some(every) if every > 0 => args.push(format!("--save_every_n_epochs={every}")),
        _ => args.push("--save_every_n_epochs=999999".to_string()),
    }

    if cfg.shuffle_captions {
        args.push("--shuffle_caption".to_string());
    }

    if let Some(tokens) = cfg.keep_tokens {
        if tokens > 0 {
            args.push(format!("--keep_tokens={tokens}"));
        }
    }

    if cfg.buckets {
        args.push("--enable_bucket".to_string());
        args.push(format!("--min_bucket_reso={}", cfg.min_bucket_resolution));
        args.push(format!("--max_bucket_reso={}", cfg.max_bucket_resolution));
    }

    if cfg.use_8bit_adam {
        args.push("--use_8bit_adam".to_string());
    }

    if cfg.xformers {
        args.push("--xformers".to_string());
    }

    if cfg.color_aug {
        if cfg.cache_latents {
            return Err(ValidationError::Conflict {
                first: "color_aug",
                second: "cache_latents",
            });
        }
        args.push("--color_aug".to_string());
    }

    if cfg.flip_aug {
        args.push("--flip_aug".to_string());
    }

    if cfg.cache_latents {
        args.push("--cache_latents".to_string());
    }

    if let Some(ratio) = cfg.warmup_lr_ratio {
        if ratio > 0.0 {
            let warmup_steps = (f64::from(steps) * ratio).floor() as u64;
            args.push(format!("--lr_warmup_steps={warmup_steps}"));
        }
    }

    if cfg.gradient_checkpointing {
        args.push("--gradient_checkpointing".to_string());
    }

    if let Some(acc_steps) = cfg.gradient_acc_steps {
        if acc_steps > 0 && cfg.gradient_checkpointing {
            args.push(format!("--gradient_accumulation_steps={acc_steps}"));
        }
    }

    if let Some(lr) = cfg.learning_rate {
        if lr > 0.0 {
            args.push(format!("--learning_rate={lr}"));
        }
    }

    if let Some(lr) = cfg.text_encoder_lr {
        if lr > 0.0 {
            args.push(format!("--text_encoder_lr={lr}"));
        }
    }

    if let Some(lr) = cfg.unet_lr {
        if lr > 0.0 {
            args.push(format!("--unet_lr={lr}"));
        }
    }

    if let Some(vae) = &cfg.vae {
        args.push(format!("--vae={}", vae.display()));
    }

    if cfg.no_meta {
        args.push("--no_metadata".to_string());
    }

    if cfg.save_state {
        args.push("--save_state".to_string());
    }

    if let Some(state) = &cfg.load_previous_save_state {
        args.push(format!("--resume={}", state.display()));
    }

    if let Some(name) = &cfg.change_output_name {
        if !name.is_empty() {
            args.push(format!("--output_name={name}"));
        }
    }

    Ok(())
}

/// Render the flat training document: one `key = value` line per
/// option. Strings are double-quoted, booleans lowercase, floats always
/// keep a decimal point so they reparse as floats.
pub fn config_doc_string(args: &ArgMap) -> String {
    let mut doc = String::new();
    for (key, value) in args {
        match render_value(value, Quoting::Basic) {
            Some(rendered) => {
                let _ = writeln!(doc, "{key} = {rendered}");
            }
            None => log::warn!("skipping non-scalar option {key}"),
        }
    }
    doc
}

/// Render the dataset document: a `general` table plus one
/// `[[datasets.subsets]]` block per inspected subset. The indentation is
/// cosmetic; the output stays parseable by any TOML reader.
pub fn dataset_doc_string(general: &ArgMap, subsets: &[DatasetSubset]) -> String {
    let mut doc = String::new();
    doc.push_str("[general]\n");
    for (key, value) in general {
        match render_value(value, Quoting::Literal) {
            Some(rendered) => {
                let _ = writeln!(doc, "{key} = {rendered}");
            }
            None => log::warn!("skipping non-scalar dataset option {key}"),
        }
    }
    doc.push_str("\n[[datasets]]\n");
    for subset in subsets {
        doc.push_str("\n\t[[datasets.subsets]]\n");
        let _ = writeln!(doc, "\timage_dir = '{}'", subset.path.display());
        let _ = writeln!(doc, "\tnum_repeats = {}", subset.repeats);
    }
    doc
}

#[derive(Clone, Copy)]
enum Quoting {
    /// Double quotes, the training document style.
    Basic,
    /// Single quotes, the dataset document style.
    Literal,
}

fn render_value(value: &Value, quoting: Quoting) -> Option<String> {
    let rendered = match value {
        Value::String(text) => match quoting {
            Quoting::Basic => format!("\"{text}\""),
            Quoting::Literal => format!("'{text}'"),
        },
        Value::Integer(number) => number.to_string(),
        Value::Float(number) => format!("{number:?}"),
        Value::Boolean(flag) => flag.to_string(),
        Value::Array(items) => {
            let rendered: Option<Vec<String>> = items
                .iter()
                .map(|item| render_value(item, quoting))
                .collect();
            format!("[{}]", rendered?.join(", "))
        }
        _ => return None,
    };
    Some(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::set;
    use std::fs;
    use std::path::{Path, PathBuf};

    /// Number of always-present tokens before the step count.
    const PROLOGUE_LEN: usize = 16;

    fn fixture(images: &[(&str, &[&str])]) -> (tempfile::TempDir, CliConfig) {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("base.safetensors");
        fs::write(&model, b"").unwrap();
        let img_root = dir.path().join("images");
        fs::create_dir(&img_root).unwrap();
        for (name, files) in images {
            let subset = img_root.join(name);
            fs::create_dir(&subset).unwrap();
            for file in *files {
                fs::write(subset.join(file), b"").unwrap();
            }
        }
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();

        let cfg = CliConfig {
            base_model: model,
            img_folder: img_root,
            output_folder: out,
            ..CliConfig::default()
        };
        (dir, cfg)
    }

    #[test]
    fn prologue_is_fixed_and_steps_follow_it() {
        let (_dir, mut cfg) = fixture(&[("10_catA", &["a.png", "b.png"])]);
        cfg.num_epochs = 3;
        let args = build_arg_list(&cfg).unwrap();

        assert_eq!(args[0], "--network_module=networks.lora");
        assert!(args[1].starts_with("--pretrained_model_name_or_path="));
        assert_eq!(args[15], format!("--lr_scheduler={}", cfg.scheduler));
        // 10 repeats * 2 images / batch 1 * 3 epochs
        assert_eq!(args[PROLOGUE_LEN], "--max_train_steps=60");
    }

    #[test]
    fn step_position_is_stable_whatever_options_are_on() {
        let (_dir, mut cfg) = fixture(&[("1_x", &["a.png"])]);
        cfg.flip_aug = true;
        cfg.shuffle_captions = true;
        cfg.save_state = true;
        cfg.change_output_name = Some("night".to_string());
        let args = build_arg_list(&cfg).unwrap();
        assert!(args[PROLOGUE_LEN].starts_with("--max_train_steps="));
        assert!(args.contains(&"--flip_aug".to_string()));
        assert!(args.contains(&"--shuffle_caption".to_string()));
        assert!(args.contains(&"--save_state".to_string()));
        assert!(args.contains(&"--output_name=night".to_string()));
    }

    #[test]
    fn explicit_step_override_skips_derivation() {
        let (_dir, mut cfg) = fixture(&[("10_catA", &["a.png", "b.png"])]);
        cfg.max_steps = Some(1234);
        let args = build_arg_list(&cfg).unwrap();
        assert_eq!(args[PROLOGUE_LEN], "--max_train_steps=1234");
    }

    #[test]
    fn boolean_flags_emit_only_when_true() {
        let (_dir, mut cfg) = fixture(&[("1_x", &["a.png"])]);
        cfg.xformers = false;
        cfg.use_8bit_adam = false;
        cfg.cache_latents = false;
        let args = build_arg_list(&cfg).unwrap();
        assert!(!args.contains(&"--xformers".to_string()));
        assert!(!args.contains(&"--use_8bit_adam".to_string()));
        assert!(!args.contains(&"--cache_latents".to_string()));
        assert!(!args.iter().any(|arg| arg.contains("false")));
    }

    #[test]
    fn conflicting_augmentation_fails_assembly() {
        let (_dir, mut cfg) = fixture(&[("1_x", &["a.png"])]);
        cfg.color_aug = true;
        cfg.cache_latents = true;
        assert!(matches!(
            build_arg_list(&cfg),
            Err(ValidationError::Conflict { .. })
        ));
    }

    #[test]
    fn save_epochs_falls_back_to_effectively_never() {
        let (_dir, cfg) = fixture(&[("1_x", &["a.png"])]);
        let args = build_arg_list(&cfg).unwrap();
        assert!(args.contains(&"--save_every_n_epochs=999999".to_string()));
    }

    #[test]
    fn warmup_steps_derive_from_the_final_step_count() {
        let (_dir, mut cfg) = fixture(&[("1_x", &["a.png"])]);
        cfg.max_steps = Some(75);
        cfg.warmup_lr_ratio = Some(0.1);
        let args = build_arg_list(&cfg).unwrap();
        assert!(args.contains(&"--lr_warmup_steps=7".to_string()));
    }

    #[test]
    fn accumulation_requires_checkpointing_on_the_cli_too() {
        let (_dir, mut cfg) = fixture(&[("1_x", &["a.png"])]);
        cfg.gradient_acc_steps = Some(2);
        let args = build_arg_list(&cfg).unwrap();
        assert!(!args.iter().any(|a| a.starts_with("--gradient_accumulation")));

        cfg.gradient_checkpointing = true;
        let args = build_arg_list(&cfg).unwrap();
        assert!(args.contains(&"--gradient_accumulation_steps=2".to_string()));
    }

    #[test]
    fn wrong_model_extension_fails_before_any_assembly() {
        let (dir, mut cfg) = fixture(&[("1_x", &["a.png"])]);
        let bad = dir.path().join("base.vae");
        fs::write(&bad, b"").unwrap();
        cfg.base_model = bad;
        assert!(build_arg_list(&cfg).is_err());
    }

    #[test]
    fn config_doc_renders_each_type_correctly() {
        let mut args = ArgMap::new();
        set(&mut args, "output_name", "my lora");
        set(&mut args, "cache_latents", true);
        set(&mut args, "clip_skip", 2i64);
        set(&mut args, "learning_rate", 1e-4);
        set(&mut args, "network_alpha", 64.0);

        let doc = config_doc_string(&args);
        assert!(doc.contains("output_name = \"my lora\"\n"));
        assert!(doc.contains("cache_latents = true\n"));
        assert!(doc.contains("clip_skip = 2\n"));
        assert!(doc.contains("learning_rate = 0.0001\n"));
        // whole floats keep their decimal point
        assert!(doc.contains("network_alpha = 64.0\n"));
    }

    #[test]
    fn config_doc_round_trips_through_a_toml_parser() {
        let mut args = ArgMap::new();
        set(&mut args, "pretrained_model_name_or_path", "/models/base.safetensors");
        set(&mut args, "train_batch_size", 2i64);
        set(&mut args, "learning_rate", 1e-4);
        set(&mut args, "cache_latents", true);
        let pairs: Vec<Value> = vec![Value::String("weight_decay=0.1".to_string())];
        args.insert("optimizer_args".to_string(), Value::Array(pairs));

        let doc = config_doc_string(&args);
        let parsed: ArgMap = toml::from_str(&doc).unwrap();
        assert_eq!(parsed, args);
    }

    #[test]
    fn dataset_doc_parses_and_keeps_every_subset() {
        let mut general = ArgMap::new();
        set(&mut general, "resolution", 512i64);
        set(&mut general, "caption_extension", ".txt");
        set(&mut general, "shuffle_caption", true);

        let subsets = vec![
            DatasetSubset {
                repeats: 10,
                image_count: 4,
                path: PathBuf::from("/data/10_catA"),
            },
            DatasetSubset {
                repeats: 5,
                image_count: 2,
                path: PathBuf::from("/data/5_catB"),
            },
        ];

        let doc = dataset_doc_string(&general, &subsets);
        let parsed: toml::Value = toml::from_str(&doc).unwrap();
        assert_eq!(
            parsed["general"]["caption_extension"].as_str(),
            Some(".txt")
        );
        let blocks = parsed["datasets"][0]["subsets"].as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["image_dir"].as_str(), Some("/data/10_catA"));
        assert_eq!(blocks[0]["num_repeats"].as_integer(), Some(10));
        assert_eq!(blocks[1]["num_repeats"].as_integer(), Some(5));
    }

    #[test]
    fn dataset_doc_uses_literal_strings() {
        let mut general = ArgMap::new();
        set(&mut general, "caption_extension", ".txt");
        let doc = dataset_doc_string(&general, &[]);
        assert!(doc.contains("caption_extension = '.txt'\n"));
        assert!(doc.starts_with("[general]\n"));
    }

    #[test]
    fn empty_img_folder_gives_a_zero_step_job() {
        let (_dir, cfg) = fixture(&[]);
        let args = build_arg_list(&cfg).unwrap();
        assert_eq!(args[PROLOGUE_LEN], "--max_train_steps=0");
    }

    #[test]
    fn missing_img_folder_is_fatal() {
        let (_dir, mut cfg) = fixture(&[("1_x", &["a.png"])]);
        cfg.img_folder = Path::new("/definitely/not/here").to_path_buf();
        assert!(build_arg_list(&cfg).is_err());
    }
}
