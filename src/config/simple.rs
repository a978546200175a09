//! The flat configuration used by the command-line path.
//!
//! Unlike the section-based model, this is one struct with every option
//! the CLI launcher understands, persisted as a single flat json object.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Every option of the command-line launcher, with the stock defaults.
/// The three required paths start empty and are filled from the command
/// line; they are deliberately not restored from json.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub base_model: PathBuf,
    pub img_folder: PathBuf,
    pub output_folder: PathBuf,
    /// Changes how the output files are named.
    pub change_output_name: Option<String>,

    pub net_dim: u32,
    pub scheduler: String,
    pub warmup_lr_ratio: Option<f64>,
    pub learning_rate: Option<f64>,
    pub text_encoder_lr: Option<f64>,
    pub unet_lr: Option<f64>,

    pub batch_size: u32,
    pub num_epochs: u32,
    pub save_at_n_epochs: Option<u32>,
    pub shuffle_captions: bool,
    pub keep_tokens: Option<u32>,
    /// Exact step count; when unset it is derived from the dataset.
    pub max_steps: Option<u32>,

    pub train_resolution: u32,
    pub min_bucket_resolution: u32,
    pub max_bucket_resolution: u32,
    /// Existing LoRA to continue training from.
    pub lora_model_for_resume: Option<PathBuf>,
    pub save_state: bool,
    pub load_previous_save_state: Option<PathBuf>,

    pub reg_img_folder: Option<PathBuf>,
    pub clip_skip: u32,
    pub test_seed: u32,
    pub prior_loss_weight: f64,
    pub gradient_checkpointing: bool,
    pub gradient_acc_steps: Option<u32>,
    pub mixed_precision: String,
    pub save_precision: String,
    pub save_as: String,
    pub caption_extension: String,
    pub max_clip_token_length: u32,
    pub buckets: bool,
    pub xformers: bool,
    pub use_8bit_adam: bool,
    pub cache_latents: bool,
    pub color_aug: bool,
    pub flip_aug: bool,
    pub vae: Option<PathBuf>,
    pub no_meta: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            base_model: PathBuf::new(),
            img_folder: PathBuf::new(),
            output_folder: PathBuf::new(),
            change_output_name: None,
            net_dim: 128,
            scheduler: "cosine_with_restarts".to_string(),
            warmup_lr_ratio: None,
            learning_rate: None,
            text_encoder_lr: Some(1e-5),
            unet_lr: Some(1e-4),
            batch_size: 1,
            num_epochs: 1,
            save_at_n_epochs: None,
            shuffle_captions: false,
            keep_tokens: None,
            max_steps: None,
            train_resolution: 512,
            min_bucket_resolution: 320,
            max_bucket_resolution: 960,
            lora_model_for_resume: None,
            save_state: false,
            load_previous_save_state: None,
            reg_img_folder: None,
            clip_skip: 2,
            test_seed: 23,
            prior_loss_weight: 1.0,
            gradient_checkpointing: false,
            gradient_acc_steps: None,
            mixed_precision: "fp16".to_string(),
            save_precision: "fp16".to_string(),
            save_as: "safetensors".to_string(),
            caption_extension: ".txt".to_string(),
            max_clip_token_length: 150,
            buckets: true,
            xformers: true,
            use_8bit_adam: true,
            cache_latents: true,
            color_aug: false,
            flip_aug: false,
            vae: None,
            no_meta: false,
        }
    }
}

/// The restorable subset of [`CliConfig`]: the shape a saved json must
/// provide in full before any of it is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleConfig {
    pub net_dim: u32,
    pub scheduler: String,
    pub warmup_lr_ratio: Option<f64>,
    pub learning_rate: Option<f64>,
    pub text_encoder_lr: Option<f64>,
    pub unet_lr: Option<f64>,
    pub clip_skip: u32,
    pub train_resolution: u32,
    pub min_bucket_resolution: u32,
    pub max_bucket_resolution: u32,
    pub batch_size: u32,
    pub num_epochs: u32,
    pub shuffle_captions: bool,
    pub keep_tokens: Option<u32>,
}

/// The keys a flat json config must carry, all of them.
pub const REQUIRED_KEYS: &[&str] = &[
    "net_dim",
    "scheduler",
    "warmup_lr_ratio",
    "learning_rate",
    "text_encoder_lr",
    "unet_lr",
    "clip_skip",
    "train_resolution",
    "min_bucket_resolution",
    "max_bucket_resolution",
    "batch_size",
    "num_epochs",
    "shuffle_captions",
    "keep_tokens",
];
