//! Composable configuration sections.
//!
//! Each section owns one group of related options and knows how to
//! contribute them to the trainer-facing argument maps, and how to
//! persist and restore its own raw state. The set of sections replaces
//! the widget hierarchy of GUI front ends with plain strategy objects.

use std::path::PathBuf;

use toml::Value;

use crate::config::{
    get_bool, get_f64, get_str, get_u32, set, ArgMap, SavedConfig, SectionBlock,
};

/// One independent group of configuration options.
pub trait ConfigSection {
    /// Stable key for this section inside saved documents.
    fn name(&self) -> &'static str;

    /// Contribute trainer-facing training options.
    fn collect_args(&self, args: &mut ArgMap);

    /// Contribute options for the `general` table of the dataset
    /// document. Most sections have none.
    fn collect_dataset_args(&self, _args: &mut ArgMap) {}

    /// Raw section state for persistence, if any.
    fn save_args(&self) -> Option<ArgMap> {
        None
    }

    /// Raw dataset-side state for persistence, if any.
    fn save_dataset_args(&self) -> Option<ArgMap> {
        None
    }

    /// Restore state from a loaded block. Loading is defensive: absent
    /// or wrong-typed fields keep their current values.
    fn load_args(&mut self, block: &SectionBlock);
}

/// Model, dataset and run-wide options.
#[derive(Debug, Clone)]
pub struct GeneralSection {
    pub base_model: PathBuf,
    pub sdxl: bool,
    pub dataset_dir: PathBuf,
    pub vae: Option<PathBuf>,
    pub resolution: u32,
    pub clip_skip: u32,
    pub seed: u32,
    pub max_token_length: u32,
    pub caption_extension: String,
    pub mixed_precision: String,
    pub prior_loss_weight: f64,
    pub batch_size: u32,
    pub num_epochs: u32,
    /// Explicit step override. When unset the step count is derived from
    /// the dataset layout.
    pub max_steps: Option<u32>,
    pub shuffle_captions: bool,
    pub keep_tokens: u32,
    pub cache_latents: bool,
    pub color_aug: bool,
    pub flip_aug: bool,
    pub xformers: bool,
    pub gradient_checkpointing: bool,
    pub gradient_accumulation_steps: u32,
}

impl Default for GeneralSection {
    fn default() -> Self {
        Self {
            base_model: PathBuf::new(),
            sdxl: false,
            dataset_dir: PathBuf::new(),
            vae: None,
            resolution: 512,
            clip_skip: 2,
            seed: 23,
            max_token_length: 150,
            caption_extension: ".txt".to_string(),
            mixed_precision: "fp16".to_string(),
            prior_loss_weight: 1.0,
            batch_size: 1,
            num_epochs: 1,
            max_steps: None,
            shuffle_captions: false,
            keep_tokens: 0,
            cache_latents: true,
            color_aug: false,
            flip_aug: false,
            xformers: true,
            gradient_checkpointing: false,
            gradient_accumulation_steps: 0,
        }
    }
}

impl ConfigSection for GeneralSection {
    fn name(&self) -> &'static str {
        "general"
    }

    fn collect_args(&self, args: &mut ArgMap) {
        set(
            args,
            "pretrained_model_name_or_path",
            self.base_model.display().to_string(),
        );
        set(args, "sdxl", self.sdxl);
        if let Some(vae) = &self.vae {
            set(args, "vae", vae.display().to_string());
        }
        set(args, "mixed_precision", self.mixed_precision.as_str());
        set(args, "clip_skip", i64::from(self.clip_skip));
        set(args, "seed", i64::from(self.seed));
        set(args, "max_token_length", i64::from(self.max_token_length));
        set(args, "prior_loss_weight", self.prior_loss_weight);
        set(args, "train_batch_size", i64::from(self.batch_size));
        set(args, "cache_latents", self.cache_latents);
        set(args, "color_aug", self.color_aug);
        set(args, "flip_aug", self.flip_aug);
        set(args, "xformers", self.xformers);
        set(args, "gradient_checkpointing", self.gradient_checkpointing);
        set(
            args,
            "gradient_accumulation_steps",
            i64::from(self.gradient_accumulation_steps),
        );
    }

    fn collect_dataset_args(&self, args: &mut ArgMap) {
        set(args, "resolution", i64::from(self.resolution));
        set(args, "caption_extension", self.caption_extension.as_str());
        set(args, "shuffle_caption", self.shuffle_captions);
        set(args, "keep_tokens", i64::from(self.keep_tokens));
    }

    fn save_args(&self) -> Option<ArgMap> {
        let mut args = ArgMap::new();
        set(&mut args, "base_model", self.base_model.display().to_string());
        set(&mut args, "sdxl", self.sdxl);
        set(&mut args, "dataset_dir", self.dataset_dir.display().to_string());
        if let Some(vae) = &self.vae {
            set(&mut args, "vae", vae.display().to_string());
        }
        set(&mut args, "resolution", i64::from(self.resolution));
        set(&mut args, "clip_skip", i64::from(self.clip_skip));
        set(&mut args, "seed", i64::from(self.seed));
        set(&mut args, "max_token_length", i64::from(self.max_token_length));
        set(&mut args, "caption_extension", self.caption_extension.as_str());
        set(&mut args, "mixed_precision", self.mixed_precision.as_str());
        set(&mut args, "prior_loss_weight", self.prior_loss_weight);
        set(&mut args, "batch_size", i64::from(self.batch_size));
        set(&mut args, "num_epochs", i64::from(self.num_epochs));
        if let Some(steps) = self.max_steps {
            set(&mut args, "max_steps", i64::from(steps));
        }
        set(&mut args, "shuffle_captions", self.shuffle_captions);
        set(&mut args, "keep_tokens", i64::from(self.keep_tokens));
        set(&mut args, "cache_latents", self.cache_latents);
        set(&mut args, "color_aug", self.color_aug);
        set(&mut args, "flip_aug", self.flip_aug);
        set(&mut args, "xformers", self.xformers);
        set(&mut args, "gradient_checkpointing", self.gradient_checkpointing);
        set(
            &mut args,
            "gradient_accumulation_steps",
            i64::from(self.gradient_accumulation_steps),
        );
        Some(args)
    }

    fn load_args(&mut self, block: &SectionBlock) {
        let Some(args) = &block.args else { return };
        if let Some(path) = get_str(args, "base_model") {
            self.base_model = PathBuf::from(path);
        }
        if let Some(flag) = get_bool(args, "sdxl") {
            self.sdxl = flag;
        }
        if let Some(path) = get_str(args, "dataset_dir") {
            self.dataset_dir = PathBuf::from(path);
        }
        if let Some(path) = get_str(args, "vae") {
            self.vae = Some(PathBuf::from(path));
        }
        if let Some(value) = get_u32(args, "resolution") {
            self.resolution = value;
        }
        if let Some(value) = get_u32(args, "clip_skip") {
            self.clip_skip = value;
        }
        if let Some(value) = get_u32(args, "seed") {
            self.seed = value;
        }
        if let Some(value) = get_u32(args, "max_token_length") {
            self.max_token_length = value;
        }
        if let Some(text) = get_str(args, "caption_extension") {
            self.caption_extension = text;
        }
        if let Some(text) = get_str(args, "mixed_precision") {
            self.mixed_precision = text;
        }
        if let Some(value) = get_f64(args, "prior_loss_weight") {
            self.prior_loss_weight = value;
        }
        if let Some(value) = get_u32(args, "batch_size") {
            self.batch_size = value;
        }
        if let Some(value) = get_u32(args, "num_epochs") {
            self.num_epochs = value;
        }
        if let Some(value) = get_u32(args, "max_steps") {
            self.max_steps = Some(value);
        }
        if let Some(flag) = get_bool(args, "shuffle_captions") {
            self.shuffle_captions = flag;
        }
        if let Some(value) = get_u32(args, "keep_tokens") {
            self.keep_tokens = value;
        }
        if let Some(flag) = get_bool(args, "cache_latents") {
            self.cache_latents = flag;
        }
        if let Some(flag) = get_bool(args, "color_aug") {
            self.color_aug = flag;
        }
        if let Some(flag) = get_bool(args, "flip_aug") {
            self.flip_aug = flag;
        }
        if let Some(flag) = get_bool(args, "xformers") {
            self.xformers = flag;
        }
        if let Some(flag) = get_bool(args, "gradient_checkpointing") {
            self.gradient_checkpointing = flag;
        }
        if let Some(value) = get_u32(args, "gradient_accumulation_steps") {
            self.gradient_accumulation_steps = value;
        }
    }
}

/// LoRA network shape and resume weights.
#[derive(Debug, Clone)]
pub struct NetworkSection {
    pub network_dim: u32,
    pub network_alpha: f64,
    /// Existing LoRA weights to continue training from.
    pub network_weights: Option<PathBuf>,
    pub train_unet_only: bool,
    pub train_text_encoder_only: bool,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            network_dim: 128,
            network_alpha: 64.0,
            network_weights: None,
            train_unet_only: false,
            train_text_encoder_only: false,
        }
    }
}

impl ConfigSection for NetworkSection {
    fn name(&self) -> &'static str {
        "network"
    }

    fn collect_args(&self, args: &mut ArgMap) {
        set(args, "network_module", "networks.lora");
        set(args, "network_dim", i64::from(self.network_dim));
        set(args, "network_alpha", self.network_alpha);
        if let Some(weights) = &self.network_weights {
            set(args, "network_weights", weights.display().to_string());
        }
        set(args, "network_train_unet_only", self.train_unet_only);
        set(
            args,
            "network_train_text_encoder_only",
            self.train_text_encoder_only,
        );
    }

    fn save_args(&self) -> Option<ArgMap> {
        let mut args = ArgMap::new();
        set(&mut args, "network_dim", i64::from(self.network_dim));
        set(&mut args, "network_alpha", self.network_alpha);
        if let Some(weights) = &self.network_weights {
            set(&mut args, "network_weights", weights.display().to_string());
        }
        set(&mut args, "train_unet_only", self.train_unet_only);
        set(&mut args, "train_text_encoder_only", self.train_text_encoder_only);
        Some(args)
    }

    fn load_args(&mut self, block: &SectionBlock) {
        let Some(args) = &block.args else { return };
        if let Some(value) = get_u32(args, "network_dim") {
            self.network_dim = value;
        }
        if let Some(value) = get_f64(args, "network_alpha") {
            self.network_alpha = value;
        }
        if let Some(path) = get_str(args, "network_weights") {
            self.network_weights = Some(PathBuf::from(path));
        }
        if let Some(flag) = get_bool(args, "train_unet_only") {
            self.train_unet_only = flag;
        }
        if let Some(flag) = get_bool(args, "train_text_encoder_only") {
            self.train_text_encoder_only = flag;
        }
    }
}

/// Optimizer, scheduler and learning-rate options. The learning rates
/// are kept as raw text the way a form field holds them; the reconciler
/// parses them later.
#[derive(Debug, Clone)]
pub struct OptimizerSection {
    pub optimizer_type: String,
    pub scheduler: String,
    pub learning_rate: String,
    pub unet_lr: String,
    pub unet_lr_enabled: bool,
    pub text_encoder_lr: String,
    pub text_encoder_lr_enabled: bool,
    pub warmup_ratio: f64,
    pub warmup_enabled: bool,
    pub num_restarts: u32,
    pub poly_power: f64,
    pub min_snr_gamma: u32,
    pub min_snr_enabled: bool,
    pub scale_weight_norms: f64,
    pub scale_weight_enabled: bool,
    /// Free-form `key=value` pairs forwarded to the optimizer.
    pub optimizer_args: Vec<(String, String)>,
}

/// Optimizers the external trainer understands.
pub const OPTIMIZER_TYPES: &[&str] = &[
    "AdamW",
    "AdamW8bit",
    "Lion",
    "SGDNesterov",
    "SGDNesterov8bit",
    "DAdaptAdam",
    "DAdaptAdaGrad",
    "DAdaptAdan",
    "DAdaptSGD",
    "AdaFactor",
];

/// Learning-rate schedulers the external trainer understands.
pub const SCHEDULERS: &[&str] = &[
    "cosine",
    "cosine_with_restarts",
    "linear",
    "constant",
    "constant_with_warmup",
    "adafactor",
    "polynomial",
];

impl Default for OptimizerSection {
    fn default() -> Self {
        Self {
            optimizer_type: "AdamW8bit".to_string(),
            scheduler: "cosine".to_string(),
            learning_rate: "1e-4".to_string(),
            unet_lr: "1e-4".to_string(),
            unet_lr_enabled: false,
            text_encoder_lr: "1e-4".to_string(),
            text_encoder_lr_enabled: false,
            warmup_ratio: 0.0,
            warmup_enabled: false,
            num_restarts: 1,
            poly_power: 1.0,
            min_snr_gamma: 5,
            min_snr_enabled: false,
            scale_weight_norms: 1.0,
            scale_weight_enabled: false,
            optimizer_args: Vec::new(),
        }
    }
}

impl ConfigSection for OptimizerSection {
    fn name(&self) -> &'static str {
        "optimizer"
    }

    fn collect_args(&self, args: &mut ArgMap) {
        set(args, "optimizer_type", self.optimizer_type.as_str());
        set(args, "lr_scheduler", self.scheduler.as_str());
        set(args, "learning_rate", self.learning_rate.as_str());
        set(args, "unet_lr", self.unet_lr.as_str());
        set(args, "unet_lr_enabled", self.unet_lr_enabled);
        set(args, "text_encoder_lr", self.text_encoder_lr.as_str());
        set(args, "text_encoder_lr_enabled", self.text_encoder_lr_enabled);
        set(args, "warmup_ratio", self.warmup_ratio);
        set(args, "warmup_enabled", self.warmup_enabled);
        set(args, "lr_scheduler_num_cycles", i64::from(self.num_restarts));
        set(args, "lr_scheduler_power", self.poly_power);
        set(args, "min_snr_gamma", i64::from(self.min_snr_gamma));
        set(args, "min_snr_enabled", self.min_snr_enabled);
        set(args, "scale_weight_norms", self.scale_weight_norms);
        set(args, "scale_weight_enabled", self.scale_weight_enabled);
        let pairs: Vec<Value> = self
            .optimizer_args
            .iter()
            .map(|(key, value)| Value::String(format!("{key}={value}")))
            .collect();
        args.insert("optimizer_args".to_string(), Value::Array(pairs));
    }

    fn save_args(&self) -> Option<ArgMap> {
        let mut args = ArgMap::new();
        set(&mut args, "optimizer_type", self.optimizer_type.as_str());
        set(&mut args, "scheduler", self.scheduler.as_str());
        set(&mut args, "learning_rate", self.learning_rate.as_str());
        set(&mut args, "unet_lr", self.unet_lr.as_str());
        set(&mut args, "unet_lr_enabled", self.unet_lr_enabled);
        set(&mut args, "text_encoder_lr", self.text_encoder_lr.as_str());
        set(&mut args, "text_encoder_lr_enabled", self.text_encoder_lr_enabled);
        set(&mut args, "warmup_ratio", self.warmup_ratio);
        set(&mut args, "warmup_enabled", self.warmup_enabled);
        set(&mut args, "num_restarts", i64::from(self.num_restarts));
        set(&mut args, "poly_power", self.poly_power);
        set(&mut args, "min_snr_gamma", i64::from(self.min_snr_gamma));
        set(&mut args, "min_snr_enabled", self.min_snr_enabled);
        set(&mut args, "scale_weight_norms", self.scale_weight_norms);
        set(&mut args, "scale_weight_enabled", self.scale_weight_enabled);
        let pairs: Vec<Value> = self
            .optimizer_args
            .iter()
            .map(|(key, value)| Value::String(format!("{key}={value}")))
            .collect();
        args.insert("optimizer_args".to_string(), Value::Array(pairs));
        Some(args)
    }

    fn load_args(&mut self, block: &SectionBlock) {
        let Some(args) = &block.args else { return };
        if let Some(text) = get_str(args, "optimizer_type") {
            self.optimizer_type = text;
        }
        if let Some(text) = get_str(args, "scheduler") {
            self.scheduler = text;
        }
        if let Some(text) = get_str(args, "learning_rate") {
            self.learning_rate = text;
        }
        if let Some(text) = get_str(args, "unet_lr") {
            self.unet_lr = text;
        }
        if let Some(flag) = get_bool(args, "unet_lr_enabled") {
            self.unet_lr_enabled = flag;
        }
        if let Some(text) = get_str(args, "text_encoder_lr") {
            self.text_encoder_lr = text;
        }
        if let Some(flag) = get_bool(args, "text_encoder_lr_enabled") {
            self.text_encoder_lr_enabled = flag;
        }
        if let Some(value) = get_f64(args, "warmup_ratio") {
            self.warmup_ratio = value;
        }
        if let Some(flag) = get_bool(args, "warmup_enabled") {
            self.warmup_enabled = flag;
        }
        if let Some(value) = get_u32(args, "num_restarts") {
            self.num_restarts = value;
        }
        if let Some(value) = get_f64(args, "poly_power") {
            self.poly_power = value;
        }
        if let Some(value) = get_u32(args, "min_snr_gamma") {
            self.min_snr_gamma = value;
        }
        if let Some(flag) = get_bool(args, "min_snr_enabled") {
            self.min_snr_enabled = flag;
        }
        if let Some(value) = get_f64(args, "scale_weight_norms") {
            self.scale_weight_norms = value;
        }
        if let Some(flag) = get_bool(args, "scale_weight_enabled") {
            self.scale_weight_enabled = flag;
        }
        if let Some(items) = args.get("optimizer_args").and_then(Value::as_array) {
            self.optimizer_args = items
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|pair| {
                    pair.split_once('=')
                        .map(|(key, value)| (key.to_string(), value.to_string()))
                })
                .collect();
        }
    }
}

/// Output naming, formats and state saving.
#[derive(Debug, Clone)]
pub struct SavingSection {
    pub output_dir: PathBuf,
    pub output_name: String,
    pub save_precision: String,
    pub save_model_as: String,
    /// 0 falls back to the effectively-never value 999999.
    pub save_every_n_epochs: u32,
    pub save_state: bool,
    /// Training state folder to resume from.
    pub resume: Option<PathBuf>,
    /// Write an audit copy of the full configuration next to the run.
    pub auto_save: bool,
    pub auto_save_dir: Option<PathBuf>,
}

impl Default for SavingSection {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::new(),
            output_name: String::new(),
            save_precision: "fp16".to_string(),
            save_model_as: "safetensors".to_string(),
            save_every_n_epochs: 0,
            save_state: false,
            resume: None,
            auto_save: false,
            auto_save_dir: None,
        }
    }
}

impl ConfigSection for SavingSection {
    fn name(&self) -> &'static str {
        "saving"
    }

    fn collect_args(&self, args: &mut ArgMap) {
        set(args, "output_dir", self.output_dir.display().to_string());
        set(args, "output_name", self.output_name.as_str());
        set(args, "save_precision", self.save_precision.as_str());
        set(args, "save_model_as", self.save_model_as.as_str());
        let every = if self.save_every_n_epochs > 0 {
            i64::from(self.save_every_n_epochs)
        } else {
            999999
        };
        set(args, "save_every_n_epochs", every);
        set(args, "save_state", self.save_state);
        if let Some(resume) = &self.resume {
            set(args, "resume", resume.display().to_string());
        }
        set(args, "save_toml", self.auto_save);
        if let Some(dir) = &self.auto_save_dir {
            set(args, "save_toml_location", dir.display().to_string());
        }
    }

    fn save_args(&self) -> Option<ArgMap> {
        let mut args = ArgMap::new();
        set(&mut args, "output_dir", self.output_dir.display().to_string());
        set(&mut args, "output_name", self.output_name.as_str());
        set(&mut args, "save_precision", self.save_precision.as_str());
        set(&mut args, "save_model_as", self.save_model_as.as_str());
        set(&mut args, "save_every_n_epochs", i64::from(self.save_every_n_epochs));
        set(&mut args, "save_state", self.save_state);
        if let Some(resume) = &self.resume {
            set(&mut args, "resume", resume.display().to_string());
        }
        set(&mut args, "auto_save", self.auto_save);
        if let Some(dir) = &self.auto_save_dir {
            set(&mut args, "auto_save_dir", dir.display().to_string());
        }
        Some(args)
    }

    fn load_args(&mut self, block: &SectionBlock) {
        let Some(args) = &block.args else { return };
        if let Some(path) = get_str(args, "output_dir") {
            self.output_dir = PathBuf::from(path);
        }
        if let Some(text) = get_str(args, "output_name") {
            self.output_name = text;
        }
        if let Some(text) = get_str(args, "save_precision") {
            self.save_precision = text;
        }
        if let Some(text) = get_str(args, "save_model_as") {
            self.save_model_as = text;
        }
        if let Some(value) = get_u32(args, "save_every_n_epochs") {
            self.save_every_n_epochs = value;
        }
        if let Some(flag) = get_bool(args, "save_state") {
            self.save_state = flag;
        }
        if let Some(path) = get_str(args, "resume") {
            self.resume = Some(PathBuf::from(path));
        }
        if let Some(flag) = get_bool(args, "auto_save") {
            self.auto_save = flag;
        }
        if let Some(path) = get_str(args, "auto_save_dir") {
            self.auto_save_dir = Some(PathBuf::from(path));
        }
    }
}

/// Aspect-ratio bucketing options. These belong to the dataset document,
/// not the training one.
#[derive(Debug, Clone)]
pub struct BucketSection {
    pub enable_bucket: bool,
    pub min_bucket_reso: u32,
    pub max_bucket_reso: u32,
    pub bucket_reso_steps: u32,
    pub bucket_no_upscale: bool,
}

impl Default for BucketSection {
    fn default() -> Self {
        Self {
            enable_bucket: true,
            min_bucket_reso: 320,
            max_bucket_reso: 960,
            bucket_reso_steps: 64,
            bucket_no_upscale: false,
        }
    }
}

impl ConfigSection for BucketSection {
    fn name(&self) -> &'static str {
        "bucket"
    }

    fn collect_args(&self, _args: &mut ArgMap) {}

    fn collect_dataset_args(&self, args: &mut ArgMap) {
        set(args, "enable_bucket", self.enable_bucket);
        if self.enable_bucket {
            set(args, "min_bucket_reso", i64::from(self.min_bucket_reso));
            set(args, "max_bucket_reso", i64::from(self.max_bucket_reso));
            set(args, "bucket_reso_steps", i64::from(self.bucket_reso_steps));
            set(args, "bucket_no_upscale", self.bucket_no_upscale);
        }
    }

    fn save_dataset_args(&self) -> Option<ArgMap> {
        let mut args = ArgMap::new();
        set(&mut args, "enable_bucket", self.enable_bucket);
        set(&mut args, "min_bucket_reso", i64::from(self.min_bucket_reso));
        set(&mut args, "max_bucket_reso", i64::from(self.max_bucket_reso));
        set(&mut args, "bucket_reso_steps", i64::from(self.bucket_reso_steps));
        set(&mut args, "bucket_no_upscale", self.bucket_no_upscale);
        Some(args)
    }

    fn load_args(&mut self, block: &SectionBlock) {
        let Some(args) = &block.dataset_args else { return };
        if let Some(flag) = get_bool(args, "enable_bucket") {
            self.enable_bucket = flag;
        }
        if let Some(value) = get_u32(args, "min_bucket_reso") {
            self.min_bucket_reso = value;
        }
        if let Some(value) = get_u32(args, "max_bucket_reso") {
            self.max_bucket_reso = value;
        }
        if let Some(value) = get_u32(args, "bucket_reso_steps") {
            self.bucket_reso_steps = value;
        }
        if let Some(flag) = get_bool(args, "bucket_no_upscale") {
            self.bucket_no_upscale = flag;
        }
    }
}

/// The full set of configuration sections for one training run.
#[derive(Debug, Clone, Default)]
pub struct ConfigSet {
    pub general: GeneralSection,
    pub network: NetworkSection,
    pub optimizer: OptimizerSection,
    pub saving: SavingSection,
    pub bucket: BucketSection,
}

impl ConfigSet {
    /// Rebuild a set from a loaded document, starting from defaults.
    pub fn from_saved(saved: &SavedConfig) -> Self {
        let mut set = Self::default();
        set.load(saved);
        set
    }

    fn sections(&self) -> [&dyn ConfigSection; 5] {
        [
            &self.general,
            &self.network,
            &self.optimizer,
            &self.saving,
            &self.bucket,
        ]
    }

    fn sections_mut(&mut self) -> [&mut dyn ConfigSection; 5] {
        [
            &mut self.general,
            &mut self.network,
            &mut self.optimizer,
            &mut self.saving,
            &mut self.bucket,
        ]
    }

    /// Gather the raw training and dataset-general argument maps from
    /// every section.
    pub fn collate(&self) -> (ArgMap, ArgMap) {
        let mut args = ArgMap::new();
        let mut dataset_args = ArgMap::new();
        for section in self.sections() {
            section.collect_args(&mut args);
            section.collect_dataset_args(&mut dataset_args);
        }
        (args, dataset_args)
    }

    /// Raw state of every section, keyed by section name.
    pub fn save(&self) -> SavedConfig {
        let mut saved = SavedConfig::new();
        for section in self.sections() {
            saved.insert(
                section.name().to_string(),
                SectionBlock {
                    args: section.save_args(),
                    dataset_args: section.save_dataset_args(),
                },
            );
        }
        saved
    }

    /// Restore every section that has a block in the document. Sections
    /// without one keep their current state.
    pub fn load(&mut self, saved: &SavedConfig) {
        for section in self.sections_mut() {
            if let Some(block) = saved.get(section.name()) {
                section.load_args(block);
            }
        }
    }
}
