use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use toml::Value;

use crate::model::GptConfig;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DatasetConfig {
    pub corpus_path: PathBuf,
    /// Fraction of the corpus used for training; the remainder becomes the
    /// held-out split. Absent means no held-out evaluation.
    #[serde(default)]
    pub train_split_ratio: Option<f32>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelSettings {
    #[serde(default = "default_n_layer")]
    pub n_layer: usize,
    #[serde(default = "default_n_head")]
    pub n_head: usize,
    #[serde(default = "default_n_embd")]
    pub n_embd: usize,
    #[serde(default)]
    pub dropout: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            n_layer: default_n_layer(),
            n_head: default_n_head(),
            n_embd: default_n_embd(),
            dropout: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrainingHyperparameters {
    pub block_size: usize,
    pub batch_size: usize,
    pub max_epochs: usize,
    pub learning_rate: f64,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f32,
    #[serde(default = "default_true")]
    pub lr_decay: bool,
    #[serde(default)]
    pub warmup_tokens: usize,
    #[serde(default)]
    pub final_tokens: usize,
    /// Gradient norm bound; absent disables clipping.
    #[serde(default)]
    pub grad_clip: Option<f32>,
    pub ckpt_path: PathBuf,
    /// Background data-loading workers, an engine concern; the loader here
    /// is synchronous and only reports the setting.
    #[serde(default)]
    pub num_workers: usize,
    #[serde(default = "default_log_frequency")]
    pub log_frequency: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GenerationConfig {
    pub prompt: String,
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default = "default_true")]
    pub sample: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrainingConfig {
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub model: ModelSettings,
    pub training: TrainingHyperparameters,
    pub generation: GenerationConfig,
}

impl TrainingConfig {
    /// Fail fast on shapes and rates the run could not recover from later.
    pub fn validate(&self) -> Result<()> {
        let training = &self.training;
        if training.block_size == 0 {
            return Err(anyhow!("training.block_size must be positive"));
        }
        if training.batch_size == 0 {
            return Err(anyhow!("training.batch_size must be positive"));
        }
        if training.max_epochs == 0 {
            return Err(anyhow!("training.max_epochs must be positive"));
        }
        if training.learning_rate <= 0.0 {
            return Err(anyhow!("training.learning_rate must be positive"));
        }
        if training.lr_decay && training.final_tokens <= training.warmup_tokens {
            return Err(anyhow!(
                "training.final_tokens must exceed training.warmup_tokens when lr_decay is on"
            ));
        }
        if let Some(bound) = training.grad_clip {
            if bound <= 0.0 {
                return Err(anyhow!("training.grad_clip must be positive"));
            }
        }
        if let Some(ratio) = self.dataset.train_split_ratio {
            if !(0.0..1.0).contains(&ratio) || ratio == 0.0 {
                return Err(anyhow!("dataset.train_split_ratio must be in (0, 1)"));
            }
        }
        if !(self.generation.temperature > 0.0) {
            return Err(anyhow!("generation.temperature must be positive"));
        }
        if self.generation.top_k == Some(0) {
            return Err(anyhow!("generation.top_k must be at least 1"));
        }

        // Shape errors surface here rather than at model construction.
        self.gpt_config(1).validate()
    }

    /// Model shape for a given vocabulary size.
    pub fn gpt_config(&self, vocab_size: usize) -> GptConfig {
        let mut config = GptConfig::new(vocab_size, self.training.block_size);
        config.n_layer = self.model.n_layer;
        config.n_head = self.model.n_head;
        config.n_embd = self.model.n_embd;
        config.dropout = self.model.dropout;
        config
    }
}

/// Load and merge configuration files in order; later files override
/// earlier ones key by key.
pub fn load_training_config(paths: &[PathBuf]) -> Result<TrainingConfig> {
    if paths.is_empty() {
        return Err(anyhow!("at least one configuration path is required"));
    }

    let mut iter = paths.iter();
    let first_path = iter
        .next()
        .ok_or_else(|| anyhow!("configuration iterator unexpectedly empty"))?;
    let mut value = load_value(first_path)?;

    for path in iter {
        let overlay = load_value(path)?;
        merge_values(&mut value, overlay);
    }

    let config: TrainingConfig = value.try_into().map_err(|err| anyhow!(err))?;
    config.validate()?;
    Ok(config)
}

fn load_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {}", path.display()))?;
    let table: toml::value::Table = toml::from_str(&content)
        .with_context(|| format!("failed to parse {} as TOML", path.display()))?;
    Ok(Value::Table(table))
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_table), Value::Table(overlay_table)) => {
            for (key, overlay_value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(base_value) => merge_values(base_value, overlay_value),
                    None => {
                        base_table.insert(key, overlay_value);
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value;
        }
    }
}

fn default_n_layer() -> usize {
    8
}

fn default_n_head() -> usize {
    8
}

fn default_n_embd() -> usize {
    512
}

fn default_weight_decay() -> f32 {
    0.1
}

fn default_log_frequency() -> usize {
    50
}

fn default_seed() -> u64 {
    42
}

fn default_temperature() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}
