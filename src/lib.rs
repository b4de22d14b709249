pub mod config;
pub mod dataset;
pub mod generation;
pub mod model;
pub mod trainer;
pub mod vocab;

pub use config::{
    DatasetConfig, GenerationConfig, ModelSettings, TrainingConfig, TrainingHyperparameters,
    load_training_config,
};
pub use dataset::{CharDataset, WindowBatch, WindowBatches, WindowLoader};
pub use generation::{SampleOptions, sample_text, sample_tokens};
pub use model::{Gpt, GptConfig};
pub use trainer::{Trainer, WarmupCosineSchedule};
pub use vocab::CharVocab;
