use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use burn::module::AutodiffModule;
use burn::tensor::backend::{AutodiffBackend, Backend as BackendTrait};
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "wgpu")]
use burn_wgpu::Wgpu;
#[cfg(not(feature = "wgpu"))]
use anyhow::anyhow;

use burn_char_gpt::{
    CharDataset, CharVocab, SampleOptions, Trainer, TrainingConfig, WindowLoader,
    load_training_config, sample_text,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Train a character-level GPT")]
struct Args {
    /// Additional configuration files applied in order (later files override earlier ones).
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: Vec<PathBuf>,
    /// Backend to use for training.
    #[arg(long, value_enum, default_value_t = BackendArg::Ndarray)]
    backend: BackendArg,
    /// Resume from the configured checkpoint after this many completed epochs.
    #[arg(long, value_name = "N")]
    resume_epochs: Option<usize>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum BackendArg {
    Ndarray,
    Wgpu,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let mut config_paths = vec![PathBuf::from("config/base.toml")];
    config_paths.extend(args.config.clone());
    let config = load_training_config(&config_paths)?;

    match args.backend {
        BackendArg::Ndarray => train_backend::<Autodiff<NdArray<f32>>>(&config, &args),
        BackendArg::Wgpu => {
            #[cfg(feature = "wgpu")]
            {
                train_backend::<Autodiff<Wgpu<f32>>>(&config, &args)
            }
            #[cfg(not(feature = "wgpu"))]
            {
                Err(anyhow!(
                    "wgpu backend selected but this build lacks `wgpu` feature; rebuild with `--features wgpu`"
                ))
            }
        }
    }
}

fn train_backend<B>(config: &TrainingConfig, args: &Args) -> Result<()>
where
    B: AutodiffBackend + 'static,
    B::Device: Clone,
{
    B::seed(config.training.seed);
    let device = B::Device::default();

    if config.training.num_workers > 0 {
        warn!(
            num_workers = config.training.num_workers,
            "data loading is synchronous; num_workers is ignored"
        );
    }

    let text = fs::read_to_string(&config.dataset.corpus_path).with_context(|| {
        format!(
            "failed to read corpus {}",
            config.dataset.corpus_path.display()
        )
    })?;
    let full = CharDataset::from_text(&text, config.training.block_size)?;
    info!(
        characters = full.corpus_len(),
        vocab_size = full.vocab_size(),
        windows = full.len(),
        "corpus loaded"
    );

    let vocab_path = CharVocab::sidecar_path(&config.training.ckpt_path);
    if let Some(parent) = vocab_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    full.vocab().save(&vocab_path)?;

    let model_config = config.gpt_config(full.vocab_size());

    let (train_set, valid_set) = match config.dataset.train_split_ratio {
        Some(ratio) => {
            let (train, valid) = full.split(ratio)?;
            info!(
                train_windows = train.len(),
                valid_windows = valid.len(),
                "held-out split carved"
            );
            (train, Some(valid))
        }
        None => (full, None),
    };

    let train_loader = WindowLoader::new(Arc::new(train_set), config.training.batch_size)?;
    let valid_loader = valid_set
        .map(|valid| WindowLoader::new(Arc::new(valid), config.training.batch_size))
        .transpose()?;

    let trainer = match args.resume_epochs {
        Some(epochs) => Trainer::<B>::resume(
            &model_config,
            config.training.clone(),
            device.clone(),
            epochs,
            train_loader.tokens_per_epoch(),
        )?,
        None => Trainer::<B>::new(&model_config, config.training.clone(), device.clone())?,
    };

    let model = trainer.train(&train_loader, valid_loader.as_ref())?;

    info!("training complete; generating a sample...");
    let model = model.valid();
    let options = SampleOptions {
        temperature: config.generation.temperature,
        top_k: config.generation.top_k,
        sample: config.generation.sample,
    };
    let continuation = sample_text(
        &model,
        train_loader.dataset().vocab(),
        &config.generation.prompt,
        config.generation.max_tokens,
        options,
        &device,
    )?;
    println!("{}{continuation}", config.generation.prompt);

    Ok(())
}
