use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use burn::tensor::backend::Backend;
use burn_ndarray::NdArray;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "wgpu")]
use burn_wgpu::Wgpu;
#[cfg(not(feature = "wgpu"))]
use anyhow::anyhow;

use burn_char_gpt::{
    CharVocab, Gpt, SampleOptions, TrainingConfig, load_training_config, sample_text,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Sample from a trained character-level GPT")]
struct Args {
    /// Additional configuration files applied in order (later files override earlier ones).
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: Vec<PathBuf>,
    /// Backend to use for sampling.
    #[arg(long, value_enum, default_value_t = BackendArg::Ndarray)]
    backend: BackendArg,
    /// Checkpoint to load instead of the configured `ckpt_path`.
    #[arg(long, value_name = "PATH")]
    checkpoint: Option<PathBuf>,
    /// Override the prompt used as seed context.
    #[arg(long)]
    prompt: Option<String>,
    /// Override the number of tokens to generate.
    #[arg(long, value_name = "N")]
    max_tokens: Option<usize>,
    /// Override the sampling temperature.
    #[arg(long, value_name = "T")]
    temperature: Option<f32>,
    /// Override the top-k truncation parameter.
    #[arg(long, value_name = "K")]
    top_k: Option<usize>,
    /// Pick the arg-max token at every step instead of sampling.
    #[arg(long)]
    greedy: bool,
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
        BackendArg::Ndarray => sample_backend::<NdArray<f32>>(&config, &args),
        BackendArg::Wgpu => {
            #[cfg(feature = "wgpu")]
            {
                sample_backend::<Wgpu<f32>>(&config, &args)
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

fn sample_backend<B>(config: &TrainingConfig, args: &Args) -> Result<()>
where
    B: Backend + 'static,
    B::Device: Clone,
{
    B::seed(config.training.seed);
    let device = B::Device::default();

    let ckpt_path = args
        .checkpoint
        .clone()
        .unwrap_or_else(|| config.training.ckpt_path.clone());
    let vocab = CharVocab::load(&CharVocab::sidecar_path(&ckpt_path))?;

    let model_config = config.gpt_config(vocab.len());
    let model = Gpt::<B>::load_checkpoint(&model_config, &ckpt_path, &device)?;

    let prompt = args
        .prompt
        .clone()
        .unwrap_or_else(|| config.generation.prompt.clone());
    let max_tokens = args.max_tokens.unwrap_or(config.generation.max_tokens);
    let options = SampleOptions {
        temperature: args.temperature.unwrap_or(config.generation.temperature),
        top_k: args.top_k.or(config.generation.top_k),
        sample: !args.greedy && config.generation.sample,
    };

    let continuation = sample_text(&model, &vocab, &prompt, max_tokens, options, &device)?;
    println!("{prompt}{continuation}");

    Ok(())
}
