use std::sync::Arc;

use burn_autodiff::Autodiff;
use burn_char_gpt::config::TrainingHyperparameters;
use burn_char_gpt::{CharDataset, GptConfig, SampleOptions, Trainer, WindowLoader, sample_tokens};
use burn_ndarray::NdArray;

type Backend = Autodiff<NdArray<f32>>;

fn tiny_model(vocab_size: usize, block_size: usize) -> GptConfig {
    GptConfig {
        vocab_size,
        block_size,
        n_layer: 1,
        n_head: 2,
        n_embd: 8,
        dropout: 0.0,
    }
}

fn hyperparameters(ckpt_path: std::path::PathBuf, block_size: usize) -> TrainingHyperparameters {
    TrainingHyperparameters {
        block_size,
        batch_size: 4,
        max_epochs: 1,
        learning_rate: 1e-3,
        weight_decay: 0.1,
        lr_decay: true,
        warmup_tokens: 32,
        final_tokens: 1024,
        grad_clip: None,
        ckpt_path,
        num_workers: 0,
        log_frequency: 1000,
        seed: 42,
    }
}

#[test]
fn one_epoch_writes_a_checkpoint_and_yields_a_usable_model() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ckpt_path = dir.path().join("runs/model.ckpt");

    let block_size = 4;
    let text = "abab ".repeat(16);
    let dataset = Arc::new(CharDataset::from_text(&text, block_size).expect("dataset"));
    let model_config = tiny_model(dataset.vocab_size(), block_size);
    let loader = WindowLoader::new(Arc::clone(&dataset), 4).expect("loader");

    let device = Default::default();
    let trainer = Trainer::<Backend>::new(
        &model_config,
        hyperparameters(ckpt_path.clone(), block_size),
        device,
    )
    .expect("trainer");

    let model = trainer.train(&loader, None).expect("training run");

    // the recorder controls the on-disk extension; check the directory
    let written = std::fs::read_dir(ckpt_path.parent().unwrap())
        .expect("checkpoint directory")
        .count();
    assert!(written > 0, "no checkpoint written under {}", ckpt_path.display());

    let device = Default::default();
    let out = sample_tokens(
        &model,
        &[0, 1],
        8,
        SampleOptions {
            sample: false,
            ..SampleOptions::default()
        },
        &device,
    )
    .expect("sample from trained model");
    assert_eq!(out.len(), 8);
}

#[test]
fn training_with_a_held_out_split_reports_success() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ckpt_path = dir.path().join("model.ckpt");

    let block_size = 4;
    let text = "the rain in spain stays mainly in the plain ".repeat(4);
    let dataset = CharDataset::from_text(&text, block_size).expect("dataset");
    let model_config = tiny_model(dataset.vocab_size(), block_size);
    let (train, valid) = dataset.split(0.8).expect("split");

    let train_loader = WindowLoader::new(Arc::new(train), 8).expect("train loader");
    let valid_loader = WindowLoader::new(Arc::new(valid), 8).expect("valid loader");

    let device = Default::default();
    let trainer = Trainer::<Backend>::new(
        &model_config,
        hyperparameters(ckpt_path.clone(), block_size),
        device,
    )
    .expect("trainer");

    trainer
        .train(&train_loader, Some(&valid_loader))
        .expect("training run");
    let written = std::fs::read_dir(dir.path()).expect("checkpoint directory").count();
    assert!(written > 0);
}

#[test]
fn resume_from_missing_checkpoint_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ckpt_path = dir.path().join("no-such-checkpoint.ckpt");

    let block_size = 4;
    let model_config = tiny_model(8, block_size);
    let device = Default::default();

    let result = Trainer::<Backend>::resume(
        &model_config,
        hyperparameters(ckpt_path, block_size),
        device,
        1,
        256,
    );
    assert!(result.is_err());
}

#[test]
fn resume_continues_from_a_written_checkpoint() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ckpt_path = dir.path().join("model.ckpt");

    let block_size = 4;
    let text = "hello world ".repeat(8);
    let dataset = Arc::new(CharDataset::from_text(&text, block_size).expect("dataset"));
    let model_config = tiny_model(dataset.vocab_size(), block_size);
    let loader = WindowLoader::new(Arc::clone(&dataset), 4).expect("loader");

    let device = Default::default();
    let trainer = Trainer::<Backend>::new(
        &model_config,
        hyperparameters(ckpt_path.clone(), block_size),
        device,
    )
    .expect("trainer");
    trainer.train(&loader, None).expect("first epoch");

    // extend the horizon and pick the run back up
    let mut resumed_params = hyperparameters(ckpt_path, block_size);
    resumed_params.max_epochs = 2;
    let device = Default::default();
    let trainer = Trainer::<Backend>::resume(
        &model_config,
        resumed_params,
        device,
        1,
        loader.tokens_per_epoch(),
    )
    .expect("resume");
    trainer.train(&loader, None).expect("second epoch");
}
