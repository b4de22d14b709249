use std::path::Path;

use anyhow::{Context, Result, anyhow};
use burn::module::{Module, Param};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::{
    Dropout, DropoutConfig, Embedding, EmbeddingConfig, Initializer, LayerNorm, LayerNormConfig,
    Linear, LinearConfig,
};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

use super::attention::Block;
use super::config::GptConfig;

/// Decoder-only transformer over a character vocabulary: token embedding
/// plus a learned positional embedding, `n_layer` causal blocks, a final
/// normalization and a bias-free projection to vocabulary logits.
#[derive(Module, Debug)]
pub struct Gpt<B: Backend> {
    block_size: usize,
    vocab_size: usize,
    tok_emb: Embedding<B>,
    pos_emb: Param<Tensor<B, 3>>,
    drop: Dropout,
    blocks: Vec<Block<B>>,
    ln_f: LayerNorm<B>,
    head: Linear<B>,
}

impl<B: Backend> Gpt<B> {
    pub fn new(config: &GptConfig, device: &B::Device) -> Self {
        let tok_emb = EmbeddingConfig::new(config.vocab_size, config.n_embd)
            .with_initializer(Initializer::Normal {
                mean: 0.0,
                std: 0.02,
            })
            .init(device);
        let pos_emb = Param::from_tensor(Tensor::zeros(
            [1, config.block_size, config.n_embd],
            device,
        ));
        let blocks = (0..config.n_layer)
            .map(|_| Block::new(config, device))
            .collect();
        let head = LinearConfig::new(config.n_embd, config.vocab_size)
            .with_bias(false)
            .with_initializer(Initializer::Normal {
                mean: 0.0,
                std: 0.02,
            })
            .init(device);

        Self {
            block_size: config.block_size,
            vocab_size: config.vocab_size,
            tok_emb,
            pos_emb,
            drop: DropoutConfig::new(config.dropout).init(),
            blocks,
            ln_f: LayerNormConfig::new(config.n_embd).init(device),
            head,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Logits `[B, T, vocab_size]` for token codes `[B, T]`, `0 < T <=
    /// block_size`.
    pub fn forward(&self, tokens: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [_batch, time] = tokens.dims();
        assert!(time > 0, "input sequence must not be empty");
        assert!(
            time <= self.block_size,
            "sequence of length {time} exceeds block_size {}",
            self.block_size
        );

        let positions = self.pos_emb.val().slice_dim(1, 0..time);
        let mut x = self.drop.forward(self.tok_emb.forward(tokens) + positions);

        for block in &self.blocks {
            x = block.forward(x);
        }

        self.head.forward(self.ln_f.forward(x))
    }

    /// Mean cross-entropy between each position's logits and the next-token
    /// targets, averaged over every position of every sequence in the batch.
    pub fn loss(&self, tokens: Tensor<B, 2, Int>, targets: Tensor<B, 2, Int>) -> Tensor<B, 1> {
        let logits = self.forward(tokens);
        let [batch, time, vocab] = logits.shape().dims();
        let device = logits.device();

        CrossEntropyLossConfig::new().init::<B>(&device).forward(
            logits.reshape([batch * time, vocab]),
            targets.reshape([batch * time]),
        )
    }

    /// Restore parameters from a checkpoint written for this exact shape.
    /// The record layer stores raw tensor data, so a checkpoint trained
    /// under a different configuration is rejected here with a mismatch
    /// error instead of surfacing as a shape panic mid-forward.
    pub fn load_checkpoint(config: &GptConfig, path: &Path, device: &B::Device) -> Result<Self> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let model = Self::new(config, device)
            .load_file(path, &recorder, device)
            .with_context(|| format!("failed to load checkpoint {}", path.display()))?;

        let [_, block_size, n_embd] = model.pos_emb.val().shape().dims();
        if block_size != config.block_size || n_embd != config.n_embd {
            return Err(anyhow!(
                "checkpoint {} does not match the configured shape: positional \
                 embedding is [{block_size}, {n_embd}], expected [{}, {}]",
                path.display(),
                config.block_size,
                config.n_embd
            ));
        }
        let [vocab_size, _] = model.tok_emb.weight.val().shape().dims();
        if vocab_size != config.vocab_size {
            return Err(anyhow!(
                "checkpoint {} does not match the configured shape: token \
                 embedding covers {vocab_size} symbols, expected {}",
                path.display(),
                config.vocab_size
            ));
        }

        Ok(model)
    }
}
