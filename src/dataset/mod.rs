use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::vocab::CharVocab;

/// A corpus of characters windowed into fixed-length next-character
/// prediction examples. Window `i` spans `block_size + 1` characters
/// starting at offset `i`; the input is the first `block_size` codes and
/// the target is the same span shifted by one.
#[derive(Clone)]
pub struct CharDataset {
    corpus: Vec<char>,
    vocab: CharVocab,
    block_size: usize,
}

impl CharDataset {
    /// Build the vocabulary from the full corpus, then wrap it as a dataset.
    pub fn from_text(text: &str, block_size: usize) -> Result<Self> {
        let vocab = CharVocab::fit(text)?;
        Self::with_vocab(text, vocab, block_size)
    }

    /// Wrap a corpus span with an existing vocabulary, so held-out splits
    /// share the mapping built from the full corpus.
    pub fn with_vocab(text: &str, vocab: CharVocab, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(anyhow!("block_size must be positive"));
        }
        let corpus: Vec<char> = text.chars().collect();
        if corpus.len() <= block_size {
            return Err(anyhow!(
                "corpus of {} characters is too short for block_size {}",
                corpus.len(),
                block_size
            ));
        }
        Ok(Self {
            corpus,
            vocab,
            block_size,
        })
    }

    /// Number of valid windows: `corpus_len - block_size`.
    pub fn len(&self) -> usize {
        self.corpus.len() - self.block_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn vocab(&self) -> &CharVocab {
        &self.vocab
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn corpus_len(&self) -> usize {
        self.corpus.len()
    }

    /// Input and target codes of window `i`. The target at position `t`
    /// equals the input at position `t + 1`.
    pub fn window(&self, index: usize) -> Result<(Vec<u32>, Vec<u32>)> {
        if index >= self.len() {
            return Err(anyhow!(
                "window index {index} out of range (dataset has {} windows)",
                self.len()
            ));
        }

        let span = &self.corpus[index..index + self.block_size + 1];
        let codes = span
            .iter()
            .map(|&ch| self.vocab.code(ch))
            .collect::<Result<Vec<u32>>>()
            .with_context(|| format!("failed to encode window {index}"))?;

        let inputs = codes[..self.block_size].to_vec();
        let targets = codes[1..].to_vec();
        Ok((inputs, targets))
    }

    /// Carve the corpus into a training span and a held-out span that share
    /// this dataset's vocabulary. The held-out span must still contain at
    /// least one window.
    pub fn split(&self, train_ratio: f32) -> Result<(CharDataset, CharDataset)> {
        if !(0.0..1.0).contains(&train_ratio) || train_ratio == 0.0 {
            return Err(anyhow!(
                "train_split_ratio must be in (0, 1), got {train_ratio}"
            ));
        }

        let split_at = ((self.corpus.len() as f32) * train_ratio) as usize;
        let train_text: String = self.corpus[..split_at].iter().collect();
        let valid_text: String = self.corpus[split_at..].iter().collect();

        let train = Self::with_vocab(&train_text, self.vocab.clone(), self.block_size)
            .context("training split too small")?;
        let valid = Self::with_vocab(&valid_text, self.vocab.clone(), self.block_size)
            .context("held-out split too small")?;
        Ok((train, valid))
    }
}

/// One batch of windows as integer tensors of shape `[rows, block_size]`.
#[derive(Clone)]
pub struct WindowBatch<B: Backend> {
    pub inputs: Tensor<B, 2, Int>,
    pub targets: Tensor<B, 2, Int>,
}

impl<B: Backend> WindowBatch<B> {
    pub fn rows(&self) -> usize {
        self.inputs.shape().dims::<2>()[0]
    }

    /// Target positions in this batch, the unit the learning-rate schedule
    /// advances by.
    pub fn target_tokens(&self) -> usize {
        let [rows, time] = self.inputs.shape().dims();
        rows * time
    }
}

/// Partitions one epoch of window indices into batches. Every window
/// appears exactly once per epoch; the order is reshuffled from the
/// caller's rng each epoch and the final batch may be partial.
pub struct WindowLoader {
    dataset: Arc<CharDataset>,
    batch_size: usize,
}

impl WindowLoader {
    pub fn new(dataset: Arc<CharDataset>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(anyhow!("batch_size must be positive"));
        }
        Ok(Self {
            dataset,
            batch_size,
        })
    }

    pub fn dataset(&self) -> &Arc<CharDataset> {
        &self.dataset
    }

    pub fn batches_per_epoch(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// Tokens covered by one full epoch, used to re-derive the schedule
    /// position on resume.
    pub fn tokens_per_epoch(&self) -> usize {
        self.dataset.len() * self.dataset.block_size()
    }

    /// A freshly shuffled full partition of the dataset.
    pub fn epoch<B: Backend>(&self, rng: &mut StdRng, device: &B::Device) -> WindowBatches<B> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        order.shuffle(rng);
        self.batches(order, device)
    }

    /// All windows in corpus order, for held-out evaluation.
    pub fn ordered<B: Backend>(&self, device: &B::Device) -> WindowBatches<B> {
        self.batches((0..self.dataset.len()).collect(), device)
    }

    fn batches<B: Backend>(&self, order: Vec<usize>, device: &B::Device) -> WindowBatches<B> {
        WindowBatches {
            dataset: Arc::clone(&self.dataset),
            order,
            cursor: 0,
            batch_size: self.batch_size,
            device: device.clone(),
        }
    }
}

pub struct WindowBatches<B: Backend> {
    dataset: Arc<CharDataset>,
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    device: B::Device,
}

impl<B: Backend> Iterator for WindowBatches<B> {
    type Item = Result<WindowBatch<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let indices = &self.order[self.cursor..end];
        self.cursor = end;

        let rows = indices.len();
        let block_size = self.dataset.block_size();
        let mut inputs = Vec::with_capacity(rows * block_size);
        let mut targets = Vec::with_capacity(rows * block_size);

        for &index in indices {
            let (x, y) = match self.dataset.window(index) {
                Ok(window) => window,
                Err(err) => return Some(Err(err)),
            };
            inputs.extend(x.into_iter().map(i64::from));
            targets.extend(y.into_iter().map(i64::from));
        }

        let inputs = Tensor::<B, 2, Int>::from_data(
            TensorData::new(inputs, [rows, block_size]),
            &self.device,
        );
        let targets = Tensor::<B, 2, Int>::from_data(
            TensorData::new(targets, [rows, block_size]),
            &self.device,
        );

        Some(Ok(WindowBatch { inputs, targets }))
    }
}
