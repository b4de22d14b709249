use std::cmp::Ordering;

use anyhow::{Result, anyhow};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use rand::distributions::{Distribution, WeightedIndex};
use rand::thread_rng;

use crate::model::Gpt;
use crate::vocab::CharVocab;

/// Knobs for one sampling invocation. `temperature` sharpens the
/// distribution as it approaches zero and flattens it above one; `top_k`
/// truncates to the k highest-scoring logits; `sample = false` switches to
/// greedy arg-max selection.
#[derive(Clone, Copy, Debug)]
pub struct SampleOptions {
    pub temperature: f32,
    pub top_k: Option<usize>,
    pub sample: bool,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_k: None,
            sample: true,
        }
    }
}

impl SampleOptions {
    fn validate(&self) -> Result<()> {
        if !(self.temperature > 0.0) || !self.temperature.is_finite() {
            return Err(anyhow!(
                "temperature must be a positive finite number, got {}",
                self.temperature
            ));
        }
        if self.top_k == Some(0) {
            return Err(anyhow!("top_k must be at least 1"));
        }
        Ok(())
    }
}

/// Generate `length` new token codes, one forward pass per token. The seed
/// is consumed as context only and is not re-emitted. Unlike training,
/// decoding cannot parallelize across time: each step's choice feeds the
/// next step's input, so the context is re-run (truncated to the last
/// `block_size` codes) once per generated token.
pub fn sample_tokens<B: Backend>(
    model: &Gpt<B>,
    seed: &[u32],
    length: usize,
    options: SampleOptions,
    device: &B::Device,
) -> Result<Vec<u32>> {
    options.validate()?;
    if seed.is_empty() {
        return Err(anyhow!("seed context must contain at least one token"));
    }

    let block_size = model.block_size();
    let mut context: Vec<i64> = seed.iter().map(|&code| code as i64).collect();
    let mut generated = Vec::with_capacity(length);

    for _ in 0..length {
        let start = context.len().saturating_sub(block_size);
        let window = context[start..].to_vec();
        let window_len = window.len();
        let tokens =
            Tensor::<B, 2, Int>::from_data(TensorData::new(window, [1, window_len]), device);

        let logits = model.forward(tokens);
        let [_, time, vocab] = logits.shape().dims();
        let last = logits
            .slice_dim(1, (time - 1)..time)
            .reshape([vocab])
            .div_scalar(options.temperature);

        let mut values = last
            .to_data()
            .convert::<f32>()
            .into_vec::<f32>()
            .map_err(|err| anyhow!("{err:?}"))?;

        if let Some(k) = options.top_k
            && k < vocab
        {
            let mut sorted = values.clone();
            sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
            let threshold = sorted[k - 1];
            for value in values.iter_mut() {
                if *value < threshold {
                    *value = f32::NEG_INFINITY;
                }
            }
        }

        let next = if options.sample {
            draw(&values)?
        } else {
            argmax(&values)?
        };

        context.push(next as i64);
        generated.push(next as u32);
    }

    Ok(generated)
}

/// Encode the prompt through the vocabulary, sample, and decode only the
/// newly generated continuation.
pub fn sample_text<B: Backend>(
    model: &Gpt<B>,
    vocab: &CharVocab,
    prompt: &str,
    length: usize,
    options: SampleOptions,
    device: &B::Device,
) -> Result<String> {
    let seed = vocab.encode(prompt)?;
    let generated = sample_tokens(model, &seed, length, options, device)?;
    Ok(vocab.decode(&generated))
}

/// Stochastic draw from the normalized distribution over `values`. The
/// row maximum is subtracted before exponentiating; a distribution that is
/// still degenerate after truncation is an error rather than an arbitrary
/// token.
fn draw(values: &[f32]) -> Result<usize> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return Err(anyhow!("sampling distribution has no finite logits"));
    }

    let probs: Vec<f32> = values.iter().map(|value| (value - max).exp()).collect();
    let sum: f32 = probs.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return Err(anyhow!("sampling distribution is degenerate"));
    }

    let dist = WeightedIndex::new(&probs).map_err(|err| anyhow!(err.to_string()))?;
    Ok(dist.sample(&mut thread_rng()))
}

// Positive infinity stays eligible: an extreme temperature can overflow a
// logit upward and that entry is still the greedy choice. Only masked
// (negative infinity) and undefined entries are excluded.
fn argmax(values: &[f32]) -> Result<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, value)| !value.is_nan() && **value > f32::NEG_INFINITY)
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(Ordering::Equal))
        .map(|(index, _)| index)
        .ok_or_else(|| anyhow!("sampling distribution has no selectable logits"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_ignores_masked_entries() {
        let values = [f32::NEG_INFINITY, 0.5, 2.0, f32::NEG_INFINITY];
        assert_eq!(argmax(&values).unwrap(), 2);
    }

    #[test]
    fn argmax_keeps_an_overflowed_logit_eligible() {
        let values = [0.5, f32::INFINITY, f32::NEG_INFINITY, 3.0];
        assert_eq!(argmax(&values).unwrap(), 1);
    }

    #[test]
    fn all_masked_distribution_is_an_error() {
        let values = [f32::NEG_INFINITY, f32::NEG_INFINITY];
        assert!(draw(&values).is_err());
        assert!(argmax(&values).is_err());
    }

    #[test]
    fn zero_temperature_is_rejected() {
        let options = SampleOptions {
            temperature: 0.0,
            ..SampleOptions::default()
        };
        assert!(options.validate().is_err());
    }
}
