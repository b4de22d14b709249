use std::f64::consts::PI;

use anyhow::{Result, anyhow};
use burn::LearningRate;

/// Floor the decayed rate never drops below, as a fraction of the peak.
const MIN_LR_RATIO: f64 = 0.1;

/// Learning-rate schedule driven by cumulative target tokens rather than
/// epochs, so it stays consistent across uneven batch boundaries and
/// resumed runs: linear warmup to the peak rate over `warmup_tokens`, then
/// cosine decay toward `MIN_LR_RATIO * peak` as the counter approaches
/// `final_tokens`, holding the floor beyond. With `decay` disabled the
/// peak rate is returned unchanged.
#[derive(Clone, Debug)]
pub struct WarmupCosineSchedule {
    peak_lr: f64,
    decay: bool,
    warmup_tokens: usize,
    final_tokens: usize,
    tokens: usize,
}

impl WarmupCosineSchedule {
    pub fn new(
        peak_lr: f64,
        decay: bool,
        warmup_tokens: usize,
        final_tokens: usize,
    ) -> Result<Self> {
        if peak_lr <= 0.0 {
            return Err(anyhow!("learning_rate must be positive, got {peak_lr}"));
        }
        if decay && final_tokens <= warmup_tokens {
            return Err(anyhow!(
                "final_tokens ({final_tokens}) must exceed warmup_tokens ({warmup_tokens})"
            ));
        }
        Ok(Self {
            peak_lr,
            decay,
            warmup_tokens,
            final_tokens,
            tokens: 0,
        })
    }

    /// Tokens processed so far.
    pub fn tokens(&self) -> usize {
        self.tokens
    }

    /// Re-derive the counter when resuming from a checkpoint.
    pub fn fast_forward(&mut self, tokens: usize) {
        self.tokens = tokens;
    }

    /// Account for one batch of targets and return the rate to apply.
    pub fn advance(&mut self, new_tokens: usize) -> LearningRate {
        self.tokens += new_tokens;
        self.current()
    }

    pub fn current(&self) -> LearningRate {
        if !self.decay {
            return self.peak_lr;
        }

        if self.tokens < self.warmup_tokens {
            let ramp = self.tokens as f64 / self.warmup_tokens.max(1) as f64;
            return self.peak_lr * ramp;
        }

        let span = (self.final_tokens - self.warmup_tokens).max(1) as f64;
        let progress = ((self.tokens - self.warmup_tokens) as f64 / span).clamp(0.0, 1.0);
        let multiplier = (0.5 * (1.0 + (PI * progress).cos())).max(MIN_LR_RATIO);
        self.peak_lr * multiplier
    }
}
