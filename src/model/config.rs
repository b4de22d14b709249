use anyhow::{Result, anyhow};

/// Shape of the transformer stack. Fixed once a checkpoint has been trained
/// against it; changing any field invalidates prior checkpoints.
#[derive(Clone, Debug)]
pub struct GptConfig {
    pub vocab_size: usize,
    pub block_size: usize,
    pub n_layer: usize,
    pub n_head: usize,
    pub n_embd: usize,
    pub dropout: f64,
}

impl GptConfig {
    pub fn new(vocab_size: usize, block_size: usize) -> Self {
        Self {
            vocab_size,
            block_size,
            n_layer: 8,
            n_head: 8,
            n_embd: 512,
            dropout: 0.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 {
            return Err(anyhow!("vocab_size must be positive"));
        }
        if self.block_size == 0 {
            return Err(anyhow!("block_size must be positive"));
        }
        if self.n_layer == 0 {
            return Err(anyhow!("n_layer must be positive"));
        }
        if self.n_head == 0 {
            return Err(anyhow!("n_head must be positive"));
        }
        if self.n_embd == 0 || self.n_embd % self.n_head != 0 {
            return Err(anyhow!(
                "n_embd {} must be a positive multiple of n_head {}",
                self.n_embd,
                self.n_head
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(anyhow!("dropout must be in [0, 1), got {}", self.dropout));
        }
        Ok(())
    }

    pub(crate) fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_indivisible_head_count() {
        let mut config = GptConfig::new(65, 32);
        config.n_embd = 50;
        config.n_head = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_default_shape() {
        let config = GptConfig::new(65, 32);
        assert!(config.validate().is_ok());
        assert_eq!(config.head_dim(), 64);
    }
}
