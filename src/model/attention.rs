use burn::module::Module;
use burn::nn::{
    Dropout, DropoutConfig, Gelu, Initializer, LayerNorm, LayerNormConfig, Linear, LinearConfig,
};
use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Tensor, activation};

use super::config::GptConfig;

fn weight_init() -> Initializer {
    Initializer::Normal {
        mean: 0.0,
        std: 0.02,
    }
}

/// Multi-head self-attention with a causal mask: position `t` may only
/// attend to positions `<= t`, which is what makes one-step generation
/// equivalent to the training-time parallel forward.
#[derive(Module, Debug)]
pub struct CausalSelfAttention<B: Backend> {
    n_head: usize,
    head_dim: usize,
    query: Linear<B>,
    key: Linear<B>,
    value: Linear<B>,
    proj: Linear<B>,
    attn_dropout: Dropout,
    resid_dropout: Dropout,
}

impl<B: Backend> CausalSelfAttention<B> {
    pub fn new(config: &GptConfig, device: &B::Device) -> Self {
        let linear = |d_in: usize, d_out: usize| {
            LinearConfig::new(d_in, d_out)
                .with_initializer(weight_init())
                .init(device)
        };

        Self {
            n_head: config.n_head,
            head_dim: config.head_dim(),
            query: linear(config.n_embd, config.n_embd),
            key: linear(config.n_embd, config.n_embd),
            value: linear(config.n_embd, config.n_embd),
            proj: linear(config.n_embd, config.n_embd),
            attn_dropout: DropoutConfig::new(config.dropout).init(),
            resid_dropout: DropoutConfig::new(config.dropout).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, time, embd] = x.dims();
        let device = x.device();

        // [B, T, C] -> [B, H, T, hd]
        let split_heads = |projected: Tensor<B, 3>| {
            projected
                .reshape([batch, time, self.n_head, self.head_dim])
                .swap_dims(1, 2)
        };
        let q = split_heads(self.query.forward(x.clone()));
        let k = split_heads(self.key.forward(x.clone()));
        let v = split_heads(self.value.forward(x));

        let weights = self.attn_dropout.forward(self.causal_weights(q, k, &device));

        let out = weights
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, time, embd]);
        self.resid_dropout.forward(self.proj.forward(out))
    }

    /// Per-query attention weights over positions `<= t`: scaled dot
    /// products, future positions masked to negative infinity, row max
    /// subtracted before normalizing.
    fn causal_weights(
        &self,
        q: Tensor<B, 4>,
        k: Tensor<B, 4>,
        device: &B::Device,
    ) -> Tensor<B, 4> {
        let [batch, heads, time, _] = q.dims();

        let scale = (self.head_dim as f32).sqrt();
        let mut scores = q.matmul(k.swap_dims(2, 3)).div_scalar(scale);

        // tril_mask is true strictly above the diagonal, exactly the future
        // positions each query must not see.
        let mask: Tensor<B, 2, Bool> = Tensor::tril_mask([time, time], 0, device);
        let mask = mask
            .unsqueeze_dims::<4>(&[0, 1])
            .expand([batch, heads, time, time]);
        scores = scores.mask_fill(mask, f32::NEG_INFINITY);

        // Row max subtraction keeps the exponentials bounded.
        scores = scores.clone() - scores.max_dim(3);
        activation::softmax(scores, 3)
    }
}

/// Position-wise feed-forward expansion: 4x widening with GELU.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    expand: Linear<B>,
    activation: Gelu,
    contract: Linear<B>,
    dropout: Dropout,
}

impl<B: Backend> Mlp<B> {
    pub fn new(config: &GptConfig, device: &B::Device) -> Self {
        Self {
            expand: LinearConfig::new(config.n_embd, 4 * config.n_embd)
                .with_initializer(weight_init())
                .init(device),
            activation: Gelu::new(),
            contract: LinearConfig::new(4 * config.n_embd, config.n_embd)
                .with_initializer(weight_init())
                .init(device),
            dropout: DropoutConfig::new(config.dropout).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.activation.forward(self.expand.forward(x));
        self.dropout.forward(self.contract.forward(x))
    }
}

/// One transformer layer: pre-norm residual attention followed by a
/// pre-norm residual feed-forward.
#[derive(Module, Debug)]
pub struct Block<B: Backend> {
    ln1: LayerNorm<B>,
    attn: CausalSelfAttention<B>,
    ln2: LayerNorm<B>,
    mlp: Mlp<B>,
}

impl<B: Backend> Block<B> {
    pub fn new(config: &GptConfig, device: &B::Device) -> Self {
        Self {
            ln1: LayerNormConfig::new(config.n_embd).init(device),
            attn: CausalSelfAttention::new(config, device),
            ln2: LayerNormConfig::new(config.n_embd).init(device),
            mlp: Mlp::new(config, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = x.clone() + self.attn.forward(self.ln1.forward(x));
        x.clone() + self.mlp.forward(self.ln2.forward(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn small_config() -> GptConfig {
        let mut config = GptConfig::new(11, 8);
        config.n_layer = 1;
        config.n_head = 2;
        config.n_embd = 8;
        config.dropout = 0.0;
        config
    }

    #[test]
    fn attention_rows_normalize_and_respect_the_mask() {
        <TestBackend as Backend>::seed(0);
        let device = Default::default();
        let attn = CausalSelfAttention::<TestBackend>::new(&small_config(), &device);

        let time = 5;
        let q = Tensor::random([1, 2, time, 4], Distribution::Normal(0.0, 1.0), &device);
        let k = Tensor::random([1, 2, time, 4], Distribution::Normal(0.0, 1.0), &device);

        let weights = attn.causal_weights(q, k, &device);
        let values = weights
            .into_data()
            .convert::<f32>()
            .into_vec::<f32>()
            .expect("weights to vec");

        for head in 0..2 {
            for row in 0..time {
                let offset = (head * time + row) * time;
                let row_values = &values[offset..offset + time];
                let sum: f32 = row_values.iter().sum();
                assert!((sum - 1.0).abs() < 1e-5, "row sums to {sum}");
                for (col, &weight) in row_values.iter().enumerate() {
                    assert!(weight >= 0.0);
                    if col > row {
                        assert_eq!(weight, 0.0, "future position {col} visible from {row}");
                    }
                }
            }
        }
    }

    #[test]
    fn block_preserves_shape() {
        <TestBackend as Backend>::seed(0);
        let device = Default::default();
        let block = Block::<TestBackend>::new(&small_config(), &device);

        let x = Tensor::random([2, 6, 8], Distribution::Normal(0.0, 1.0), &device);
        let out = block.forward(x);
        assert_eq!(out.dims(), [2, 6, 8]);
    }
}
