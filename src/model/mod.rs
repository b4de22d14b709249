mod attention;
mod config;
mod gpt;

pub use attention::{Block, CausalSelfAttention, Mlp};
pub use config::GptConfig;
pub use gpt::Gpt;
