mod schedule;

pub use schedule::WarmupCosineSchedule;

use std::fs;

use anyhow::{Context, Result, anyhow};
use burn::grad_clipping::GradientClippingConfig;
use burn::module::{AutodiffModule, Module};
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{AdamW, AdamWConfig, GradientsParams, Optimizer};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::ElementConversion;
use burn::tensor::backend::AutodiffBackend;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;

use crate::config::TrainingHyperparameters;
use crate::dataset::WindowLoader;
use crate::model::{Gpt, GptConfig};

/// Owns the model parameters and optimizer state for the duration of a
/// run. Each epoch covers a freshly shuffled full partition of the
/// dataset, evaluates the held-out split if one is configured, and writes
/// a checkpoint at the epoch boundary. A failure in any batch aborts the
/// run; the last written checkpoint is the recovery point.
pub struct Trainer<B: AutodiffBackend> {
    model: Gpt<B>,
    optim: OptimizerAdaptor<AdamW, Gpt<B>, B>,
    schedule: WarmupCosineSchedule,
    training: TrainingHyperparameters,
    device: B::Device,
    best_loss: Option<f64>,
    completed_epochs: usize,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(
        model_config: &GptConfig,
        training: TrainingHyperparameters,
        device: B::Device,
    ) -> Result<Self> {
        model_config.validate()?;
        let model = Gpt::new(model_config, &device);
        info!(params = model.num_params(), "model initialized");
        Self::with_model(model, training, device)
    }

    /// Continue a run from the checkpoint at `ckpt_path`. A missing or
    /// unreadable checkpoint is a fatal configuration error. The schedule's
    /// token counter is re-derived from the completed epoch count so the
    /// learning rate picks up where the interrupted run left off.
    pub fn resume(
        model_config: &GptConfig,
        training: TrainingHyperparameters,
        device: B::Device,
        completed_epochs: usize,
        tokens_per_epoch: usize,
    ) -> Result<Self> {
        model_config.validate()?;
        let model = Gpt::load_checkpoint(model_config, &training.ckpt_path, &device)
            .context("cannot resume")?;
        info!(
            completed_epochs,
            path = %training.ckpt_path.display(),
            "resuming from checkpoint"
        );

        let mut trainer = Self::with_model(model, training, device)?;
        trainer.completed_epochs = completed_epochs;
        trainer.schedule.fast_forward(completed_epochs * tokens_per_epoch);
        Ok(trainer)
    }

    fn with_model(
        model: Gpt<B>,
        training: TrainingHyperparameters,
        device: B::Device,
    ) -> Result<Self> {
        let mut optim_config = AdamWConfig::new().with_weight_decay(training.weight_decay);
        if let Some(bound) = training.grad_clip {
            optim_config = optim_config.with_grad_clipping(Some(GradientClippingConfig::Norm(bound)));
        }
        let optim = optim_config.init::<B, Gpt<B>>();

        let schedule = WarmupCosineSchedule::new(
            training.learning_rate,
            training.lr_decay,
            training.warmup_tokens,
            training.final_tokens,
        )?;

        Ok(Self {
            model,
            optim,
            schedule,
            training,
            device,
            best_loss: None,
            completed_epochs: 0,
        })
    }

    pub fn model(&self) -> &Gpt<B> {
        &self.model
    }

    /// Run the remaining epochs and hand the trained model back.
    pub fn train(
        mut self,
        loader: &WindowLoader,
        valid: Option<&WindowLoader>,
    ) -> Result<Gpt<B>> {
        let mut rng = StdRng::seed_from_u64(self.training.seed);
        let batches_per_epoch = loader.batches_per_epoch();
        let log_frequency = self.training.log_frequency.max(1);

        for epoch in (self.completed_epochs + 1)..=self.training.max_epochs {
            let mut epoch_loss = 0.0f64;
            let mut batch_count = 0usize;

            for (step, batch) in loader.epoch::<B>(&mut rng, &self.device).enumerate() {
                let batch = batch?;
                let batch_tokens = batch.target_tokens();

                let loss = self.model.loss(batch.inputs, batch.targets);
                let loss_value = loss.clone().into_scalar().elem::<f64>();
                if !loss_value.is_finite() {
                    return Err(anyhow!(
                        "non-finite training loss at epoch {epoch} batch {step}"
                    ));
                }

                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &self.model);
                let lr = self.schedule.advance(batch_tokens);
                self.model = self.optim.step(lr, self.model, grads);

                epoch_loss += loss_value;
                batch_count += 1;
                if step % log_frequency == 0 {
                    info!(
                        epoch,
                        batch = step,
                        batches = batches_per_epoch,
                        loss = loss_value,
                        lr,
                        tokens = self.schedule.tokens(),
                        "train step"
                    );
                }
            }

            let train_loss = epoch_loss / batch_count.max(1) as f64;
            let valid_loss = match valid {
                Some(loader) => {
                    let loss = self.evaluate(loader)?;
                    info!(epoch, valid_loss = loss, "held-out evaluation");
                    Some(loss)
                }
                None => None,
            };

            info!(epoch, train_loss, "epoch complete");
            self.checkpoint_if_improved(epoch, valid_loss)?;
            self.completed_epochs = epoch;
        }

        Ok(self.model)
    }

    /// Mean held-out loss on the inner backend; no gradient computation.
    fn evaluate(&self, loader: &WindowLoader) -> Result<f64> {
        let model = self.model.valid();
        let mut total = 0.0f64;
        let mut count = 0usize;

        for batch in loader.ordered::<B::InnerBackend>(&self.device) {
            let batch = batch?;
            let loss = model.loss(batch.inputs, batch.targets);
            total += loss.into_scalar().elem::<f64>();
            count += 1;
        }

        Ok(total / count.max(1) as f64)
    }

    /// With a held-out set, persist only when its loss improves on the best
    /// seen so far; without one, persist every epoch.
    fn checkpoint_if_improved(&mut self, epoch: usize, valid_loss: Option<f64>) -> Result<()> {
        let improved = match (valid_loss, self.best_loss) {
            (None, _) => true,
            (Some(loss), None) => {
                self.best_loss = Some(loss);
                true
            }
            (Some(loss), Some(best)) => {
                if loss < best {
                    self.best_loss = Some(loss);
                    true
                } else {
                    false
                }
            }
        };

        if improved {
            self.save_checkpoint(epoch)?;
        }
        Ok(())
    }

    fn save_checkpoint(&self, epoch: usize) -> Result<()> {
        if let Some(parent) = self.training.ckpt_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create checkpoint directory {}", parent.display())
                })?;
            }
        }

        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.model
            .clone()
            .save_file(self.training.ckpt_path.clone(), &recorder)
            .with_context(|| {
                format!(
                    "failed to write checkpoint {}",
                    self.training.ckpt_path.display()
                )
            })?;
        info!(epoch, path = %self.training.ckpt_path.display(), "checkpoint written");
        Ok(())
    }
}
