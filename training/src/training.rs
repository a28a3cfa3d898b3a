//! Training loop for the burn models of the `neural-network` crate.
//!
//! This module provides:
//! - `Trainer`, which owns a model and its Adam optimizer
//! - Shuffled mini-batch training with optional validation and early stopping
//! - Progress visualization using progress bars
//! - Persistence of the model, the configuration and the history

use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::tensor::ElementConversion;
use burn::tensor::backend::AutodiffBackend;
use indicatif::{MultiProgress, ProgressBar};
use mnist::{IMAGE_COLS, IMAGE_ROWS, MnistData, MnistError, OUTPUT_NODES, create_progress_style};
use neural_network::{
    InputShape, ModelConfig, ModelError, Sequential, cross_entropy, save_model,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::path::Path;
use thiserror::Error;

use crate::batch::MnistBatcher;
use crate::evaluation::{self, Evaluation, Prediction, count_correct, predicted_classes};
use crate::training_config::TrainingConfig;
use crate::training_history::TrainingHistory;

/// Training configuration saved next to the model.
pub const TRAINING_CONFIG_FILE: &str = "training.json";
/// Per-epoch metrics saved next to the model.
pub const HISTORY_FILE: &str = "training_history.json";

/// Epsilon of the Adam optimizer.
const ADAM_EPSILON: f32 = 1e-7;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Dataset error: {0}")]
    Mnist(#[from] MnistError),
    #[error("Model error: {0}")]
    Model(#[from] ModelError),
    #[error("Invalid training configuration: {0}")]
    InvalidConfig(String),
    #[error("Dataset is empty")]
    EmptyDataset,
    #[error("Sample {index} is out of range for a dataset of {len} samples")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Tensor data error: {0}")]
    Data(String),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Checks that a model takes single-channel 28x28 images and scores the ten dataset classes.
pub fn check_model_fits_dataset(model_config: &ModelConfig) -> Result<(), TrainingError> {
    let expected = InputShape::new(1, IMAGE_ROWS, IMAGE_COLS);
    if model_config.input != expected {
        return Err(TrainingError::InvalidConfig(format!(
            "model input {} does not match dataset images {expected}",
            model_config.input
        )));
    }
    if model_config.num_classes != OUTPUT_NODES {
        return Err(TrainingError::InvalidConfig(format!(
            "model scores {} classes, the dataset has {OUTPUT_NODES}",
            model_config.num_classes
        )));
    }
    Ok(())
}

/// Trainer manages the training of one model.
///
/// Weights, dropout masks and shuffling are all derived from
/// [`TrainingConfig::seed`].
pub struct Trainer<B: AutodiffBackend> {
    model: Sequential<B>,
    model_config: ModelConfig,
    config: TrainingConfig,
    optim: OptimizerAdaptor<Adam, Sequential<B>, B>,
    device: B::Device,
    history: TrainingHistory,
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Seeds the backend, builds the model and an Adam optimizer.
    ///
    /// # Arguments
    /// * `model_config` - Layers of the model
    /// * `config` - Training configuration parameters
    /// * `device` - Device the model and the batches live on
    pub fn new(
        model_config: ModelConfig,
        config: TrainingConfig,
        device: B::Device,
    ) -> Result<Self, TrainingError> {
        if config.batch_size == 0 {
            return Err(TrainingError::InvalidConfig(
                "batch size must be at least 1".to_string(),
            ));
        }
        if config.learning_rate.is_nan() || config.learning_rate <= 0.0 {
            return Err(TrainingError::InvalidConfig(format!(
                "learning rate must be positive, got {}",
                config.learning_rate
            )));
        }

        check_model_fits_dataset(&model_config)?;

        B::seed(config.seed);
        let model = model_config.init::<B>(&device)?;
        let optim = AdamConfig::new()
            .with_beta_1(0.9)
            .with_beta_2(0.999)
            .with_epsilon(ADAM_EPSILON)
            .init::<B, Sequential<B>>();

        Ok(Self {
            model,
            model_config,
            config,
            optim,
            device,
            history: TrainingHistory::new(),
        })
    }

    pub fn model(&self) -> &Sequential<B> {
        &self.model
    }

    /// The trained model without autodiff, ready for inference.
    pub fn inference_model(&self) -> Sequential<B::InnerBackend> {
        self.model.valid()
    }

    pub fn model_config(&self) -> &ModelConfig {
        &self.model_config
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Returns the training history containing accuracy and loss metrics
    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    /// Trains the model on `train` for the configured number of epochs.
    ///
    /// Each epoch shuffles the samples, runs forward, loss, backward and an
    /// optimizer step per mini-batch, then evaluates `validation` when it is
    /// given and [`TrainingConfig::validate`] is set. With
    /// [`TrainingConfig::early_stopping_patience`] training ends once the
    /// tracked accuracy stops improving by more than the minimum delta.
    pub fn fit(
        &mut self,
        train: &MnistData,
        validation: Option<&MnistData>,
    ) -> Result<&TrainingHistory, TrainingError> {
        if train.is_empty() {
            return Err(TrainingError::EmptyDataset);
        }
        let validation = validation.filter(|_| self.config.validate);
        let batch_size = self.config.batch_size;
        let batcher = MnistBatcher::<B>::new(
            self.device.clone(),
            self.config.label_encoding,
            self.model_config.num_classes,
        );

        let multi_progress = MultiProgress::new();
        let epoch_style = create_progress_style(
            "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} Epoch {msg}",
        );
        let batch_style = create_progress_style(
            "{spinner:.yellow} [{elapsed_precise}] {bar:40.yellow/blue} {pos:>7}/{len:7} Batch {msg}",
        );

        let epoch_progress = multi_progress.add(ProgressBar::new(u64::from(self.config.epochs)));
        let batch_progress = multi_progress.add(ProgressBar::new(0));
        epoch_progress.set_style(epoch_style);
        batch_progress.set_style(batch_style);

        log::info!(
            "Training {} on {} samples for {} epochs with batch size {}",
            self.model_config.name,
            train.len(),
            self.config.epochs,
            batch_size
        );
        let mut indices: Vec<usize> = (0..train.len()).collect();
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let mut best_accuracy = 0.0;
        let mut patience_counter = 0;

        for epoch in 1..=self.config.epochs {
            if self.config.shuffle {
                indices.shuffle(&mut rng);
            }
            let mut correct = 0;
            let mut loss_sum = 0.0;

            batch_progress.set_length(indices.len().div_ceil(batch_size) as u64);
            batch_progress.set_position(0);
            batch_progress.set_message(format!("in Epoch {epoch}"));

            for chunk in indices.chunks(batch_size) {
                let batch = batcher.batch(train, chunk);
                let model = self.model.clone();

                let logits = model.forward(batch.images);
                let loss = cross_entropy(logits.clone(), &batch.targets);
                loss_sum += loss.clone().into_scalar().elem::<f64>() * chunk.len() as f64;
                correct += count_correct(&predicted_classes(logits)?, &batch.labels);

                // Gradients for the current backward pass
                let grads = loss.backward();
                // Gradients linked to each parameter of the model
                let grads = GradientsParams::from_grads(grads, &model);
                self.model = self.optim.step(self.config.learning_rate, model, grads);

                batch_progress.inc(1);
            }

            let accuracy = correct as f64 / train.len() as f64;
            let avg_loss = loss_sum / train.len() as f64;

            let val_metrics = match validation {
                Some(data) => {
                    let result = self.evaluate(data)?;
                    Some((result.accuracy, result.loss))
                }
                None => None,
            };
            self.history
                .record_epoch(epoch, accuracy, avg_loss, val_metrics);

            let summary = match val_metrics {
                Some((val_accuracy, val_loss)) => format!(
                    "loss: {avg_loss:.4} - accuracy: {accuracy:.4} - val_loss: {val_loss:.4} - val_accuracy: {val_accuracy:.4}"
                ),
                None => format!("loss: {avg_loss:.4} - accuracy: {accuracy:.4}"),
            };
            log::info!("Epoch {epoch}/{}: {summary}", self.config.epochs);
            epoch_progress.set_message(format!("- {summary}"));
            epoch_progress.inc(1);

            let Some(patience) = self.config.early_stopping_patience else {
                continue;
            };
            let tracked = val_metrics.map_or(accuracy, |(val_accuracy, _)| val_accuracy);
            if tracked > best_accuracy + self.config.early_stopping_min_delta {
                best_accuracy = tracked;
                patience_counter = 0;
            } else {
                patience_counter += 1;
                if patience_counter >= patience {
                    self.history.stopped_early = true;
                    epoch_progress.finish_with_message(format!(
                        "Early stopping at epoch {epoch} with best accuracy: {:.2}%",
                        best_accuracy * 100.0
                    ));
                    batch_progress.finish_and_clear();
                    return Ok(&self.history);
                }
            }
        }

        epoch_progress.finish_with_message("Training completed!");
        batch_progress.finish_and_clear();

        Ok(&self.history)
    }

    /// Loss and accuracy of the current model on `data`, dropout disabled.
    pub fn evaluate(&self, data: &MnistData) -> Result<Evaluation, TrainingError> {
        evaluation::evaluate(
            &self.inference_model(),
            data,
            self.config.label_encoding,
            self.model_config.num_classes,
            self.config.batch_size,
            &self.device,
        )
    }

    /// Predicted class and confidence for every sample of `data`.
    pub fn predict(&self, data: &MnistData) -> Result<Vec<Prediction>, TrainingError> {
        evaluation::predict(
            &self.inference_model(),
            data,
            self.config.batch_size,
            &self.device,
        )
    }

    /// Saves the model, its configuration, the training configuration and the
    /// history into `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), TrainingError> {
        save_model(self.inference_model(), &self.model_config, dir)?;
        self.config.save(&dir.join(TRAINING_CONFIG_FILE))?;
        self.history.save(&dir.join(HISTORY_FILE))?;
        Ok(())
    }
}
