use derive_builder::Builder;
use neural_network::LabelEncoding;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::training::TrainingError;

/// Configuration parameters for neural network training.
///
/// # Examples
///
/// ```
/// use training::TrainingConfigBuilder;
///
/// let config = TrainingConfigBuilder::default()
///     .epochs(2)
///     .batch_size(64)
///     .build()
///     .unwrap();
/// assert_eq!(config.learning_rate, 1e-3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(default)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of passes over the training data
    pub epochs: u32,
    /// Size of each training batch
    pub batch_size: usize,
    /// Learning rate of the Adam optimizer
    pub learning_rate: f64,
    /// Seed for weight initialization, dropout and shuffling
    pub seed: u64,
    /// Shuffle the training samples at the start of every epoch
    pub shuffle: bool,
    /// Evaluate the validation data after every epoch when it is given
    pub validate: bool,
    /// Number of epochs to wait for improvement before early stopping
    #[builder(setter(strip_option))]
    pub early_stopping_patience: Option<u32>,
    /// Minimum improvement in accuracy required to reset patience counter
    pub early_stopping_min_delta: f64,
    /// How labels are fed to the loss
    pub label_encoding: LabelEncoding,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            learning_rate: 1e-3,
            seed: 42,
            shuffle: true,
            validate: false,
            early_stopping_patience: None,
            early_stopping_min_delta: 0.001,
            label_encoding: LabelEncoding::Sparse,
        }
    }
}

impl TrainingConfig {
    pub fn load(path: &Path) -> Result<Self, TrainingError> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), TrainingError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_config_default() {
        let config = TrainingConfig::default();
        assert_eq!(config.epochs, 10);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.learning_rate, 1e-3);
        assert_eq!(config.seed, 42);
        assert!(config.shuffle);
        assert!(!config.validate);
        assert_eq!(config.early_stopping_patience, None);
        assert_eq!(config.early_stopping_min_delta, 0.001);
        assert_eq!(config.label_encoding, LabelEncoding::Sparse);
    }

    #[test]
    fn test_builder_keeps_unset_defaults() {
        let config = TrainingConfigBuilder::default()
            .label_encoding(LabelEncoding::OneHot)
            .validate(true)
            .early_stopping_patience(3)
            .build()
            .unwrap();
        assert_eq!(config.label_encoding, LabelEncoding::OneHot);
        assert_eq!(config.early_stopping_patience, Some(3));
        assert_eq!(config.epochs, 10);
        assert_eq!(config.batch_size, 32);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: TrainingConfig =
            serde_json::from_str(r#"{"epochs": 3, "label_encoding": "one_hot"}"#).unwrap();
        assert_eq!(config.epochs, 3);
        assert_eq!(config.label_encoding, LabelEncoding::OneHot);
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_save_and_load() -> Result<(), TrainingError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("training.json");
        let config = TrainingConfigBuilder::default()
            .epochs(4)
            .seed(7)
            .build()
            .unwrap();
        config.save(&path)?;
        assert_eq!(TrainingConfig::load(&path)?, config);
        Ok(())
    }
}
