use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::training::TrainingError;

/// Training history containing metrics recorded during training.
///
/// Accuracies are fractions in `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    /// Training accuracy for each epoch
    pub accuracies: Vec<f64>,
    /// Mean training loss for each epoch
    pub losses: Vec<f64>,
    /// Validation accuracy for each epoch, empty when no validation data is used
    #[serde(default)]
    pub val_accuracies: Vec<f64>,
    /// Validation loss for each epoch
    #[serde(default)]
    pub val_losses: Vec<f64>,
    /// Best accuracy achieved during training
    pub best_accuracy: f64,
    /// Epoch where best accuracy was achieved
    pub best_epoch: u32,
    /// Set when training ended before the configured epoch count
    #[serde(default)]
    pub stopped_early: bool,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the metrics of `epoch`. The best accuracy tracks validation
    /// accuracy when it is given, training accuracy otherwise.
    pub fn record_epoch(
        &mut self,
        epoch: u32,
        accuracy: f64,
        loss: f64,
        validation: Option<(f64, f64)>,
    ) {
        self.accuracies.push(accuracy);
        self.losses.push(loss);

        let tracked = match validation {
            Some((val_accuracy, val_loss)) => {
                self.val_accuracies.push(val_accuracy);
                self.val_losses.push(val_loss);
                val_accuracy
            }
            None => accuracy,
        };

        if tracked > self.best_accuracy {
            self.best_accuracy = tracked;
            self.best_epoch = epoch;
        }
    }

    pub fn epochs(&self) -> usize {
        self.accuracies.len()
    }

    pub fn has_validation(&self) -> bool {
        !self.val_accuracies.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<(), TrainingError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, TrainingError> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Prints a summary of the training history
    pub fn print_summary(&self) {
        println!("\nTraining History Summary:");
        println!("------------------------");
        println!(
            "Best accuracy: {:.2}% (epoch {})",
            self.best_accuracy * 100.0,
            self.best_epoch
        );
        println!(
            "Final accuracy: {:.2}%",
            self.accuracies.last().unwrap_or(&0.0) * 100.0
        );
        println!("Final loss: {:.4}", self.losses.last().unwrap_or(&0.0));
        if let (Some(val_accuracy), Some(val_loss)) =
            (self.val_accuracies.last(), self.val_losses.last())
        {
            println!(
                "Final validation accuracy: {:.2}% (loss: {:.4})",
                val_accuracy * 100.0,
                val_loss
            );
        }
        if self.stopped_early {
            println!("Stopped early after {} epochs", self.epochs());
        }

        // Print accuracy progression at 25% intervals
        let len = self.accuracies.len();
        if len >= 4 {
            println!("\nAccuracy progression:");
            for i in 0..=3 {
                let idx = i * (len - 1) / 3;
                if let (Some(accuracy), Some(loss)) =
                    (self.accuracies.get(idx), self.losses.get(idx))
                {
                    println!(
                        "Epoch {}: {:.2}% (loss: {:.4})",
                        idx + 1,
                        accuracy * 100.0,
                        loss
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_recording() {
        let mut history = TrainingHistory::new();

        history.record_epoch(1, 0.855, 0.25, None);
        history.record_epoch(2, 0.90, 0.15, None);
        history.record_epoch(3, 0.88, 0.18, None);

        assert_eq!(history.accuracies, vec![0.855, 0.90, 0.88]);
        assert_eq!(history.losses, vec![0.25, 0.15, 0.18]);
        assert!(!history.has_validation());

        // Best accuracy should be 0.90 from epoch 2
        assert_eq!(history.best_accuracy, 0.90);
        assert_eq!(history.best_epoch, 2);
    }

    #[test]
    fn test_best_epoch_follows_validation() {
        let mut history = TrainingHistory::new();
        history.record_epoch(1, 0.80, 0.5, Some((0.85, 0.4)));
        history.record_epoch(2, 0.95, 0.2, Some((0.83, 0.45)));

        assert_eq!(history.val_accuracies, vec![0.85, 0.83]);
        assert_eq!(history.val_losses, vec![0.4, 0.45]);
        assert_eq!(history.best_accuracy, 0.85);
        assert_eq!(history.best_epoch, 1);
        assert_eq!(history.epochs(), 2);
    }

    #[test]
    fn test_history_json_round_trip() -> Result<(), TrainingError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("training_history.json");

        let mut history = TrainingHistory::new();
        history.record_epoch(1, 0.5, 1.2, Some((0.6, 1.0)));
        history.save(&path)?;

        assert_eq!(TrainingHistory::load(&path)?, history);
        Ok(())
    }

    #[test]
    fn test_history_without_validation_fields_loads() {
        let json = r#"{"accuracies":[0.9],"losses":[0.3],"best_accuracy":0.9,"best_epoch":1}"#;
        let history: TrainingHistory = serde_json::from_str(json).unwrap();
        assert!(history.val_accuracies.is_empty());
        assert!(!history.stopped_early);
    }
}
