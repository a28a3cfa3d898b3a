//! Inference over whole datasets: loss, accuracy, predictions and per-class metrics.
use burn::tensor::{ElementConversion, Tensor, backend::Backend};
use indicatif::ProgressBar;
use mnist::{MnistData, argmax, create_progress_style};
use neural_network::{LabelEncoding, Sequential, cross_entropy};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::batch::MnistBatcher;
use crate::training::TrainingError;

/// Loss and accuracy of a model over a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Mean cross-entropy per sample
    pub loss: f64,
    /// Fraction of samples classified correctly
    pub accuracy: f64,
    pub total: usize,
    pub correct: usize,
}

/// The most likely class of one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub class: usize,
    /// Softmax probability of `class`
    pub confidence: f32,
}

fn check_inputs(data: &MnistData, batch_size: usize) -> Result<(), TrainingError> {
    if batch_size == 0 {
        return Err(TrainingError::InvalidConfig(
            "batch size must be at least 1".to_string(),
        ));
    }
    if data.is_empty() {
        return Err(TrainingError::EmptyDataset);
    }
    Ok(())
}

/// Predicted class index of every row of `logits`.
pub(crate) fn predicted_classes<B: Backend>(
    logits: Tensor<B, 2>,
) -> Result<Vec<usize>, TrainingError> {
    let classes = logits
        .argmax(1)
        .squeeze::<1>(1)
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| TrainingError::Data(format!("{e:?}")))?;
    Ok(classes
        .into_iter()
        .map(|class| usize::try_from(class).unwrap_or_default())
        .collect())
}

/// Number of `predicted` classes that match `labels`.
pub(crate) fn count_correct(predicted: &[usize], labels: &[u8]) -> usize {
    predicted
        .iter()
        .zip(labels)
        .filter(|&(&predicted, &label)| predicted == usize::from(label))
        .count()
}

/// Computes the mean loss and the accuracy of `model` on `data`.
///
/// Run it on a model without autodiff (`model.valid()`) so dropout is disabled.
pub fn evaluate<B: Backend>(
    model: &Sequential<B>,
    data: &MnistData,
    encoding: LabelEncoding,
    classes: usize,
    batch_size: usize,
    device: &B::Device,
) -> Result<Evaluation, TrainingError> {
    check_inputs(data, batch_size)?;
    let batcher = MnistBatcher::<B>::new(device.clone(), encoding, classes);
    let indices: Vec<usize> = (0..data.len()).collect();

    let mut loss_sum = 0.0;
    let mut correct = 0;
    for chunk in indices.chunks(batch_size) {
        let batch = batcher.batch(data, chunk);
        let logits = model.forward(batch.images);
        let loss = cross_entropy(logits.clone(), &batch.targets)
            .into_scalar()
            .elem::<f64>();
        loss_sum += loss * chunk.len() as f64;
        correct += count_correct(&predicted_classes(logits)?, &batch.labels);
    }

    let total = data.len();
    Ok(Evaluation {
        loss: loss_sum / total as f64,
        accuracy: correct as f64 / total as f64,
        total,
        correct,
    })
}

/// Predicts the class of every sample in `data`, in dataset order.
pub fn predict<B: Backend>(
    model: &Sequential<B>,
    data: &MnistData,
    batch_size: usize,
    device: &B::Device,
) -> Result<Vec<Prediction>, TrainingError> {
    check_inputs(data, batch_size)?;
    let batcher = MnistBatcher::<B>::new(device.clone(), LabelEncoding::Sparse, 0);
    let indices: Vec<usize> = (0..data.len()).collect();

    let progress = ProgressBar::new(data.len() as u64);
    progress.set_style(create_progress_style(
        "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}",
    ));
    progress.set_message("Predicting...");

    let mut predictions = Vec::with_capacity(data.len());
    for chunk in indices.chunks(batch_size) {
        let probabilities = model.probabilities(batcher.images(data, chunk));
        let [rows, classes] = probabilities.dims();
        let values = probabilities
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| TrainingError::Data(format!("{e:?}")))?;

        for row in values.chunks(classes).take(rows) {
            let class = argmax(row).unwrap_or_default();
            predictions.push(Prediction {
                class,
                confidence: row.get(class).copied().unwrap_or_default(),
            });
        }
        progress.inc(chunk.len() as u64);
    }
    progress.finish_and_clear();

    Ok(predictions)
}

/// Counts of actual classes (rows) against predicted classes (columns).
///
/// ```text
/// Actual 5: |  12   1   0  39   4  808   8   3  11   6
/// ```
/// The diagonal holds the correct predictions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(classes: usize) -> Self {
        Self {
            counts: vec![vec![0; classes]; classes],
        }
    }

    /// Builds the matrix from predictions and the matching true labels.
    pub fn from_predictions(predictions: &[Prediction], labels: &[u8], classes: usize) -> Self {
        let mut matrix = Self::new(classes);
        for (prediction, &label) in predictions.iter().zip(labels) {
            matrix.record(usize::from(label), prediction.class);
        }
        matrix
    }

    /// Counts one sample. Classes outside the matrix are ignored.
    pub fn record(&mut self, actual: usize, predicted: usize) {
        if let Some(cell) = self
            .counts
            .get_mut(actual)
            .and_then(|row| row.get_mut(predicted))
        {
            *cell += 1;
        }
    }

    pub fn classes(&self) -> usize {
        self.counts.len()
    }

    pub fn count(&self, actual: usize, predicted: usize) -> usize {
        self.counts
            .get(actual)
            .and_then(|row| row.get(predicted))
            .copied()
            .unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.classes()).map(|class| self.count(class, class)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.total())
    }

    /// Samples whose actual class is `class`.
    pub fn class_total(&self, class: usize) -> usize {
        self.counts
            .get(class)
            .map(|row| row.iter().sum())
            .unwrap_or_default()
    }

    /// Samples predicted as `class`.
    pub fn predicted_total(&self, class: usize) -> usize {
        self.counts
            .iter()
            .filter_map(|row| row.get(class))
            .sum()
    }

    /// When the model predicts `class`, how often it is right.
    pub fn precision(&self, class: usize) -> f64 {
        ratio(self.count(class, class), self.predicted_total(class))
    }

    /// Out of all samples of `class`, how many were found. Equals the
    /// per-class accuracy.
    pub fn recall(&self, class: usize) -> f64 {
        ratio(self.count(class, class), self.class_total(class))
    }

    /// Harmonic mean of precision and recall.
    pub fn f1_score(&self, class: usize) -> f64 {
        let precision = self.precision(class);
        let recall = self.recall(class);
        match precision + recall {
            sum if sum > 0.0 => 2.0 * (precision * recall) / sum,
            _ => 0.0,
        }
    }

    /// Per-class table of correct, total, accuracy, precision, recall and F1.
    pub fn report(&self, class_names: &[&str]) -> String {
        let mut lines = vec![
            format!("{:<12} | Correct | Total | Accuracy | Precision | Recall  | F1 Score", "Class"),
            format!("{:-<12}-|---------|-------|----------|-----------|---------|---------", ""),
        ];
        for class in 0..self.classes() {
            let name = class_names.get(class).copied().unwrap_or("?");
            lines.push(format!(
                "{name:<12} | {correct:^7} | {total:^5} | {accuracy:>7.2}% | {precision:>8.2}% | {recall:>6.2}% | {f1:>7.2}%",
                correct = self.count(class, class),
                total = self.class_total(class),
                accuracy = self.recall(class) * 100.0,
                precision = self.precision(class) * 100.0,
                recall = self.recall(class) * 100.0,
                f1 = self.f1_score(class) * 100.0,
            ));
        }
        lines.join("\n")
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Actual → | Predicted →")?;
        write!(f, "         |")?;
        for class in 0..self.classes() {
            write!(f, " {class:>5}")?;
        }
        writeln!(f)?;
        writeln!(f, "---------|{}", "-".repeat(6 * self.classes()))?;
        for (actual, row) in self.counts.iter().enumerate() {
            write!(f, "  {actual:>5}  |")?;
            for count in row {
                write!(f, " {count:>5}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::backend::NdArray;
    use mnist::{IMAGE_COLS, IMAGE_ROWS};
    use ndarray::{Array1, Array3};
    use neural_network::{Activation, LayerSpec, ModelConfig};

    type TestBackend = NdArray<f32>;

    fn prediction(class: usize) -> Prediction {
        Prediction {
            class,
            confidence: 0.9,
        }
    }

    fn data(count: usize) -> MnistData {
        let images = Array3::<f32>::from_shape_fn((count, IMAGE_ROWS, IMAGE_COLS), |(i, r, c)| {
            ((i + r + c) % 7) as f32 / 7.0
        });
        let labels = Array1::from_iter((0..count).map(|i| (i % 10) as u8));
        MnistData::new(images, labels).unwrap()
    }

    #[test]
    fn test_confusion_matrix_metrics() {
        // actual: 0 0 1 1 1, predicted: 0 1 1 1 0
        let predictions: Vec<Prediction> = [0, 1, 1, 1, 0].into_iter().map(prediction).collect();
        let matrix = ConfusionMatrix::from_predictions(&predictions, &[0, 0, 1, 1, 1], 2);

        assert_eq!(matrix.total(), 5);
        assert_eq!(matrix.correct(), 3);
        assert_eq!(matrix.count(0, 1), 1);
        assert_eq!(matrix.count(1, 0), 1);
        assert_relative_eq!(matrix.accuracy(), 0.6);
        assert_relative_eq!(matrix.precision(1), 2.0 / 3.0);
        assert_relative_eq!(matrix.recall(1), 2.0 / 3.0);
        assert_relative_eq!(matrix.precision(0), 0.5);
        assert_relative_eq!(matrix.recall(0), 0.5);
        assert_relative_eq!(matrix.f1_score(0), 0.5);
    }

    #[test]
    fn test_unseen_class_has_zero_metrics() {
        let matrix = ConfusionMatrix::from_predictions(&[prediction(0)], &[0], 3);
        assert_eq!(matrix.precision(2), 0.0);
        assert_eq!(matrix.recall(2), 0.0);
        assert_eq!(matrix.f1_score(2), 0.0);
    }

    #[test]
    fn test_out_of_range_classes_are_ignored() {
        let mut matrix = ConfusionMatrix::new(2);
        matrix.record(5, 0);
        matrix.record(0, 5);
        assert_eq!(matrix.total(), 0);
    }

    #[test]
    fn test_display_and_report() {
        let matrix = ConfusionMatrix::from_predictions(&[prediction(1)], &[1], 2);
        let rendered = matrix.to_string();
        assert!(rendered.contains("Predicted"));
        assert_eq!(rendered.lines().count(), 5);

        let report = matrix.report(&["zero", "one"]);
        assert!(report.contains("one"));
        assert!(report.contains("100.00%"));
    }

    #[test]
    fn test_evaluate_counts_every_sample() -> Result<(), TrainingError> {
        let device = Default::default();
        let model = ModelConfig::new(
            "tiny",
            vec![LayerSpec::Flatten, LayerSpec::dense(10, Activation::Linear)],
        )
        .init::<TestBackend>(&device)?;

        let data = data(7);
        let evaluation = evaluate(&model, &data, LabelEncoding::Sparse, 10, 3, &device)?;
        assert_eq!(evaluation.total, 7);
        assert!(evaluation.correct <= 7);
        assert!(evaluation.loss.is_finite() && evaluation.loss > 0.0);
        assert_relative_eq!(evaluation.accuracy, evaluation.correct as f64 / 7.0);

        let one_hot = evaluate(&model, &data, LabelEncoding::OneHot, 10, 7, &device)?;
        assert_relative_eq!(one_hot.loss, evaluation.loss, epsilon = 1e-4);
        assert_eq!(one_hot.correct, evaluation.correct);
        Ok(())
    }

    #[test]
    fn test_predict_matches_evaluation() -> Result<(), TrainingError> {
        let device = Default::default();
        let model = ModelConfig::dense_digits().init::<TestBackend>(&device)?;
        let data = data(5);

        let predictions = predict(&model, &data, 2, &device)?;
        assert_eq!(predictions.len(), 5);
        assert!(predictions
            .iter()
            .all(|p| p.class < 10 && p.confidence > 0.0 && p.confidence <= 1.0));

        let labels: Vec<u8> = data.labels().to_vec();
        let classes: Vec<usize> = predictions.iter().map(|p| p.class).collect();
        let evaluation = evaluate(&model, &data, LabelEncoding::Sparse, 10, 2, &device)?;
        assert_eq!(count_correct(&classes, &labels), evaluation.correct);
        Ok(())
    }

    #[test]
    fn test_empty_data_and_zero_batch_are_rejected() {
        let device = Default::default();
        let model = ModelConfig::dense_digits()
            .init::<TestBackend>(&device)
            .unwrap();
        assert!(matches!(
            predict(&model, &data(2), 0, &device),
            Err(TrainingError::InvalidConfig(_))
        ));
        assert!(matches!(
            predict(&model, &data(2).truncate(0), 4, &device),
            Err(TrainingError::EmptyDataset)
        ));
    }
}
