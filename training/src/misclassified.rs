use image::{GrayImage, ImageBuffer, Luma};
use mnist::{DatasetKind, MnistData};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::evaluation::Prediction;
use crate::training::TrainingError;

/// A test sample whose predicted class differs from its label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Misclassified {
    /// Position in the dataset
    pub index: usize,
    pub actual: u8,
    pub predicted: usize,
    pub confidence: f32,
}

impl Misclassified {
    pub fn title(&self) -> String {
        format!(
            "True label: {}  Predicted label: {}",
            self.actual, self.predicted
        )
    }

    /// Title with class names, e.g. `True label: Shirt  Predicted label: T-shirt/top`.
    pub fn named_title(&self, kind: DatasetKind) -> String {
        format!(
            "True label: {}  Predicted label: {}",
            kind.class_name(usize::from(self.actual)),
            kind.class_name(self.predicted)
        )
    }

    pub fn file_name(&self, rank: usize) -> String {
        format!(
            "misclassified_{rank:02}_index_{}_true_{}_predicted_{}.png",
            self.index, self.actual, self.predicted
        )
    }
}

/// Returns the first `limit` mismatches, in dataset order.
pub fn find_misclassified(
    predictions: &[Prediction],
    labels: &[u8],
    limit: usize,
) -> Vec<Misclassified> {
    predictions
        .iter()
        .zip(labels)
        .enumerate()
        .filter(|(_, (prediction, label))| prediction.class != usize::from(**label))
        .take(limit)
        .map(|(index, (prediction, &actual))| Misclassified {
            index,
            actual,
            predicted: prediction.class,
            confidence: prediction.confidence,
        })
        .collect()
}

/// Renders an image as 8-bit grayscale, stretching its values over `0..=255`.
///
/// Works for any normalization since only the relative intensities matter.
pub fn to_grayscale(image: ArrayView2<'_, f32>) -> GrayImage {
    let (rows, cols) = image.dim();
    let min = image.iter().copied().fold(f32::INFINITY, f32::min);
    let max = image.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = if max > min { max - min } else { 1.0 };

    ImageBuffer::from_fn(cols as u32, rows as u32, |x, y| {
        let pixel = image
            .get((y as usize, x as usize))
            .map_or(0.0, |&value| (value - min) / range);
        Luma([(pixel * 255.0).round() as u8])
    })
}

/// Writes every mismatch as a PNG into `dir` and returns the written paths.
pub fn save_misclassified(
    data: &MnistData,
    items: &[Misclassified],
    kind: DatasetKind,
    dir: &Path,
) -> Result<Vec<PathBuf>, TrainingError> {
    fs::create_dir_all(dir)?;
    let mut paths = Vec::with_capacity(items.len());

    for (rank, item) in items.iter().enumerate() {
        let image = data
            .image(item.index)
            .ok_or(TrainingError::IndexOutOfRange {
                index: item.index,
                len: data.len(),
            })?;
        let path = dir.join(item.file_name(rank + 1));
        to_grayscale(image).save(&path)?;

        log::info!(
            "{} ({}, confidence {:.2}) -> {}",
            item.title(),
            item.named_title(kind),
            item.confidence,
            path.display()
        );
        paths.push(path);
    }

    Ok(paths)
}
