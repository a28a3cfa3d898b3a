//! Module for normalizing MNIST pixel data.
//!
//! Raw IDX pixels are bytes in `0..=255`. Every model in this workspace expects them
//! scaled into `[0, 1]`; standardization additionally subtracts the mean and divides
//! by the standard deviation of the training images.

use crate::mnist::{MnistData, MnistError};
use serde::{Deserialize, Serialize};

/// Largest value an IDX pixel byte can hold.
pub const PIXEL_MAX: f32 = 255.0;

/// Mean and standard deviation of the scaled training pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StandardizationParams {
    pub mean: f32,
    pub std_dev: f32,
}

impl StandardizationParams {
    /// Creates parameters from known values. A zero standard deviation is replaced by 1.
    pub fn new(mean: f32, std_dev: f32) -> Self {
        // Avoid division by zero
        let std_dev = if std_dev == 0.0 { 1.0 } else { std_dev };
        Self { mean, std_dev }
    }

    /// Computes the parameters over every pixel of raw (unscaled) data.
    ///
    /// # Returns
    /// * `Ok(StandardizationParams)` with statistics of the pixels scaled to `[0, 1]`
    /// * `Err(MnistError::DataMismatch)` if the data set is empty
    pub fn build(raw: &MnistData) -> Result<Self, MnistError> {
        let images = raw.images();
        let mean = images.mean().ok_or_else(|| {
            MnistError::DataMismatch("cannot standardize an empty data set".to_string())
        })?;
        let std_dev = images.std(0.0);
        Ok(Self::new(mean / PIXEL_MAX, std_dev / PIXEL_MAX))
    }

    pub fn mean(&self) -> f32 {
        self.mean
    }

    pub fn std_dev(&self) -> f32 {
        self.std_dev
    }
}

/// How raw pixels are turned into network inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormalizationMethod {
    /// Divide by 255
    #[default]
    Scale,
    /// Divide by 255, then standardize with training statistics
    Standardize,
}

/// A fitted normalization, ready to be applied to any split.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    #[default]
    Scale,
    Standardize(StandardizationParams),
}

impl Normalization {
    /// Fits the normalization on the raw training split.
    pub fn fit(method: NormalizationMethod, raw_train: &MnistData) -> Result<Self, MnistError> {
        match method {
            NormalizationMethod::Scale => Ok(Normalization::Scale),
            NormalizationMethod::Standardize => {
                let params = StandardizationParams::build(raw_train)?;
                log::info!(
                    "standardizing with mean {:.4}, std_dev {:.4}",
                    params.mean(),
                    params.std_dev()
                );
                Ok(Normalization::Standardize(params))
            }
        }
    }

    /// Normalizes a single raw pixel value.
    pub fn apply_pixel(&self, pixel: f32) -> f32 {
        let scaled = pixel / PIXEL_MAX;
        match self {
            Normalization::Scale => scaled,
            Normalization::Standardize(params) => (scaled - params.mean) / params.std_dev,
        }
    }

    /// Normalizes every pixel of a raw data set in place and returns it.
    pub fn apply(&self, mut raw: MnistData) -> MnistData {
        let normalization = *self;
        raw.images_mut()
            .par_mapv_inplace(|pixel| normalization.apply_pixel(pixel));
        raw
    }
}
