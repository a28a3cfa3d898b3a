//! Declarative description of the layers making up a model.
//!
//! A model is an ordered list of [`LayerSpec`]s applied one after the other.
//! The list is validated and turned into a burn module by
//! [`crate::network_config::ModelConfig::init`].
use crate::activations::Activation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a single layer in the model.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    /// Collapses `[channels, height, width]` into a single feature axis.
    Flatten,
    /// Fully connected layer.
    Dense {
        units: usize,
        #[serde(default)]
        activation: Activation,
    },
    /// Square-kernel convolution with valid padding and unit stride.
    Conv2d {
        filters: usize,
        kernel_size: usize,
        #[serde(default)]
        activation: Activation,
    },
    /// Square max pooling with a stride equal to its size.
    MaxPool2d { pool_size: usize },
    /// Randomly zeroes inputs with probability `rate` during training.
    Dropout { rate: f64 },
}

impl LayerSpec {
    pub fn dense(units: usize, activation: Activation) -> Self {
        LayerSpec::Dense { units, activation }
    }

    pub fn conv2d(filters: usize, kernel_size: usize, activation: Activation) -> Self {
        LayerSpec::Conv2d {
            filters,
            kernel_size,
            activation,
        }
    }

    pub fn max_pool2d(pool_size: usize) -> Self {
        LayerSpec::MaxPool2d { pool_size }
    }

    pub fn dropout(rate: f64) -> Self {
        LayerSpec::Dropout { rate }
    }
}

impl fmt::Display for LayerSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LayerSpec::Flatten => write!(f, "Flatten"),
            LayerSpec::Dense { units, activation } => write!(f, "Dense({units}, {activation})"),
            LayerSpec::Conv2d {
                filters,
                kernel_size,
                activation,
            } => write!(
                f,
                "Conv2D({filters}, {kernel_size}x{kernel_size}, {activation})"
            ),
            LayerSpec::MaxPool2d { pool_size } => write!(f, "MaxPooling2D({pool_size}x{pool_size})"),
            LayerSpec::Dropout { rate } => write!(f, "Dropout({rate})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_json_uses_type_tag() {
        let json = serde_json::to_string(&LayerSpec::conv2d(32, 3, Activation::Relu)).unwrap();
        assert_eq!(
            json,
            r#"{"type":"conv2d","filters":32,"kernel_size":3,"activation":"relu"}"#
        );
    }

    #[test]
    fn test_dense_activation_defaults_to_linear() {
        let layer: LayerSpec = serde_json::from_str(r#"{"type":"dense","units":10}"#).unwrap();
        assert_eq!(layer, LayerSpec::dense(10, Activation::Linear));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            LayerSpec::dense(128, Activation::Relu).to_string(),
            "Dense(128, relu)"
        );
        assert_eq!(LayerSpec::max_pool2d(2).to_string(), "MaxPooling2D(2x2)");
    }
}
