use crate::activations::Activation;
use crate::layer::LayerSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised while describing, building or persisting a model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model has no layers")]
    EmptyModel,
    #[error("invalid input shape {0}")]
    InvalidInput(InputShape),
    #[error("layer {index} ({layer}) is invalid: {reason}")]
    InvalidLayer {
        index: usize,
        layer: String,
        reason: String,
    },
    #[error("output layer must be a dense layer with {expected} units, found {found}")]
    OutputMismatch { expected: usize, found: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to record model weights: {0}")]
    Record(String),
}

/// Shape of a single input image, channels first.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl InputShape {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// Number of values in one image.
    pub fn len(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Grayscale 28x28, the MNIST format.
impl Default for InputShape {
    fn default() -> Self {
        Self::new(1, 28, 28)
    }
}

impl fmt::Display for InputShape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.channels, self.height, self.width)
    }
}

fn default_num_classes() -> usize {
    10
}

/// Configuration for a model: its input, the ordered list of layers and the class count.
///
/// # Example
///
/// ```
/// use neural_network::network_config::ModelConfig;
///
/// let config = ModelConfig::dense_digits();
/// assert_eq!(config.layers.len(), 3);
/// assert!(config.plan().is_ok());
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ModelConfig {
    /// Free-form name shown in summaries.
    pub name: String,
    #[serde(default)]
    pub input: InputShape,
    pub layers: Vec<LayerSpec>,
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
}

impl ModelConfig {
    /// Creates a model over MNIST-shaped input with ten classes.
    pub fn new(name: impl Into<String>, layers: Vec<LayerSpec>) -> Self {
        Self {
            name: name.into(),
            input: InputShape::default(),
            layers,
            num_classes: default_num_classes(),
        }
    }

    pub fn with_input(mut self, input: InputShape) -> Self {
        self.input = input;
        self
    }

    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    /// Flatten, one hidden ReLU layer of 128 units, 10 raw scores.
    pub fn dense_digits() -> Self {
        Self::new(
            "dense_digits",
            vec![
                LayerSpec::Flatten,
                LayerSpec::dense(128, Activation::Relu),
                LayerSpec::dense(10, Activation::Linear),
            ],
        )
    }

    /// Two convolution/pooling blocks followed by a 256 unit dense layer.
    pub fn fashion_cnn() -> Self {
        Self::new(
            "fashion_cnn",
            vec![
                LayerSpec::conv2d(32, 3, Activation::Relu),
                LayerSpec::max_pool2d(2),
                LayerSpec::conv2d(64, 3, Activation::Relu),
                LayerSpec::max_pool2d(2),
                LayerSpec::Flatten,
                LayerSpec::dense(256, Activation::Relu),
                LayerSpec::dense(10, Activation::Softmax),
            ],
        )
    }

    /// Four convolutions with dropout after each, one pooling layer, then a dense head.
    pub fn dropout_cnn() -> Self {
        Self::new(
            "dropout_cnn",
            vec![
                LayerSpec::conv2d(32, 3, Activation::Relu),
                LayerSpec::dropout(0.5),
                LayerSpec::conv2d(32, 3, Activation::Relu),
                LayerSpec::dropout(0.5),
                LayerSpec::max_pool2d(2),
                LayerSpec::conv2d(64, 3, Activation::Relu),
                LayerSpec::dropout(0.5),
                LayerSpec::conv2d(64, 3, Activation::Relu),
                LayerSpec::dropout(0.5),
                LayerSpec::Flatten,
                LayerSpec::dense(256, Activation::Relu),
                LayerSpec::dropout(0.5),
                LayerSpec::dense(10, Activation::Softmax),
            ],
        )
    }

    /// Loads a model configuration from a JSON file.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use neural_network::network_config::ModelConfig;
    /// use std::path::Path;
    ///
    /// let config = ModelConfig::load(Path::new("model.json")).unwrap();
    /// ```
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let config_str = fs::read_to_string(path)?;
        let config: ModelConfig = serde_json::from_str(&config_str)?;
        Ok(config)
    }

    /// Writes the configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Validates the layer list and resolves every layer's input and output shape.
    ///
    /// Layers before `Flatten` must work on images (convolution, pooling, dropout),
    /// layers after it on feature vectors (dense, dropout). The last layer must be a
    /// dense layer producing one score per class.
    pub fn plan(&self) -> Result<Plan, ModelError> {
        if self.layers.is_empty() {
            return Err(ModelError::EmptyModel);
        }
        if self.input.is_empty() {
            return Err(ModelError::InvalidInput(self.input));
        }

        let InputShape {
            channels: mut c,
            height: mut h,
            width: mut w,
        } = self.input;
        let mut features: Option<usize> = None;
        let mut plan = Plan::default();

        for (index, layer) in self.layers.iter().enumerate() {
            let invalid = |reason: &str| ModelError::InvalidLayer {
                index,
                layer: layer.to_string(),
                reason: reason.to_string(),
            };

            match (layer, features) {
                (LayerSpec::Flatten, None) => {
                    features = Some(c * h * w);
                    plan.summary.push((layer.to_string(), vec![c * h * w]));
                }
                (LayerSpec::Flatten, Some(_)) => {
                    return Err(invalid("input is already flat"));
                }
                (
                    LayerSpec::Conv2d {
                        filters,
                        kernel_size,
                        activation,
                    },
                    None,
                ) => {
                    if *filters == 0 {
                        return Err(invalid("filters must be positive"));
                    }
                    if *kernel_size == 0 || *kernel_size > h.min(w) {
                        return Err(invalid("kernel does not fit the input"));
                    }
                    if *activation == Activation::Softmax {
                        return Err(invalid("softmax is only supported on dense layers"));
                    }
                    plan.spatial.push(SpatialStep::Conv {
                        channels: [c, *filters],
                        kernel_size: *kernel_size,
                        activation: *activation,
                    });
                    c = *filters;
                    h = h - kernel_size + 1;
                    w = w - kernel_size + 1;
                    plan.summary.push((layer.to_string(), vec![c, h, w]));
                }
                (LayerSpec::MaxPool2d { pool_size }, None) => {
                    if *pool_size == 0 || *pool_size > h.min(w) {
                        return Err(invalid("pool does not fit the input"));
                    }
                    plan.spatial.push(SpatialStep::Pool {
                        pool_size: *pool_size,
                    });
                    h /= pool_size;
                    w /= pool_size;
                    plan.summary.push((layer.to_string(), vec![c, h, w]));
                }
                (LayerSpec::Conv2d { .. } | LayerSpec::MaxPool2d { .. }, Some(_)) => {
                    return Err(invalid("spatial layer after Flatten"));
                }
                (LayerSpec::Dropout { rate }, state) => {
                    if !(0.0..1.0).contains(rate) {
                        return Err(invalid("rate must be in [0, 1)"));
                    }
                    match state {
                        None => {
                            plan.spatial.push(SpatialStep::Dropout { rate: *rate });
                            plan.summary.push((layer.to_string(), vec![c, h, w]));
                        }
                        Some(n) => {
                            plan.flat.push(FlatStep::Dropout { rate: *rate });
                            plan.summary.push((layer.to_string(), vec![n]));
                        }
                    }
                }
                (LayerSpec::Dense { .. }, None) => {
                    return Err(invalid("dense layer needs a Flatten layer before it"));
                }
                (LayerSpec::Dense { units, activation }, Some(n)) => {
                    if *units == 0 {
                        return Err(invalid("units must be positive"));
                    }
                    plan.flat.push(FlatStep::Dense {
                        inputs: n,
                        units: *units,
                        activation: *activation,
                    });
                    features = Some(*units);
                    plan.summary.push((layer.to_string(), vec![*units]));
                }
            }
        }

        match self.layers.last() {
            Some(LayerSpec::Dense { units, .. }) if *units == self.num_classes => {}
            last => {
                return Err(ModelError::OutputMismatch {
                    expected: self.num_classes,
                    found: last.map(ToString::to_string).unwrap_or_default(),
                });
            }
        }

        // The output softmax is folded into the loss, the network emits logits.
        if let Some(FlatStep::Dense { activation, .. }) = plan.flat.last_mut() {
            plan.output_softmax = *activation == Activation::Softmax;
            *activation = Activation::Linear;
        }

        Ok(plan)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::dense_digits()
    }
}

impl fmt::Display for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Model: {}", self.name)?;
        writeln!(f, "  Input {}", self.input)?;
        for layer in &self.layers {
            writeln!(f, "  {layer}")?;
        }
        write!(f, "  Classes: {}", self.num_classes)
    }
}

/// A layer working on `[batch, channels, height, width]` tensors.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SpatialStep {
    Conv {
        channels: [usize; 2],
        kernel_size: usize,
        activation: Activation,
    },
    Pool {
        pool_size: usize,
    },
    Dropout {
        rate: f64,
    },
}

/// A layer working on `[batch, features]` tensors.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FlatStep {
    Dense {
        inputs: usize,
        units: usize,
        activation: Activation,
    },
    Dropout {
        rate: f64,
    },
}

/// A validated model layout, ready to be instantiated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub(crate) spatial: Vec<SpatialStep>,
    pub(crate) flat: Vec<FlatStep>,
    /// Whether the configured output layer ends in a softmax.
    pub output_softmax: bool,
    /// Every layer with its output shape, batch axis excluded.
    pub summary: Vec<(String, Vec<usize>)>,
}

impl Plan {
    /// Size of the feature vector produced by `Flatten`.
    pub fn flattened_features(&self) -> Option<usize> {
        self.flat.iter().find_map(|step| match step {
            FlatStep::Dense { inputs, .. } => Some(*inputs),
            FlatStep::Dropout { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for config in [
            ModelConfig::dense_digits(),
            ModelConfig::fashion_cnn(),
            ModelConfig::dropout_cnn(),
        ] {
            assert!(config.plan().is_ok(), "{} should be valid", config.name);
        }
    }

    #[test]
    fn test_flattened_sizes_follow_valid_convolutions() {
        // 28 -> 26 -> 13 -> 11 -> 5
        let plan = ModelConfig::dense_digits().plan().unwrap();
        assert_eq!(plan.flattened_features(), Some(784));
        let plan = ModelConfig::fashion_cnn().plan().unwrap();
        assert_eq!(plan.flattened_features(), Some(64 * 5 * 5));
        // 28 -> 26 -> 24 -> 12 -> 10 -> 8
        let plan = ModelConfig::dropout_cnn().plan().unwrap();
        assert_eq!(plan.flattened_features(), Some(64 * 8 * 8));
    }

    #[test]
    fn test_output_softmax_is_folded_into_logits() {
        let plan = ModelConfig::fashion_cnn().plan().unwrap();
        assert!(plan.output_softmax);
        assert_eq!(
            plan.flat.last(),
            Some(&FlatStep::Dense {
                inputs: 256,
                units: 10,
                activation: Activation::Linear
            })
        );
        assert!(!ModelConfig::dense_digits().plan().unwrap().output_softmax);
    }

    #[test]
    fn test_summary_lists_every_layer() {
        let plan = ModelConfig::fashion_cnn().plan().unwrap();
        assert_eq!(plan.summary.len(), 7);
        assert_eq!(plan.summary[0].1, vec![32, 26, 26]);
        assert_eq!(plan.summary[3].1, vec![64, 5, 5]);
        assert_eq!(plan.summary[6].1, vec![10]);
    }

    #[test]
    fn test_empty_model_is_rejected() {
        let config = ModelConfig::new("empty", vec![]);
        assert!(matches!(config.plan(), Err(ModelError::EmptyModel)));
    }

    #[test]
    fn test_dense_without_flatten_is_rejected() {
        let config = ModelConfig::new("no_flatten", vec![LayerSpec::dense(10, Activation::Linear)]);
        assert!(matches!(
            config.plan(),
            Err(ModelError::InvalidLayer { index: 0, .. })
        ));
    }

    #[test]
    fn test_convolution_after_flatten_is_rejected() {
        let config = ModelConfig::new(
            "conv_after_flatten",
            vec![
                LayerSpec::Flatten,
                LayerSpec::conv2d(8, 3, Activation::Relu),
                LayerSpec::dense(10, Activation::Linear),
            ],
        );
        assert!(matches!(
            config.plan(),
            Err(ModelError::InvalidLayer { index: 1, .. })
        ));
    }

    #[test]
    fn test_oversized_kernel_is_rejected() {
        let config = ModelConfig::new(
            "huge_kernel",
            vec![
                LayerSpec::conv2d(8, 29, Activation::Relu),
                LayerSpec::Flatten,
                LayerSpec::dense(10, Activation::Linear),
            ],
        );
        assert!(matches!(
            config.plan(),
            Err(ModelError::InvalidLayer { index: 0, .. })
        ));
    }

    #[test]
    fn test_dropout_rate_must_be_below_one() {
        let config = ModelConfig::new(
            "bad_dropout",
            vec![
                LayerSpec::Flatten,
                LayerSpec::dropout(1.0),
                LayerSpec::dense(10, Activation::Linear),
            ],
        );
        assert!(matches!(
            config.plan(),
            Err(ModelError::InvalidLayer { index: 1, .. })
        ));
    }

    #[test]
    fn test_output_layer_must_match_classes() {
        let config = ModelConfig::new(
            "wrong_output",
            vec![LayerSpec::Flatten, LayerSpec::dense(5, Activation::Linear)],
        );
        assert!(matches!(
            config.plan(),
            Err(ModelError::OutputMismatch { expected: 10, .. })
        ));

        let config = config.with_num_classes(5);
        assert!(config.plan().is_ok());
    }

    #[test]
    fn test_load_from_json_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("model.json");
        fs::write(
            &path,
            r#"{
                "name": "tiny",
                "layers": [
                    {"type": "conv2d", "filters": 4, "kernel_size": 5, "activation": "relu"},
                    {"type": "max_pool2d", "pool_size": 4},
                    {"type": "flatten"},
                    {"type": "dense", "units": 10, "activation": "softmax"}
                ]
            }"#,
        )?;

        let config = ModelConfig::load(&path)?;
        assert_eq!(config.input, InputShape::default());
        assert_eq!(config.num_classes, 10);
        assert_eq!(config.plan()?.flattened_features(), Some(4 * 6 * 6));
        Ok(())
    }
}
