use crate::activations::Activation;
use crate::network_config::{FlatStep, ModelConfig, ModelError, Plan, SpatialStep};
use burn::module::{Ignored, Module, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Initializer, Linear, LinearConfig};
use burn::record::CompactRecorder;
use burn::tensor::{Tensor, activation::softmax, backend::Backend};
use std::fs;
use std::path::Path;

/// File holding the model description next to the recorded weights.
pub const MODEL_CONFIG_FILE: &str = "model.json";
/// Stem of the recorded weights, the recorder appends its own extension.
pub const MODEL_WEIGHTS_FILE: &str = "weights";

/// Glorot uniform for dense and convolution kernels.
fn glorot() -> Initializer {
    Initializer::XavierUniform { gain: 1.0 }
}

/// Biases start at zero, only kernels use [`glorot`].
fn zero_bias<B: Backend>(bias: Option<Param<Tensor<B, 1>>>) -> Option<Param<Tensor<B, 1>>> {
    bias.map(|param| Param::from_tensor(param.zeros_like()))
}

#[derive(Debug, Clone)]
enum SpatialOp {
    Conv(usize, Activation),
    Pool(usize),
    Dropout(usize),
}

#[derive(Debug, Clone)]
enum FlatOp {
    Dense(usize, Activation),
    Dropout(usize),
}

/// Order in which the layers of a [`Sequential`] are applied.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    spatial: Vec<SpatialOp>,
    flat: Vec<FlatOp>,
}

/// A feed-forward stack of layers built from a [`ModelConfig`].
///
/// Image layers run first on `[batch, channels, height, width]`, the result is
/// flattened, then the dense layers run on `[batch, features]`. The network emits
/// logits; use [`Sequential::probabilities`] for class probabilities.
///
/// # Examples
///
/// ```
/// use burn::backend::NdArray;
/// use burn::tensor::Tensor;
/// use neural_network::ModelConfig;
///
/// let device = Default::default();
/// let model = ModelConfig::dense_digits().init::<NdArray>(&device).unwrap();
/// let logits = model.forward(Tensor::zeros([2, 1, 28, 28], &device));
/// assert_eq!(logits.dims(), [2, 10]);
/// ```
#[derive(Module, Debug)]
pub struct Sequential<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pools: Vec<MaxPool2d>,
    dropouts: Vec<Dropout>,
    linears: Vec<Linear<B>>,
    layout: Ignored<Layout>,
}

impl<B: Backend> Sequential<B> {
    /// Instantiates the layers of a validated plan on `device`.
    pub fn new(plan: &Plan, device: &B::Device) -> Self {
        let mut convs = Vec::new();
        let mut pools = Vec::new();
        let mut dropouts = Vec::new();
        let mut linears = Vec::new();
        let mut layout = Layout::default();

        for step in &plan.spatial {
            let op = match step {
                SpatialStep::Conv {
                    channels,
                    kernel_size,
                    activation,
                } => {
                    let mut conv = Conv2dConfig::new(*channels, [*kernel_size, *kernel_size])
                        .with_initializer(glorot())
                        .init(device);
                    conv.bias = zero_bias(conv.bias);
                    convs.push(conv);
                    SpatialOp::Conv(convs.len() - 1, *activation)
                }
                SpatialStep::Pool { pool_size } => {
                    pools.push(
                        MaxPool2dConfig::new([*pool_size, *pool_size])
                            .with_strides([*pool_size, *pool_size])
                            .init(),
                    );
                    SpatialOp::Pool(pools.len() - 1)
                }
                SpatialStep::Dropout { rate } => {
                    dropouts.push(DropoutConfig::new(*rate).init());
                    SpatialOp::Dropout(dropouts.len() - 1)
                }
            };
            layout.spatial.push(op);
        }

        for step in &plan.flat {
            let op = match step {
                FlatStep::Dense {
                    inputs,
                    units,
                    activation,
                } => {
                    let mut linear = LinearConfig::new(*inputs, *units)
                        .with_initializer(glorot())
                        .init(device);
                    linear.bias = zero_bias(linear.bias);
                    linears.push(linear);
                    FlatOp::Dense(linears.len() - 1, *activation)
                }
                FlatStep::Dropout { rate } => {
                    dropouts.push(DropoutConfig::new(*rate).init());
                    FlatOp::Dropout(dropouts.len() - 1)
                }
            };
            layout.flat.push(op);
        }

        Self {
            convs,
            pools,
            dropouts,
            linears,
            layout: Ignored(layout),
        }
    }

    /// Computes class logits, `[batch, classes]`, for `[batch, channels, height, width]` images.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        for op in &self.layout.0.spatial {
            x = match op {
                SpatialOp::Conv(index, activation) => match self.convs.get(*index) {
                    Some(conv) => activation.apply(conv.forward(x)),
                    None => x,
                },
                SpatialOp::Pool(index) => match self.pools.get(*index) {
                    Some(pool) => pool.forward(x),
                    None => x,
                },
                SpatialOp::Dropout(index) => match self.dropouts.get(*index) {
                    Some(dropout) => dropout.forward(x),
                    None => x,
                },
            };
        }

        let mut x: Tensor<B, 2> = x.flatten(1, 3);
        for op in &self.layout.0.flat {
            x = match op {
                FlatOp::Dense(index, activation) => match self.linears.get(*index) {
                    Some(linear) => activation.apply(linear.forward(x)),
                    None => x,
                },
                FlatOp::Dropout(index) => match self.dropouts.get(*index) {
                    Some(dropout) => dropout.forward(x),
                    None => x,
                },
            };
        }
        x
    }

    /// Class probabilities, the softmax of [`Sequential::forward`].
    pub fn probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }
}

impl ModelConfig {
    /// Validates the configuration and builds the model on `device`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Sequential<B>, ModelError> {
        let plan = self.plan()?;
        let model = Sequential::new(&plan, device);
        log::debug!(
            "initialized {} with {} parameters",
            self.name,
            model.num_params()
        );
        Ok(model)
    }

    /// Renders a table of the layers and their output shapes.
    pub fn summary(&self) -> Result<String, ModelError> {
        let plan = self.plan()?;
        let mut lines = vec![format!("Model: \"{}\"", self.name)];
        lines.push(format!("{:<32} {}", "Layer", "Output shape"));
        for (layer, shape) in &plan.summary {
            lines.push(format!("{layer:<32} {shape:?}"));
        }
        Ok(lines.join("\n"))
    }
}

/// Saves the model weights and its configuration into `dir`.
pub fn save_model<B: Backend>(
    model: Sequential<B>,
    config: &ModelConfig,
    dir: &Path,
) -> Result<(), ModelError> {
    fs::create_dir_all(dir)?;
    config.save(&dir.join(MODEL_CONFIG_FILE))?;
    model
        .save_file(dir.join(MODEL_WEIGHTS_FILE), &CompactRecorder::new())
        .map_err(|e| ModelError::Record(format!("{e:?}")))?;
    log::info!("model saved to {}", dir.display());
    Ok(())
}

/// Loads a model saved with [`save_model`].
pub fn load_model<B: Backend>(
    dir: &Path,
    device: &B::Device,
) -> Result<(ModelConfig, Sequential<B>), ModelError> {
    let config = ModelConfig::load(&dir.join(MODEL_CONFIG_FILE))?;
    let model = config
        .init::<B>(device)?
        .load_file(dir.join(MODEL_WEIGHTS_FILE), &CompactRecorder::new(), device)
        .map_err(|e| ModelError::Record(format!("{e:?}")))?;
    Ok((config, model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerSpec;
    use approx::assert_relative_eq;
    use burn::backend::{Autodiff, NdArray};
    use burn::module::AutodiffModule;
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<TestBackend>;

    fn random_images(batch: usize) -> Tensor<TestBackend, 4> {
        Tensor::random(
            [batch, 1, 28, 28],
            Distribution::Uniform(0.0, 1.0),
            &Default::default(),
        )
    }

    fn values(tensor: Tensor<TestBackend, 2>) -> Vec<f32> {
        tensor.into_data().convert::<f32>().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_presets_produce_logits_per_class() {
        let device = Default::default();
        for config in [
            ModelConfig::dense_digits(),
            ModelConfig::fashion_cnn(),
            ModelConfig::dropout_cnn(),
        ] {
            let model = config.init::<TestBackend>(&device).unwrap();
            let output = model.forward(random_images(3));
            assert_eq!(output.dims(), [3, 10], "{}", config.name);
        }
    }

    #[test]
    fn test_parameter_counts_match_layer_shapes() {
        let device = Default::default();
        let model = ModelConfig::dense_digits()
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(model.num_params(), 784 * 128 + 128 + 128 * 10 + 10);

        let model = ModelConfig::fashion_cnn()
            .init::<TestBackend>(&device)
            .unwrap();
        let expected = (3 * 3 * 32 + 32) + (3 * 3 * 32 * 64 + 64) + (1600 * 256 + 256) + (256 * 10 + 10);
        assert_eq!(model.num_params(), expected);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let device = Default::default();
        let model = ModelConfig::fashion_cnn()
            .init::<TestBackend>(&device)
            .unwrap();
        let probabilities = values(model.probabilities(random_images(2)));
        for row in probabilities.chunks(10) {
            assert_relative_eq!(row.iter().sum::<f32>(), 1.0, epsilon = 1e-4);
            assert!(row.iter().all(|p| (0.0..=1.0).contains(p)));
        }
    }

    #[test]
    fn test_dropout_is_inactive_without_autodiff() {
        let device = Default::default();
        let config = ModelConfig::new(
            "dropout_only",
            vec![
                LayerSpec::Flatten,
                LayerSpec::dropout(0.9),
                LayerSpec::dense(10, crate::Activation::Linear),
            ],
        );
        let model = config.init::<TestAutodiffBackend>(&device).unwrap().valid();
        let images = random_images(1);

        let first = values(model.forward(images.clone()));
        let second = values(model.forward(images));
        assert_eq!(first, second);
    }

    #[test]
    fn test_dropout_is_active_while_training() {
        let device = Default::default();
        let config = ModelConfig::new(
            "dropout_only",
            vec![
                LayerSpec::Flatten,
                LayerSpec::dropout(0.9),
                LayerSpec::dense(10, crate::Activation::Linear),
            ],
        );
        let model = config.init::<TestAutodiffBackend>(&device).unwrap();
        let images = random_images(1);

        let training = values(model.forward(Tensor::from_inner(images.clone())).inner());
        let inference = values(model.valid().forward(images));
        assert_ne!(training, inference);
    }

    #[test]
    fn test_biases_start_at_zero() {
        let device = Default::default();
        let model = ModelConfig::fashion_cnn()
            .init::<TestBackend>(&device)
            .unwrap();

        let conv_biases = model.convs.iter().map(|conv| conv.bias.as_ref());
        let dense_biases = model.linears.iter().map(|linear| linear.bias.as_ref());
        for bias in conv_biases.chain(dense_biases) {
            let bias = bias.unwrap().val();
            assert_eq!(bias.abs().sum().into_scalar(), 0.0);
        }
    }

    #[test]
    fn test_save_and_load_restores_outputs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let device = Default::default();
        let config = ModelConfig::fashion_cnn();
        let model = config.init::<TestBackend>(&device)?;

        let input = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![0.5f32; 784], [1, 1, 28, 28]),
            &device,
        );
        let before = values(model.forward(input.clone()));

        save_model(model, &config, dir.path())?;
        assert!(dir.path().join(MODEL_CONFIG_FILE).is_file());

        let (loaded_config, loaded) = load_model::<TestBackend>(dir.path(), &device)?;
        assert_eq!(loaded_config, config);
        let after = values(loaded.forward(input));
        for (a, b) in before.iter().zip(&after) {
            assert_relative_eq!(a, b, epsilon = 1e-2);
        }
        Ok(())
    }

    #[test]
    fn test_summary_mentions_layers() {
        let summary = ModelConfig::dropout_cnn().summary().unwrap();
        assert!(summary.contains("dropout_cnn"));
        assert!(summary.contains("Conv2D(64, 3x3, relu)"));
        assert!(summary.contains("[64, 8, 8]"));
    }
}
