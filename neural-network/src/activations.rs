use burn::tensor::{Tensor, activation, backend::Backend};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Activation applied to the output of a dense or convolutional layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Identity, the layer outputs raw scores
    #[default]
    Linear,
    Relu,
    /// Normalizes the last dimension into a probability distribution
    Softmax,
}

impl Activation {
    /// Applies the activation to a tensor of any rank. Softmax runs over the last dimension.
    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Linear => x,
            Activation::Relu => activation::relu(x),
            Activation::Softmax => activation::softmax(x, D - 1),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Activation::Linear => write!(f, "linear"),
            Activation::Relu => write!(f, "relu"),
            Activation::Softmax => write!(f, "softmax"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;

    fn values(tensor: Tensor<TestBackend, 2>) -> Vec<f32> {
        tensor.into_data().convert::<f32>().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_relu_clamps_negatives() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![-1.0f32, 0.5, 2.0, -0.1], [2, 2]),
            &device,
        );
        assert_eq!(values(Activation::Relu.apply(x)), vec![0.0, 0.5, 2.0, 0.0]);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![1.0f32, 2.0, 3.0, -5.0, 0.0, 5.0], [2, 3]),
            &device,
        );
        let probabilities = values(Activation::Softmax.apply(x));
        for row in probabilities.chunks(3) {
            assert_relative_eq!(row.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        }
        assert!(probabilities[2] > probabilities[1]);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&Activation::Relu).unwrap(), "\"relu\"");
        let activation: Activation = serde_json::from_str("\"softmax\"").unwrap();
        assert_eq!(activation, Activation::Softmax);
    }
}
