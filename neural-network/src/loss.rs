//! Categorical cross-entropy over logits, for integer or one-hot labels.
use burn::nn::loss::CrossEntropyLossConfig;
use burn::tensor::{Int, Tensor, activation::log_softmax, backend::Backend};
use serde::{Deserialize, Serialize};

/// How class labels are presented to the loss.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelEncoding {
    /// One class index per sample
    #[default]
    Sparse,
    /// One `[classes]` indicator vector per sample
    OneHot,
}

/// Labels of a batch, already on the device.
#[derive(Debug, Clone)]
pub enum Targets<B: Backend> {
    Sparse(Tensor<B, 1, Int>),
    OneHot(Tensor<B, 2>),
}

impl<B: Backend> Targets<B> {
    pub fn encoding(&self) -> LabelEncoding {
        match self {
            Targets::Sparse(_) => LabelEncoding::Sparse,
            Targets::OneHot(_) => LabelEncoding::OneHot,
        }
    }

    /// Class index of every sample.
    pub fn classes(&self) -> Tensor<B, 1, Int> {
        match self {
            Targets::Sparse(labels) => labels.clone(),
            Targets::OneHot(encoded) => encoded.clone().argmax(1).squeeze(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        match self {
            Targets::Sparse(labels) => labels.dims()[0],
            Targets::OneHot(encoded) => encoded.dims()[0],
        }
    }
}

/// Mean cross-entropy between `logits` and `targets`.
///
/// Integer labels go through burn's `CrossEntropyLoss`; one-hot labels use
/// `-mean(sum(targets * log_softmax(logits)))`. Both give the same value for the
/// same labels.
pub fn cross_entropy<B: Backend>(logits: Tensor<B, 2>, targets: &Targets<B>) -> Tensor<B, 1> {
    match targets {
        Targets::Sparse(labels) => CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits, labels.clone()),
        Targets::OneHot(encoded) => (encoded.clone() * log_softmax(logits, 1))
            .sum_dim(1)
            .mean()
            .neg(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::backend::NdArray;
    use burn::tensor::{ElementConversion, TensorData};

    type TestBackend = NdArray<f32>;

    fn logits() -> Tensor<TestBackend, 2> {
        Tensor::from_data(
            TensorData::new(vec![2.0f32, 0.5, -1.0, 0.1, 0.2, 3.0], [2, 3]),
            &Default::default(),
        )
    }

    fn scalar(tensor: Tensor<TestBackend, 1>) -> f32 {
        tensor.into_scalar().elem::<f32>()
    }

    #[test]
    fn test_sparse_and_one_hot_losses_agree() {
        let device = Default::default();
        let sparse = Targets::Sparse(Tensor::<TestBackend, 1, Int>::from_data(
            TensorData::new(vec![0i64, 2], [2]),
            &device,
        ));
        let one_hot = Targets::OneHot(Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![1.0f32, 0.0, 0.0, 0.0, 0.0, 1.0], [2, 3]),
            &device,
        ));

        let a = scalar(cross_entropy(logits(), &sparse));
        let b = scalar(cross_entropy(logits(), &one_hot));
        assert_relative_eq!(a, b, epsilon = 1e-5);
    }

    #[test]
    fn test_one_hot_loss_matches_hand_computation() {
        let one_hot = Targets::OneHot(Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.0f32, 1.0, 0.0, 1.0, 0.0, 0.0], [2, 3]),
            &Default::default(),
        ));

        let log_softmax = |row: [f32; 3], class: usize| {
            let sum: f32 = row.iter().map(|x| x.exp()).sum();
            row[class] - sum.ln()
        };
        let expected = -(log_softmax([2.0, 0.5, -1.0], 1) + log_softmax([0.1, 0.2, 3.0], 0)) / 2.0;

        assert_relative_eq!(scalar(cross_entropy(logits(), &one_hot)), expected, epsilon = 1e-5);
    }

    #[test]
    fn test_classes_from_one_hot() {
        let one_hot = Targets::OneHot(Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.0f32, 0.0, 1.0, 0.0, 1.0, 0.0], [2, 3]),
            &Default::default(),
        ));
        let classes = one_hot
            .classes()
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .unwrap();
        assert_eq!(classes, vec![2, 1]);
        assert_eq!(one_hot.batch_size(), 2);
        assert_eq!(one_hot.encoding(), LabelEncoding::OneHot);
    }
}
