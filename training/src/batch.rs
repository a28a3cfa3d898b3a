//! Conversion of dataset rows into device tensors.
use burn::tensor::{Int, Tensor, TensorData, backend::Backend};
use mnist::{IMAGE_COLS, IMAGE_ROWS, MnistData, one_hot};
use ndarray::Axis;
use neural_network::{LabelEncoding, Targets};

/// Images and labels of one mini-batch.
#[derive(Debug, Clone)]
pub struct MnistBatch<B: Backend> {
    /// `[batch, 1, 28, 28]`
    pub images: Tensor<B, 4>,
    pub targets: Targets<B>,
    /// Labels on the host, used for accuracy bookkeeping
    pub labels: Vec<u8>,
}

/// Builds [`MnistBatch`]es on one device with one label encoding.
#[derive(Debug, Clone)]
pub struct MnistBatcher<B: Backend> {
    device: B::Device,
    encoding: LabelEncoding,
    classes: usize,
}

impl<B: Backend> MnistBatcher<B> {
    pub fn new(device: B::Device, encoding: LabelEncoding, classes: usize) -> Self {
        Self {
            device,
            encoding,
            classes,
        }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Gathers the samples at `indices` into a batch.
    pub fn batch(&self, data: &MnistData, indices: &[usize]) -> MnistBatch<B> {
        let labels: Vec<u8> = indices
            .iter()
            .filter_map(|&index| data.label(index))
            .collect();

        let targets = match self.encoding {
            LabelEncoding::Sparse => {
                let values: Vec<i64> = labels.iter().map(|&label| i64::from(label)).collect();
                Targets::Sparse(Tensor::<B, 1, Int>::from_data(
                    TensorData::new(values, [labels.len()]),
                    &self.device,
                ))
            }
            LabelEncoding::OneHot => {
                let encoded = one_hot(&labels, self.classes);
                let values: Vec<f32> = encoded.iter().copied().collect();
                Targets::OneHot(Tensor::<B, 2>::from_data(
                    TensorData::new(values, [labels.len(), self.classes]),
                    &self.device,
                ))
            }
        };

        MnistBatch {
            images: self.images(data, indices),
            targets,
            labels,
        }
    }

    /// Images at `indices` as a `[batch, 1, 28, 28]` tensor.
    pub fn images(&self, data: &MnistData, indices: &[usize]) -> Tensor<B, 4> {
        let indices: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|&index| index < data.len())
            .collect();
        let selected = data.images().select(Axis(0), &indices);
        let values: Vec<f32> = selected.iter().copied().collect();

        Tensor::from_data(
            TensorData::new(values, [indices.len(), 1, IMAGE_ROWS, IMAGE_COLS]),
            &self.device,
        )
    }
}
