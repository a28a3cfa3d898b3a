//! Compute backend selected at build time.
//!
//! The CPU `ndarray` backend is the default, `--features wgpu` switches to the GPU.

#[cfg(not(feature = "wgpu"))]
mod selected {
    pub type Backend = burn::backend::NdArray<f32>;
    pub type Device = burn::backend::ndarray::NdArrayDevice;
    pub const NAME: &str = "ndarray (CPU)";
}

#[cfg(feature = "wgpu")]
mod selected {
    pub type Backend = burn::backend::Wgpu;
    pub type Device = burn::backend::wgpu::WgpuDevice;
    pub const NAME: &str = "wgpu (GPU)";
}

pub use selected::{Backend, Device, NAME};

/// Backend used for training, with automatic differentiation.
pub type TrainBackend = burn::backend::Autodiff<Backend>;

pub fn device() -> Device {
    Device::default()
}

/// One line naming the backend and its device.
pub fn describe() -> String {
    format!("{NAME}, device {:?}", device())
}
