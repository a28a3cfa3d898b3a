// Modules
pub mod activations;
pub mod layer;
pub mod loss;
pub mod network;
pub mod network_config;

pub use activations::Activation;
pub use layer::LayerSpec;
pub use loss::{LabelEncoding, Targets, cross_entropy};
pub use network::{MODEL_CONFIG_FILE, Sequential, load_model, save_model};
pub use network_config::{InputShape, ModelConfig, ModelError, Plan};
