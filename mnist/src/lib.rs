pub mod download;
pub mod mnist;
pub mod standardize;

pub use crate::download::download;
pub use crate::mnist::*;
pub use crate::standardize::{
    Normalization, NormalizationMethod, StandardizationParams, PIXEL_MAX,
};
