mod batch;
mod evaluation;
mod misclassified;
mod training;
mod training_config;
mod training_history;

pub use batch::{MnistBatch, MnistBatcher};
pub use evaluation::{ConfusionMatrix, Evaluation, Prediction, evaluate, predict};
pub use misclassified::{Misclassified, find_misclassified, save_misclassified, to_grayscale};
pub use training::{
    HISTORY_FILE, TRAINING_CONFIG_FILE, Trainer, TrainingError, check_model_fits_dataset,
};
pub use training_config::{TrainingConfig, TrainingConfigBuilder, TrainingConfigBuilderError};
pub use training_history::TrainingHistory;

pub mod prelude {
    pub use crate::Trainer;
    pub use crate::TrainingConfig;
    pub use crate::TrainingHistory;
    pub use crate::{ConfusionMatrix, Evaluation, Misclassified, Prediction};
}
