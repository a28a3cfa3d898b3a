//! The end-to-end pipelines: load, normalize, build, train, evaluate, inspect.
use anyhow::{Context, Result, anyhow};
use burn::tensor::backend::{AutodiffBackend, Backend};
use mnist::download::{missing_files, missing_split_files};
use mnist::{DatasetKind, MnistData, Normalization, NormalizationMethod, Split, load_split};
use neural_network::{LabelEncoding, ModelConfig, load_model};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use training::{
    ConfusionMatrix, Evaluation, Misclassified, Trainer, TrainingConfig, TrainingConfigBuilder,
    TrainingHistory, check_model_fits_dataset, find_misclassified, predict, save_misclassified,
};

use crate::report::format_duration;

/// Describes how a saved model was produced, stored next to its weights.
pub const MANIFEST_FILE: &str = "experiment.json";
/// Sub-directory of the output holding the misclassified test images.
pub const MISCLASSIFIED_DIR: &str = "misclassified";

/// The three reference experiments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    /// Dense network on MNIST digits
    Digits,
    /// Small CNN on Fashion-MNIST
    Fashion,
    /// CNN with dropout on MNIST digits
    CnnDigits,
}

impl Preset {
    pub fn name(self) -> &'static str {
        match self {
            Preset::Digits => "digits",
            Preset::Fashion => "fashion",
            Preset::CnnDigits => "cnn-digits",
        }
    }

    pub fn dataset(self) -> DatasetKind {
        match self {
            Preset::Fashion => DatasetKind::FashionMnist,
            Preset::Digits | Preset::CnnDigits => DatasetKind::Mnist,
        }
    }

    pub fn model_config(self) -> ModelConfig {
        match self {
            Preset::Digits => ModelConfig::dense_digits(),
            Preset::Fashion => ModelConfig::fashion_cnn(),
            Preset::CnnDigits => ModelConfig::dropout_cnn(),
        }
    }

    /// Ten epochs of batch 32 with Adam at 1e-3. The convolutional presets use
    /// one-hot labels and validate on the test split after every epoch.
    pub fn training_config(self) -> TrainingConfig {
        let convolutional = !matches!(self, Preset::Digits);
        TrainingConfig {
            validate: convolutional,
            label_encoding: if convolutional {
                LabelEncoding::OneHot
            } else {
                LabelEncoding::Sparse
            },
            ..TrainingConfig::default()
        }
    }

    /// How many misclassified test images are written after training.
    pub fn misclassified_limit(self) -> usize {
        match self {
            Preset::Digits => 0,
            Preset::Fashion | Preset::CnnDigits => 10,
        }
    }
}

/// Everything the `train` command can override.
#[derive(Debug, Clone)]
pub struct ExperimentOptions {
    pub preset: Preset,
    pub data_dir: Option<PathBuf>,
    pub download: bool,
    pub epochs: Option<u32>,
    pub batch_size: Option<usize>,
    pub learning_rate: Option<f64>,
    pub seed: Option<u64>,
    pub early_stopping_patience: Option<u32>,
    pub standardize: bool,
    pub model_config: Option<PathBuf>,
    pub output: Option<PathBuf>,
    /// Keep only the first `n` samples of each split
    pub limit: Option<usize>,
    pub misclassified: Option<usize>,
}

impl ExperimentOptions {
    pub fn new(preset: Preset) -> Self {
        Self {
            preset,
            data_dir: None,
            download: false,
            epochs: None,
            batch_size: None,
            learning_rate: None,
            seed: None,
            early_stopping_patience: None,
            standardize: false,
            model_config: None,
            output: None,
            limit: None,
            misclassified: None,
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| self.preset.dataset().default_dir())
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| Path::new("models").join(self.preset.name()))
    }

    /// The preset's training configuration with the command line overrides applied.
    pub fn training_config(&self) -> Result<TrainingConfig> {
        let defaults = self.preset.training_config();
        let mut builder = TrainingConfigBuilder::default();
        builder
            .epochs(self.epochs.unwrap_or(defaults.epochs))
            .batch_size(self.batch_size.unwrap_or(defaults.batch_size))
            .learning_rate(self.learning_rate.unwrap_or(defaults.learning_rate))
            .seed(self.seed.unwrap_or(defaults.seed))
            .validate(defaults.validate)
            .label_encoding(defaults.label_encoding);
        if let Some(patience) = self.early_stopping_patience {
            builder.early_stopping_patience(patience);
        }
        builder
            .build()
            .map_err(|e| anyhow!("Invalid training configuration: {e}"))
    }

    /// The preset's model, or the layers loaded from `--model-config`.
    ///
    /// A loaded model must take `[1, 28, 28]` images and score the ten dataset classes.
    pub fn model_config(&self) -> Result<ModelConfig> {
        let Some(path) = &self.model_config else {
            return Ok(self.preset.model_config());
        };
        let config = ModelConfig::load(path)
            .with_context(|| format!("Failed to load model configuration {}", path.display()))?;
        check_model_fits_dataset(&config)
            .with_context(|| format!("Model configuration {} does not fit", path.display()))?;
        Ok(config)
    }

    fn normalization_method(&self) -> NormalizationMethod {
        if self.standardize {
            NormalizationMethod::Standardize
        } else {
            NormalizationMethod::Scale
        }
    }
}

/// Saved next to the model so `test` can rebuild the same inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub preset: Preset,
    pub dataset: DatasetKind,
    pub normalization: Normalization,
    pub label_encoding: LabelEncoding,
}

impl Manifest {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MANIFEST_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

/// What a finished `train` run produced.
#[derive(Debug, Clone)]
pub struct ExperimentReport {
    pub evaluation: Evaluation,
    pub history: TrainingHistory,
    pub misclassified: Vec<Misclassified>,
    pub images: Vec<PathBuf>,
    pub output_dir: PathBuf,
}

/// Makes sure the dataset files are in `dir`, downloading them when allowed.
pub fn prepare_data(kind: DatasetKind, dir: &Path, download: bool) -> Result<()> {
    if download {
        let written = mnist::download(kind, dir)
            .with_context(|| format!("Failed to download {kind} into {}", dir.display()))?;
        if !written.is_empty() {
            println!("Downloaded {} files into {}", written.len(), dir.display());
        }
        return Ok(());
    }

    require_files(kind, dir, &missing_files(dir))
}

fn require_files(kind: DatasetKind, dir: &Path, missing: &[&str]) -> Result<()> {
    if missing.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(
            "{kind} files {} are missing from {}, rerun with --download or set {}",
            missing.join(", "),
            dir.display(),
            mnist::DATA_DIR_ENV
        ))
    }
}

fn load(kind: DatasetKind, dir: &Path, split: Split, limit: Option<usize>) -> Result<MnistData> {
    let data = load_split(kind, dir, split)
        .with_context(|| format!("Failed to load the {kind} {split} split"))?;
    Ok(match limit {
        Some(count) => data.truncate(count),
        None => data,
    })
}

/// Runs a full training experiment and writes its artifacts into the output directory.
pub fn run<B: AutodiffBackend>(
    options: &ExperimentOptions,
    device: B::Device,
) -> Result<ExperimentReport> {
    let preset = options.preset;
    let kind = preset.dataset();

    match preset {
        Preset::Digits => println!("Compute device: {device:?}"),
        Preset::Fashion => {
            for (i, name) in kind.class_names().iter().enumerate() {
                println!("Class {i}: {name}");
            }
        }
        Preset::CnnDigits => {}
    }

    // Step 1: load the data
    let data_dir = options.data_dir();
    prepare_data(kind, &data_dir, options.download)?;
    let start_time = Instant::now();
    let train = load(kind, &data_dir, Split::Train, options.limit)?;
    let test = load(kind, &data_dir, Split::Test, options.limit)?;
    println!(
        "Loaded {} training and {} test images of {kind} in {:.2?}",
        train.len(),
        test.len(),
        start_time.elapsed()
    );

    // Step 2: normalize with statistics of the training split only
    let normalization = Normalization::fit(options.normalization_method(), &train)
        .context("Failed to fit the normalization")?;
    let train = normalization.apply(train);
    let test = normalization.apply(test);

    // Step 3: build the model
    let model_config = options.model_config()?;
    let training_config = options.training_config()?;
    println!("{}", model_config.summary()?);
    let mut trainer = Trainer::<B>::new(model_config, training_config, device.clone())
        .context("Failed to build the model")?;

    // Step 4: train
    let start_time = Instant::now();
    trainer.fit(&train, Some(&test)).context("Training failed")?;
    let total_duration = start_time.elapsed();
    println!(
        "Total training time: {} ({:.2?})",
        format_duration(total_duration),
        total_duration
    );
    trainer.history().print_summary();

    // Step 5: evaluate
    let evaluation = trainer.evaluate(&test).context("Evaluation failed")?;
    println!("Test accuracy: {}", evaluation.accuracy);
    log::info!("Test loss: {:.4}", evaluation.loss);

    let output_dir = options.output_dir();
    trainer
        .save(&output_dir)
        .with_context(|| format!("Failed to save the model to {}", output_dir.display()))?;
    Manifest {
        preset,
        dataset: kind,
        normalization,
        label_encoding: trainer.config().label_encoding,
    }
    .save(&output_dir)?;
    println!("Model saved to {}", output_dir.display());

    // Inspect the mistakes
    let limit = options
        .misclassified
        .unwrap_or_else(|| preset.misclassified_limit());
    let (misclassified, images) = if limit > 0 {
        let predictions = trainer.predict(&test).context("Prediction failed")?;
        let labels: Vec<u8> = test.labels().to_vec();
        let misclassified = find_misclassified(&predictions, &labels, limit);
        let images = save_misclassified(
            &test,
            &misclassified,
            kind,
            &output_dir.join(MISCLASSIFIED_DIR),
        )
        .context("Failed to save misclassified images")?;
        for (item, path) in misclassified.iter().zip(&images) {
            println!("{} -> {}", item.title(), path.display());
        }
        (misclassified, images)
    } else {
        (Vec::new(), Vec::new())
    };

    Ok(ExperimentReport {
        evaluation,
        history: trainer.history().clone(),
        misclassified,
        images,
        output_dir,
    })
}

/// Results of testing a saved model.
#[derive(Debug, Clone)]
pub struct TestReport {
    pub dataset: DatasetKind,
    pub confusion_matrix: ConfusionMatrix,
}

/// Reloads a saved model and scores it on the test split of its dataset.
pub fn test<B: Backend>(
    model_dir: &Path,
    data_dir: Option<&Path>,
    batch_size: usize,
    device: B::Device,
) -> Result<TestReport> {
    let manifest = Manifest::load(model_dir)?;
    let (model_config, model) = load_model::<B>(model_dir, &device)
        .with_context(|| format!("Failed to load the model from {}", model_dir.display()))?;
    println!("Loaded {} from {}", model_config.name, model_dir.display());

    let kind = manifest.dataset;
    let data_dir = data_dir.map_or_else(|| kind.default_dir(), Path::to_path_buf);
    require_files(kind, &data_dir, &missing_split_files(&data_dir, Split::Test))?;
    let test = manifest
        .normalization
        .apply(load(kind, &data_dir, Split::Test, None)?);

    println!("\nTesting network predictions...");
    let predictions = predict(&model, &test, batch_size, &device).context("Prediction failed")?;
    let labels: Vec<u8> = test.labels().to_vec();
    let confusion_matrix =
        ConfusionMatrix::from_predictions(&predictions, &labels, model_config.num_classes);

    Ok(TestReport {
        dataset: kind,
        confusion_matrix,
    })
}

impl TestReport {
    pub fn print(&self) {
        let matrix = &self.confusion_matrix;
        println!("\nTest Results:");
        println!("Total test examples: {}", matrix.total());
        println!("Correct predictions: {}", matrix.correct());
        println!("Overall accuracy: {:.2}%", matrix.accuracy() * 100.0);

        println!("\nPer-class Performance:");
        println!("{}", matrix.report(self.dataset.class_names()));

        println!("\nConfusion Matrix:");
        println!("{matrix}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_follow_reference_experiments() {
        assert_eq!(Preset::Digits.dataset(), DatasetKind::Mnist);
        assert_eq!(Preset::Fashion.dataset(), DatasetKind::FashionMnist);
        assert_eq!(Preset::CnnDigits.dataset(), DatasetKind::Mnist);

        let digits = Preset::Digits.training_config();
        assert!(!digits.validate);
        assert_eq!(digits.label_encoding, LabelEncoding::Sparse);
        assert_eq!(digits.epochs, 10);
        assert_eq!(digits.batch_size, 32);

        for preset in [Preset::Fashion, Preset::CnnDigits] {
            let config = preset.training_config();
            assert!(config.validate);
            assert_eq!(config.label_encoding, LabelEncoding::OneHot);
            assert_eq!(preset.misclassified_limit(), 10);
        }
        assert_eq!(Preset::Digits.misclassified_limit(), 0);
    }

    #[test]
    fn test_overrides_apply_to_preset() -> Result<()> {
        let mut options = ExperimentOptions::new(Preset::Fashion);
        options.epochs = Some(2);
        options.learning_rate = Some(0.01);

        let config = options.training_config()?;
        assert_eq!(config.epochs, 2);
        assert_eq!(config.learning_rate, 0.01);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.label_encoding, LabelEncoding::OneHot);
        Ok(())
    }

    #[test]
    fn test_default_output_dir_uses_preset_name() {
        let options = ExperimentOptions::new(Preset::CnnDigits);
        assert_eq!(options.output_dir(), Path::new("models").join("cnn-digits"));
    }

    #[test]
    fn test_missing_data_without_download_fails() {
        let dir = tempfile::tempdir().unwrap();
        let error = prepare_data(DatasetKind::Mnist, dir.path(), false).unwrap_err();
        assert!(error.to_string().contains("--download"));
    }

    #[test]
    fn test_model_config_file_must_fit_dataset() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("model.json");
        let mut options = ExperimentOptions::new(Preset::Digits);
        options.model_config = Some(path.clone());

        let layers = ModelConfig::dense_digits().layers;
        ModelConfig::new("custom", layers.clone()).save(&path)?;
        assert_eq!(options.model_config()?.name, "custom");

        ModelConfig::new("small", layers)
            .with_input(neural_network::InputShape::new(1, 14, 14))
            .save(&path)?;
        let error = options.model_config().unwrap_err();
        assert!(format!("{error:#}").contains("[1, 14, 14]"));
        Ok(())
    }

    #[test]
    fn test_manifest_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let manifest = Manifest {
            preset: Preset::CnnDigits,
            dataset: DatasetKind::Mnist,
            normalization: Normalization::Scale,
            label_encoding: LabelEncoding::OneHot,
        };
        manifest.save(dir.path())?;
        assert_eq!(Manifest::load(dir.path())?, manifest);
        Ok(())
    }
}
