//! MNIST dataset loader module for neural network training and testing.
//!
//! This module provides functionality to load and handle the MNIST family of datasets
//! (handwritten digits and Fashion-MNIST). Both ship in the same IDX file format, so a
//! single reader handles them. Images are kept as `(n, 28, 28)` arrays and labels as
//! class indices; normalization lives in [`crate::standardize`].

use flate2::read::GzDecoder;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const IMAGE_MAGIC_NUMBER: u32 = 2051;
pub const LABEL_MAGIC_NUMBER: u32 = 2049;
pub const IMAGE_ROWS: usize = 28;
pub const IMAGE_COLS: usize = 28;
pub const INPUT_NODES: usize = IMAGE_ROWS * IMAGE_COLS;
pub const OUTPUT_NODES: usize = 10;

/// Environment variable overriding the root directory datasets are read from.
pub const DATA_DIR_ENV: &str = "MNIST_DATA_DIR";

/// Errors that can occur while handling MNIST data
#[derive(Debug, Error)]
pub enum MnistError {
    /// Wrapper for standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error for invalid magic numbers in MNIST files
    #[error("Invalid magic number for {kind} file: expected {expected}, got {actual}")]
    InvalidMagicNumber {
        kind: &'static str,
        expected: u32,
        actual: u32,
    },
    /// Error for mismatches between images and labels
    #[error("Data mismatch: {0}")]
    DataMismatch(String),
    /// Error for invalid image dimensions
    #[error(
        "Invalid image dimensions: expected {expected} pixels, got {actual} pixels ({rows}x{cols})"
    )]
    InvalidDimensions {
        expected: usize,
        actual: usize,
        rows: usize,
        cols: usize,
    },
    /// A label byte outside of the class range
    #[error("Invalid label {label} at index {index}: expected a class below 10")]
    InvalidLabel { index: usize, label: u8 },
    /// Failure while fetching dataset files
    #[error("Download failed for {url}: {reason}")]
    Download { url: String, reason: String },
}

/// The datasets this crate knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetKind {
    /// Handwritten digits 0-9
    Mnist,
    /// Zalando article images, same layout as MNIST
    FashionMnist,
}

const DIGIT_CLASSES: [&str; OUTPUT_NODES] = ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];

const FASHION_CLASSES: [&str; OUTPUT_NODES] = [
    "T-shirt/top",
    "Trouser",
    "Pullover",
    "Dress",
    "Coat",
    "Sandal",
    "Shirt",
    "Sneaker",
    "Bag",
    "Ankle boot",
];

impl DatasetKind {
    /// Short name, also used as the default sub-directory of the data root.
    pub fn name(&self) -> &'static str {
        match self {
            DatasetKind::Mnist => "mnist",
            DatasetKind::FashionMnist => "fashion-mnist",
        }
    }

    /// Human readable names of the ten classes, indexed by label.
    pub fn class_names(&self) -> &'static [&'static str; OUTPUT_NODES] {
        match self {
            DatasetKind::Mnist => &DIGIT_CLASSES,
            DatasetKind::FashionMnist => &FASHION_CLASSES,
        }
    }

    /// Name of a single class, `"?"` when the index is out of range.
    pub fn class_name(&self, class: usize) -> &'static str {
        self.class_names().get(class).copied().unwrap_or("?")
    }

    /// Mirror serving the gzipped IDX files.
    pub fn base_url(&self) -> &'static str {
        match self {
            DatasetKind::Mnist => "https://storage.googleapis.com/cvdf-datasets/mnist/",
            DatasetKind::FashionMnist => {
                "https://storage.googleapis.com/tensorflow/tf-keras-datasets/"
            }
        }
    }

    /// Returns the directory this dataset is read from by default.
    ///
    /// `$MNIST_DATA_DIR/<name>` when the variable is set, `./data/<name>` otherwise.
    pub fn default_dir(&self) -> PathBuf {
        let root = std::env::var_os(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data"));
        root.join(self.name())
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetKind::Mnist => write!(f, "MNIST"),
            DatasetKind::FashionMnist => write!(f, "Fashion-MNIST"),
        }
    }
}

/// Training or held-out test portion of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn images_file(&self) -> &'static str {
        match self {
            Split::Train => "train-images-idx3-ubyte",
            Split::Test => "t10k-images-idx3-ubyte",
        }
    }

    pub fn labels_file(&self) -> &'static str {
        match self {
            Split::Train => "train-labels-idx1-ubyte",
            Split::Test => "t10k-labels-idx1-ubyte",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Train => write!(f, "training"),
            Split::Test => write!(f, "test"),
        }
    }
}

/// Container for MNIST dataset pairs (images and their corresponding labels)
#[derive(Debug, Clone)]
pub struct MnistData {
    images: Array3<f32>,
    labels: Array1<u8>,
}

impl MnistData {
    /// Creates a new MnistData instance from an image array and its labels.
    ///
    /// # Arguments
    /// * `images` - Array of shape `(n, 28, 28)`
    /// * `labels` - Class index of every image
    ///
    /// # Returns
    /// * `Ok(MnistData)` if the number of images matches the number of labels
    /// * `Err(MnistError::DataMismatch)` if there's a mismatch between images and labels
    /// * `Err(MnistError::InvalidDimensions)` if the images are not 28x28
    /// * `Err(MnistError::InvalidLabel)` if a label is not a valid class
    ///
    /// # Example
    /// ```
    /// use mnist::mnist::MnistData;
    /// use ndarray::{Array1, Array3};
    ///
    /// let images = Array3::<f32>::zeros((2, 28, 28));
    /// let labels = Array1::from(vec![3u8, 7]);
    /// let data = MnistData::new(images, labels).unwrap();
    /// assert_eq!(data.len(), 2);
    /// ```
    pub fn new(images: Array3<f32>, labels: Array1<u8>) -> Result<Self, MnistError> {
        let (count, rows, cols) = images.dim();
        if count != labels.len() {
            return Err(MnistError::DataMismatch(format!(
                "Number of images ({}) does not match number of labels ({})",
                count,
                labels.len()
            )));
        }
        if rows * cols != INPUT_NODES || rows != IMAGE_ROWS {
            return Err(MnistError::InvalidDimensions {
                expected: INPUT_NODES,
                actual: rows * cols,
                rows,
                cols,
            });
        }
        if let Some((index, &label)) = labels
            .iter()
            .enumerate()
            .find(|(_, label)| usize::from(**label) >= OUTPUT_NODES)
        {
            return Err(MnistError::InvalidLabel { index, label });
        }
        Ok(Self { images, labels })
    }

    /// Builds a dataset from raw pixel bytes, without any scaling.
    pub fn from_raw(images: Array3<u8>, labels: Array1<u8>) -> Result<Self, MnistError> {
        Self::new(images.mapv(f32::from), labels)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn images(&self) -> &Array3<f32> {
        &self.images
    }

    pub(crate) fn images_mut(&mut self) -> &mut Array3<f32> {
        &mut self.images
    }

    pub fn labels(&self) -> &Array1<u8> {
        &self.labels
    }

    /// Returns the image at `index`, if any.
    pub fn image(&self, index: usize) -> Option<ArrayView2<'_, f32>> {
        (index < self.len()).then(|| self.images.index_axis(Axis(0), index))
    }

    pub fn label(&self, index: usize) -> Option<u8> {
        self.labels.get(index).copied()
    }

    /// Keeps only the first `count` samples.
    pub fn truncate(self, count: usize) -> Self {
        if count >= self.len() {
            return self;
        }
        Self {
            images: self
                .images
                .slice_axis(Axis(0), (0..count).into())
                .to_owned(),
            labels: self.labels.slice_axis(Axis(0), (0..count).into()).to_owned(),
        }
    }
}

/// Creates a progress bar style with a consistent look
pub fn create_progress_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

/// Reads a 32-bit unsigned integer in big-endian format
fn read_u32<R: Read>(reader: &mut R) -> std::io::Result<u32> {
    let mut buffer = [0; 4];
    reader.read_exact(&mut buffer)?;
    Ok(u32::from_be_bytes(buffer))
}

/// Reads MNIST image data from an IDX stream.
///
/// # Arguments
/// * `reader` - Source of the IDX bytes
/// * `progress` - Progress bar for tracking loading progress
///
/// # Returns
/// * `Ok(Array3<u8>)` of shape `(images, 28, 28)` with raw pixel values
/// * `Err(MnistError)` if reading fails or format is invalid
///
/// # Format
/// The IDX file format consists of:
/// * 32-bit magic number (2051)
/// * 32-bit number of images
/// * 32-bit number of rows
/// * 32-bit number of columns
/// * Pixels in row-major order (1 byte per pixel)
pub fn read_mnist_images<R: Read>(
    mut reader: R,
    progress: &ProgressBar,
) -> Result<Array3<u8>, MnistError> {
    let magic_number = read_u32(&mut reader)?;
    if magic_number != IMAGE_MAGIC_NUMBER {
        return Err(MnistError::InvalidMagicNumber {
            kind: "images",
            expected: IMAGE_MAGIC_NUMBER,
            actual: magic_number,
        });
    }

    let num_images = read_u32(&mut reader)? as usize;
    let num_rows = read_u32(&mut reader)? as usize;
    let num_cols = read_u32(&mut reader)? as usize;
    let pixels_per_image = num_rows * num_cols;

    if num_rows != IMAGE_ROWS || num_cols != IMAGE_COLS {
        return Err(MnistError::InvalidDimensions {
            expected: INPUT_NODES,
            actual: pixels_per_image,
            rows: num_rows,
            cols: num_cols,
        });
    }

    progress.set_length(num_images as u64);
    progress.set_message("Loading images...");

    // Header counts are unchecked until the bytes arrive.
    let mut buffer = Vec::new();
    let mut image = vec![0u8; pixels_per_image];
    for _ in 0..num_images {
        reader.read_exact(&mut image)?;
        buffer.extend_from_slice(&image);
        progress.inc(1);
    }

    progress.finish_with_message("Images loaded successfully");
    Array3::from_shape_vec((num_images, num_rows, num_cols), buffer)
        .map_err(|e| MnistError::DataMismatch(e.to_string()))
}

/// Reads MNIST label data from an IDX stream.
///
/// # Format
/// The IDX file format consists of:
/// * 32-bit magic number (2049)
/// * 32-bit number of labels
/// * Labels (1 byte per label)
pub fn read_mnist_labels<R: Read>(
    mut reader: R,
    progress: &ProgressBar,
) -> Result<Array1<u8>, MnistError> {
    let magic_number = read_u32(&mut reader)?;
    if magic_number != LABEL_MAGIC_NUMBER {
        return Err(MnistError::InvalidMagicNumber {
            kind: "labels",
            expected: LABEL_MAGIC_NUMBER,
            actual: magic_number,
        });
    }

    let num_labels = read_u32(&mut reader)? as usize;
    progress.set_length(num_labels as u64);
    progress.set_message("Loading labels...");

    let mut labels = Vec::new();
    reader
        .by_ref()
        .take(num_labels as u64)
        .read_to_end(&mut labels)?;
    if labels.len() < num_labels {
        return Err(MnistError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("expected {num_labels} labels, found {}", labels.len()),
        )));
    }
    if let Some((index, &label)) = labels
        .iter()
        .enumerate()
        .find(|(_, label)| usize::from(**label) >= OUTPUT_NODES)
    {
        return Err(MnistError::InvalidLabel { index, label });
    }
    progress.inc(num_labels as u64);

    progress.finish_with_message("Labels loaded successfully");
    Ok(Array1::from(labels))
}

/// Appends `.gz` to a file path.
pub(crate) fn gz_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

/// Opens an IDX file, falling back to its gzipped sibling when the plain file is missing.
pub fn open_idx(path: impl AsRef<Path>) -> Result<Box<dyn Read>, MnistError> {
    let path = path.as_ref();
    if path.is_file() {
        return Ok(Box::new(BufReader::new(File::open(path)?)));
    }

    let compressed = gz_path(path);
    if compressed.is_file() {
        log::debug!("reading compressed {}", compressed.display());
        let file = BufReader::new(File::open(&compressed)?);
        return Ok(Box::new(BufReader::new(GzDecoder::new(file))));
    }

    Err(MnistError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!(
            "neither {} nor {} exists",
            path.display(),
            compressed.display()
        ),
    )))
}

/// Loads MNIST images and labels from the specified file paths.
///
/// # Arguments
/// * `images_path` - Path to the images file (or its `.gz` sibling)
/// * `labels_path` - Path to the labels file (or its `.gz` sibling)
///
/// # Returns
/// * `Ok(MnistData)` containing paired images and labels, pixels still in `0..=255`
/// * `Err(MnistError)` if loading fails
pub fn load_mnist_data(
    images_path: impl AsRef<Path>,
    labels_path: impl AsRef<Path>,
) -> Result<MnistData, MnistError> {
    let multi_progress = MultiProgress::new();
    let style = create_progress_style(
        "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}",
    );

    let images_progress = multi_progress.add(ProgressBar::new(0));
    let labels_progress = multi_progress.add(ProgressBar::new(0));
    images_progress.set_style(style.clone());
    labels_progress.set_style(style);

    let images = read_mnist_images(open_idx(images_path)?, &images_progress)?;
    let labels = read_mnist_labels(open_idx(labels_path)?, &labels_progress)?;

    MnistData::from_raw(images, labels)
}

/// Loads one split of a dataset stored in `dir`.
pub fn load_split(kind: DatasetKind, dir: &Path, split: Split) -> Result<MnistData, MnistError> {
    log::info!("loading {kind} {split} split from {}", dir.display());
    let data = load_mnist_data(dir.join(split.images_file()), dir.join(split.labels_file()))?;
    log::info!("loaded {} {kind} {split} examples", data.len());
    Ok(data)
}

/// Loads the `(train, test)` pair of a dataset stored in `dir`.
pub fn load_dataset(kind: DatasetKind, dir: &Path) -> Result<(MnistData, MnistData), MnistError> {
    let train = load_split(kind, dir, Split::Train)?;
    let test = load_split(kind, dir, Split::Test)?;
    Ok((train, test))
}

/// One-hot encodes class labels into a `(n, classes)` matrix.
pub fn one_hot(labels: &[u8], classes: usize) -> Array2<f32> {
    let mut encoded = Array2::zeros((labels.len(), classes));
    for (mut row, &label) in encoded.rows_mut().into_iter().zip(labels) {
        if let Some(cell) = row.get_mut(usize::from(label)) {
            *cell = 1.0;
        }
    }
    encoded
}

/// Index of the largest value, the class a score or one-hot vector points to.
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(idx, _)| idx)
}
