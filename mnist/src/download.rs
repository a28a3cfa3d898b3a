//! Fetches the gzipped IDX files of a dataset from its public mirror.

use crate::mnist::{gz_path, DatasetKind, MnistError, Split};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Every file a dataset needs, without the `.gz` suffix.
pub fn required_files() -> [&'static str; 4] {
    [
        Split::Train.images_file(),
        Split::Train.labels_file(),
        Split::Test.images_file(),
        Split::Test.labels_file(),
    ]
}

/// Returns true when `file` is present in `dir`, plain or gzipped.
fn is_present(dir: &Path, file: &str) -> bool {
    let path = dir.join(file);
    path.is_file() || gz_path(&path).is_file()
}

/// Lists the files still missing from `dir`.
pub fn missing_files(dir: &Path) -> Vec<&'static str> {
    required_files()
        .into_iter()
        .filter(|file| !is_present(dir, file))
        .collect()
}

/// Lists the files of one split still missing from `dir`.
pub fn missing_split_files(dir: &Path, split: Split) -> Vec<&'static str> {
    [split.images_file(), split.labels_file()]
        .into_iter()
        .filter(|file| !is_present(dir, file))
        .collect()
}

/// Downloads the files of `kind` that are missing from `dir`.
///
/// Files are stored compressed, [`crate::mnist::open_idx`] reads them transparently.
///
/// # Returns
/// * `Ok(Vec<PathBuf>)` with the files written by this call
/// * `Err(MnistError)` if a request or a write fails
pub fn download(kind: DatasetKind, dir: &Path) -> Result<Vec<PathBuf>, MnistError> {
    let missing = missing_files(dir);
    if missing.is_empty() {
        log::info!("{kind} already present in {}", dir.display());
        return Ok(Vec::new());
    }

    fs::create_dir_all(dir)?;
    let client = reqwest::blocking::Client::new();
    let mut written = Vec::with_capacity(missing.len());

    for file in missing {
        let url = format!("{}{file}.gz", kind.base_url());
        log::info!("downloading {url}");

        let to_download_error = |e: reqwest::Error| MnistError::Download {
            url: url.clone(),
            reason: e.to_string(),
        };
        let bytes = client
            .get(&url)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.bytes())
            .map_err(to_download_error)?;

        let target = gz_path(&dir.join(file));
        let mut out = fs::File::create(&target)?;
        out.write_all(&bytes)?;
        log::debug!("wrote {} bytes to {}", bytes.len(), target.display());
        written.push(target);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_missing_files_accepts_compressed_copies() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("train-images-idx3-ubyte").touch().unwrap();
        temp.child("t10k-labels-idx1-ubyte.gz").touch().unwrap();

        let missing = missing_files(temp.path());
        assert_eq!(
            missing,
            vec!["train-labels-idx1-ubyte", "t10k-images-idx3-ubyte"]
        );
    }

    #[test]
    fn test_missing_split_files_ignores_other_split() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("t10k-images-idx3-ubyte").touch().unwrap();
        temp.child("t10k-labels-idx1-ubyte.gz").touch().unwrap();

        assert!(missing_split_files(temp.path(), Split::Test).is_empty());
        assert_eq!(
            missing_split_files(temp.path(), Split::Train),
            vec!["train-images-idx3-ubyte", "train-labels-idx1-ubyte"]
        );
    }

    #[test]
    fn test_download_is_a_no_op_when_complete() {
        let temp = assert_fs::TempDir::new().unwrap();
        for file in required_files() {
            temp.child(file).touch().unwrap();
        }

        let written = download(DatasetKind::FashionMnist, temp.path()).unwrap();
        assert!(written.is_empty());
    }
}
