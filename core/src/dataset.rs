//! Dataset provider: archive extraction, CSV loading and train/validation split.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::{Error, Result};

const DATASET_URL: &str = "https://www.kaggle.com/datasets/deepcontractor/smoke-detection-dataset";

/// Extract the dataset archive into a fresh extraction directory
pub fn unzip_dataset(settings: &Settings) -> Result<PathBuf> {
    let zip_path = &settings.dataset_zip_path;
    if !zip_path.exists() {
        return Err(Error::ConfigurationMissing(format!(
            "{} missing. Download it from kaggle link: {DATASET_URL}",
            zip_path.display()
        )));
    }

    let extracted_dir = &settings.dataset_extracted_dir;
    if extracted_dir.exists() {
        fs::remove_dir_all(extracted_dir)?;
    }
    fs::create_dir_all(extracted_dir)?;

    info!(
        "Extracting {} into {}",
        zip_path.display(),
        extracted_dir.display()
    );
    let mut archive = ::zip::ZipArchive::new(fs::File::open(zip_path)?)?;
    archive.extract(extracted_dir)?;

    let file_path = settings.dataset_file_path();
    if !file_path.exists() {
        return Err(Error::ConfigurationMissing(format!(
            "{} does not contain {}",
            zip_path.display(),
            settings.dataset_file_name
        )));
    }
    Ok(file_path)
}

/// Load the dataset, extracting the archive first when needed
pub fn read_dataset(settings: &Settings) -> Result<DataFrame> {
    let file_path = settings.dataset_file_path();
    if !file_path.exists() {
        unzip_dataset(settings)?;
    }
    read_csv(&file_path)
}

/// Read a CSV file with a header row
pub fn read_csv(path: &Path) -> Result<DataFrame> {
    debug!("Reading CSV: {}", path.display());
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

/// Write a frame as CSV with a header row, creating parent directories
pub fn write_csv(df: &mut DataFrame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    Ok(())
}

/// One numeric column of `df` as `f64` values.
///
/// A missing column or a non-numeric dtype is a [`Error::TypeMismatch`];
/// null cells are an [`Error::InvalidInput`].
pub fn column_values(df: &DataFrame, column: &str) -> Result<Vec<f64>> {
    let series = df
        .column(column)
        .map_err(|_| Error::TypeMismatch(format!("missing feature column {column:?}")))?;
    if !series.dtype().is_numeric() {
        return Err(Error::TypeMismatch(format!(
            "column {column:?} has non-numeric dtype {}",
            series.dtype()
        )));
    }

    let values = series.cast(&DataType::Float64)?;
    values
        .f64()?
        .into_iter()
        .map(|v| {
            v.ok_or_else(|| Error::InvalidInput(format!("column {column:?} has missing values")))
        })
        .collect()
}

/// Build the feature matrix from named columns, ignoring any others
pub fn feature_matrix(df: &DataFrame, columns: &[String]) -> Result<Array2<f64>> {
    let values = columns
        .iter()
        .map(|c| column_values(df, c))
        .collect::<Result<Vec<_>>>()?;
    let rows = df.height();
    Ok(Array2::from_shape_fn((rows, columns.len()), |(i, j)| {
        values[j][i]
    }))
}

/// Target column as class labels
pub fn target_vector(df: &DataFrame, target: &str) -> Result<Array1<usize>> {
    let series = df
        .column(target)
        .map_err(|_| Error::InvalidInput(format!("missing target column {target:?}")))?;
    if !series.dtype().is_integer() && !series.dtype().is_bool() {
        return Err(Error::TypeMismatch(format!(
            "target column {target:?} must hold integer labels, got {}",
            series.dtype()
        )));
    }

    let labels = series.cast(&DataType::Int64)?;
    labels
        .i64()?
        .into_iter()
        .map(|v| match v {
            Some(label) if label >= 0 => Ok(label as usize),
            Some(label) => Err(Error::InvalidInput(format!(
                "negative label {label} in {target:?}"
            ))),
            None => Err(Error::InvalidInput(format!(
                "target column {target:?} has missing values"
            ))),
        })
        .collect()
}

/// Split a frame into a feature matrix and (optionally) a target vector
pub fn prepare_data(
    df: &DataFrame,
    feature_columns: &[String],
    target: Option<&str>,
) -> Result<(Array2<f64>, Option<Array1<usize>>)> {
    let x = feature_matrix(df, feature_columns)?;
    let y = target.map(|t| target_vector(df, t)).transpose()?;
    Ok((x, y))
}

/// Train/validation split of a prepared dataset
#[derive(Debug, Clone)]
pub struct SplitData {
    pub x_train: Array2<f64>,
    pub x_val: Array2<f64>,
    pub y_train: Array1<usize>,
    pub y_val: Array1<usize>,
}

/// Seeded shuffle split; the validation set gets `ceil(n * test_size)` rows
pub fn split_data(
    x: ArrayView2<f64>,
    y: ArrayView1<usize>,
    test_size: f64,
    seed: u64,
) -> Result<SplitData> {
    let n = x.nrows();
    if n != y.len() {
        return Err(Error::InvalidInput(format!(
            "features and targets must have same number of samples: {} vs {}",
            n,
            y.len()
        )));
    }

    let n_val = (n as f64 * test_size).ceil() as usize;
    if n_val == 0 || n_val >= n {
        return Err(Error::InvalidInput(format!(
            "test_size {test_size} leaves an empty split for {n} samples"
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let (val_idx, train_idx) = indices.split_at(n_val);

    Ok(SplitData {
        x_train: x.select(Axis(0), train_idx),
        x_val: x.select(Axis(0), val_idx),
        y_train: y.select(Axis(0), train_idx),
        y_val: y.select(Axis(0), val_idx),
    })
}
