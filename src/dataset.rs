//! Labelled training data read from the crop recommendation CSV.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::{collections::BTreeMap, path::Path};

use crate::error::ModelError;
use crate::features::{FEATURE_NAMES, N_FEATURES};

pub const LABEL_COLUMN: &str = "label";

#[derive(Debug, Clone)]
pub struct Dataset {
    pub rows: Vec<[f64; N_FEATURES]>,
    pub labels: Vec<String>,
}

/// Index sets produced by [`Dataset::stratified_split`].
#[derive(Debug, Clone)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl Dataset {
    /// Reads a CSV with a header row containing every feature column and a
    /// `label` column. Column order in the file does not matter.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let csv_err = |source| ModelError::Dataset {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
        let headers = reader.headers().map_err(csv_err)?.clone();
        let position = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| ModelError::MissingColumn(name.to_string()))
        };

        let mut columns = [0usize; N_FEATURES];
        for (slot, name) in columns.iter_mut().zip(FEATURE_NAMES) {
            *slot = position(name)?;
        }
        let label_col = position(LABEL_COLUMN)?;

        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            let line = record.position().map_or(0, |p| p.line());

            let mut row = [0.0; N_FEATURES];
            for ((slot, &col), name) in row.iter_mut().zip(columns.iter()).zip(FEATURE_NAMES) {
                let cell = record.get(col).unwrap_or("").trim();
                *slot = cell
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| ModelError::BadCell {
                        line,
                        column: name.to_string(),
                        value: cell.to_string(),
                    })?;
            }

            let label = record.get(label_col).unwrap_or("").trim();
            if label.is_empty() {
                return Err(ModelError::BadCell {
                    line,
                    column: LABEL_COLUMN.to_string(),
                    value: String::new(),
                });
            }
            rows.push(row);
            labels.push(label.to_string());
        }

        if rows.is_empty() {
            return Err(ModelError::EmptyDataset);
        }
        tracing::debug!("read {} rows from {}", rows.len(), path.display());
        Ok(Self { rows, labels })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sorted unique labels; a label's position is its class index.
    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.labels.clone();
        names.sort();
        names.dedup();
        names
    }

    /// Labels as class indices into [`Dataset::class_names`].
    pub fn encoded_labels(&self, class_names: &[String]) -> Result<Vec<usize>, ModelError> {
        self.labels
            .iter()
            .map(|l| {
                class_names
                    .binary_search(l)
                    .map_err(|_| ModelError::Inconsistent(format!("unknown label {:?}", l)))
            })
            .collect()
    }

    /// Per-class shuffled split so every crop keeps its share of the test set.
    ///
    /// Each class with at least two rows contributes `round(n * test_fraction)`
    /// rows (at least one) to the test set. A zero fraction holds nothing out.
    /// Deterministic for a given seed.
    pub fn stratified_split(&self, test_fraction: f64, seed: u64) -> Split {
        let mut by_class: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, label) in self.labels.iter().enumerate() {
            by_class.entry(label.as_str()).or_default().push(i);
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut train = Vec::with_capacity(self.len());
        let mut test = Vec::new();
        for (_, mut idx) in by_class {
            idx.shuffle(&mut rng);
            let n_test = if idx.len() < 2 || test_fraction <= 0.0 {
                0
            } else {
                ((idx.len() as f64 * test_fraction).round() as usize).clamp(1, idx.len() - 1)
            };
            test.extend_from_slice(&idx[..n_test]);
            train.extend_from_slice(&idx[n_test..]);
        }
        train.sort_unstable();
        test.sort_unstable();
        Split { train, test }
    }

    pub fn select(&self, indices: &[usize]) -> Vec<[f64; N_FEATURES]> {
        indices.iter().map(|&i| self.rows[i]).collect()
    }
}
