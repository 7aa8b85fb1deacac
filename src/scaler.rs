use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Per-feature standardization `z = (x - mean) / std`.
///
/// Fitted once on training rows and never changed afterwards. A feature with
/// zero spread is scaled by 1.0 so it only gets centred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl StandardScaler {
    pub fn fit<R: AsRef<[f64]>>(rows: &[R]) -> Result<Self, ModelError> {
        let first = rows.first().ok_or(ModelError::EmptyDataset)?;
        let n_features = first.as_ref().len();
        let n = rows.len() as f64;

        let mut mean = vec![0.0; n_features];
        for row in rows {
            let row = row.as_ref();
            if row.len() != n_features {
                return Err(ModelError::Dimension {
                    got: row.len(),
                    expected: n_features,
                });
            }
            for (m, x) in mean.iter_mut().zip(row) {
                *m += x;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        // Population variance (ddof = 0).
        let mut var = vec![0.0; n_features];
        for row in rows {
            for ((v, x), m) in var.iter_mut().zip(row.as_ref()).zip(&mean) {
                *v += (x - m) * (x - m);
            }
        }
        let std = var
            .into_iter()
            .map(|v| {
                let s = (v / n).sqrt();
                if s > f64::EPSILON {
                    s
                } else {
                    1.0
                }
            })
            .collect();

        Ok(Self { mean, std })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn std(&self) -> &[f64] {
        &self.std
    }

    pub fn transform(&self, x: &[f64]) -> Result<Vec<f64>, ModelError> {
        if x.len() != self.n_features() {
            return Err(ModelError::Dimension {
                got: x.len(),
                expected: self.n_features(),
            });
        }
        Ok(x
            .iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(x, (m, s))| (x - m) / s)
            .collect())
    }

    pub fn transform_rows<R: AsRef<[f64]>>(&self, rows: &[R]) -> Result<Vec<Vec<f64>>, ModelError> {
        rows.iter().map(|r| self.transform(r.as_ref())).collect()
    }
}
